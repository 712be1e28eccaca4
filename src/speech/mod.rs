//! Voice capability ports
//!
//! Speech capture and speech synthesis are platform capabilities the
//! session does not own. They are injected as [`VoiceInputPort`] and
//! [`VoiceOutputPort`] implementations, each reporting events through a
//! single registered callback.

pub mod ports;

pub use ports::{
    CaptureCallback, CaptureEvent, PlaybackCallback, PlaybackEvent, SpeechSettings,
    UnsupportedInput, UnsupportedOutput, Utterance, UtteranceId, VoiceInputPort,
    VoiceOutputPort,
};
