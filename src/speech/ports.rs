use crate::{EcoWiseError, Result};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Event reported by a speech capture port
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureEvent {
    /// Interim or final transcript of the current capture
    ///
    /// The text is cumulative: it replaces, not extends, the previous one.
    Transcript(String),

    /// Capture has stopped and no further transcript will follow
    Ended,

    /// Capture failed; `Ended` may or may not follow
    Error(String),
}

/// Event reported by a speech playback port
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackEvent {
    Finished(UtteranceId),
    Cancelled(UtteranceId),
    Failed { id: UtteranceId, error: String },
}

impl PlaybackEvent {
    pub fn utterance_id(&self) -> UtteranceId {
        match self {
            PlaybackEvent::Finished(id) | PlaybackEvent::Cancelled(id) => *id,
            PlaybackEvent::Failed { id, .. } => *id,
        }
    }
}

pub type CaptureCallback = Box<dyn Fn(CaptureEvent) + Send + Sync>;

pub type PlaybackCallback = Box<dyn Fn(PlaybackEvent) + Send + Sync>;

pub type UtteranceId = Uuid;

/// Voice parameters applied to every utterance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeechSettings {
    /// Speaking rate (1.0 = normal)
    pub rate: f32,

    /// Voice pitch (1.0 = normal)
    pub pitch: f32,

    /// Volume (0.0 to 1.0)
    pub volume: f32,

    /// Substring of the preferred voice name, if the platform offers a choice
    pub voice_hint: Option<String>,
}

impl Default for SpeechSettings {
    fn default() -> Self {
        Self {
            rate: 1.0,
            pitch: 1.0,
            volume: 1.0,
            voice_hint: Some("female".to_string()),
        }
    }
}

impl SpeechSettings {
    /// Set the speaking rate
    pub fn with_rate(mut self, rate: f32) -> Self {
        self.rate = rate.max(0.1);
        self
    }

    /// Set the volume, clamped to 0.0..=1.0
    pub fn with_volume(mut self, volume: f32) -> Self {
        self.volume = volume.clamp(0.0, 1.0);
        self
    }

    /// Set or clear the preferred voice
    pub fn with_voice_hint(mut self, hint: Option<String>) -> Self {
        self.voice_hint = hint;
        self
    }

    /// Whether a platform voice name matches the hint (case-insensitive)
    pub fn prefers_voice(&self, voice_name: &str) -> bool {
        self.voice_hint
            .as_deref()
            .map(|hint| voice_name.to_lowercase().contains(&hint.to_lowercase()))
            .unwrap_or(false)
    }
}

/// One spoken rendition of a text
#[derive(Debug, Clone, PartialEq)]
pub struct Utterance {
    pub id: UtteranceId,
    pub text: String,
    pub settings: SpeechSettings,
}

impl Utterance {
    pub fn new(text: impl Into<String>, settings: SpeechSettings) -> Self {
        Self {
            id: Uuid::new_v4(),
            text: text.into(),
            settings,
        }
    }
}

/// Speech capture capability
pub trait VoiceInputPort: Send + Sync {
    /// Whether the platform can capture speech at all
    fn is_supported(&self) -> bool;

    /// Register the single receiver of capture events, replacing any earlier one
    fn set_event_callback(&self, callback: CaptureCallback);

    fn start(&self) -> Result<()>;

    /// Finish the capture, keeping what was recognised so far
    fn stop(&self);

    /// Drop the capture without reporting further transcripts
    fn abort(&self);
}

/// Speech synthesis capability
pub trait VoiceOutputPort: Send + Sync {
    /// Whether the platform can synthesise speech at all
    fn is_supported(&self) -> bool;

    /// Register the single receiver of playback events, replacing any earlier one
    fn set_event_callback(&self, callback: PlaybackCallback);

    fn speak(&self, utterance: Utterance) -> Result<()>;

    /// Cancel whatever is being spoken
    fn cancel(&self);

    fn is_speaking(&self) -> bool;
}

/// Capture port for platforms without speech recognition
#[derive(Debug, Default, Clone, Copy)]
pub struct UnsupportedInput;

impl VoiceInputPort for UnsupportedInput {
    fn is_supported(&self) -> bool {
        false
    }

    fn set_event_callback(&self, _callback: CaptureCallback) {}

    fn start(&self) -> Result<()> {
        Err(EcoWiseError::Unsupported("Speech recognition".into()))
    }

    fn stop(&self) {}

    fn abort(&self) {}
}

/// Playback port for platforms without speech synthesis
#[derive(Debug, Default, Clone, Copy)]
pub struct UnsupportedOutput;

impl VoiceOutputPort for UnsupportedOutput {
    fn is_supported(&self) -> bool {
        false
    }

    fn set_event_callback(&self, _callback: PlaybackCallback) {}

    fn speak(&self, _utterance: Utterance) -> Result<()> {
        Err(EcoWiseError::Unsupported("Speech output".into()))
    }

    fn cancel(&self) {}

    fn is_speaking(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = SpeechSettings::default();
        assert_eq!(settings.rate, 1.0);
        assert_eq!(settings.pitch, 1.0);
        assert_eq!(settings.volume, 1.0);
    }

    #[test]
    fn test_voice_hint_matching() {
        let settings = SpeechSettings::default();
        assert!(settings.prefers_voice("Google UK English Female"));
        assert!(!settings.prefers_voice("Daniel"));

        let settings = settings.with_voice_hint(None);
        assert!(!settings.prefers_voice("Samantha Female"));
    }

    #[test]
    fn test_settings_clamping() {
        let settings = SpeechSettings::default().with_volume(3.0).with_rate(0.0);
        assert_eq!(settings.volume, 1.0);
        assert_eq!(settings.rate, 0.1);
    }

    #[test]
    fn test_unsupported_ports() {
        assert!(!UnsupportedInput.is_supported());
        assert!(matches!(
            UnsupportedInput.start(),
            Err(EcoWiseError::Unsupported(_))
        ));

        let output = UnsupportedOutput;
        assert!(!output.is_supported());
        assert!(output.speak(Utterance::new("hi", SpeechSettings::default())).is_err());
        assert!(!output.is_speaking());
    }

    #[test]
    fn test_playback_event_ids() {
        let id = Uuid::new_v4();
        assert_eq!(PlaybackEvent::Finished(id).utterance_id(), id);
        assert_eq!(
            PlaybackEvent::Failed {
                id,
                error: "x".into()
            }
            .utterance_id(),
            id
        );
    }
}
