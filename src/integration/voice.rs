//! Voice coordination between the capture and playback ports
//!
//! Owns the voice flags, the pending input buffer fed by capture transcripts
//! and the id of the utterance currently being spoken. Port callbacks hold a
//! weak reference, so a late event after the session is gone is dropped.

use crate::integration::events::{Notice, SessionEvent};
use crate::speech::{
    CaptureEvent, PlaybackEvent, SpeechSettings, Utterance, UtteranceId, VoiceInputPort,
    VoiceOutputPort,
};
use crate::utils::EventBus;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Weak};
use tracing::{debug, error, info, warn};

/// Voice flags visible to the presentation layer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceState {
    pub capture_active: bool,
    pub playback_active: bool,
    pub output_enabled: bool,
}

#[derive(Debug, Default)]
struct VoiceInner {
    state: VoiceState,
    pending_input: String,
    utterance: Option<UtteranceId>,
    closed: bool,
}

pub struct VoiceCoordinator {
    input: Arc<dyn VoiceInputPort>,
    output: Arc<dyn VoiceOutputPort>,
    settings: SpeechSettings,
    inner: Mutex<VoiceInner>,
    events: EventBus<SessionEvent>,
}

impl VoiceCoordinator {
    /// Create the coordinator and register it as the receiver of both ports
    pub fn new(
        input: Arc<dyn VoiceInputPort>,
        output: Arc<dyn VoiceOutputPort>,
        settings: SpeechSettings,
        output_enabled: bool,
        events: EventBus<SessionEvent>,
    ) -> Arc<Self> {
        let output_enabled = output_enabled && output.is_supported();
        let coordinator = Arc::new(Self {
            input,
            output,
            settings,
            inner: Mutex::new(VoiceInner {
                state: VoiceState {
                    output_enabled,
                    ..Default::default()
                },
                ..Default::default()
            }),
            events,
        });

        let weak: Weak<Self> = Arc::downgrade(&coordinator);
        coordinator.input.set_event_callback(Box::new(move |event| {
            if let Some(coordinator) = weak.upgrade() {
                coordinator.handle_capture_event(event);
            }
        }));

        let weak: Weak<Self> = Arc::downgrade(&coordinator);
        coordinator.output.set_event_callback(Box::new(move |event| {
            if let Some(coordinator) = weak.upgrade() {
                coordinator.handle_playback_event(event);
            }
        }));

        coordinator
    }

    pub fn state(&self) -> VoiceState {
        self.inner.lock().state
    }

    pub fn pending_input(&self) -> String {
        self.inner.lock().pending_input.clone()
    }

    /// Empty the pending input buffer
    pub fn clear_pending_input(&self) {
        let changed = {
            let mut inner = self.inner.lock();
            let changed = !inner.pending_input.is_empty();
            inner.pending_input.clear();
            changed
        };
        if changed {
            self.events
                .emit(SessionEvent::PendingInputChanged(String::new()));
        }
    }

    /// Start or stop capture
    ///
    /// Stopping returns the captured text when it is worth submitting.
    pub fn toggle_capture(&self) -> Option<String> {
        if !self.input.is_supported() {
            info!("Capture requested but not supported");
            self.events
                .emit(SessionEvent::Notice(Notice::CaptureUnsupported));
            return None;
        }

        let active = {
            let inner = self.inner.lock();
            if inner.closed {
                return None;
            }
            inner.state.capture_active
        };

        if active {
            self.stop_capture()
        } else {
            self.start_capture();
            None
        }
    }

    fn start_capture(&self) {
        {
            let mut inner = self.inner.lock();
            inner.pending_input.clear();
            inner.state.capture_active = true;
        }
        self.events
            .emit(SessionEvent::PendingInputChanged(String::new()));
        self.events.emit(SessionEvent::CaptureChanged(true));

        if let Err(e) = self.input.start() {
            error!("Failed to start capture: {}", e);
            let was_active = {
                let mut inner = self.inner.lock();
                std::mem::replace(&mut inner.state.capture_active, false)
            };
            if was_active {
                self.events.emit(SessionEvent::CaptureChanged(false));
            }
            self.events
                .emit(SessionEvent::Notice(Notice::CaptureFailed(e.user_message())));
            return;
        }

        debug!("Capture started");
    }

    fn stop_capture(&self) -> Option<String> {
        self.input.stop();

        let (was_active, text) = {
            let mut inner = self.inner.lock();
            let was_active = std::mem::replace(&mut inner.state.capture_active, false);
            (was_active, inner.pending_input.clone())
        };
        if was_active {
            self.events.emit(SessionEvent::CaptureChanged(false));
        }

        debug!("Capture stopped with {} chars", text.len());
        if text.trim().is_empty() {
            None
        } else {
            Some(text)
        }
    }

    fn handle_capture_event(&self, event: CaptureEvent) {
        match event {
            CaptureEvent::Transcript(text) => {
                {
                    let mut inner = self.inner.lock();
                    if inner.closed || !inner.state.capture_active {
                        debug!("Dropping transcript outside capture");
                        return;
                    }
                    inner.pending_input = text.clone();
                }
                self.events.emit(SessionEvent::PendingInputChanged(text));
            }
            CaptureEvent::Ended => {
                if self.end_capture() {
                    debug!("Capture ended by the port");
                }
            }
            CaptureEvent::Error(reason) => {
                error!("Speech recognition error: {}", reason);
                self.end_capture();
                self.events
                    .emit(SessionEvent::Notice(Notice::CaptureFailed(reason)));
            }
        }
    }

    fn end_capture(&self) -> bool {
        let was_active = {
            let mut inner = self.inner.lock();
            std::mem::replace(&mut inner.state.capture_active, false)
        };
        if was_active {
            self.events.emit(SessionEvent::CaptureChanged(false));
        }
        was_active
    }

    /// Flip spoken output; turning it off silences any playback
    pub fn toggle_output(&self) {
        let enabling = !self.inner.lock().state.output_enabled;
        if enabling && !self.output.is_supported() {
            info!("Output requested but not supported");
            self.events
                .emit(SessionEvent::Notice(Notice::PlaybackUnsupported));
            return;
        }

        let (enabled, interrupted) = {
            let mut inner = self.inner.lock();
            inner.state.output_enabled = !inner.state.output_enabled;
            let interrupted = inner.utterance.take();
            inner.state.playback_active = false;
            (inner.state.output_enabled, interrupted)
        };

        info!("Spoken output {}", if enabled { "enabled" } else { "disabled" });
        self.events.emit(SessionEvent::OutputToggled(enabled));

        if interrupted.is_some() || self.output.is_speaking() {
            self.output.cancel();
        }
        if interrupted.is_some() {
            self.events.emit(SessionEvent::PlaybackChanged(false));
        }
    }

    /// Speak `text` if output is enabled
    pub fn speak_if_enabled(&self, text: &str) {
        if self.inner.lock().state.output_enabled {
            self.speak(text);
        }
    }

    /// Speak `text`, interrupting whatever is playing
    pub fn speak(&self, text: &str) {
        if !self.output.is_supported() || text.trim().is_empty() {
            return;
        }

        let utterance = Utterance::new(text, self.settings.clone());
        let id = utterance.id;

        let previous = {
            let mut inner = self.inner.lock();
            if inner.closed {
                return;
            }
            inner.state.playback_active = true;
            inner.utterance.replace(id)
        };

        if previous.is_some() || self.output.is_speaking() {
            self.output.cancel();
        }
        if previous.is_none() {
            self.events.emit(SessionEvent::PlaybackChanged(true));
        }

        debug!("Speaking utterance {} ({} chars)", id, text.len());
        if let Err(e) = self.output.speak(utterance) {
            warn!("Failed to speak utterance {}: {}", id, e);
            self.release_utterance(id);
        }
    }

    fn handle_playback_event(&self, event: PlaybackEvent) {
        if let PlaybackEvent::Failed { id, error } = &event {
            warn!("Playback of utterance {} failed: {}", id, error);
        }

        if !self.release_utterance(event.utterance_id()) {
            debug!("Ignoring stale playback event {:?}", event);
        }
    }

    /// Clear playback if `id` is still the current utterance
    fn release_utterance(&self, id: UtteranceId) -> bool {
        {
            let mut inner = self.inner.lock();
            if inner.utterance != Some(id) {
                return false;
            }
            inner.utterance = None;
            inner.state.playback_active = false;
        }
        self.events.emit(SessionEvent::PlaybackChanged(false));
        true
    }

    /// Stop all voice activity for good
    pub fn shutdown(&self) {
        let (capturing, speaking) = {
            let mut inner = self.inner.lock();
            if inner.closed {
                return;
            }
            inner.closed = true;
            let capturing = std::mem::replace(&mut inner.state.capture_active, false);
            inner.state.playback_active = false;
            (capturing, inner.utterance.take().is_some())
        };

        if capturing {
            self.input.abort();
        }
        if speaking || self.output.is_speaking() {
            self.output.cancel();
        }
        debug!("Voice coordinator shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::speech::{CaptureCallback, PlaybackCallback, UnsupportedInput, UnsupportedOutput};
    use crate::Result;

    #[derive(Default)]
    struct FakeInput {
        callback: Mutex<Option<CaptureCallback>>,
        starts: Mutex<usize>,
    }

    impl FakeInput {
        fn fire(&self, event: CaptureEvent) {
            if let Some(callback) = self.callback.lock().as_ref() {
                callback(event);
            }
        }
    }

    impl VoiceInputPort for FakeInput {
        fn is_supported(&self) -> bool {
            true
        }

        fn set_event_callback(&self, callback: CaptureCallback) {
            *self.callback.lock() = Some(callback);
        }

        fn start(&self) -> Result<()> {
            *self.starts.lock() += 1;
            Ok(())
        }

        fn stop(&self) {}

        fn abort(&self) {}
    }

    #[derive(Default)]
    struct FakeOutput {
        callback: Mutex<Option<PlaybackCallback>>,
        spoken: Mutex<Vec<Utterance>>,
        cancels: Mutex<usize>,
    }

    impl FakeOutput {
        fn fire(&self, event: PlaybackEvent) {
            if let Some(callback) = self.callback.lock().as_ref() {
                callback(event);
            }
        }
    }

    impl VoiceOutputPort for FakeOutput {
        fn is_supported(&self) -> bool {
            true
        }

        fn set_event_callback(&self, callback: PlaybackCallback) {
            *self.callback.lock() = Some(callback);
        }

        fn speak(&self, utterance: Utterance) -> Result<()> {
            self.spoken.lock().push(utterance);
            Ok(())
        }

        fn cancel(&self) {
            *self.cancels.lock() += 1;
        }

        fn is_speaking(&self) -> bool {
            false
        }
    }

    fn coordinator(
        input: Arc<FakeInput>,
        output: Arc<FakeOutput>,
        output_enabled: bool,
    ) -> Arc<VoiceCoordinator> {
        VoiceCoordinator::new(
            input,
            output,
            SpeechSettings::default(),
            output_enabled,
            EventBus::new(),
        )
    }

    #[test]
    fn test_transcripts_overwrite_pending_input() {
        let input = Arc::new(FakeInput::default());
        let voice = coordinator(Arc::clone(&input), Arc::new(FakeOutput::default()), false);

        assert!(voice.toggle_capture().is_none());
        assert!(voice.state().capture_active);

        input.fire(CaptureEvent::Transcript("is glass".into()));
        input.fire(CaptureEvent::Transcript("is glass recyclable".into()));
        assert_eq!(voice.pending_input(), "is glass recyclable");

        assert_eq!(voice.toggle_capture().as_deref(), Some("is glass recyclable"));
        assert!(!voice.state().capture_active);
    }

    #[test]
    fn test_transcript_is_submitted_verbatim() {
        let input = Arc::new(FakeInput::default());
        let voice = coordinator(Arc::clone(&input), Arc::new(FakeOutput::default()), false);

        voice.toggle_capture();
        input.fire(CaptureEvent::Transcript(" compost bins ".into()));
        assert_eq!(voice.toggle_capture().as_deref(), Some(" compost bins "));
    }

    #[test]
    fn test_stop_with_blank_transcript_submits_nothing() {
        let input = Arc::new(FakeInput::default());
        let voice = coordinator(Arc::clone(&input), Arc::new(FakeOutput::default()), false);

        voice.toggle_capture();
        input.fire(CaptureEvent::Transcript("   ".into()));
        assert!(voice.toggle_capture().is_none());
    }

    #[test]
    fn test_capture_error_clears_flag() {
        let input = Arc::new(FakeInput::default());
        let voice = coordinator(Arc::clone(&input), Arc::new(FakeOutput::default()), false);
        let events = voice.events.subscribe();

        voice.toggle_capture();
        input.fire(CaptureEvent::Error("no-speech".into()));

        assert!(!voice.state().capture_active);
        let notices: Vec<_> = events
            .try_iter()
            .filter(|e| matches!(e, SessionEvent::Notice(_)))
            .collect();
        assert_eq!(
            notices,
            vec![SessionEvent::Notice(Notice::CaptureFailed("no-speech".into()))]
        );
    }

    #[test]
    fn test_unsupported_ports() {
        let voice = VoiceCoordinator::new(
            Arc::new(UnsupportedInput),
            Arc::new(UnsupportedOutput),
            SpeechSettings::default(),
            true,
            EventBus::new(),
        );
        let events = voice.events.subscribe();

        assert!(!voice.state().output_enabled);
        assert!(voice.toggle_capture().is_none());
        voice.toggle_output();

        assert_eq!(voice.state(), VoiceState::default());
        assert_eq!(
            events.try_iter().collect::<Vec<_>>(),
            vec![
                SessionEvent::Notice(Notice::CaptureUnsupported),
                SessionEvent::Notice(Notice::PlaybackUnsupported),
            ]
        );
    }

    #[test]
    fn test_new_utterance_cancels_previous() {
        let output = Arc::new(FakeOutput::default());
        let voice = coordinator(Arc::new(FakeInput::default()), Arc::clone(&output), true);

        voice.speak("first");
        voice.speak("second");
        assert_eq!(*output.cancels.lock(), 1);

        let spoken = output.spoken.lock().clone();
        assert_eq!(spoken.len(), 2);

        // The cancellation of the first utterance arrives late
        output.fire(PlaybackEvent::Cancelled(spoken[0].id));
        assert!(voice.state().playback_active);

        output.fire(PlaybackEvent::Finished(spoken[1].id));
        assert!(!voice.state().playback_active);
    }

    #[test]
    fn test_disabling_output_cancels_playback() {
        let output = Arc::new(FakeOutput::default());
        let voice = coordinator(Arc::new(FakeInput::default()), Arc::clone(&output), true);

        voice.speak("a long answer");
        assert!(voice.state().playback_active);

        voice.toggle_output();
        let state = voice.state();
        assert!(!state.output_enabled);
        assert!(!state.playback_active);
        assert_eq!(*output.cancels.lock(), 1);

        voice.speak_if_enabled("ignored");
        assert_eq!(output.spoken.lock().len(), 1);
    }

    #[test]
    fn test_callbacks_outliving_coordinator() {
        let input = Arc::new(FakeInput::default());
        let voice = coordinator(Arc::clone(&input), Arc::new(FakeOutput::default()), false);
        drop(voice);

        input.fire(CaptureEvent::Transcript("late".into()));
    }
}
