//! Notifications published to the presentation layer

use crate::integration::voice::VoiceState;
use crate::llm::ExchangeState;
use crate::messages::{Message, MessageId};

/// One-shot, user-visible notice
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    CaptureUnsupported,
    PlaybackUnsupported,
    CaptureFailed(String),
}

impl Notice {
    pub fn text(&self) -> String {
        match self {
            Notice::CaptureUnsupported => {
                "Speech recognition is not supported on this system.".to_string()
            }
            Notice::PlaybackUnsupported => "Speech output is not supported on this system.".to_string(),
            Notice::CaptureFailed(reason) => format!("Speech recognition stopped: {}", reason),
        }
    }
}

/// Change in the observable session state
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    MessageAppended(Message),

    /// The streaming message grew; `text` is its full text so far
    MessageUpdated { id: MessageId, text: String },

    ExchangeStateChanged(ExchangeState),

    CaptureChanged(bool),

    PendingInputChanged(String),

    OutputToggled(bool),

    PlaybackChanged(bool),

    Notice(Notice),
}

/// Point-in-time copy of the session state
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub messages: Vec<Message>,
    pub exchange_state: ExchangeState,
    pub voice: VoiceState,
    pub pending_input: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notice_text() {
        assert!(Notice::CaptureUnsupported.text().contains("not supported"));
        assert!(Notice::CaptureFailed("no-speech".into())
            .text()
            .contains("no-speech"));
    }
}
