//! Outbound chat-completion request body

use crate::llm::prompts::{MODEL_ID, SYSTEM_PROMPT};
use crate::messages::{Message, Sender};
use serde::{Deserialize, Serialize};

/// Role of a message in the request
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

impl From<Sender> for ChatRole {
    fn from(sender: Sender) -> Self {
        match sender {
            Sender::User => ChatRole::User,
            Sender::Assistant => ChatRole::Assistant,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Body of the streaming chat-completion request
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub stream: bool,
}

impl ChatRequest {
    /// Build the request for a new user turn
    ///
    /// `history` is the conversation as it stood before `user_text` was
    /// submitted; it is sent in order after the system directive, and the
    /// new text comes last.
    pub fn for_turn(history: &[Message], user_text: &str) -> Self {
        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(ChatMessage::new(ChatRole::System, SYSTEM_PROMPT));
        messages.extend(
            history
                .iter()
                .map(|m| ChatMessage::new(m.sender.into(), m.text.clone())),
        );
        messages.push(ChatMessage::new(ChatRole::User, user_text));

        Self {
            model: MODEL_ID.to_string(),
            messages,
            stream: true,
        }
    }
}
