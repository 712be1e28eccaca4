use super::types::{Message, MessageId};
use parking_lot::RwLock;
use std::sync::Arc;

/// Ordered, append-only list of messages shared between the session and
/// the exchange read loop.
///
/// Only the message currently being streamed is ever changed after it was
/// added, and only by appending to its text.
#[derive(Debug, Clone)]
pub struct Conversation {
    messages: Arc<RwLock<Vec<Message>>>,
}

impl Conversation {
    pub fn new() -> Self {
        Self {
            messages: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub fn add(&self, message: Message) {
        self.messages.write().push(message);
    }

    /// Append `delta` to the text of message `id`, returning the updated text
    pub fn append_text(&self, id: MessageId, delta: &str) -> Option<String> {
        let mut messages = self.messages.write();
        // The streaming message is almost always the last one
        let message = messages.iter_mut().rev().find(|m| m.id == id)?;
        message.text.push_str(delta);
        Some(message.text.clone())
    }

    pub fn get_all(&self) -> Vec<Message> {
        self.messages.read().clone()
    }

    pub fn last(&self) -> Option<Message> {
        self.messages.read().last().cloned()
    }

    pub fn len(&self) -> usize {
        self.messages.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.read().is_empty()
    }
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new()
    }
}
