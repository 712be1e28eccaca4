pub mod conversation;
pub mod types;

pub use conversation::Conversation;
pub use types::{Message, MessageId, Sender};
