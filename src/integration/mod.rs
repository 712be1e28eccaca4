//! Session layer wiring the conversation, exchanges and voice together

pub mod config;
pub mod events;
pub mod session;
pub mod voice;

pub use config::SessionConfig;
pub use events::{Notice, SessionEvent, SessionSnapshot};
pub use session::{SessionBuilder, SessionController};
pub use voice::{VoiceCoordinator, VoiceState};
