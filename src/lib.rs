pub mod integration;
pub mod llm;
pub mod messages;
pub mod speech;
pub mod utils;

use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum EcoWiseError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Capture error: {0}")]
    Capture(String),

    #[error("Playback error: {0}")]
    Playback(String),

    #[error("Unsupported capability: {0}")]
    Unsupported(String),

    #[error("Channel error: {0}")]
    Channel(String),
}

impl From<reqwest::Error> for EcoWiseError {
    fn from(e: reqwest::Error) -> Self {
        EcoWiseError::Transport(e.to_string())
    }
}

impl EcoWiseError {
    /// Get a user-friendly description
    pub fn user_message(&self) -> String {
        match self {
            EcoWiseError::Transport(_) | EcoWiseError::Stream(_) => {
                "Could not reach the assistant. Please check your network connection.".to_string()
            }
            EcoWiseError::Config(_) => {
                "Configuration error. Please check your API key and endpoint.".to_string()
            }
            EcoWiseError::Capture(_) => "Speech recognition failed. Please try again.".to_string(),
            EcoWiseError::Playback(_) => {
                "Speech output failed. Responses will be shown as text.".to_string()
            }
            EcoWiseError::Unsupported(what) => format!("{} is not supported on this system.", what),
            EcoWiseError::Channel(_) => {
                "Internal communication error. Please restart the application.".to_string()
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, EcoWiseError>;
