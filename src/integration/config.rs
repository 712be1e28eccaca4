//! Configuration for a chat session
//!
//! Bundles the endpoint settings with the session-level defaults.

use crate::llm::config::EndpointConfig;
use crate::llm::prompts::GREETING;
use crate::speech::SpeechSettings;
use crate::Result;

/// Configuration for one session
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Completion endpoint settings
    pub endpoint: EndpointConfig,

    /// Assistant message the conversation starts with
    pub greeting: Option<String>,

    /// Whether spoken output starts enabled
    pub output_enabled: bool,

    /// Voice parameters for spoken output
    pub speech: SpeechSettings,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            endpoint: EndpointConfig::default(),
            greeting: Some(GREETING.to_string()),
            output_enabled: false,
            speech: SpeechSettings::default(),
        }
    }
}

impl SessionConfig {
    /// Default session settings with the endpoint taken from the environment
    pub fn from_env() -> Self {
        Self {
            endpoint: EndpointConfig::from_env(),
            ..Default::default()
        }
    }

    /// Set the endpoint configuration
    pub fn with_endpoint(mut self, endpoint: EndpointConfig) -> Self {
        self.endpoint = endpoint;
        self
    }

    /// Replace the greeting
    pub fn with_greeting(mut self, greeting: impl Into<String>) -> Self {
        self.greeting = Some(greeting.into());
        self
    }

    /// Start with an empty conversation
    pub fn without_greeting(mut self) -> Self {
        self.greeting = None;
        self
    }

    /// Enable or disable spoken output at start
    pub fn with_output_enabled(mut self, enabled: bool) -> Self {
        self.output_enabled = enabled;
        self
    }

    /// Set the voice parameters
    pub fn with_speech(mut self, speech: SpeechSettings) -> Self {
        self.speech = speech;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.endpoint.validate()
    }
}
