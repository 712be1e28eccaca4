//! Endpoint configuration for the chat-completion service

use crate::{EcoWiseError, Result};
use std::time::Duration;

/// Default chat-completion endpoint
pub const DEFAULT_ENDPOINT: &str = "https://openrouter.ai/api/v1/chat/completions";

/// Environment variable holding the bearer credential
pub const API_KEY_ENV: &str = "OPENROUTER_API_KEY";

/// Configuration for reaching the completion endpoint
#[derive(Clone)]
pub struct EndpointConfig {
    /// Full URL the request is POSTed to
    pub endpoint_url: String,

    /// Bearer credential, supplied from outside the session
    pub api_key: Option<String>,

    /// Value of the origin-identifying `HTTP-Referer` header
    pub referer: String,

    /// Value of the `X-Title` header
    pub app_title: String,

    /// Timeout for establishing the connection
    pub connect_timeout: Duration,

    /// Longest gap allowed between two decoded stream events
    ///
    /// Lines that decode to nothing, such as keep-alive comments, do not
    /// reset it.
    pub idle_timeout: Duration,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            endpoint_url: DEFAULT_ENDPOINT.to_string(),
            api_key: None,
            referer: "http://localhost".to_string(),
            app_title: "EcoWise Assistant".to_string(),
            connect_timeout: Duration::from_secs(10),
            idle_timeout: Duration::from_secs(120),
        }
    }
}

// Hand-written so the credential never ends up in logs
impl std::fmt::Debug for EndpointConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EndpointConfig")
            .field("endpoint_url", &self.endpoint_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("referer", &self.referer)
            .field("app_title", &self.app_title)
            .field("connect_timeout", &self.connect_timeout)
            .field("idle_timeout", &self.idle_timeout)
            .finish()
    }
}

impl EndpointConfig {
    /// Build a configuration from the process environment
    ///
    /// Reads `OPENROUTER_API_KEY`, and optionally `ECOWISE_ENDPOINT` and
    /// `ECOWISE_REFERER`. Missing variables fall back to the defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(key) = std::env::var(API_KEY_ENV) {
            if !key.trim().is_empty() {
                config.api_key = Some(key);
            }
        }
        if let Ok(url) = std::env::var("ECOWISE_ENDPOINT") {
            config.endpoint_url = url;
        }
        if let Ok(referer) = std::env::var("ECOWISE_REFERER") {
            config.referer = referer;
        }
        config
    }

    /// Set the bearer credential
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Set the endpoint URL
    pub fn with_endpoint(mut self, url: impl Into<String>) -> Self {
        self.endpoint_url = url.into();
        self
    }

    /// Set the origin header value
    pub fn with_referer(mut self, referer: impl Into<String>) -> Self {
        self.referer = referer.into();
        self
    }

    /// Set the stream idle timeout
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        match &self.api_key {
            Some(key) if !key.trim().is_empty() => {}
            _ => {
                return Err(EcoWiseError::Config(format!(
                    "API key is required (set {})",
                    API_KEY_ENV
                )))
            }
        }

        reqwest::Url::parse(&self.endpoint_url).map_err(|e| {
            EcoWiseError::Config(format!("Invalid endpoint URL {}: {}", self.endpoint_url, e))
        })?;

        if self.idle_timeout.is_zero() {
            return Err(EcoWiseError::Config("Idle timeout must be positive".into()));
        }

        Ok(())
    }
}
