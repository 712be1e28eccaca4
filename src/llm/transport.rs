//! Transport seam between the exchange engine and the completion endpoint

use crate::llm::config::EndpointConfig;
use crate::llm::request::ChatRequest;
use crate::{EcoWiseError, Result};
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use reqwest::header::CONTENT_TYPE;
use tracing::{debug, error};

/// Raw response body, as chunks in arrival order
pub type ByteStream = BoxStream<'static, Result<Vec<u8>>>;

/// Something that can carry one chat request and hand back its body
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Send `request` and resolve once a successful response has started
    ///
    /// Connection failures and non-success statuses are reported as
    /// `EcoWiseError::Transport`. Errors while reading the body are yielded
    /// by the returned stream.
    async fn open(&self, request: &ChatRequest) -> Result<ByteStream>;
}

/// HTTP transport posting to the configured endpoint with reqwest
pub struct HttpTransport {
    client: reqwest::Client,
    config: EndpointConfig,
}

impl HttpTransport {
    pub fn new(config: EndpointConfig) -> Result<Self> {
        config.validate()?;

        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| EcoWiseError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    /// Prepare the POST for `request` without sending it
    pub fn build_request(&self, request: &ChatRequest) -> reqwest::RequestBuilder {
        let mut builder = self
            .client
            .post(&self.config.endpoint_url)
            .header(CONTENT_TYPE, "application/json")
            .header("HTTP-Referer", &self.config.referer)
            .header("X-Title", &self.config.app_title)
            .json(request);

        if let Some(api_key) = &self.config.api_key {
            builder = builder.bearer_auth(api_key);
        }

        builder
    }
}

#[async_trait]
impl ChatTransport for HttpTransport {
    async fn open(&self, request: &ChatRequest) -> Result<ByteStream> {
        debug!(
            "POST {} with {} messages",
            self.config.endpoint_url,
            request.messages.len()
        );

        let response = self
            .build_request(request)
            .send()
            .await
            .map_err(|e| EcoWiseError::Transport(format!("Request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            error!("API request failed with status {}", status);
            return Err(EcoWiseError::Transport(format!(
                "API request failed with status {}",
                status
            )));
        }

        let body = response.bytes_stream().map(|chunk| {
            chunk
                .map(|bytes| bytes.to_vec())
                .map_err(|e| EcoWiseError::Stream(format!("Failed to read response body: {}", e)))
        });

        Ok(body.boxed())
    }
}
