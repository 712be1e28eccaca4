//! Streaming chat-completion client
//!
//! - **config**: endpoint URL, credential and timeouts
//! - **prompts**: the fixed request template and canned texts
//! - **request**: outbound request body
//! - **decoder**: line-delimited response stream to ordered events
//! - **transport**: the seam to the endpoint, plus the reqwest implementation
//! - **exchange**: single-flight request/response lifecycle

pub mod config;
pub mod decoder;
pub mod exchange;
pub mod prompts;
pub mod request;
pub mod transport;

pub use config::EndpointConfig;
pub use decoder::{decode_stream, StreamDecoder, StreamEvent};
pub use exchange::{
    ExchangeEngine, ExchangeHandle, ExchangeObserver, ExchangeOutcome, ExchangeState,
    NoopObserver,
};
pub use request::{ChatMessage, ChatRequest, ChatRole};
pub use transport::{ByteStream, ChatTransport, HttpTransport};
