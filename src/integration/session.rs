//! Session controller: the single entry point for the presentation layer
//!
//! Ties the conversation, the exchange engine and the voice coordinator
//! together. Every state change is published as a [`SessionEvent`]; the
//! current state can also be read back with [`SessionController::snapshot`].

use crate::integration::config::SessionConfig;
use crate::integration::events::{SessionEvent, SessionSnapshot};
use crate::integration::voice::{VoiceCoordinator, VoiceState};
use crate::llm::{
    ChatTransport, ExchangeEngine, ExchangeHandle, ExchangeObserver, ExchangeOutcome,
    ExchangeState, HttpTransport,
};
use crate::messages::{Conversation, Message, MessageId};
use crate::speech::{UnsupportedInput, UnsupportedOutput, VoiceInputPort, VoiceOutputPort};
use crate::utils::EventBus;
use crate::{EcoWiseError, Result};
use crossbeam_channel::Receiver;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::runtime::Handle;
use tracing::{debug, info, warn};
use uuid::Uuid;

struct SessionShared {
    conversation: Conversation,
    engine: ExchangeEngine,
    voice: Arc<VoiceCoordinator>,
    events: EventBus<SessionEvent>,
    submit_lock: Mutex<()>,
    current: Mutex<Option<ExchangeHandle>>,
    closed: AtomicBool,
}

impl SessionShared {
    fn submit_user_text(&self, text: &str) -> Option<ExchangeHandle> {
        if self.closed.load(Ordering::SeqCst) {
            return None;
        }
        if text.trim().is_empty() {
            debug!("Ignoring empty submission");
            return None;
        }

        let _guard = self.submit_lock.lock();
        if !self.engine.is_idle() {
            debug!("Ignoring submission while {:?}", self.engine.state());
            return None;
        }

        let history = self.conversation.get_all();
        let message = Message::user(text);
        self.conversation.add(message.clone());
        self.events.emit(SessionEvent::MessageAppended(message));
        self.voice.clear_pending_input();

        let handle = self.engine.submit(history, text);
        match &handle {
            Some(handle) => *self.current.lock() = Some(handle.clone()),
            None => warn!("Engine refused a submission while idle"),
        }
        handle
    }

    fn on_exchange_finished(&self) {
        if self.closed.load(Ordering::SeqCst) || !self.engine.is_idle() {
            return;
        }

        match self.conversation.last() {
            Some(last) if last.is_assistant() => self.voice.speak_if_enabled(&last.text),
            _ => {}
        }
    }
}

/// Forwards engine notifications into the session
struct SessionObserver {
    shared: Weak<SessionShared>,
    events: EventBus<SessionEvent>,
}

impl ExchangeObserver for SessionObserver {
    fn state_changed(&self, state: ExchangeState) {
        self.events.emit(SessionEvent::ExchangeStateChanged(state));
    }

    fn message_appended(&self, message: &Message) {
        self.events
            .emit(SessionEvent::MessageAppended(message.clone()));
    }

    fn message_updated(&self, id: MessageId, text: &str) {
        self.events.emit(SessionEvent::MessageUpdated {
            id,
            text: text.to_string(),
        });
    }

    fn exchange_finished(&self, exchange_id: Uuid, outcome: &ExchangeOutcome) {
        debug!("Exchange {} finished: {:?}", exchange_id, outcome);
        if let Some(shared) = self.shared.upgrade() {
            shared.on_exchange_finished();
        }
    }
}

/// Builder for creating a session
pub struct SessionBuilder {
    config: SessionConfig,
    transport: Option<Arc<dyn ChatTransport>>,
    input: Arc<dyn VoiceInputPort>,
    output: Arc<dyn VoiceOutputPort>,
    runtime: Option<Handle>,
}

impl SessionBuilder {
    pub fn new() -> Self {
        Self {
            config: SessionConfig::default(),
            transport: None,
            input: Arc::new(UnsupportedInput),
            output: Arc::new(UnsupportedOutput),
            runtime: None,
        }
    }

    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Use `transport` instead of HTTP to the configured endpoint
    pub fn with_transport(mut self, transport: Arc<dyn ChatTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn with_voice_input(mut self, input: Arc<dyn VoiceInputPort>) -> Self {
        self.input = input;
        self
    }

    pub fn with_voice_output(mut self, output: Arc<dyn VoiceOutputPort>) -> Self {
        self.output = output;
        self
    }

    /// Runtime that exchanges are spawned on (default: the current one)
    pub fn with_runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn build(self) -> Result<SessionController> {
        let runtime = match self.runtime {
            Some(runtime) => runtime,
            None => Handle::try_current().map_err(|_| {
                EcoWiseError::Config("A session must be built inside a tokio runtime".into())
            })?,
        };

        let transport: Arc<dyn ChatTransport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HttpTransport::new(self.config.endpoint.clone())?),
        };

        let conversation = Conversation::new();
        if let Some(greeting) = &self.config.greeting {
            conversation.add(Message::assistant(greeting.as_str()));
        }

        let events = EventBus::new();
        let voice = VoiceCoordinator::new(
            self.input,
            self.output,
            self.config.speech.clone(),
            self.config.output_enabled,
            events.clone(),
        );
        let idle_timeout = self.config.endpoint.idle_timeout;

        let shared = Arc::new_cyclic(|weak: &Weak<SessionShared>| {
            let observer = Arc::new(SessionObserver {
                shared: weak.clone(),
                events: events.clone(),
            });

            SessionShared {
                engine: ExchangeEngine::new(
                    transport,
                    conversation.clone(),
                    observer,
                    idle_timeout,
                    runtime,
                ),
                conversation,
                voice,
                events,
                submit_lock: Mutex::new(()),
                current: Mutex::new(None),
                closed: AtomicBool::new(false),
            }
        });

        info!(
            "Session ready ({} messages, output {})",
            shared.conversation.len(),
            if shared.voice.state().output_enabled {
                "on"
            } else {
                "off"
            }
        );

        Ok(SessionController { shared })
    }
}

impl Default for SessionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle the presentation layer drives the session through
///
/// Dropping the controller shuts the session down.
pub struct SessionController {
    shared: Arc<SessionShared>,
}

impl SessionController {
    pub fn builder() -> SessionBuilder {
        SessionBuilder::new()
    }

    /// Submit a user message and start an exchange for it
    ///
    /// Ignored (returns `None`) when `text` is blank, while another exchange
    /// is in flight, or after shutdown.
    pub fn submit_user_text(&self, text: &str) -> Option<ExchangeHandle> {
        self.shared.submit_user_text(text)
    }

    /// Start capture, or stop it and submit what was recognised
    pub fn toggle_capture(&self) -> Option<ExchangeHandle> {
        if self.shared.closed.load(Ordering::SeqCst) {
            return None;
        }
        let text = self.shared.voice.toggle_capture()?;
        self.shared.submit_user_text(&text)
    }

    pub fn toggle_output(&self) {
        if self.shared.closed.load(Ordering::SeqCst) {
            return;
        }
        self.shared.voice.toggle_output();
    }

    /// Abort the exchange in flight, keeping any partial reply
    pub fn cancel_exchange(&self) {
        let current = self.shared.current.lock().clone();
        if let Some(handle) = current {
            handle.abort();
        }
    }

    pub fn subscribe(&self) -> Receiver<SessionEvent> {
        self.shared.events.subscribe()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            messages: self.shared.conversation.get_all(),
            exchange_state: self.shared.engine.state(),
            voice: self.shared.voice.state(),
            pending_input: self.shared.voice.pending_input(),
        }
    }

    pub fn messages(&self) -> Vec<Message> {
        self.shared.conversation.get_all()
    }

    pub fn exchange_state(&self) -> ExchangeState {
        self.shared.engine.state()
    }

    pub fn voice_state(&self) -> VoiceState {
        self.shared.voice.state()
    }

    pub fn pending_input(&self) -> String {
        self.shared.voice.pending_input()
    }

    /// Abort the exchange and stop all voice activity
    ///
    /// Safe to call more than once.
    pub fn shutdown(&self) {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        info!("Shutting down session");
        let current = self.shared.current.lock().take();
        if let Some(handle) = current {
            handle.abort();
        }
        self.shared.voice.shutdown();
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::prompts::GREETING;
    use crate::llm::{ByteStream, ChatRequest};
    use async_trait::async_trait;
    use futures::StreamExt;

    struct Silent;

    #[async_trait]
    impl ChatTransport for Silent {
        async fn open(&self, _request: &ChatRequest) -> Result<ByteStream> {
            Ok(futures::stream::pending().boxed())
        }
    }

    fn session() -> SessionController {
        SessionController::builder()
            .with_transport(Arc::new(Silent))
            .build()
            .unwrap()
    }

    #[test]
    fn test_build_requires_runtime() {
        let result = SessionController::builder()
            .with_transport(Arc::new(Silent))
            .build();
        assert!(matches!(result, Err(EcoWiseError::Config(_))));
    }

    #[test]
    fn test_build_without_key_fails() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let result = SessionController::builder()
            .with_runtime(runtime.handle().clone())
            .build();
        assert!(matches!(result, Err(EcoWiseError::Config(_))));
    }

    #[tokio::test]
    async fn test_starts_with_greeting() {
        let session = session();
        let snapshot = session.snapshot();

        assert_eq!(snapshot.messages.len(), 1);
        assert_eq!(snapshot.messages[0].text, GREETING);
        assert!(snapshot.messages[0].is_assistant());
        assert_eq!(snapshot.exchange_state, ExchangeState::Idle);
        assert_eq!(snapshot.voice, VoiceState::default());
        assert!(snapshot.pending_input.is_empty());
    }

    #[tokio::test]
    async fn test_blank_submission_ignored() {
        let session = session();
        assert!(session.submit_user_text("   \n").is_none());
        assert_eq!(session.messages().len(), 1);
        assert_eq!(session.exchange_state(), ExchangeState::Idle);
    }

    #[tokio::test]
    async fn test_cancel_returns_to_idle() {
        let session = session();
        let handle = session.submit_user_text("hello").unwrap();
        assert_eq!(session.exchange_state(), ExchangeState::Sending);

        session.cancel_exchange();
        assert_eq!(session.exchange_state(), ExchangeState::Idle);
        assert_eq!(
            handle.wait().await,
            ExchangeOutcome::Cancelled { reply: None }
        );
        assert_eq!(session.messages().len(), 2);
    }

    #[tokio::test]
    async fn test_shutdown_rejects_further_input() {
        let session = session();
        let handle = session.submit_user_text("hello").unwrap();

        session.shutdown();
        session.shutdown();

        assert!(handle.is_finished());
        assert!(session.submit_user_text("again").is_none());
    }
}
