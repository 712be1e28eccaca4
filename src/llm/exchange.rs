//! Exchange engine: one streamed request/response at a time
//!
//! The engine owns the `Idle -> Sending -> Streaming -> Idle` lifecycle. A
//! submission is only accepted from `Idle`; it spawns one task that opens the
//! transport, decodes the body and applies every delta to the shared
//! conversation as soon as it arrives.
//!
//! Whoever moves the exchange back to `Idle` (the task on end-of-stream or
//! failure, or [`ExchangeHandle::abort`]) does so under the slot lock and
//! clears the active id, so a late task can no longer touch the
//! conversation. State and message notifications are sent under the same
//! lock, so observers see them in the order the changes happened.

use crate::llm::decoder::{decode_stream, StreamEvent};
use crate::llm::prompts::ERROR_REPLY;
use crate::llm::request::ChatRequest;
use crate::llm::transport::ChatTransport;
use crate::messages::{Conversation, Message, MessageId};
use futures::StreamExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Lifecycle of the conversation-wide exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExchangeState {
    Idle,
    Sending,
    Streaming,
}

/// How an exchange ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExchangeOutcome {
    /// The stream ended normally
    Completed {
        /// Assistant message built from the deltas, if any arrived
        reply: Option<MessageId>,
        /// Number of non-empty deltas applied
        deltas: usize,
    },

    /// Aborted by the caller; any partial reply stays in the conversation
    Cancelled { reply: Option<MessageId> },

    /// Transport failure; the error reply was appended
    Failed { error: String },
}

/// Receives lifecycle notifications from the engine
///
/// `state_changed`, `message_appended` and `message_updated` run while the
/// engine holds its slot lock. They must return quickly and must not call
/// back into the engine. `exchange_finished` runs with no engine lock held.
pub trait ExchangeObserver: Send + Sync {
    fn state_changed(&self, _state: ExchangeState) {}

    fn message_appended(&self, _message: &Message) {}

    fn message_updated(&self, _id: MessageId, _text: &str) {}

    /// The exchange is back to `Idle`
    fn exchange_finished(&self, _exchange_id: Uuid, _outcome: &ExchangeOutcome) {}
}

/// Observer that ignores everything
pub struct NoopObserver;

impl ExchangeObserver for NoopObserver {}

#[derive(Debug)]
struct Slot {
    state: ExchangeState,
    active: Option<Uuid>,
    reply: Option<MessageId>,
    deltas: usize,
}

enum Ending {
    Completed,
    Cancelled,
    Failed(String),
}

struct EngineCore {
    transport: Arc<dyn ChatTransport>,
    conversation: Conversation,
    observer: Arc<dyn ExchangeObserver>,
    idle_timeout: Duration,
    slot: Mutex<Slot>,
}

impl EngineCore {
    async fn drive(&self, id: Uuid, request: ChatRequest, cancel: CancellationToken) -> Ending {
        let opened = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ending::Cancelled,
            opened = self.transport.open(&request) => opened,
        };

        let body = match opened {
            Ok(body) => body,
            Err(e) => return Ending::Failed(e.to_string()),
        };

        if !self.begin_streaming(id) {
            return Ending::Cancelled;
        }

        let events = decode_stream(body);
        tokio::pin!(events);

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ending::Cancelled,
                next = tokio::time::timeout(self.idle_timeout, events.next()) => next,
            };

            match next {
                Ok(Some(Ok(StreamEvent::Delta(text)))) => {
                    if text.is_empty() {
                        continue;
                    }
                    if !self.apply_delta(id, &text) {
                        return Ending::Cancelled;
                    }
                }
                Ok(Some(Ok(StreamEvent::End))) | Ok(None) => return Ending::Completed,
                Ok(Some(Err(e))) => return Ending::Failed(e.to_string()),
                Err(_) => {
                    return Ending::Failed(format!(
                        "No stream data received for {}s",
                        self.idle_timeout.as_secs()
                    ))
                }
            }
        }
    }

    fn begin_streaming(&self, id: Uuid) -> bool {
        let mut slot = self.slot.lock();
        if slot.active != Some(id) {
            return false;
        }
        slot.state = ExchangeState::Streaming;
        self.observer.state_changed(ExchangeState::Streaming);
        drop(slot);

        debug!("Exchange {} streaming", id);
        true
    }

    /// Apply one delta; false if the exchange is no longer active
    fn apply_delta(&self, id: Uuid, text: &str) -> bool {
        let mut slot = self.slot.lock();
        if slot.active != Some(id) {
            return false;
        }
        slot.deltas += 1;

        match slot.reply {
            None => {
                let message = Message::assistant(text);
                slot.reply = Some(message.id);
                self.conversation.add(message.clone());
                self.observer.message_appended(&message);
            }
            Some(reply) => match self.conversation.append_text(reply, text) {
                Some(full) => self.observer.message_updated(reply, &full),
                None => warn!("Streaming message {} vanished from the conversation", reply),
            },
        }
        true
    }

    /// Move exchange `id` back to `Idle`, returning its outcome if this call
    /// was the one that finished it
    fn finish(&self, id: Uuid, ending: Ending) -> Option<ExchangeOutcome> {
        let mut slot = self.slot.lock();
        if slot.active != Some(id) {
            return None;
        }

        let outcome = match ending {
            Ending::Completed => ExchangeOutcome::Completed {
                reply: slot.reply,
                deltas: slot.deltas,
            },
            Ending::Cancelled => ExchangeOutcome::Cancelled { reply: slot.reply },
            Ending::Failed(error) => {
                let message = Message::assistant(ERROR_REPLY);
                self.conversation.add(message.clone());
                self.observer.message_appended(&message);
                ExchangeOutcome::Failed { error }
            }
        };

        slot.state = ExchangeState::Idle;
        slot.active = None;
        slot.reply = None;
        slot.deltas = 0;
        self.observer.state_changed(ExchangeState::Idle);
        drop(slot);

        match &outcome {
            ExchangeOutcome::Completed { deltas, .. } => {
                info!("Exchange {} complete: {} deltas", id, deltas)
            }
            ExchangeOutcome::Cancelled { .. } => info!("Exchange {} cancelled", id),
            ExchangeOutcome::Failed { error } => error!("Exchange {} failed: {}", id, error),
        }

        self.observer.exchange_finished(id, &outcome);

        Some(outcome)
    }
}

/// Runs exchanges against a transport, at most one at a time
pub struct ExchangeEngine {
    core: Arc<EngineCore>,
    runtime: Handle,
}

impl ExchangeEngine {
    pub fn new(
        transport: Arc<dyn ChatTransport>,
        conversation: Conversation,
        observer: Arc<dyn ExchangeObserver>,
        idle_timeout: Duration,
        runtime: Handle,
    ) -> Self {
        let core = EngineCore {
            transport,
            conversation,
            observer,
            idle_timeout,
            slot: Mutex::new(Slot {
                state: ExchangeState::Idle,
                active: None,
                reply: None,
                deltas: 0,
            }),
        };

        Self {
            core: Arc::new(core),
            runtime,
        }
    }

    pub fn state(&self) -> ExchangeState {
        self.core.slot.lock().state
    }

    pub fn is_idle(&self) -> bool {
        self.state() == ExchangeState::Idle
    }

    /// Start an exchange for `user_text` on top of `history`
    ///
    /// Returns `None` without doing anything unless the engine is `Idle`.
    pub fn submit(&self, history: Vec<Message>, user_text: &str) -> Option<ExchangeHandle> {
        let id = Uuid::new_v4();
        {
            let mut slot = self.core.slot.lock();
            if slot.state != ExchangeState::Idle {
                debug!("Ignoring submission while {:?}", slot.state);
                return None;
            }
            slot.state = ExchangeState::Sending;
            slot.active = Some(id);
            slot.reply = None;
            slot.deltas = 0;
            self.core.observer.state_changed(ExchangeState::Sending);
        }

        info!("Exchange {} sending ({} prior messages)", id, history.len());

        let request = ChatRequest::for_turn(&history, user_text);
        let cancel = CancellationToken::new();
        let (done_tx, _) = watch::channel(None);

        let handle = ExchangeHandle {
            id,
            cancel: cancel.clone(),
            core: Arc::clone(&self.core),
            done: Arc::new(done_tx),
        };

        let core = Arc::clone(&self.core);
        let done = Arc::clone(&handle.done);
        self.runtime.spawn(async move {
            let ending = core.drive(id, request, cancel).await;
            if let Some(outcome) = core.finish(id, ending) {
                publish(&done, outcome);
            }
        });

        Some(handle)
    }
}

fn publish(done: &watch::Sender<Option<ExchangeOutcome>>, outcome: ExchangeOutcome) {
    done.send_if_modified(|slot| {
        if slot.is_none() {
            *slot = Some(outcome);
            true
        } else {
            false
        }
    });
}

/// Handle to a running exchange
#[derive(Clone)]
pub struct ExchangeHandle {
    id: Uuid,
    cancel: CancellationToken,
    core: Arc<EngineCore>,
    done: Arc<watch::Sender<Option<ExchangeOutcome>>>,
}

impl ExchangeHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Stop reading the body and return the engine to `Idle` right away
    ///
    /// Deltas already applied stay in the conversation. No-op once the
    /// exchange has finished.
    pub fn abort(&self) {
        self.cancel.cancel();
        if let Some(outcome) = self.core.finish(self.id, Ending::Cancelled) {
            publish(&self.done, outcome);
        }
    }

    pub fn is_finished(&self) -> bool {
        self.done.borrow().is_some()
    }

    pub fn outcome(&self) -> Option<ExchangeOutcome> {
        self.done.borrow().clone()
    }

    /// Wait until the exchange is back to `Idle`
    pub async fn wait(&self) -> ExchangeOutcome {
        let mut rx = self.done.subscribe();
        loop {
            if let Some(outcome) = rx.borrow_and_update().clone() {
                return outcome;
            }
            if rx.changed().await.is_err() {
                return ExchangeOutcome::Cancelled { reply: None };
            }
        }
    }
}

impl std::fmt::Debug for ExchangeHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExchangeHandle")
            .field("id", &self.id)
            .field("finished", &self.is_finished())
            .finish()
    }
}
