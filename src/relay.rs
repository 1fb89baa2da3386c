// src/relay.rs
//! Drives one conversation turn: validate, resolve the session, persist the user
//! message, stream the provider's reply to the client, persist the assistant message.
//!
//! The user message is always durable before a provider is called. An assistant
//! message is only written once the fragment stream has been fully consumed, so a
//! provider failure or client disconnect never leaves a partial reply in storage.

use crate::error::ChatError;
use crate::models::chat::{title_from_message, Message, NewMessage, Role, Session};
use crate::providers::{
    truncate, ChatProvider, FragmentStream, GenerationRequest, HistoryTurn, ProviderError, ProviderRegistry,
};
use crate::safety::SafetyFilter;
use crate::store::ConversationStore;
use backoff::ExponentialBackoff;
use futures::{FutureExt, StreamExt};
use serde_json::json;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Messages of the session handed to the provider as context.
pub const HISTORY_LIMIT: i64 = 500;
/// Events buffered between the relay task and the HTTP response.
const EVENT_BUFFER: usize = 16;
const LOG_PREVIEW_CHARS: usize = 80;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Validating,
    SessionResolved,
    UserMessagePersisted,
    Streaming,
    Completing,
    Done,
    Errored,
}

impl fmt::Display for TurnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TurnState::Validating => "validating",
            TurnState::SessionResolved => "session_resolved",
            TurnState::UserMessagePersisted => "user_message_persisted",
            TurnState::Streaming => "streaming",
            TurnState::Completing => "completing",
            TurnState::Done => "done",
            TurnState::Errored => "errored",
        };
        f.write_str(name)
    }
}

/// What the client sees: zero or more chunks followed by exactly one `Done` or `Error`.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayEvent {
    Chunk(String),
    Done { assistant_id: Uuid, session_id: Uuid },
    Error { message: String },
}

impl RelayEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RelayEvent::Chunk(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOutcome {
    Completed { assistant_id: Uuid },
    Failed,
    ClientDisconnected,
}

#[derive(Debug, Clone)]
pub struct TurnInput {
    pub user_id: Uuid,
    pub session_id: Option<Uuid>,
    pub provider: String,
    pub model: Option<String>,
    pub message: String,
    /// Replaces the stored transcript as provider context when present.
    pub history: Option<Vec<HistoryTurn>>,
}

/// A turn that has passed validation and, for fresh input, has its user message stored.
pub struct PreparedTurn {
    pub user_id: Uuid,
    pub session: Session,
    pub user_message: Option<Message>,
    pub provider: Arc<dyn ChatProvider>,
    pub request: GenerationRequest,
    input_preview: String,
}

impl PreparedTurn {
    pub fn model(&self) -> String {
        self.provider.model_for(&self.request).to_string()
    }

    fn assistant_meta(&self, fragments: usize) -> serde_json::Value {
        json!({
            "provider": self.provider.name(),
            "model": self.model(),
            "fragments": fragments,
        })
    }
}

pub struct TurnHandle {
    pub events: mpsc::Receiver<RelayEvent>,
    pub task: JoinHandle<TurnOutcome>,
}

pub struct StreamRelay {
    store: Arc<dyn ConversationStore>,
    providers: ProviderRegistry,
    safety: SafetyFilter,
    open_retry: Duration,
}

impl StreamRelay {
    pub fn new(store: Arc<dyn ConversationStore>, providers: ProviderRegistry, safety: SafetyFilter) -> Self {
        Self {
            store,
            providers,
            safety,
            open_retry: Duration::ZERO,
        }
    }

    /// Budget for retrying transient failures while opening a provider stream.
    pub fn with_open_retry(mut self, budget: Duration) -> Self {
        self.open_retry = budget;
        self
    }

    pub fn providers(&self) -> &ProviderRegistry {
        &self.providers
    }

    /// Validating → SessionResolved → UserMessagePersisted. Every error here happens
    /// before anything is streamed, and validation errors before anything is stored.
    pub async fn prepare_turn(&self, input: TurnInput) -> Result<PreparedTurn, ChatError> {
        tracing::debug!(state = %TurnState::Validating, user_id = %input.user_id, "turn started");

        if input.message.trim().is_empty() {
            return Err(ChatError::EmptyInput);
        }
        let verdict = self.safety.check(&input.message);
        if !verdict.allowed {
            let reason = verdict.reason.unwrap_or_else(|| "Input rejected".to_string());
            tracing::info!(user_id = %input.user_id, reason = %reason, "input rejected by safety filter");
            return Err(ChatError::ContentRejected(reason));
        }
        let provider = self.providers.resolve(&input.provider)?;

        let session = match input.session_id {
            Some(session_id) => self.store.touch_session(input.user_id, session_id).await?,
            None => {
                self.store
                    .create_session(input.user_id, Some(title_from_message(&input.message)))
                    .await?
            }
        };
        tracing::debug!(state = %TurnState::SessionResolved, session_id = %session.id, "session resolved");

        let user_message = self
            .store
            .append_message(input.user_id, NewMessage::user(session.id, input.user_id, input.message.clone()))
            .await?;
        tracing::debug!(
            state = %TurnState::UserMessagePersisted,
            session_id = %session.id,
            message_id = %user_message.id,
            "user message persisted"
        );

        let request = match input.history {
            Some(history) => GenerationRequest {
                model: None,
                history,
                message: Some(input.message.clone()),
            },
            None => GenerationRequest::from_history(self.transcript(input.user_id, session.id).await?),
        }
        .with_model(input.model);

        Ok(PreparedTurn {
            user_id: input.user_id,
            session,
            user_message: Some(user_message),
            provider,
            request,
            input_preview: truncate(&input.message, LOG_PREVIEW_CHARS),
        })
    }

    /// Prepares a fresh assistant reply to the most recent user message of a session.
    /// Nothing is written; the previous replies stay untouched.
    pub async fn prepare_regeneration(
        &self,
        user_id: Uuid,
        session_id: Uuid,
        provider: &str,
        model: Option<String>,
    ) -> Result<PreparedTurn, ChatError> {
        let session = self.store.get_session(user_id, session_id).await?;
        let provider = self.providers.resolve(provider)?;

        let messages = self.store.list_messages(user_id, session_id, HISTORY_LIMIT).await?;
        let last_user = messages
            .iter()
            .rposition(|m| m.role == Role::User)
            .ok_or(ChatError::NotFound("User message"))?;
        let input_preview = truncate(&messages[last_user].text, LOG_PREVIEW_CHARS);

        let history = messages[..=last_user]
            .iter()
            .map(|m| HistoryTurn::new(m.role, m.text.clone()))
            .collect();

        let session = self.store.touch_session(user_id, session.id).await?;
        tracing::info!(session_id = %session.id, provider = provider.name(), "regenerating reply");

        Ok(PreparedTurn {
            user_id,
            session,
            user_message: None,
            provider,
            request: GenerationRequest::from_history(history).with_model(model),
            input_preview,
        })
    }

    /// Non-streaming variant: one complete reply, persisted as one assistant message.
    pub async fn complete_turn(&self, turn: &PreparedTurn) -> Result<(Message, String), ChatError> {
        let reply = turn.provider.generate(&turn.request).await.map_err(|e| {
            self.log_fault(turn, 0, &e);
            ChatError::from(e)
        })?;

        let assistant = self
            .store
            .append_message(
                turn.user_id,
                NewMessage::assistant(turn.session.id, reply.clone(), turn.assistant_meta(1)),
            )
            .await?;
        Ok((assistant, reply))
    }

    /// Runs Streaming → Completing on a spawned task. Dropping `events` is treated as
    /// a client disconnect.
    pub fn spawn_turn(self: &Arc<Self>, turn: PreparedTurn) -> TurnHandle {
        let (tx, events) = mpsc::channel(EVENT_BUFFER);
        let relay = Arc::clone(self);
        let session_id = turn.session.id;

        let task = tokio::spawn(async move {
            let fault_tx = tx.clone();
            match AssertUnwindSafe(relay.stream_turn(turn, tx)).catch_unwind().await {
                Ok(outcome) => outcome,
                Err(_) => {
                    tracing::error!(session_id = %session_id, state = %TurnState::Errored, "relay task panicked");
                    let _ = fault_tx
                        .send(RelayEvent::Error { message: "Internal server error".to_string() })
                        .await;
                    TurnOutcome::Failed
                }
            }
        });

        TurnHandle { events, task }
    }

    pub async fn stream_turn(&self, turn: PreparedTurn, tx: mpsc::Sender<RelayEvent>) -> TurnOutcome {
        let session_id = turn.session.id;
        tracing::debug!(state = %TurnState::Streaming, session_id = %session_id, provider = turn.provider.name(), "streaming");

        let mut fragments = match self.open_stream(&turn).await {
            Ok(stream) => stream,
            Err(e) => {
                self.log_fault(&turn, 0, &e);
                let _ = tx.send(provider_error_event()).await;
                return TurnOutcome::Failed;
            }
        };

        let mut reply = String::new();
        let mut forwarded = 0usize;
        while let Some(next) = fragments.next().await {
            match next {
                Ok(fragment) if fragment.is_empty() => continue,
                Ok(fragment) => {
                    reply.push_str(&fragment);
                    forwarded += 1;
                    if tx.send(RelayEvent::Chunk(fragment)).await.is_err() {
                        // Dropping `fragments` cancels the upstream request.
                        tracing::info!(
                            session_id = %session_id,
                            forwarded,
                            "client disconnected mid-stream; reply discarded"
                        );
                        return TurnOutcome::ClientDisconnected;
                    }
                }
                Err(e) => {
                    self.log_fault(&turn, forwarded, &e);
                    let _ = tx.send(provider_error_event()).await;
                    return TurnOutcome::Failed;
                }
            }
        }
        drop(fragments);

        tracing::debug!(state = %TurnState::Completing, session_id = %session_id, forwarded, "stream exhausted");
        let assistant = self
            .store
            .append_message(
                turn.user_id,
                NewMessage::assistant(session_id, reply, turn.assistant_meta(forwarded)),
            )
            .await;

        match assistant {
            Ok(message) => {
                tracing::debug!(state = %TurnState::Done, session_id = %session_id, assistant_id = %message.id, "turn complete");
                let _ = tx
                    .send(RelayEvent::Done {
                        assistant_id: message.id,
                        session_id,
                    })
                    .await;
                TurnOutcome::Completed { assistant_id: message.id }
            }
            Err(e) => {
                tracing::error!(
                    state = %TurnState::Errored,
                    session_id = %session_id,
                    provider = turn.provider.name(),
                    input = %turn.input_preview,
                    error = %e,
                    "failed to persist assistant message"
                );
                let _ = tx
                    .send(RelayEvent::Error { message: "Internal server error".to_string() })
                    .await;
                TurnOutcome::Failed
            }
        }
    }

    async fn open_stream(&self, turn: &PreparedTurn) -> Result<FragmentStream, ProviderError> {
        if self.open_retry.is_zero() {
            return turn.provider.stream(&turn.request).await;
        }

        let policy = ExponentialBackoff {
            initial_interval: Duration::from_millis(500),
            max_interval: Duration::from_secs(5),
            multiplier: 2.0,
            max_elapsed_time: Some(self.open_retry),
            ..Default::default()
        };
        let provider = &turn.provider;
        let request = &turn.request;

        backoff::future::retry(policy, || async move {
            provider.stream(request).await.map_err(|e| {
                if e.is_transient() {
                    tracing::warn!("{} stream open failed (retrying): {}", provider.name(), e);
                    backoff::Error::transient(e)
                } else {
                    backoff::Error::permanent(e)
                }
            })
        })
        .await
    }

    async fn transcript(&self, user_id: Uuid, session_id: Uuid) -> Result<Vec<HistoryTurn>, ChatError> {
        Ok(self
            .store
            .list_messages(user_id, session_id, HISTORY_LIMIT)
            .await?
            .into_iter()
            .map(|m| HistoryTurn::new(m.role, m.text))
            .collect())
    }

    /// `forwarded` is the number of fragments the client already received.
    fn log_fault(&self, turn: &PreparedTurn, forwarded: usize, error: &ProviderError) {
        tracing::error!(
            state = %TurnState::Errored,
            session_id = %turn.session.id,
            provider = turn.provider.name(),
            model = %turn.model(),
            forwarded,
            input = %turn.input_preview,
            error = %error,
            "provider failure"
        );
    }
}

fn provider_error_event() -> RelayEvent {
    RelayEvent::Error {
        message: "AI provider failed to respond".to_string(),
    }
}
