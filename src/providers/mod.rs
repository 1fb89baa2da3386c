// src/providers/mod.rs
//! Uniform interface over remote text-generation services.
//!
//! Adapters map a conversation history to either a complete reply or a lazy,
//! single-use stream of text fragments whose concatenation is that reply. They
//! never persist anything and never retry; both are the caller's business.

pub mod gemini;
pub mod mock;
pub mod openai;
pub mod registry;
pub mod sse;

use crate::models::chat::Role;
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

pub use gemini::GeminiProvider;
pub use mock::MockProvider;
pub use openai::OpenAiProvider;
pub use registry::{ProviderKind, ProviderRegistry, UnsupportedProvider};

/// Finite, non-restartable sequence of reply fragments in emission order.
pub type FragmentStream = BoxStream<'static, Result<String, ProviderError>>;

pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Whole-exchange bound for non-streaming calls only.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
/// Longest silence tolerated while waiting for the next chunk of a streamed reply.
pub const STREAM_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("{provider} request failed: {message}")]
    Unavailable {
        provider: &'static str,
        message: String,
        transient: bool,
    },
    #[error("{provider} returned an unexpected response: {message}")]
    Malformed {
        provider: &'static str,
        message: String,
    },
    #[error("conversation is empty")]
    EmptyConversation,
}

impl ProviderError {
    pub fn unavailable(provider: &'static str, message: impl Into<String>) -> Self {
        ProviderError::Unavailable {
            provider,
            message: message.into(),
            transient: false,
        }
    }

    /// Upstream went quiet for longer than `idle` while a reply was expected.
    pub(crate) fn stalled(provider: &'static str, idle: Duration) -> Self {
        ProviderError::Unavailable {
            provider,
            message: format!("no data received for {:?}", idle),
            transient: true,
        }
    }

    /// The body ended cleanly but without the provider's end-of-reply marker.
    pub(crate) fn truncated(provider: &'static str) -> Self {
        Self::unavailable(provider, "stream ended before the reply was complete")
    }

    /// Transient failures (connection, timeout, 429, 5xx) may succeed when retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, ProviderError::Unavailable { transient: true, .. })
    }

    pub(crate) fn from_reqwest(provider: &'static str, err: reqwest::Error) -> Self {
        ProviderError::Unavailable {
            provider,
            transient: err.is_connect() || err.is_timeout(),
            message: err.to_string(),
        }
    }

    pub(crate) fn from_status(provider: &'static str, status: reqwest::StatusCode, body: &str) -> Self {
        let code = status.as_u16();
        ProviderError::Unavailable {
            provider,
            transient: matches!(code, 429 | 500 | 502 | 503),
            message: format!("API error ({}): {}", status, truncate(body, 300)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryTurn {
    pub role: Role,
    #[serde(alias = "content")]
    pub text: String,
}

impl HistoryTurn {
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self { role, text: text.into() }
    }
}

#[derive(Debug, Clone, Default)]
pub struct GenerationRequest {
    /// Overrides the adapter's default model when set.
    pub model: Option<String>,
    pub history: Vec<HistoryTurn>,
    /// Appended after `history` as a `user` turn.
    pub message: Option<String>,
}

impl GenerationRequest {
    pub fn from_history(history: Vec<HistoryTurn>) -> Self {
        Self { model: None, history, message: None }
    }

    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model = model;
        self
    }

    /// The full conversation to send upstream. Fails if there is nothing to send.
    pub fn turns(&self) -> Result<Vec<HistoryTurn>, ProviderError> {
        let mut turns = self.history.clone();
        if let Some(message) = &self.message {
            turns.push(HistoryTurn::new(Role::User, message.clone()));
        }
        if turns.is_empty() {
            return Err(ProviderError::EmptyConversation);
        }
        Ok(turns)
    }
}

#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Registry name, also recorded in assistant message metadata.
    fn name(&self) -> &'static str;

    fn default_model(&self) -> &str;

    /// Complete reply in one call.
    async fn generate(&self, request: &GenerationRequest) -> Result<String, ProviderError>;

    /// Opens the upstream stream. Errors returned here happen before any fragment exists;
    /// errors yielded by the stream happen mid-reply.
    async fn stream(&self, request: &GenerationRequest) -> Result<FragmentStream, ProviderError>;

    fn model_for<'a>(&'a self, request: &'a GenerationRequest) -> &'a str {
        request.model.as_deref().unwrap_or_else(|| self.default_model())
    }
}

/// Shared HTTP client for the remote adapters. Only connecting is bounded here; each
/// call picks its own deadline.
pub(crate) fn http_client() -> reqwest::Client {
    let builder = reqwest::Client::builder().connect_timeout(CONNECT_TIMEOUT);
    // test upstreams listen on loopback
    #[cfg(test)]
    let builder = builder.no_proxy();
    builder
        .build()
        .unwrap_or_else(|e| {
            tracing::warn!("Falling back to default HTTP client: {}", e);
            reqwest::Client::new()
        })
}

/// Sends an upstream request. Streaming calls get no whole-exchange timeout, but
/// the response head must arrive within `idle`.
pub(crate) async fn send(
    provider: &'static str,
    request: reqwest::RequestBuilder,
    streaming: Option<Duration>,
) -> Result<reqwest::Response, ProviderError> {
    let sent = match streaming {
        Some(idle) => tokio::time::timeout(idle, request.send())
            .await
            .map_err(|_| ProviderError::stalled(provider, idle))?,
        None => request.timeout(REQUEST_TIMEOUT).send().await,
    };
    let response = sent.map_err(|e| ProviderError::from_reqwest(provider, e))?;

    let status = response.status();
    if !status.is_success() {
        let error_text = response.text().await.unwrap_or_default();
        return Err(ProviderError::from_status(provider, status, &error_text));
    }
    Ok(response)
}

pub(crate) fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let mut out: String = text.chars().take(max_chars).collect();
        out.push_str("...");
        out
    }
}

/// Minimal HTTP/1.1 upstream on loopback that answers one request with a canned
/// `text/event-stream` body.
#[cfg(test)]
pub(crate) mod test_upstream {
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    /// Serves `body` and closes the connection. Returns the base URL.
    pub async fn serve(body: &'static str) -> String {
        serve_then_hold(body, Duration::ZERO).await
    }

    /// Serves `body`, then keeps the connection open and silent for `hold`.
    pub async fn serve_then_hold(body: &'static str, hold: Duration) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            read_request(&mut socket).await;
            let head = "HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nConnection: close\r\n\r\n";
            socket.write_all(head.as_bytes()).await.unwrap();
            socket.write_all(body.as_bytes()).await.unwrap();
            socket.flush().await.unwrap();
            tokio::time::sleep(hold).await;
            let _ = socket.shutdown().await;
        });
        format!("http://{}", addr)
    }

    async fn read_request(socket: &mut TcpStream) {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = socket.read(&mut chunk).await.unwrap();
            if n == 0 {
                return;
            }
            buf.extend_from_slice(&chunk[..n]);
            if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                let head = String::from_utf8_lossy(&buf[..end]).to_ascii_lowercase();
                let body_len = head
                    .lines()
                    .find_map(|line| line.strip_prefix("content-length:"))
                    .and_then(|v| v.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if buf.len() >= end + 4 + body_len {
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_message_is_minimal_valid_call() {
        let request = GenerationRequest {
            message: Some("hello".into()),
            ..Default::default()
        };
        assert_eq!(request.turns().unwrap(), vec![HistoryTurn::new(Role::User, "hello")]);
    }

    #[test]
    fn test_message_is_appended_after_history() {
        let request = GenerationRequest {
            model: None,
            history: vec![
                HistoryTurn::new(Role::User, "hi"),
                HistoryTurn::new(Role::Assistant, "hello!"),
            ],
            message: Some("how are you".into()),
        };
        let turns = request.turns().unwrap();
        assert_eq!(turns.len(), 3);
        assert_eq!(turns[2], HistoryTurn::new(Role::User, "how are you"));
    }

    #[test]
    fn test_empty_conversation_is_rejected() {
        assert!(matches!(
            GenerationRequest::default().turns(),
            Err(ProviderError::EmptyConversation)
        ));
    }

    #[test]
    fn test_status_classification() {
        let err = ProviderError::from_status("openai", reqwest::StatusCode::TOO_MANY_REQUESTS, "slow down");
        assert!(err.is_transient());
        let err = ProviderError::from_status("openai", reqwest::StatusCode::UNAUTHORIZED, "bad key");
        assert!(!err.is_transient());
    }
}
