use super::{sse, ChatProvider, FragmentStream, GenerationRequest, HistoryTurn, ProviderError, STREAM_IDLE_TIMEOUT};
use async_stream::try_stream;
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const PROVIDER: &str = "openai";
const DONE_SENTINEL: &str = "[DONE]";

#[derive(Debug, Clone)]
pub struct OpenAiProvider {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    stream_idle_timeout: Duration,
}

#[derive(Debug, Serialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub stream: bool,
}

/// OpenAI represents each turn as a role-tagged message object.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct ChatCompletionResponse {
    #[serde(default)]
    pub choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
pub struct Choice {
    pub message: Option<ResponseMessage>,
}

#[derive(Debug, Deserialize)]
pub struct ResponseMessage {
    pub content: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChatCompletionChunk {
    #[serde(default)]
    pub choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
pub struct ChunkChoice {
    #[serde(default)]
    pub delta: Delta,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Delta {
    pub content: Option<String>,
}

impl OpenAiProvider {
    pub fn new(api_key: String, model: String, base_url: String) -> Self {
        Self {
            client: super::http_client(),
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            stream_idle_timeout: STREAM_IDLE_TIMEOUT,
        }
    }

    pub fn with_stream_idle_timeout(mut self, idle: Duration) -> Self {
        self.stream_idle_timeout = idle;
        self
    }

    pub fn build_request(model: &str, turns: &[HistoryTurn], stream: bool) -> ChatCompletionRequest {
        ChatCompletionRequest {
            model: model.to_string(),
            messages: turns
                .iter()
                .map(|t| ChatMessage {
                    role: t.role.as_str().to_string(),
                    content: t.text.clone(),
                })
                .collect(),
            temperature: 0.7,
            stream,
        }
    }

    async fn post(&self, body: &ChatCompletionRequest) -> Result<reqwest::Response, ProviderError> {
        tracing::debug!("OpenAI API request: model={}, messages={}, stream={}", body.model, body.messages.len(), body.stream);

        let request = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .header("content-type", "application/json")
            .json(body);
        super::send(PROVIDER, request, body.stream.then_some(self.stream_idle_timeout)).await
    }
}

#[async_trait]
impl ChatProvider for OpenAiProvider {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    fn default_model(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String, ProviderError> {
        let body = Self::build_request(self.model_for(request), &request.turns()?, false);
        let response = self.post(&body).await?;
        let parsed: ChatCompletionResponse = response.json().await.map_err(|e| ProviderError::Malformed {
            provider: PROVIDER,
            message: e.to_string(),
        })?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message)
            .and_then(|m| m.content)
            .ok_or_else(|| ProviderError::Malformed {
                provider: PROVIDER,
                message: "no message content in response".to_string(),
            })
    }

    async fn stream(&self, request: &GenerationRequest) -> Result<FragmentStream, ProviderError> {
        let body = Self::build_request(self.model_for(request), &request.turns()?, true);
        let response = self.post(&body).await?;
        Ok(Box::pin(sse_fragments(response, self.stream_idle_timeout)))
    }
}

/// A reply is only complete once `[DONE]` arrives; a body that ends before it is an error.
fn sse_fragments(
    response: reqwest::Response,
    idle: Duration,
) -> impl Stream<Item = Result<String, ProviderError>> + Send + 'static {
    try_stream! {
        let mut events = Box::pin(sse::data_events(PROVIDER, response, idle));
        let mut done = false;
        while let Some(data) = events.next().await {
            let data = data?;
            match parse_event(&data)? {
                ChunkEvent::Done => {
                    done = true;
                    break;
                }
                ChunkEvent::Fragment(text) => yield text,
                ChunkEvent::Empty => {}
            }
        }
        if !done {
            Err::<(), _>(ProviderError::truncated(PROVIDER))?;
        }
    }
}

#[derive(Debug, PartialEq)]
pub enum ChunkEvent {
    Fragment(String),
    Empty,
    Done,
}

pub fn parse_event(data: &str) -> Result<ChunkEvent, ProviderError> {
    let trimmed = data.trim();
    if trimmed == DONE_SENTINEL {
        return Ok(ChunkEvent::Done);
    }
    let chunk: ChatCompletionChunk = serde_json::from_str(trimmed).map_err(|e| ProviderError::Malformed {
        provider: PROVIDER,
        message: format!("{}: {}", e, super::truncate(trimmed, 200)),
    })?;
    let text: String = chunk
        .choices
        .into_iter()
        .filter_map(|c| c.delta.content)
        .collect();
    Ok(if text.is_empty() { ChunkEvent::Empty } else { ChunkEvent::Fragment(text) })
}
