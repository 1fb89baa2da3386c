use super::{sse, ChatProvider, FragmentStream, GenerationRequest, HistoryTurn, ProviderError, STREAM_IDLE_TIMEOUT};
use crate::models::chat::Role;
use async_stream::try_stream;
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const PROVIDER: &str = "gemini";

#[derive(Debug, Clone)]
pub struct GeminiProvider {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    stream_idle_timeout: Duration,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GenerateContentRequest {
    pub contents: Vec<Content>,
    #[serde(rename = "systemInstruction", skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
    #[serde(rename = "safetySettings")]
    pub safety_settings: Vec<SafetySetting>,
    #[serde(rename = "generationConfig")]
    pub generation_config: GenerationConfig,
}

/// Gemini represents each turn as a role-tagged list of parts.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Content {
    #[serde(default)]
    pub parts: Vec<Part>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Part {
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SafetySetting {
    pub category: String,
    pub threshold: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GenerationConfig {
    pub temperature: f32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GenerateContentResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
    #[serde(rename = "promptFeedback")]
    pub prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Candidate {
    pub content: Option<Content>,
    #[serde(rename = "finishReason")]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PromptFeedback {
    #[serde(rename = "blockReason")]
    pub block_reason: Option<String>,
}

impl GenerateContentResponse {
    /// Text carried by the first candidate, or an error if the prompt was blocked.
    pub fn text(&self) -> Result<String, ProviderError> {
        if let Some(reason) = self.prompt_feedback.as_ref().and_then(|f| f.block_reason.as_ref()) {
            return Err(ProviderError::unavailable(PROVIDER, format!("prompt blocked: {}", reason)));
        }
        Ok(self
            .candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|content| {
                content
                    .parts
                    .iter()
                    .filter_map(|p| p.text.as_deref())
                    .collect::<String>()
            })
            .unwrap_or_default())
    }
}

const HARM_CATEGORIES: [&str; 4] = [
    "HARM_CATEGORY_HARASSMENT",
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
    "HARM_CATEGORY_DANGEROUS_CONTENT",
];

impl GeminiProvider {
    pub fn new(api_key: String, model: String) -> Self {
        Self {
            client: super::http_client(),
            api_key,
            base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            model,
            stream_idle_timeout: STREAM_IDLE_TIMEOUT,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_stream_idle_timeout(mut self, idle: Duration) -> Self {
        self.stream_idle_timeout = idle;
        self
    }

    pub fn build_request(turns: &[HistoryTurn]) -> GenerateContentRequest {
        let system: Vec<Part> = turns
            .iter()
            .filter(|t| t.role == Role::System)
            .map(|t| Part { text: Some(t.text.clone()) })
            .collect();

        let contents = turns
            .iter()
            .filter(|t| t.role != Role::System)
            .map(|t| Content {
                role: Some(
                    match t.role {
                        Role::Assistant => "model",
                        _ => "user",
                    }
                    .to_string(),
                ),
                parts: vec![Part { text: Some(t.text.clone()) }],
            })
            .collect();

        GenerateContentRequest {
            contents,
            system_instruction: (!system.is_empty()).then(|| Content { parts: system, role: None }),
            safety_settings: HARM_CATEGORIES
                .iter()
                .map(|category| SafetySetting {
                    category: category.to_string(),
                    threshold: "BLOCK_NONE".to_string(),
                })
                .collect(),
            generation_config: GenerationConfig { temperature: 0.7 },
        }
    }

    async fn post(&self, model: &str, method: &str, body: &GenerateContentRequest) -> Result<reqwest::Response, ProviderError> {
        let url = format!("{}/models/{}:{}", self.base_url, model, method);
        tracing::debug!("Gemini API request: model={}, contents={}", model, body.contents.len());

        let streaming = method == "streamGenerateContent";
        let mut builder = self.client.post(&url).query(&[("key", self.api_key.as_str())]);
        if streaming {
            builder = builder.query(&[("alt", "sse")]);
        }

        let request = builder.header("Content-Type", "application/json").json(body);
        super::send(PROVIDER, request, streaming.then_some(self.stream_idle_timeout)).await
    }
}

#[async_trait]
impl ChatProvider for GeminiProvider {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    fn default_model(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String, ProviderError> {
        let body = Self::build_request(&request.turns()?);
        let response = self.post(self.model_for(request), "generateContent", &body).await?;
        let response_text = response
            .text()
            .await
            .map_err(|e| ProviderError::from_reqwest(PROVIDER, e))?;

        let parsed: GenerateContentResponse = serde_json::from_str(&response_text).map_err(|e| {
            tracing::error!("Failed to parse Gemini response: {}", e);
            ProviderError::Malformed { provider: PROVIDER, message: e.to_string() }
        })?;
        parsed.text()
    }

    async fn stream(&self, request: &GenerationRequest) -> Result<FragmentStream, ProviderError> {
        let body = Self::build_request(&request.turns()?);
        let response = self.post(self.model_for(request), "streamGenerateContent", &body).await?;
        Ok(Box::pin(sse_fragments(response, self.stream_idle_timeout)))
    }
}

/// The last event of a complete reply carries a `finishReason`; a body that ends
/// without one was cut off.
fn sse_fragments(
    response: reqwest::Response,
    idle: Duration,
) -> impl Stream<Item = Result<String, ProviderError>> + Send + 'static {
    try_stream! {
        let mut events = Box::pin(sse::data_events(PROVIDER, response, idle));
        let mut finished = false;
        while let Some(data) = events.next().await {
            let data = data?;
            let event = parse_event(&data)?;
            finished |= event.finished;
            if let Some(text) = event.text {
                yield text;
            }
        }
        if !finished {
            Err::<(), _>(ProviderError::truncated(PROVIDER))?;
        }
    }
}

#[derive(Debug, PartialEq)]
pub struct StreamEvent {
    /// `None` for events without text, such as the final `finishReason`-only one.
    pub text: Option<String>,
    pub finished: bool,
}

/// Parses one streamed `GenerateContentResponse`.
pub fn parse_event(data: &str) -> Result<StreamEvent, ProviderError> {
    let parsed: GenerateContentResponse = serde_json::from_str(data).map_err(|e| ProviderError::Malformed {
        provider: PROVIDER,
        message: format!("{}: {}", e, super::truncate(data, 200)),
    })?;
    let text = parsed.text()?;
    Ok(StreamEvent {
        text: (!text.is_empty()).then_some(text),
        finished: parsed.candidates.iter().any(|c| c.finish_reason.is_some()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::test_upstream;

    #[test]
    fn test_roles_map_to_gemini_contents() {
        let turns = vec![
            HistoryTurn::new(Role::System, "be brief"),
            HistoryTurn::new(Role::User, "hi"),
            HistoryTurn::new(Role::Assistant, "hello"),
            HistoryTurn::new(Role::User, "bye"),
        ];
        let request = GeminiProvider::build_request(&turns);

        let roles: Vec<_> = request.contents.iter().map(|c| c.role.clone().unwrap()).collect();
        assert_eq!(roles, vec!["user", "model", "user"]);
        assert_eq!(request.contents[1].parts[0].text.as_deref(), Some("hello"));
        assert_eq!(
            request.system_instruction.unwrap().parts[0].text.as_deref(),
            Some("be brief")
        );
        assert_eq!(request.safety_settings.len(), 4);
        assert!(request.safety_settings.iter().all(|s| s.threshold == "BLOCK_NONE"));
    }

    #[test]
    fn test_request_serialises_with_camel_case_keys() {
        let request = GeminiProvider::build_request(&[HistoryTurn::new(Role::User, "hi")]);
        let json = serde_json::to_value(&request).unwrap();
        assert!(json.get("safetySettings").is_some());
        assert!(json.get("systemInstruction").is_none());
        assert_eq!(json["contents"][0]["parts"][0]["text"], "hi");
    }

    #[test]
    fn test_parse_stream_events() {
        let data = r#"{"candidates":[{"content":{"role":"model","parts":[{"text":"He"},{"text":"llo"}]}}]}"#;
        assert_eq!(
            parse_event(data).unwrap(),
            StreamEvent { text: Some("Hello".into()), finished: false }
        );

        let finish_only = r#"{"candidates":[{"finishReason":"STOP"}]}"#;
        assert_eq!(parse_event(finish_only).unwrap(), StreamEvent { text: None, finished: true });
    }

    #[test]
    fn test_blocked_prompt_is_an_error() {
        let data = r#"{"candidates":[],"promptFeedback":{"blockReason":"SAFETY"}}"#;
        assert!(matches!(parse_event(data), Err(ProviderError::Unavailable { .. })));
    }

    async fn stream_from(base_url: String) -> Vec<Result<String, ProviderError>> {
        let provider = GeminiProvider::new("k".into(), "gemini-test".into()).with_base_url(base_url);
        let request = GenerationRequest {
            message: Some("hi".into()),
            ..Default::default()
        };
        provider.stream(&request).await.unwrap().collect().await
    }

    #[tokio::test]
    async fn test_stream_ends_with_finish_reason() {
        let base_url = test_upstream::serve(concat!(
            "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"He\"}]}}]}\r\n\r\n",
            "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"llo!\"}]},\"finishReason\":\"STOP\"}]}\r\n\r\n",
        ))
        .await;

        let items = stream_from(base_url).await;
        let texts: Vec<_> = items.into_iter().map(|i| i.unwrap()).collect();
        assert_eq!(texts, vec!["He", "llo!"]);
    }

    #[tokio::test]
    async fn test_stream_cut_before_finish_reason_is_an_error() {
        let base_url = test_upstream::serve(
            "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"Partial\"}]}}]}\r\n\r\n",
        )
        .await;

        let items = stream_from(base_url).await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_deref().unwrap(), "Partial");
        assert!(matches!(items[1], Err(ProviderError::Unavailable { transient: false, .. })));
    }
}
