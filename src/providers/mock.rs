use super::{ChatProvider, FragmentStream, GenerationRequest, ProviderError};
use crate::models::chat::Role;
use async_trait::async_trait;
use futures::stream;
use futures::StreamExt;
use std::time::Duration;

/// Offline adapter with deterministic output. Replies with the configured fragments,
/// or echoes the latest user turn split at word boundaries.
#[derive(Debug, Clone, Default)]
pub struct MockProvider {
    fragments: Option<Vec<String>>,
    delay: Option<Duration>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fragments<I, S>(fragments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fragments: Some(fragments.into_iter().map(Into::into).collect()),
            delay: None,
        }
    }

    /// Pause before each fragment, to make streaming observable by hand.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    fn fragments_for(&self, request: &GenerationRequest) -> Result<Vec<String>, ProviderError> {
        if let Some(fragments) = &self.fragments {
            return Ok(fragments.clone());
        }
        let turns = request.turns()?;
        let last_user = turns
            .iter()
            .rev()
            .find(|t| t.role == Role::User)
            .map(|t| t.text.as_str())
            .unwrap_or_default();
        let reply = format!("Echo: {}", last_user);
        Ok(reply.split_inclusive(' ').map(str::to_string).collect())
    }
}

#[async_trait]
impl ChatProvider for MockProvider {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn default_model(&self) -> &str {
        "mock-echo"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String, ProviderError> {
        Ok(self.fragments_for(request)?.concat())
    }

    async fn stream(&self, request: &GenerationRequest) -> Result<FragmentStream, ProviderError> {
        let fragments = self.fragments_for(request)?;
        let delay = self.delay;
        Ok(stream::iter(fragments)
            .then(move |fragment| async move {
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                Ok(fragment)
            })
            .boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;

    #[tokio::test]
    async fn test_configured_fragments_stream_in_order() {
        let provider = MockProvider::with_fragments(["He", "llo!"]);
        let request = GenerationRequest {
            message: Some("hello".into()),
            ..Default::default()
        };
        let fragments: Vec<String> = provider.stream(&request).await.unwrap().try_collect().await.unwrap();
        assert_eq!(fragments, vec!["He", "llo!"]);
        assert_eq!(provider.generate(&request).await.unwrap(), "Hello!");
    }

    #[tokio::test]
    async fn test_echo_concatenates_to_full_reply() {
        let provider = MockProvider::new();
        let request = GenerationRequest {
            message: Some("how are you".into()),
            ..Default::default()
        };
        let fragments: Vec<String> = provider.stream(&request).await.unwrap().try_collect().await.unwrap();
        assert_eq!(fragments.len(), 4);
        assert_eq!(fragments.concat(), "Echo: how are you");
        assert_eq!(provider.generate(&request).await.unwrap(), fragments.concat());
    }
}
