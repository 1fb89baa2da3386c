use super::{ChatProvider, GeminiProvider, MockProvider, OpenAiProvider};
use crate::config::AppConfig;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unsupported AI provider: {0}")]
pub struct UnsupportedProvider(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    Gemini,
    OpenAi,
    Mock,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Gemini => "gemini",
            ProviderKind::OpenAi => "openai",
            ProviderKind::Mock => "mock",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = UnsupportedProvider;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gemini" => Ok(ProviderKind::Gemini),
            "openai" => Ok(ProviderKind::OpenAi),
            "mock" => Ok(ProviderKind::Mock),
            _ => Err(UnsupportedProvider(s.to_string())),
        }
    }
}

/// Adapters available to the relay, keyed by provider kind. A kind with no
/// registered adapter (e.g. no API key configured) is rejected like an unknown name.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    adapters: HashMap<ProviderKind, Arc<dyn ChatProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &AppConfig) -> Self {
        let mut registry = Self::new();

        match &config.gemini {
            Some(settings) => {
                tracing::info!("Registering Gemini provider (default model {})", settings.model);
                registry.register(
                    ProviderKind::Gemini,
                    Arc::new(
                        GeminiProvider::new(settings.api_key.clone(), settings.model.clone())
                            .with_stream_idle_timeout(config.provider_stream_idle),
                    ),
                );
            }
            None => tracing::warn!("GEMINI_API_KEY not found. Gemini provider disabled."),
        }

        match &config.openai {
            Some(settings) => {
                tracing::info!("Registering OpenAI provider (default model {})", settings.model);
                registry.register(
                    ProviderKind::OpenAi,
                    Arc::new(
                        OpenAiProvider::new(
                            settings.api_key.clone(),
                            settings.model.clone(),
                            settings.base_url.clone(),
                        )
                        .with_stream_idle_timeout(config.provider_stream_idle),
                    ),
                );
            }
            None => tracing::warn!("OPENAI_API_KEY not found. OpenAI provider disabled."),
        }

        if config.enable_mock_provider {
            tracing::info!("Registering mock provider");
            registry.register(ProviderKind::Mock, Arc::new(MockProvider::new()));
        }

        registry
    }

    pub fn register(&mut self, kind: ProviderKind, adapter: Arc<dyn ChatProvider>) -> &mut Self {
        self.adapters.insert(kind, adapter);
        self
    }

    pub fn resolve(&self, name: &str) -> Result<Arc<dyn ChatProvider>, UnsupportedProvider> {
        let kind: ProviderKind = name.parse()?;
        self.adapters
            .get(&kind)
            .cloned()
            .ok_or_else(|| UnsupportedProvider(name.to_string()))
    }

    pub fn available(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.adapters.keys().map(|k| k.as_str()).collect();
        names.sort_unstable();
        names
    }
}
