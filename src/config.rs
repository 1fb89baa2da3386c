// src/config.rs
use std::env;
use std::time::Duration;
use thiserror::Error;

use crate::providers::STREAM_IDLE_TIMEOUT;
use crate::safety::DEFAULT_DENY_LIST;

/// The offline echo provider is only advertised by default in debug builds.
const MOCK_PROVIDER_DEFAULT: bool = cfg!(debug_assertions);

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{name} must be a valid number, got '{value}'")]
    InvalidNumber { name: &'static str, value: String },
    #[error("{0} must be set in release builds")]
    Missing(&'static str),
}

#[derive(Debug, Clone)]
pub struct GeminiSettings {
    pub api_key: String,
    pub model: String,
}

#[derive(Debug, Clone)]
pub struct OpenAiSettings {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    pub jwt_secret: String,
    pub jwt_expires_hours: i64,
    pub bcrypt_cost: u32,
    pub gemini: Option<GeminiSettings>,
    pub openai: Option<OpenAiSettings>,
    pub enable_mock_provider: bool,
    pub deny_list: Vec<String>,
    pub rate_limit_window: Duration,
    pub rate_limit_max: u32,
    pub provider_open_retry: Duration,
    /// Longest gap tolerated between chunks of a streamed provider reply.
    pub provider_stream_idle: Duration,
}

impl AppConfig {
    /// Reads configuration from the process environment. Call `dotenvy::dotenv()` first
    /// if a `.env` file should be honoured.
    pub fn from_env() -> Result<Self, ConfigError> {
        let jwt_secret = match non_empty("JWT_SECRET") {
            Some(secret) => secret,
            None if cfg!(debug_assertions) => {
                tracing::warn!("JWT_SECRET not set, using an insecure development secret");
                "dev_only_insecure_secret".to_string()
            }
            None => return Err(ConfigError::Missing("JWT_SECRET")),
        };

        let gemini = non_empty("GEMINI_API_KEY")
            .or_else(|| non_empty("GOOGLE_API_KEY"))
            .map(|api_key| GeminiSettings {
                api_key,
                model: non_empty("GEMINI_MODEL").unwrap_or_else(|| "gemini-2.0-flash".to_string()),
            });

        let openai = non_empty("OPENAI_API_KEY").map(|api_key| OpenAiSettings {
            api_key,
            model: non_empty("OPENAI_MODEL").unwrap_or_else(|| "gpt-3.5-turbo".to_string()),
            base_url: non_empty("OPENAI_BASE_URL")
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
        });

        let deny_list = match non_empty("SAFETY_DENY_LIST") {
            Some(raw) => parse_list(&raw),
            None => DEFAULT_DENY_LIST.iter().map(|s| s.to_string()).collect(),
        };

        Ok(Self {
            bind_addr: non_empty("BIND_ADDR").unwrap_or_else(|| "0.0.0.0:4000".to_string()),
            database_url: non_empty("DATABASE_URL"),
            db_max_connections: number("DB_MAX_CONNECTIONS", 5)?,
            jwt_secret,
            jwt_expires_hours: number("JWT_EXPIRES_HOURS", 24 * 7)?,
            bcrypt_cost: number("BCRYPT_COST", bcrypt::DEFAULT_COST)?,
            gemini,
            openai,
            enable_mock_provider: flag("ENABLE_MOCK_PROVIDER", MOCK_PROVIDER_DEFAULT),
            deny_list,
            rate_limit_window: Duration::from_millis(number("RATE_LIMIT_WINDOW_MS", 60_000)?),
            rate_limit_max: number("RATE_LIMIT_MAX", 60)?,
            provider_open_retry: Duration::from_secs(number("PROVIDER_OPEN_RETRY_SECS", 10)?),
            provider_stream_idle: Duration::from_secs(number(
                "PROVIDER_STREAM_IDLE_SECS",
                STREAM_IDLE_TIMEOUT.as_secs(),
            )?),
        })
    }

    /// Settings suitable for tests: in-memory store, mock provider only, no retries.
    pub fn for_tests() -> Self {
        Self {
            bind_addr: "127.0.0.1:0".to_string(),
            database_url: None,
            db_max_connections: 1,
            jwt_secret: "test_secret".to_string(),
            jwt_expires_hours: 1,
            bcrypt_cost: 4,
            gemini: None,
            openai: None,
            enable_mock_provider: true,
            deny_list: DEFAULT_DENY_LIST.iter().map(|s| s.to_string()).collect(),
            rate_limit_window: Duration::from_secs(60),
            rate_limit_max: 1_000,
            provider_open_retry: Duration::ZERO,
            provider_stream_idle: STREAM_IDLE_TIMEOUT,
        }
    }
}

fn non_empty(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn number<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match non_empty(name) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidNumber { name, value }),
        None => Ok(default),
    }
}

fn flag(name: &str, default: bool) -> bool {
    match non_empty(name) {
        Some(v) => matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        None => default,
    }
}

pub(crate) fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
