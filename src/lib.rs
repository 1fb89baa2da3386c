// lib.rs - chat relay service: HTTP surface, provider adapters, conversation storage
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod providers;
pub mod relay;
pub mod safety;
pub mod store;

use axum::{Extension, Router};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use crate::config::AppConfig;
use crate::handlers::auth::JwtKeys;
use crate::middleware::{logging::request_logging_middleware, rate_limit::RateLimiter};
use crate::providers::ProviderRegistry;
use crate::relay::StreamRelay;
use crate::safety::SafetyFilter;
use crate::store::{ConversationStore, UserStore};

/// Shared by every handler through an `Extension`. Built once at startup.
pub struct AppState {
    pub conversations: Arc<dyn ConversationStore>,
    pub users: Arc<dyn UserStore>,
    pub relay: Arc<StreamRelay>,
    pub jwt: JwtKeys,
    pub rate_limiter: RateLimiter,
    pub bcrypt_cost: u32,
    /// "postgres" or "memory", reported by the status endpoint.
    pub storage: &'static str,
}

impl AppState {
    pub fn new(
        config: &AppConfig,
        conversations: Arc<dyn ConversationStore>,
        users: Arc<dyn UserStore>,
        providers: ProviderRegistry,
        storage: &'static str,
    ) -> Self {
        let relay = StreamRelay::new(
            conversations.clone(),
            providers,
            SafetyFilter::new(&config.deny_list),
        )
        .with_open_retry(config.provider_open_retry);

        Self {
            conversations,
            users,
            relay: Arc::new(relay),
            jwt: JwtKeys::new(config.jwt_secret.clone(), config.jwt_expires_hours),
            rate_limiter: RateLimiter::new(config.rate_limit_max, config.rate_limit_window),
            bcrypt_cost: config.bcrypt_cost,
            storage,
        }
    }
}

pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(handlers::status::status_routes())
        .merge(handlers::auth::auth_routes())
        .merge(handlers::chat::chat_routes())
        .merge(handlers::history::history_routes())
        .layer(axum::middleware::from_fn(
            middleware::rate_limit::rate_limit_middleware,
        ))
        .layer(axum::middleware::from_fn(request_logging_middleware))
        .layer(CorsLayer::permissive())
        .layer(Extension(state))
}
