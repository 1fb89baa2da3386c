use crate::AppState;
use axum::{
    extract::{ConnectInfo, Extension, Request},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Json, Response},
};
use serde_json::json;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Fixed-window request counter keyed by client address.
pub struct RateLimiter {
    // client -> (request_count, window_start)
    clients: Mutex<HashMap<String, (u32, Instant)>>,
    max_requests: u32,
    window: Duration,
}

impl RateLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            clients: Mutex::new(HashMap::new()),
            max_requests,
            window,
        }
    }

    fn clients(&self) -> MutexGuard<'_, HashMap<String, (u32, Instant)>> {
        self.clients.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn check_rate_limit(&self, client: &str) -> bool {
        let mut clients = self.clients();
        let now = Instant::now();

        match clients.get_mut(client) {
            Some((count, window_start)) => {
                if now.duration_since(*window_start) > self.window {
                    *count = 1;
                    *window_start = now;
                    true
                } else if *count >= self.max_requests {
                    false
                } else {
                    *count += 1;
                    true
                }
            }
            None => {
                clients.insert(client.to_string(), (1, now));
                true
            }
        }
    }

    pub fn cleanup_expired(&self) {
        let now = Instant::now();
        self.clients()
            .retain(|_, (_, window_start)| now.duration_since(*window_start) <= self.window);
    }

    pub fn tracked_clients(&self) -> usize {
        self.clients().len()
    }
}

fn client_key(request: &Request) -> String {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

pub async fn rate_limit_middleware(
    Extension(state): Extension<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let client = client_key(&request);
    let limiter = &state.rate_limiter;

    if !limiter.check_rate_limit(&client) {
        tracing::warn!("Rate limit exceeded for client: {}", client);
        return (
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({
                "success": false,
                "message": "Too many requests. Please try again later.",
                "retry_after": limiter.window.as_secs().max(1)
            })),
        )
            .into_response();
    }

    // Occasionally clean up expired entries
    if rand::random::<u8>() < 10 {
        limiter.cleanup_expired();
    }

    next.run(request).await
}
