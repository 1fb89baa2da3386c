use crate::error::ChatError;
use crate::models::auth::AuthUser;
use crate::AppState;
use axum::{
    extract::{Extension, Request},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use uuid::Uuid;

pub async fn auth_middleware(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
    mut request: Request,
    next: Next,
) -> Result<Response, ChatError> {
    let auth_str = headers
        .get("Authorization")
        .ok_or(ChatError::Unauthorized("Missing Authorization header"))?
        .to_str()
        .map_err(|_| ChatError::Unauthorized("Invalid Authorization header format"))?;

    let token = auth_str
        .strip_prefix("Bearer ")
        .ok_or(ChatError::Unauthorized(
            "Invalid Authorization header format. Expected 'Bearer <token>'",
        ))?;

    let claims = state.jwt.verify(token).map_err(|e| {
        tracing::warn!("JWT verification failed: {}", e);
        ChatError::Unauthorized("Invalid or expired token")
    })?;

    let user_id = Uuid::parse_str(&claims.sub).map_err(|_| ChatError::Unauthorized("Invalid or expired token"))?;

    // Tokens outlive accounts; make sure this one still exists.
    let user = state
        .users
        .find_user_by_id(user_id)
        .await?
        .ok_or(ChatError::Unauthorized("User no longer exists"))?;

    request.extensions_mut().insert(AuthUser {
        id: user.id,
        email: user.email,
    });

    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use crate::test_support::{json_request, send, test_state};
    use axum::http::{Method, StatusCode};
    use serde_json::json;

    #[tokio::test]
    async fn test_missing_or_bad_token_is_rejected() {
        let (state, _) = test_state();
        let app = crate::app(state);

        let (status, body) = send(&app, json_request(Method::GET, "/sessions", None, json!(null))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["message"], "Missing Authorization header");

        let (status, body) = send(&app, json_request(Method::GET, "/sessions", Some("garbage"), json!(null))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["message"], "Invalid or expired token");
    }

    #[tokio::test]
    async fn test_token_for_unknown_user_is_rejected() {
        let (state, _) = test_state();
        let ghost = crate::models::auth::User {
            id: uuid::Uuid::new_v4(),
            email: "ghost@ai.com".to_string(),
            name: None,
            password_hash: String::new(),
            created_at: chrono::Utc::now(),
        };
        let token = state.jwt.issue(&ghost).unwrap();
        let app = crate::app(state);

        let (status, body) = send(&app, json_request(Method::GET, "/history", Some(&token), json!(null))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["message"], "User no longer exists");
    }
}
