// src/handlers/history.rs
use crate::error::ChatError;
use crate::middleware::auth::auth_middleware;
use crate::models::auth::AuthUser;
use crate::models::chat::Message;
use crate::AppState;
use axum::{
    extract::Extension,
    response::Json,
    routing::{get, Router},
};
use serde_json::json;
use std::sync::Arc;

pub fn history_routes() -> Router {
    Router::new()
        .route("/history", get(get_history).delete(clear_history))
        .route_layer(axum::middleware::from_fn(auth_middleware))
}

/// Every message the caller owns, across all sessions, oldest first.
async fn get_history(
    Extension(state): Extension<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<Vec<Message>>, ChatError> {
    Ok(Json(state.conversations.list_user_messages(user.id).await?))
}

async fn clear_history(
    Extension(state): Extension<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<serde_json::Value>, ChatError> {
    let deleted = state.conversations.clear_messages(user.id).await?;
    tracing::info!("User {} cleared {} messages", user.email, deleted);
    Ok(Json(json!({ "success": true, "deleted": deleted })))
}

#[cfg(test)]
mod tests {
    use crate::test_support::{json_request, send, signup, test_state};
    use axum::http::{Method, StatusCode};
    use serde_json::json;

    #[tokio::test]
    async fn test_history_read_and_clear_are_scoped_to_caller() {
        let (state, _store) = test_state();
        let app = crate::app(state);
        let alice = signup(&app, "alice@ai.com").await;
        let bob = signup(&app, "bob@ai.com").await;

        for (token, text) in [(&alice, "first"), (&alice, "second"), (&bob, "other")] {
            let (status, _) = send(
                &app,
                json_request(Method::POST, "/chat", Some(token), json!({"message": text, "provider": "mock"})),
            )
            .await;
            assert_eq!(status, StatusCode::OK);
        }

        let (status, history) = send(&app, json_request(Method::GET, "/history", Some(&alice), json!(null))).await;
        assert_eq!(status, StatusCode::OK);
        let history = history.as_array().unwrap();
        assert_eq!(history.len(), 4);
        assert_eq!(history[0]["text"], "first");

        let (status, body) = send(&app, json_request(Method::DELETE, "/history", Some(&alice), json!(null))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"success": true, "deleted": 4}));

        let (_, history) = send(&app, json_request(Method::GET, "/history", Some(&alice), json!(null))).await;
        assert!(history.as_array().unwrap().is_empty());
        let (_, history) = send(&app, json_request(Method::GET, "/history", Some(&bob), json!(null))).await;
        assert_eq!(history.as_array().unwrap().len(), 2);
    }
}
