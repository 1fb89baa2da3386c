use crate::AppState;
use axum::{
    extract::Extension,
    response::Json,
    routing::{get, Router},
};
use serde_json::{json, Value};
use std::sync::Arc;

pub fn status_routes() -> Router {
    Router::new()
        .route("/", get(root))
        .route("/api/status", get(status))
}

async fn root() -> Json<Value> {
    Json(json!({ "ok": true, "service": env!("CARGO_PKG_NAME") }))
}

async fn status(Extension(state): Extension<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "ok": true,
        "version": env!("CARGO_PKG_VERSION"),
        "storage": state.storage,
        "providers": state.relay.providers().available(),
    }))
}
