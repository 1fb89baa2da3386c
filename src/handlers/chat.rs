// src/handlers/chat.rs
use crate::error::ChatError;
use crate::middleware::auth::auth_middleware;
use crate::models::auth::AuthUser;
use crate::models::chat::{
    CreateSessionRequest, Message, RegenerateRequest, Session, TurnRequest, TurnResponse,
};
use crate::relay::{RelayEvent, TurnInput, HISTORY_LIMIT};
use crate::AppState;
use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        Json,
    },
    routing::{get, post, Router},
};
use futures::Stream;
use serde_json::json;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

const SESSION_LIST_LIMIT: i64 = 50;

pub fn chat_routes() -> Router {
    Router::new()
        .route("/sessions", post(create_session).get(list_sessions))
        .route("/sessions/:id/messages", get(list_messages))
        .route("/sessions/:id/regenerate", post(regenerate))
        .route("/stream", post(stream_turn))
        .route("/chat", post(chat_turn))
        .route_layer(axum::middleware::from_fn(auth_middleware))
}

async fn create_session(
    Extension(state): Extension<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    payload: Option<Json<CreateSessionRequest>>,
) -> Result<(StatusCode, Json<Session>), ChatError> {
    let title = payload
        .and_then(|Json(body)| body.title)
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty());

    let session = state.conversations.create_session(user.id, title).await?;
    tracing::info!("Created session {} for {}", session.id, user.email);
    Ok((StatusCode::CREATED, Json(session)))
}

async fn list_sessions(
    Extension(state): Extension<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<Vec<Session>>, ChatError> {
    let sessions = state.conversations.list_sessions(user.id, SESSION_LIST_LIMIT).await?;
    Ok(Json(sessions))
}

async fn list_messages(
    Extension(state): Extension<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<Vec<Message>>, ChatError> {
    let messages = state
        .conversations
        .list_messages(user.id, session_id, HISTORY_LIMIT)
        .await?;
    Ok(Json(messages))
}

fn turn_input(user: &AuthUser, payload: TurnRequest) -> Result<TurnInput, ChatError> {
    if payload.provider.trim().is_empty() {
        return Err(ChatError::BadRequest("provider is required"));
    }
    Ok(TurnInput {
        user_id: user.id,
        session_id: payload.session_id,
        provider: payload.provider,
        model: payload.model.filter(|m| !m.trim().is_empty()),
        message: payload.message,
        history: payload.history,
    })
}

/// Validation and session errors are plain HTTP errors; once the SSE response has
/// started, failures arrive as an `error` event.
async fn stream_turn(
    Extension(state): Extension<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Json(payload): Json<TurnRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ChatError> {
    let turn = state.relay.prepare_turn(turn_input(&user, payload)?).await?;
    let handle = state.relay.spawn_turn(turn);
    Ok(sse_response(handle.events))
}

async fn regenerate(
    Extension(state): Extension<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(session_id): Path<Uuid>,
    Json(payload): Json<RegenerateRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ChatError> {
    if payload.provider.trim().is_empty() {
        return Err(ChatError::BadRequest("provider is required"));
    }
    let turn = state
        .relay
        .prepare_regeneration(user.id, session_id, &payload.provider, payload.model)
        .await?;
    let handle = state.relay.spawn_turn(turn);
    Ok(sse_response(handle.events))
}

async fn chat_turn(
    Extension(state): Extension<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Json(payload): Json<TurnRequest>,
) -> Result<Json<TurnResponse>, ChatError> {
    let turn = state.relay.prepare_turn(turn_input(&user, payload)?).await?;
    let user_message_id = turn
        .user_message
        .as_ref()
        .map(|m| m.id)
        .ok_or_else(|| ChatError::InternalFault("prepared turn has no user message".to_string()))?;

    let (assistant, reply) = state.relay.complete_turn(&turn).await?;
    Ok(Json(TurnResponse {
        reply,
        session_id: turn.session.id,
        user_message_id,
        assistant_id: assistant.id,
    }))
}

fn sse_response(mut events: mpsc::Receiver<RelayEvent>) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = async_stream::stream! {
        while let Some(event) = events.recv().await {
            yield Ok::<_, Infallible>(to_sse_event(event));
        }
    };
    Sse::new(stream).keep_alive(KeepAlive::default())
}

pub fn to_sse_event(event: RelayEvent) -> Event {
    match event {
        RelayEvent::Chunk(chunk) => Event::default().data(json!({ "chunk": chunk }).to_string()),
        RelayEvent::Done {
            assistant_id,
            session_id,
        } => Event::default()
            .event("done")
            .data(json!({ "assistantId": assistant_id, "sessionId": session_id }).to_string()),
        RelayEvent::Error { message } => Event::default()
            .event("error")
            .data(json!({ "message": message }).to_string()),
    }
}
