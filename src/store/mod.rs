// src/store/mod.rs
//! Durable record of users, sessions and messages.
//!
//! Every session-scoped operation takes the caller's user id and fails with
//! `Forbidden` when it is not the session owner, `NotFound` when the session is missing.

pub mod memory;
pub mod postgres;

use crate::models::auth::{NewUser, User};
use crate::models::chat::{Message, NewMessage, Session};
use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("caller does not own this session")]
    Forbidden,
    #[error("{0}")]
    Conflict(&'static str),
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn create_session(&self, user_id: Uuid, title: Option<String>) -> Result<Session, StoreError>;

    async fn get_session(&self, user_id: Uuid, session_id: Uuid) -> Result<Session, StoreError>;

    /// Most recently active first.
    async fn list_sessions(&self, user_id: Uuid, limit: i64) -> Result<Vec<Session>, StoreError>;

    async fn append_message(&self, user_id: Uuid, message: NewMessage) -> Result<Message, StoreError>;

    /// The `limit` most recent messages of the session, returned oldest first.
    async fn list_messages(&self, user_id: Uuid, session_id: Uuid, limit: i64) -> Result<Vec<Message>, StoreError>;

    /// Every message in every session owned by the user, oldest first.
    async fn list_user_messages(&self, user_id: Uuid) -> Result<Vec<Message>, StoreError>;

    async fn touch_session(&self, user_id: Uuid, session_id: Uuid) -> Result<Session, StoreError>;

    /// Deletes all messages in the user's sessions. Returns the number removed.
    async fn clear_messages(&self, user_id: Uuid) -> Result<u64, StoreError>;
}

#[async_trait]
pub trait UserStore: Send + Sync {
    /// Fails with `Conflict` if the email is already registered.
    async fn create_user(&self, user: NewUser) -> Result<User, StoreError>;

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;

    async fn find_user_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError>;
}

/// Emails are compared case-insensitively and without surrounding whitespace.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}
