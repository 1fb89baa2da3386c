// src/store/postgres.rs
use super::{normalize_email, ConversationStore, StoreError, UserStore};
use crate::models::auth::{NewUser, User};
use crate::models::chat::{Message, MessageRow, NewMessage, Session, DEFAULT_SESSION_TITLE, DEFAULT_SESSION_TTL_MS};
use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

const SESSION_COLUMNS: &str = "id, user_id, title, created_at, last_activity, metadata, ttl";
const MESSAGE_COLUMNS: &str = "id, session_id, user_id, role, text, meta, created_at, seq";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn owned_session(&self, user_id: Uuid, session_id: Uuid) -> Result<Session, StoreError> {
        let session = sqlx::query_as::<_, Session>(&format!(
            "SELECT {} FROM sessions WHERE id = $1",
            SESSION_COLUMNS
        ))
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::NotFound("Session"))?;

        if session.user_id != user_id {
            tracing::warn!("User {} attempted to access session {} owned by another user", user_id, session_id);
            return Err(StoreError::Forbidden);
        }
        Ok(session)
    }
}

fn into_messages(rows: Vec<MessageRow>) -> Result<Vec<Message>, StoreError> {
    rows.into_iter()
        .map(|row| Message::try_from(row).map_err(|e| StoreError::Database(sqlx::Error::Decode(e.into()))))
        .collect()
}

#[async_trait]
impl ConversationStore for PgStore {
    async fn create_session(&self, user_id: Uuid, title: Option<String>) -> Result<Session, StoreError> {
        let session = sqlx::query_as::<_, Session>(&format!(
            "INSERT INTO sessions (id, user_id, title, created_at, last_activity, metadata, ttl)
             VALUES ($1, $2, $3, NOW(), NOW(), '{{}}'::jsonb, $4)
             RETURNING {}",
            SESSION_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(title.unwrap_or_else(|| DEFAULT_SESSION_TITLE.to_string()))
        .bind(DEFAULT_SESSION_TTL_MS)
        .fetch_one(&self.pool)
        .await?;

        tracing::debug!("Created session {} for user {}", session.id, user_id);
        Ok(session)
    }

    async fn get_session(&self, user_id: Uuid, session_id: Uuid) -> Result<Session, StoreError> {
        self.owned_session(user_id, session_id).await
    }

    async fn list_sessions(&self, user_id: Uuid, limit: i64) -> Result<Vec<Session>, StoreError> {
        let sessions = sqlx::query_as::<_, Session>(&format!(
            "SELECT {} FROM sessions WHERE user_id = $1 ORDER BY last_activity DESC, created_at DESC LIMIT $2",
            SESSION_COLUMNS
        ))
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(sessions)
    }

    async fn append_message(&self, user_id: Uuid, message: NewMessage) -> Result<Message, StoreError> {
        self.owned_session(user_id, message.session_id).await?;

        let row = sqlx::query_as::<_, MessageRow>(&format!(
            "INSERT INTO messages (id, session_id, user_id, role, text, meta)
             VALUES ($1, $2, $3, $4, $5, $6)
             RETURNING {}",
            MESSAGE_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(message.session_id)
        .bind(message.author_user_id)
        .bind(message.role.as_str())
        .bind(&message.text)
        .bind(message.meta.unwrap_or_else(|| serde_json::json!({})))
        .fetch_one(&self.pool)
        .await?;

        let mut stored = into_messages(vec![row])?;
        stored.pop().ok_or(StoreError::NotFound("Message"))
    }

    async fn list_messages(&self, user_id: Uuid, session_id: Uuid, limit: i64) -> Result<Vec<Message>, StoreError> {
        self.owned_session(user_id, session_id).await?;

        let rows = sqlx::query_as::<_, MessageRow>(&format!(
            "SELECT {cols} FROM (
                 SELECT {cols} FROM messages WHERE session_id = $1
                 ORDER BY created_at DESC, seq DESC LIMIT $2
             ) recent
             ORDER BY created_at ASC, seq ASC",
            cols = MESSAGE_COLUMNS
        ))
        .bind(session_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        into_messages(rows)
    }

    async fn list_user_messages(&self, user_id: Uuid) -> Result<Vec<Message>, StoreError> {
        let rows = sqlx::query_as::<_, MessageRow>(
            "SELECT m.id, m.session_id, m.user_id, m.role, m.text, m.meta, m.created_at, m.seq
             FROM messages m
             JOIN sessions s ON s.id = m.session_id
             WHERE s.user_id = $1
             ORDER BY m.created_at ASC, m.seq ASC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        into_messages(rows)
    }

    async fn touch_session(&self, user_id: Uuid, session_id: Uuid) -> Result<Session, StoreError> {
        self.owned_session(user_id, session_id).await?;

        let session = sqlx::query_as::<_, Session>(&format!(
            "UPDATE sessions SET last_activity = NOW() WHERE id = $1 AND user_id = $2 RETURNING {}",
            SESSION_COLUMNS
        ))
        .bind(session_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::NotFound("Session"))?;
        Ok(session)
    }

    async fn clear_messages(&self, user_id: Uuid) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "DELETE FROM messages WHERE session_id IN (SELECT id FROM sessions WHERE user_id = $1)",
        )
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        tracing::info!("Cleared {} messages for user {}", result.rows_affected(), user_id);
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl UserStore for PgStore {
    async fn create_user(&self, user: NewUser) -> Result<User, StoreError> {
        let result = sqlx::query_as::<_, User>(
            "INSERT INTO users (id, email, name, password_hash, created_at)
             VALUES ($1, $2, $3, $4, NOW())
             RETURNING id, email, name, password_hash, created_at",
        )
        .bind(Uuid::new_v4())
        .bind(normalize_email(&user.email))
        .bind(&user.name)
        .bind(&user.password_hash)
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok(user) => Ok(user),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                Err(StoreError::Conflict("User with this email already exists"))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let user = sqlx::query_as::<_, User>(
            "SELECT id, email, name, password_hash, created_at FROM users WHERE email = $1",
        )
        .bind(normalize_email(email))
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn find_user_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        let user = sqlx::query_as::<_, User>(
            "SELECT id, email, name, password_hash, created_at FROM users WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }
}
