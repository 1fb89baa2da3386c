// src/store/memory.rs
use super::{normalize_email, ConversationStore, StoreError, UserStore};
use crate::models::auth::{NewUser, User};
use crate::models::chat::{Message, NewMessage, Session, DEFAULT_SESSION_TITLE, DEFAULT_SESSION_TTL_MS};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// In-process store for tests and database-less development. Nothing survives a restart.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    users: HashMap<Uuid, User>,
    sessions: HashMap<Uuid, Session>,
    // Insertion order; `seq` breaks created_at ties.
    messages: Vec<Message>,
    next_seq: i64,
    last_created_at: Option<DateTime<Utc>>,
}

impl Inner {
    /// Wall clock, clamped so stored timestamps never go backwards.
    fn now(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let now = match self.last_created_at {
            Some(last) if last > now => last,
            _ => now,
        };
        self.last_created_at = Some(now);
        now
    }

    fn owned_session(&self, user_id: Uuid, session_id: Uuid) -> Result<&Session, StoreError> {
        let session = self.sessions.get(&session_id).ok_or(StoreError::NotFound("Session"))?;
        if session.user_id != user_id {
            return Err(StoreError::Forbidden);
        }
        Ok(session)
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn message_count(&self) -> usize {
        self.inner.read().await.messages.len()
    }

    pub async fn session_count(&self) -> usize {
        self.inner.read().await.sessions.len()
    }
}

#[async_trait]
impl ConversationStore for MemoryStore {
    async fn create_session(&self, user_id: Uuid, title: Option<String>) -> Result<Session, StoreError> {
        let mut inner = self.inner.write().await;
        let now = inner.now();
        let session = Session {
            id: Uuid::new_v4(),
            user_id,
            title: title.unwrap_or_else(|| DEFAULT_SESSION_TITLE.to_string()),
            created_at: now,
            last_activity: now,
            metadata: serde_json::json!({}),
            ttl: Some(DEFAULT_SESSION_TTL_MS),
        };
        inner.sessions.insert(session.id, session.clone());
        Ok(session)
    }

    async fn get_session(&self, user_id: Uuid, session_id: Uuid) -> Result<Session, StoreError> {
        let inner = self.inner.read().await;
        inner.owned_session(user_id, session_id).cloned()
    }

    async fn list_sessions(&self, user_id: Uuid, limit: i64) -> Result<Vec<Session>, StoreError> {
        let inner = self.inner.read().await;
        let mut sessions: Vec<Session> = inner
            .sessions
            .values()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.last_activity.cmp(&a.last_activity).then(b.created_at.cmp(&a.created_at)));
        sessions.truncate(limit.max(0) as usize);
        Ok(sessions)
    }

    async fn append_message(&self, user_id: Uuid, message: NewMessage) -> Result<Message, StoreError> {
        let mut inner = self.inner.write().await;
        inner.owned_session(user_id, message.session_id)?;

        let created_at = inner.now();
        inner.next_seq += 1;
        let stored = Message {
            id: Uuid::new_v4(),
            session_id: message.session_id,
            user_id: message.author_user_id,
            role: message.role,
            text: message.text,
            meta: message.meta.unwrap_or_else(|| serde_json::json!({})),
            created_at,
            seq: inner.next_seq,
        };
        inner.messages.push(stored.clone());
        Ok(stored)
    }

    async fn list_messages(&self, user_id: Uuid, session_id: Uuid, limit: i64) -> Result<Vec<Message>, StoreError> {
        let inner = self.inner.read().await;
        inner.owned_session(user_id, session_id)?;

        let mut messages: Vec<Message> = inner
            .messages
            .iter()
            .filter(|m| m.session_id == session_id)
            .cloned()
            .collect();
        messages.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.seq.cmp(&b.seq)));
        let skip = messages.len().saturating_sub(limit.max(0) as usize);
        Ok(messages.split_off(skip))
    }

    async fn list_user_messages(&self, user_id: Uuid) -> Result<Vec<Message>, StoreError> {
        let inner = self.inner.read().await;
        let mut messages: Vec<Message> = inner
            .messages
            .iter()
            .filter(|m| inner.sessions.get(&m.session_id).is_some_and(|s| s.user_id == user_id))
            .cloned()
            .collect();
        messages.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.seq.cmp(&b.seq)));
        Ok(messages)
    }

    async fn touch_session(&self, user_id: Uuid, session_id: Uuid) -> Result<Session, StoreError> {
        let mut inner = self.inner.write().await;
        inner.owned_session(user_id, session_id)?;
        let now = inner.now();
        let session = inner
            .sessions
            .get_mut(&session_id)
            .ok_or(StoreError::NotFound("Session"))?;
        session.last_activity = now;
        Ok(session.clone())
    }

    async fn clear_messages(&self, user_id: Uuid) -> Result<u64, StoreError> {
        let mut inner = self.inner.write().await;
        let owned: Vec<Uuid> = inner
            .sessions
            .values()
            .filter(|s| s.user_id == user_id)
            .map(|s| s.id)
            .collect();
        let before = inner.messages.len();
        inner.messages.retain(|m| !owned.contains(&m.session_id));
        Ok((before - inner.messages.len()) as u64)
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn create_user(&self, user: NewUser) -> Result<User, StoreError> {
        let mut inner = self.inner.write().await;
        let email = normalize_email(&user.email);
        if inner.users.values().any(|u| u.email == email) {
            return Err(StoreError::Conflict("User with this email already exists"));
        }
        let created_at = inner.now();
        let stored = User {
            id: Uuid::new_v4(),
            email,
            name: user.name,
            password_hash: user.password_hash,
            created_at,
        };
        inner.users.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let email = normalize_email(email);
        let inner = self.inner.read().await;
        Ok(inner.users.values().find(|u| u.email == email).cloned())
    }

    async fn find_user_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        Ok(self.inner.read().await.users.get(&id).cloned())
    }
}
