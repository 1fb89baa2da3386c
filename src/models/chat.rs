// src/models/chat.rs
use crate::providers::HistoryTurn;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Advisory retention hint stored on new sessions: 7 days in milliseconds.
pub const DEFAULT_SESSION_TTL_MS: i64 = 1000 * 60 * 60 * 24 * 7;
pub const DEFAULT_SESSION_TITLE: &str = "New session";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "system" => Ok(Role::System),
            other => Err(format!("unknown message role '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub last_activity: chrono::DateTime<chrono::Utc>,
    pub metadata: Value,
    pub ttl: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: Uuid,
    pub session_id: Uuid,
    pub user_id: Option<Uuid>,
    pub role: Role,
    pub text: String,
    pub meta: Value,
    pub created_at: chrono::DateTime<chrono::Utc>,
    #[serde(skip)]
    pub seq: i64,
}

/// Row shape of the `messages` table; `role` is stored as text.
#[derive(Debug, FromRow)]
pub struct MessageRow {
    pub id: Uuid,
    pub session_id: Uuid,
    pub user_id: Option<Uuid>,
    pub role: String,
    pub text: String,
    pub meta: Value,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub seq: i64,
}

impl TryFrom<MessageRow> for Message {
    type Error = String;

    fn try_from(row: MessageRow) -> Result<Self, Self::Error> {
        Ok(Message {
            id: row.id,
            session_id: row.session_id,
            user_id: row.user_id,
            role: row.role.parse()?,
            text: row.text,
            meta: row.meta,
            created_at: row.created_at,
            seq: row.seq,
        })
    }
}

#[derive(Debug, Clone)]
pub struct NewMessage {
    pub session_id: Uuid,
    pub role: Role,
    pub text: String,
    pub author_user_id: Option<Uuid>,
    pub meta: Option<Value>,
}

impl NewMessage {
    pub fn user(session_id: Uuid, author: Uuid, text: impl Into<String>) -> Self {
        Self {
            session_id,
            role: Role::User,
            text: text.into(),
            author_user_id: Some(author),
            meta: None,
        }
    }

    pub fn assistant(session_id: Uuid, text: impl Into<String>, meta: Value) -> Self {
        Self {
            session_id,
            role: Role::Assistant,
            text: text.into(),
            author_user_id: None,
            meta: Some(meta),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateSessionRequest {
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnRequest {
    #[serde(default)]
    pub session_id: Option<Uuid>,
    #[serde(default)]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub message: String,
    /// Context to use instead of the stored transcript.
    #[serde(default)]
    pub history: Option<Vec<HistoryTurn>>,
}

#[derive(Debug, Deserialize)]
pub struct RegenerateRequest {
    #[serde(default)]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnResponse {
    pub reply: String,
    pub session_id: Uuid,
    pub user_message_id: Uuid,
    pub assistant_id: Uuid,
}

/// Title for a session opened implicitly by its first message.
pub fn title_from_message(text: &str) -> String {
    let trimmed = text.trim();
    let mut title: String = trimmed.chars().take(60).collect();
    if trimmed.chars().count() > 60 {
        title.push('…');
    }
    if title.is_empty() {
        DEFAULT_SESSION_TITLE.to_string()
    } else {
        title
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_round_trips_through_text() {
        for role in [Role::User, Role::Assistant, Role::System] {
            assert_eq!(role.as_str().parse::<Role>().unwrap(), role);
        }
        assert!("bot".parse::<Role>().is_err());
    }

    #[test]
    fn test_title_from_message() {
        assert_eq!(title_from_message("  hello there "), "hello there");
        let long = "a".repeat(80);
        let title = title_from_message(&long);
        assert_eq!(title.chars().count(), 61);
        assert!(title.ends_with('…'));
    }

    #[test]
    fn test_turn_request_uses_camel_case() {
        let req: TurnRequest = serde_json::from_str(
            r#"{"sessionId":"6f2c7a7e-1f4e-4c53-9f0a-2b1f5a3f1d11","provider":"mock","message":"hi"}"#,
        )
        .unwrap();
        assert!(req.session_id.is_some());
        assert_eq!(req.provider, "mock");
        assert!(req.model.is_none());
    }
}
