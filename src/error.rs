// src/error.rs
use crate::models::auth::ErrorResponse;
use crate::providers::{ProviderError, UnsupportedProvider};
use crate::store::StoreError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use thiserror::Error;

/// Errors surfaced to HTTP clients. Variants that can only occur before a stream has
/// started map to a status code; the relay reports later failures in-band.
#[derive(Error, Debug)]
pub enum ChatError {
    #[error("Message text must not be empty")]
    EmptyInput,
    #[error("{0}")]
    ContentRejected(String),
    #[error("Access denied")]
    Forbidden,
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("Unsupported AI provider: {0}")]
    UnsupportedProvider(String),
    #[error("AI provider unavailable")]
    ProviderUnavailable(#[source] ProviderError),
    #[error("Internal server error")]
    InternalFault(String),
    #[error("{0}")]
    Unauthorized(&'static str),
    #[error("Invalid email or password")]
    InvalidCredentials,
    #[error("{0}")]
    Conflict(&'static str),
    #[error("{0}")]
    BadRequest(&'static str),
}

impl ChatError {
    pub fn status(&self) -> StatusCode {
        match self {
            ChatError::EmptyInput
            | ChatError::ContentRejected(_)
            | ChatError::UnsupportedProvider(_)
            | ChatError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ChatError::Unauthorized(_) | ChatError::InvalidCredentials => StatusCode::UNAUTHORIZED,
            ChatError::Forbidden => StatusCode::FORBIDDEN,
            ChatError::NotFound(_) => StatusCode::NOT_FOUND,
            ChatError::Conflict(_) => StatusCode::CONFLICT,
            ChatError::ProviderUnavailable(_) => StatusCode::BAD_GATEWAY,
            ChatError::InternalFault(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to show a client. Internal details stay in the logs.
    pub fn client_message(&self) -> String {
        self.to_string()
    }
}

impl From<StoreError> for ChatError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => ChatError::NotFound(what),
            StoreError::Forbidden => ChatError::Forbidden,
            StoreError::Conflict(what) => ChatError::Conflict(what),
            StoreError::Database(e) => ChatError::InternalFault(e.to_string()),
        }
    }
}

impl From<ProviderError> for ChatError {
    fn from(err: ProviderError) -> Self {
        ChatError::ProviderUnavailable(err)
    }
}

impl From<UnsupportedProvider> for ChatError {
    fn from(err: UnsupportedProvider) -> Self {
        ChatError::UnsupportedProvider(err.0)
    }
}

impl IntoResponse for ChatError {
    fn into_response(self) -> Response {
        let status = self.status();
        match &self {
            ChatError::InternalFault(detail) => {
                tracing::error!(detail = %detail, "internal fault");
            }
            ChatError::ProviderUnavailable(source) => {
                tracing::error!(error = %source, "provider call failed");
            }
            _ => {}
        }

        (
            status,
            Json(ErrorResponse {
                success: false,
                message: self.client_message(),
            }),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(ChatError::EmptyInput.status(), StatusCode::BAD_REQUEST);
        assert_eq!(ChatError::Forbidden.status(), StatusCode::FORBIDDEN);
        assert_eq!(ChatError::NotFound("Session").status(), StatusCode::NOT_FOUND);
        assert_eq!(
            ChatError::UnsupportedProvider("foo".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ChatError::Unauthorized("Missing Authorization header").status(),
            StatusCode::UNAUTHORIZED
        );
    }

    #[test]
    fn test_internal_fault_hides_detail() {
        let err = ChatError::InternalFault("connection refused at 10.0.0.3".into());
        assert_eq!(err.client_message(), "Internal server error");
    }

    #[test]
    fn test_store_errors_convert() {
        assert!(matches!(ChatError::from(StoreError::Forbidden), ChatError::Forbidden));
        assert!(matches!(
            ChatError::from(StoreError::NotFound("Session")),
            ChatError::NotFound("Session")
        ));
    }
}
