//! Moderator service error types.
//!
//! On the realtime path every error means "drop this frame": nothing is sent
//! back to the offending client and the connection stays open. On the REST
//! glue errors map to HTTP status codes via the `IntoResponse` impl. Internal
//! details are logged server-side but never returned to clients.

use crate::storage::StorageError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Moderator service error type.
///
/// Maps to HTTP status codes:
/// - `MalformedFrame`, `UnexpectedFinishType`, `BadRequest`: 400
/// - `NotFound`: 404
/// - `Conflict`, `MeetingEnded`, `NoCandidates`: 409
/// - `Storage`, `Channel`, `Internal`: 500
#[derive(Debug, Error)]
pub enum ModeratorError {
    /// Inbound frame failed to decode (bad JSON, missing or mistyped field).
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    /// `finishword` carried a finish type other than `present` or `question`.
    #[error("Unexpected finish type: {0}")]
    UnexpectedFinishType(String),

    /// The meeting already ended; no further moderator steps are produced.
    #[error("Meeting has ended: {0}")]
    MeetingEnded(i64),

    /// Nobody is eligible to be asked a question.
    #[error("No eligible questioner in meeting {0}")]
    NoCandidates(i64),

    /// Entity not found in storage.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Conflicting state (e.g. hand already raised).
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Storage collaborator failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Actor mailbox closed or response dropped.
    #[error("Channel error: {0}")]
    Channel(String),

    /// Invalid request on the REST glue.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ModeratorError {
    /// Returns the HTTP status code for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            ModeratorError::MalformedFrame(_)
            | ModeratorError::UnexpectedFinishType(_)
            | ModeratorError::BadRequest(_) => 400,
            ModeratorError::NotFound(_) => 404,
            ModeratorError::Conflict(_)
            | ModeratorError::MeetingEnded(_)
            | ModeratorError::NoCandidates(_) => 409,
            ModeratorError::Storage(_)
            | ModeratorError::Channel(_)
            | ModeratorError::Internal(_) => 500,
        }
    }

    /// Short, bounded label for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ModeratorError::MalformedFrame(_) => "malformed",
            ModeratorError::UnexpectedFinishType(_) => "unexpected_finish_type",
            ModeratorError::MeetingEnded(_) => "meeting_ended",
            ModeratorError::NoCandidates(_) => "no_candidates",
            ModeratorError::NotFound(_) => "not_found",
            ModeratorError::Conflict(_) => "conflict",
            ModeratorError::Storage(_) => "storage",
            ModeratorError::Channel(_) => "channel",
            ModeratorError::BadRequest(_) => "bad_request",
            ModeratorError::Internal(_) => "internal",
        }
    }

    /// Returns a client-safe error message (no internal details).
    pub fn client_message(&self) -> String {
        match self {
            ModeratorError::Storage(_)
            | ModeratorError::Channel(_)
            | ModeratorError::Internal(_) => "An internal error occurred".to_string(),
            ModeratorError::MeetingEnded(_) => "Meeting has ended".to_string(),
            ModeratorError::NoCandidates(_) => "No eligible participant".to_string(),
            ModeratorError::UnexpectedFinishType(kind) => {
                format!("Unexpected finish type: {kind}")
            }
            ModeratorError::MalformedFrame(msg)
            | ModeratorError::NotFound(msg)
            | ModeratorError::Conflict(msg)
            | ModeratorError::BadRequest(msg) => msg.clone(),
        }
    }
}

impl From<StorageError> for ModeratorError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(what) => ModeratorError::NotFound(what),
            StorageError::Conflict(what) => ModeratorError::Conflict(what),
            StorageError::Database(msg) => ModeratorError::Storage(msg),
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

impl IntoResponse for ModeratorError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        if status.is_server_error() {
            tracing::error!(target: "moderator.http", error = %self, "Request failed");
        }

        let body = ErrorResponse {
            error: ErrorDetail {
                code: self.kind().to_uppercase(),
                message: self.client_message(),
            },
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_status_code_mapping() {
        assert_eq!(
            ModeratorError::MalformedFrame("x".to_string()).status_code(),
            400
        );
        assert_eq!(
            ModeratorError::UnexpectedFinishType("pause".to_string()).status_code(),
            400
        );
        assert_eq!(
            ModeratorError::NotFound("meeting 1".to_string()).status_code(),
            404
        );
        assert_eq!(ModeratorError::MeetingEnded(3).status_code(), 409);
        assert_eq!(ModeratorError::NoCandidates(3).status_code(), 409);
        assert_eq!(
            ModeratorError::Storage("pool timed out".to_string()).status_code(),
            500
        );
        assert_eq!(
            ModeratorError::Channel("closed".to_string()).status_code(),
            500
        );
    }

    #[test]
    fn test_client_messages_hide_internal_details() {
        let err = ModeratorError::Storage("connection refused at 10.0.0.7:5432".to_string());
        assert!(!err.client_message().contains("10.0.0.7"));
        assert_eq!(err.client_message(), "An internal error occurred");

        let err = ModeratorError::Internal("DATABASE_URL=postgres://secret".to_string());
        assert!(!err.client_message().contains("secret"));
    }

    #[test]
    fn test_storage_error_conversion() {
        let err: ModeratorError = StorageError::NotFound("document 9".to_string()).into();
        assert!(matches!(err, ModeratorError::NotFound(ref what) if what == "document 9"));

        let err: ModeratorError = StorageError::Conflict("hand already raised".to_string()).into();
        assert_eq!(err.status_code(), 409);

        let err: ModeratorError = StorageError::Database("deadlock".to_string()).into();
        assert!(matches!(err, ModeratorError::Storage(_)));
    }

    #[test]
    fn test_display_formatting() {
        assert_eq!(
            format!("{}", ModeratorError::MeetingEnded(42)),
            "Meeting has ended: 42"
        );
        assert_eq!(
            format!(
                "{}",
                ModeratorError::UnexpectedFinishType("pause".to_string())
            ),
            "Unexpected finish type: pause"
        );
    }
}
