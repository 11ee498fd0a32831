//! HTTP error type and codes.

use axum::Json;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use relay_events::EventStoreError;
use serde::Serialize;
use tokio::task::JoinError;
use tracing::{error, warn};

use crate::publisher::PublishError;

// ── Error code constants ────────────────────────────────────────────

/// Invalid or missing parameters.
pub const INVALID_PARAMS: &str = "INVALID_PARAMS";
/// Connection unknown or already OFFLINE; reconnect.
pub const SESSION_NOT_FOUND: &str = "SESSION_NOT_FOUND";
/// Generic not-found.
pub const NOT_FOUND: &str = "NOT_FOUND";
/// Sequence allocation kept conflicting; retry the publish.
pub const SEQUENCE_CONFLICT: &str = "SEQUENCE_CONFLICT";
/// The event store cannot accept writes.
pub const STORE_UNAVAILABLE: &str = "STORE_UNAVAILABLE";
/// Unexpected internal error.
pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";

/// Error returned by every HTTP handler.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Required parameter missing or malformed.
    #[error("{0}")]
    InvalidParams(String),
    /// Heartbeat or disconnect for a connection that is gone.
    #[error("session not found: {0}")]
    SessionNotFound(String),
    /// Requested resource not found.
    #[error("{0}")]
    NotFound(String),
    /// Publish gave up after repeated sequence conflicts.
    #[error("{0}")]
    Conflict(String),
    /// Durable append failed.
    #[error("{0}")]
    StoreUnavailable(String),
    /// Anything else.
    #[error("{0}")]
    Internal(String),
}

/// Wire shape: `{"error": {"code": …, "message": …}}`.
#[derive(Debug, Serialize)]
pub struct ErrorEnvelope {
    /// The error.
    pub error: ErrorBody,
}

/// Error code and message.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    /// Machine-readable code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
}

impl ApiError {
    /// Machine-readable error code for this variant.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidParams(_) => INVALID_PARAMS,
            Self::SessionNotFound(_) => SESSION_NOT_FOUND,
            Self::NotFound(_) => NOT_FOUND,
            Self::Conflict(_) => SEQUENCE_CONFLICT,
            Self::StoreUnavailable(_) => STORE_UNAVAILABLE,
            Self::Internal(_) => INTERNAL_ERROR,
        }
    }

    /// HTTP status for this variant.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidParams(_) => StatusCode::BAD_REQUEST,
            Self::SessionNotFound(_) | Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Convert to the wire-format error body.
    pub fn to_envelope(&self) -> ErrorEnvelope {
        ErrorEnvelope {
            error: ErrorBody {
                code: self.code().to_owned(),
                message: self.to_string(),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(code = self.code(), error = %self, "request failed");
        } else {
            warn!(code = self.code(), error = %self, "request rejected");
        }
        (status, Json(self.to_envelope())).into_response()
    }
}

impl From<EventStoreError> for ApiError {
    fn from(err: EventStoreError) -> Self {
        match err {
            EventStoreError::InvalidOperation(msg) => Self::InvalidParams(msg),
            EventStoreError::SessionNotFound(id) => Self::SessionNotFound(id),
            EventStoreError::EventNotFound(id) => Self::NotFound(format!("event not found: {id}")),
            e @ EventStoreError::SequenceAllocationConflict { .. } => Self::Conflict(e.to_string()),
            e if e.is_unavailable() => Self::StoreUnavailable(e.to_string()),
            e => Self::Internal(e.to_string()),
        }
    }
}

impl From<PublishError> for ApiError {
    fn from(err: PublishError) -> Self {
        match err {
            PublishError::Invalid(msg) => Self::InvalidParams(msg),
            e @ PublishError::Conflict { .. } => Self::Conflict(e.to_string()),
            e @ PublishError::StoreUnavailable(_) => Self::StoreUnavailable(e.to_string()),
            e @ PublishError::Internal(_) => Self::Internal(e.to_string()),
        }
    }
}

impl From<JoinError> for ApiError {
    fn from(err: JoinError) -> Self {
        Self::Internal(format!("blocking task failed: {err}"))
    }
}

impl From<JsonRejection> for ApiError {
    fn from(err: JsonRejection) -> Self {
        Self::InvalidParams(err.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(err: QueryRejection) -> Self {
        Self::InvalidParams(err.body_text())
    }
}

/// Run a blocking store call off the async runtime.
pub(crate) async fn blocking<T, F>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> relay_events::Result<T> + Send + 'static,
    T: Send + 'static,
{
    Ok(tokio::task::spawn_blocking(f).await??)
}
