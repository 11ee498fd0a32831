//! Error types for the event and session stores.
//!
//! [`EventStoreError`] is returned by every store operation. Callers mostly
//! care about three questions, answered by the classification helpers:
//! is the store down ([`EventStoreError::is_unavailable`]), should the
//! publish be retried ([`EventStoreError::is_retryable`]), or does the
//! client need to re-handshake ([`EventStoreError::SessionNotFound`]).

use rusqlite::ErrorCode;
use thiserror::Error;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum EventStoreError {
    /// `SQLite` database error.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Connection pool error.
    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// JSON serialization/deserialization error.
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),

    /// Schema migration failed.
    #[error("migration error: {message}")]
    Migration {
        /// Describes which migration failed and why.
        message: String,
    },

    /// The durable append could not be performed.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// Another writer won the race for the workspace sequence. Retryable.
    #[error("sequence allocation conflict in workspace {workspace_id}: {reason}")]
    SequenceAllocationConflict {
        /// Workspace whose counter was contended.
        workspace_id: String,
        /// Underlying cause.
        reason: String,
    },

    /// Unknown connection, or the connection is already OFFLINE.
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// Requested event was not found.
    #[error("event not found: {0}")]
    EventNotFound(String),

    /// Invalid input to a store operation.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// A stored row could not be decoded.
    #[error("internal error: {0}")]
    Internal(String),
}

impl EventStoreError {
    /// Whether the failed operation may succeed if simply retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::SequenceAllocationConflict { .. } => true,
            Self::Sqlite(e) => is_contention(e),
            _ => false,
        }
    }

    /// Whether the failure means the persistence layer itself is down.
    pub fn is_unavailable(&self) -> bool {
        match self {
            Self::Pool(_) | Self::StoreUnavailable(_) => true,
            Self::Sqlite(e) => matches!(
                e.sqlite_error_code(),
                Some(
                    ErrorCode::CannotOpen
                        | ErrorCode::DiskFull
                        | ErrorCode::SystemIoFailure
                        | ErrorCode::ReadOnly
                        | ErrorCode::NotADatabase
                        | ErrorCode::DatabaseCorrupt
                        | ErrorCode::OutOfMemory
                        | ErrorCode::PermissionDenied
                )
            ),
            _ => false,
        }
    }

    /// Classify a failure raised while appending to `workspace_id`.
    ///
    /// Lock contention and sequence uniqueness violations become
    /// [`Self::SequenceAllocationConflict`]; anything else from the database
    /// or the pool becomes [`Self::StoreUnavailable`].
    pub(crate) fn on_append(self, workspace_id: &str) -> Self {
        match self {
            Self::Sqlite(ref e) if is_contention(e) || is_constraint(e) => {
                Self::SequenceAllocationConflict {
                    workspace_id: workspace_id.to_string(),
                    reason: e.to_string(),
                }
            }
            Self::Sqlite(e) => Self::StoreUnavailable(e.to_string()),
            Self::Pool(e) => Self::StoreUnavailable(e.to_string()),
            other => other,
        }
    }
}

fn is_contention(e: &rusqlite::Error) -> bool {
    matches!(
        e.sqlite_error_code(),
        Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
    )
}

fn is_constraint(e: &rusqlite::Error) -> bool {
    e.sqlite_error_code() == Some(ErrorCode::ConstraintViolation)
}

/// Convenience type alias for store results.
pub type Result<T> = std::result::Result<T, EventStoreError>;

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
