//! Error types for the sync engine

use thiserror::Error;

/// Result type for sync operations
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors surfaced by fetches and mutations.
///
/// `Clone` is required because a single in-flight fetch or mutation result
/// is shared by every caller that joined it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// Connectivity failure or timeout
    #[error("Network error: {0}")]
    Network(String),

    /// The server refused the operation for a business reason
    #[error("Rejected by server: {reason}")]
    ServerRejected { reason: String },

    /// Rollback found the optimistic overlay in an unexpected shape
    #[error("Stale snapshot for {entity} {key}: {detail}")]
    StaleSnapshot {
        entity: String,
        key: String,
        detail: String,
    },

    /// Durable store failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// No transition is defined from the current state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Internal error (should not happen)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl SyncError {
    /// Whether repeating the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::Network(_))
    }

    pub fn network(msg: impl Into<String>) -> Self {
        SyncError::Network(msg.into())
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        SyncError::ServerRejected {
            reason: reason.into(),
        }
    }
}

impl From<tokio::time::error::Elapsed> for SyncError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        SyncError::Network("remote call timed out".to_string())
    }
}

impl From<tokio::task::JoinError> for SyncError {
    fn from(e: tokio::task::JoinError) -> Self {
        SyncError::Internal(format!("background task failed: {}", e))
    }
}
