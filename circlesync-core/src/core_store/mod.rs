//! Durable local store
//!
//! The cache store seeds a key's first value from here and writes every
//! committed base value back. Durable failures are logged by the caller and
//! never fail a read path.

use thiserror::Error;

mod memory;
mod migrations;
mod sql_store;

pub use memory::MemoryStore;
pub use sql_store::SqliteStore;

/// Errors raised by a durable store
#[derive(Debug, Error)]
pub enum StoreError {
    /// Backend I/O or connection failure
    #[error("Storage error: {0}")]
    Backend(String),

    /// Value could not be encoded
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Stored bytes could not be decoded
    #[error("Corrupted data for key {key}: {reason}")]
    Corrupted { key: String, reason: String },
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::Backend(err.to_string())
    }
}

impl From<r2d2::Error> for StoreError {
    fn from(err: r2d2::Error) -> Self {
        StoreError::Backend(format!("connection pool: {}", err))
    }
}

impl From<StoreError> for crate::errors::SyncError {
    fn from(err: StoreError) -> Self {
        crate::errors::SyncError::Storage(err.to_string())
    }
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Key-value persistence for one cache
pub trait DurableStore<K, V>: Send + Sync {
    fn read(&self, key: &K) -> StoreResult<Option<V>>;

    fn write(&self, key: &K, value: &V) -> StoreResult<()>;

    fn delete(&self, key: &K) -> StoreResult<()>;

    /// Remove every entry this store holds
    fn clear(&self) -> StoreResult<()>;
}
