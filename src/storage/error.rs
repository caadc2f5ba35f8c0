//! Storage-specific error types.
//!
//! Internal storage operations return [`StorageError`] on failure, which can be
//! matched to determine the underlying cause (database, channel, migration, etc.).
//! The public [`EventStore`](crate::storage::EventStore) never lets these escape
//! from read paths; they are logged and replaced with a safe default.

use thiserror::Error;

/// Errors that can occur in the storage layer.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Database operation failed (duckdb error).
    #[error("database error: {0}")]
    Database(#[from] duckdb::Error),

    /// Failed to send command to writer actor.
    #[error("failed to send command to writer actor")]
    ChannelSend,

    /// Writer actor went away before replying.
    #[error("writer actor did not reply")]
    ChannelRecv,

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Internal error (e.g., thread join failure, poisoned lock).
    #[error("internal error: {0}")]
    Internal(String),

    /// Invalid data in database (e.g., parameter row with no value).
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// Schema migration error.
    #[error("migration error: {0}")]
    Migration(String),
}
