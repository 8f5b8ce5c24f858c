//! Error types for the store layer.

use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The underlying durable store is inaccessible. Fatal for the calling
    /// operation; never retried by the store itself.
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// The targeted record does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The conflict was already resolved; the resolve transition is one-way.
    #[error("conflict already resolved: {0}")]
    AlreadyResolved(String),

    /// A non-delete mutation was enqueued without a payload.
    #[error("payload required for {0} mutations")]
    MissingPayload(&'static str),

    /// Payload serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A persisted row failed to parse back into its record type.
    #[error("corrupt row: {0}")]
    CorruptRow(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Unavailable(e.to_string())
    }
}
