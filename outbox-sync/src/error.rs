//! Error types for the sync layer.

use outbox_store::StoreError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur in sync operations.
///
/// Per-item transport failures never surface here; the drain loop converts
/// them to persisted `Failed` state. Only storage unavailability aborts a
/// drain, since without durable storage no progress can be recorded safely.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Storage error. `StoreError::Unavailable` is the only variant the
    /// drain loop lets escape.
    #[error("storage error: {0}")]
    Storage(#[from] StoreError),

    /// Network-level transport error (connect failure, timeout).
    #[error("transport error: {0}")]
    Transport(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A merged resolution was requested without a merged payload.
    #[error("merged resolution requires a merged payload")]
    MissingMergedPayload,
}

impl SyncError {
    /// True if this is the fatal storage-unavailable condition.
    #[must_use]
    pub fn is_storage_unavailable(&self) -> bool {
        matches!(self, SyncError::Storage(StoreError::Unavailable(_)))
    }
}
