//! Core type definitions for the outbox mutation queue.
//!
//! This crate defines the fundamental, entity-agnostic types shared by the
//! store and the sync engine:
//! - Mutation, conflict and cache identifiers (UUID v7)
//! - `MutationRecord` — a durable create/update/delete intent and its status
//! - `ConflictRecord` — a parked divergence awaiting resolution
//! - `CacheEntry` — a non-authoritative remote-response cache row
//!
//! Entity schemas (task fields, project fields, ...) are deliberately opaque:
//! payloads travel as raw JSON values and the entity type is an open string.

mod ids;
mod mutation;
mod record;

pub use ids::{CacheId, ConflictId, MutationId};
pub use mutation::{MutationKind, MutationRecord, MutationStatus, MutationUpdate};
pub use record::{CacheEntry, ConflictRecord, ConflictResolution};

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in type operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid UUID: {0}")]
    InvalidUuid(#[from] uuid::Error),

    #[error("invalid {field}: {value}")]
    InvalidField { field: &'static str, value: String },
}
