//! Storage abstraction trait.
//!
//! Defines the contract the sync engine programs against, allowing the
//! SQLite engine to be swapped for any transactional key-value store with
//! named collections and secondary indexes.

use crate::error::StoreResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use outbox_types::{
    CacheEntry, CacheId, ConflictId, ConflictRecord, ConflictResolution, MutationId, MutationKind,
    MutationRecord, MutationStatus, MutationUpdate,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One row of the queue lifecycle log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionEntry {
    /// Auto-incrementing row id.
    pub id: i64,
    /// Short action name (e.g. "enqueue", "sync_started").
    pub action: String,
    /// Optional free-form detail.
    pub detail: Option<String>,
    /// When the action was logged.
    pub timestamp: DateTime<Utc>,
}

/// Durable, transactional storage for the mutation queue.
///
/// Every operation is atomic at single-record granularity; no cross-record
/// transactions are required or provided. Storage failures surface as
/// [`StoreError::Unavailable`](crate::StoreError::Unavailable) — never
/// swallowed, never retried internally.
#[async_trait]
pub trait SyncStore: Send + Sync {
    // ── Mutation queue ───────────────────────────────────────────

    /// Durably records a new pending mutation and returns its id.
    ///
    /// A `None` payload is only accepted for deletes.
    async fn enqueue(
        &self,
        kind: MutationKind,
        entity_type: &str,
        payload: Option<Value>,
    ) -> StoreResult<MutationId>;

    /// Point-reads a mutation record.
    async fn get(&self, id: MutationId) -> StoreResult<Option<MutationRecord>>;

    /// Returns all records with the given status, in insertion order.
    async fn list_by_status(&self, status: MutationStatus) -> StoreResult<Vec<MutationRecord>>;

    /// Merges the populated fields of `update` into the record.
    ///
    /// Fails with `NotFound` if the id does not exist.
    async fn update(&self, id: MutationId, update: MutationUpdate) -> StoreResult<()>;

    /// Removes a record. Idempotent: removing a missing id is not an error.
    async fn remove(&self, id: MutationId) -> StoreResult<()>;

    // ── Conflict log ─────────────────────────────────────────────

    /// Parks a detected conflict and returns its id.
    ///
    /// `mutation_id` links back to the queue record that hit the conflict,
    /// when one is kept alive for later requeueing.
    async fn add_conflict(
        &self,
        local: Value,
        remote: Value,
        mutation_id: Option<MutationId>,
    ) -> StoreResult<ConflictId>;

    /// Point-reads a conflict record.
    async fn get_conflict(&self, id: ConflictId) -> StoreResult<Option<ConflictRecord>>;

    /// Returns all conflicts not yet resolved, oldest first.
    async fn list_unresolved_conflicts(&self) -> StoreResult<Vec<ConflictRecord>>;

    /// Marks a conflict resolved. One-way: resolving twice is
    /// `AlreadyResolved`, resolving a missing id is `NotFound`.
    async fn resolve_conflict(
        &self,
        id: ConflictId,
        resolution: ConflictResolution,
        merged_payload: Option<Value>,
    ) -> StoreResult<()>;

    // ── Response cache ───────────────────────────────────────────

    /// Caches a remote response for an entity type with an optional TTL.
    async fn cache(
        &self,
        entity_type: &str,
        payload: Value,
        ttl_minutes: Option<i64>,
    ) -> StoreResult<CacheId>;

    /// Returns unexpired cache entries for an entity type.
    async fn read_cache(&self, entity_type: &str) -> StoreResult<Vec<CacheEntry>>;

    /// Deletes all expired cache entries; returns how many were removed.
    async fn evict_expired(&self) -> StoreResult<usize>;

    // ── Action log ───────────────────────────────────────────────

    /// Appends a lifecycle action to the log.
    async fn record_action(&self, action: &str, detail: Option<&str>) -> StoreResult<()>;

    /// Returns the most recent actions, newest first.
    async fn recent_actions(&self, limit: usize) -> StoreResult<Vec<ActionEntry>>;

    // ── Bulk ─────────────────────────────────────────────────────

    /// Wipes all four collections. Used for logout/reset.
    async fn clear_all(&self) -> StoreResult<()>;
}
