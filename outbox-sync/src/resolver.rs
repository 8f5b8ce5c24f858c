//! Conflict resolution policy.
//!
//! Pure decision logic: given the configured policy, the mutation in flight
//! and the remote payload the server reported, produce a directive for the
//! queue manager to follow. No I/O happens here.

use outbox_types::MutationRecord;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// How the engine reconciles a remote divergence. Chosen once, at manager
/// construction — not per call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictPolicy {
    /// Resubmit the local payload unchanged; the local intent wins.
    LocalWins,
    /// Drop the local intent; the remote state wins.
    RemoteWins,
    /// Park the conflict for a human to merge out-of-band.
    Manual,
}

/// What the queue manager should do with a conflicted mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictDirective {
    /// Return the record to pending with its payload unchanged; it will be
    /// dispatched again under the same idempotency key.
    Resubmit,
    /// Remove the record; the local intent is discarded.
    Discard,
    /// Record a conflict for manual resolution and take the record out of
    /// the auto-retry set.
    Park,
}

/// Maps a detected conflict to a directive under the given policy.
///
/// The record and remote payload are taken by reference so callers keep
/// ownership; the function only decides.
#[must_use]
pub fn resolve(policy: ConflictPolicy, _record: &MutationRecord, _remote: &Value) -> ConflictDirective {
    match policy {
        ConflictPolicy::LocalWins => ConflictDirective::Resubmit,
        ConflictPolicy::RemoteWins => ConflictDirective::Discard,
        ConflictPolicy::Manual => ConflictDirective::Park,
    }
}
