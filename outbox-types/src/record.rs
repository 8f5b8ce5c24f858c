//! Conflict and cache record types.

use crate::ids::{CacheId, ConflictId, MutationId};
use crate::Error;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// How a parked conflict was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictResolution {
    /// The local payload wins.
    Local,
    /// The remote payload wins; the local intent is dropped.
    Remote,
    /// A hand-merged payload replaces both.
    Merged,
}

impl ConflictResolution {
    /// Stable string form, used for persistence and logging.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            ConflictResolution::Local => "local",
            ConflictResolution::Remote => "remote",
            ConflictResolution::Merged => "merged",
        }
    }
}

impl fmt::Display for ConflictResolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConflictResolution {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local" => Ok(ConflictResolution::Local),
            "remote" => Ok(ConflictResolution::Remote),
            "merged" => Ok(ConflictResolution::Merged),
            other => Err(Error::InvalidField {
                field: "conflict resolution",
                value: other.to_string(),
            }),
        }
    }
}

/// A detected divergence between a local mutation and the remote state.
///
/// Immutable except for the resolve transition, which is one-way
/// (`resolved: false → true`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictRecord {
    /// Unique conflict id.
    pub id: ConflictId,
    /// The queue record that hit this conflict, when it is still parked.
    pub mutation_id: Option<MutationId>,
    /// The payload the local mutation wanted to apply.
    pub local: Value,
    /// The payload the remote reported as current.
    pub remote: Value,
    /// When the conflict was detected.
    pub detected_at: DateTime<Utc>,
    /// Whether a human has resolved this conflict.
    pub resolved: bool,
    /// The chosen resolution, once resolved.
    pub resolution: Option<ConflictResolution>,
    /// The hand-merged payload, for `Merged` resolutions.
    pub merged_payload: Option<Value>,
}

impl ConflictRecord {
    /// Creates a fresh unresolved conflict.
    pub fn new(local: Value, remote: Value) -> Self {
        Self {
            id: ConflictId::new(),
            mutation_id: None,
            local,
            remote,
            detected_at: Utc::now(),
            resolved: false,
            resolution: None,
            merged_payload: None,
        }
    }

    /// Links the conflict to the queue record it parked.
    #[must_use]
    pub fn with_mutation(mut self, id: MutationId) -> Self {
        self.mutation_id = Some(id);
        self
    }
}

/// A cached remote response for an entity type.
///
/// Never authoritative; safe to discard at any time. Entries with an
/// `expires_at` in the past are filtered out at read time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Unique cache row id.
    pub id: CacheId,
    /// The entity type this response belongs to.
    pub entity_type: String,
    /// The cached response body.
    pub payload: Value,
    /// When the entry was written.
    pub cached_at: DateTime<Utc>,
    /// Optional expiry; `None` means the entry never expires.
    pub expires_at: Option<DateTime<Utc>>,
}

impl CacheEntry {
    /// Returns true if the entry is expired at the given instant.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|exp| exp <= now)
    }
}
