//! The mutation record — a durable local intent awaiting remote confirmation.

use crate::ids::MutationId;
use crate::Error;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// The verb a mutation applies to its entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationKind {
    /// Create a new entity.
    Create,
    /// Update an existing entity.
    Update,
    /// Delete an entity.
    Delete,
}

impl MutationKind {
    /// Stable string form, used for persistence and logging.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            MutationKind::Create => "create",
            MutationKind::Update => "update",
            MutationKind::Delete => "delete",
        }
    }
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MutationKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(MutationKind::Create),
            "update" => Ok(MutationKind::Update),
            "delete" => Ok(MutationKind::Delete),
            other => Err(Error::InvalidField {
                field: "mutation kind",
                value: other.to_string(),
            }),
        }
    }
}

/// Lifecycle status of a queued mutation.
///
/// Transitions: `Pending → InFlight → {removed, Failed, ResolvedConflict}`.
/// A `Failed` record returns to `Pending` via the retry scheduler while its
/// retry budget lasts; after that only an explicit retry request moves it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationStatus {
    /// Waiting to be dispatched.
    Pending,
    /// Currently dispatched to the remote service.
    InFlight,
    /// Dispatch failed; may be retried.
    Failed,
    /// A parked conflict was resolved by a human; awaiting requeue.
    ResolvedConflict,
}

impl MutationStatus {
    /// Stable string form, used for persistence and logging.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            MutationStatus::Pending => "pending",
            MutationStatus::InFlight => "in_flight",
            MutationStatus::Failed => "failed",
            MutationStatus::ResolvedConflict => "resolved_conflict",
        }
    }
}

impl fmt::Display for MutationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MutationStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(MutationStatus::Pending),
            "in_flight" => Ok(MutationStatus::InFlight),
            "failed" => Ok(MutationStatus::Failed),
            "resolved_conflict" => Ok(MutationStatus::ResolvedConflict),
            other => Err(Error::InvalidField {
                field: "mutation status",
                value: other.to_string(),
            }),
        }
    }
}

/// A single durable mutation intent.
///
/// Exactly one record exists per logical intent. `kind`, `entity_type` and
/// `created_at` never change after creation; `payload` changes only when a
/// conflict resolution rewrites it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MutationRecord {
    /// Unique, time-ordered id; doubles as the idempotency key.
    pub id: MutationId,
    /// The verb to apply remotely.
    pub kind: MutationKind,
    /// Open-ended entity type name (e.g. "task", "project").
    pub entity_type: String,
    /// Opaque entity payload. `None` is only valid for deletes.
    pub payload: Option<Value>,
    /// Creation time, set once.
    pub created_at: DateTime<Utc>,
    /// Number of times the scheduler has requeued this record.
    pub retry_count: u32,
    /// Current lifecycle status.
    pub status: MutationStatus,
    /// Failure detail, present only while `status` is `Failed`.
    pub last_error: Option<String>,
}

impl MutationRecord {
    /// Creates a fresh pending record for the given intent.
    pub fn new(kind: MutationKind, entity_type: impl Into<String>, payload: Option<Value>) -> Self {
        Self {
            id: MutationId::new(),
            kind,
            entity_type: entity_type.into(),
            payload,
            created_at: Utc::now(),
            retry_count: 0,
            status: MutationStatus::Pending,
            last_error: None,
        }
    }
}

/// A partial update to a stored mutation record.
///
/// Only the populated fields are written; everything else is left untouched.
/// `last_error` uses a double `Option`: `Some(None)` clears the column,
/// `None` leaves it alone.
#[derive(Debug, Clone, Default)]
pub struct MutationUpdate {
    /// New status, if changing.
    pub status: Option<MutationStatus>,
    /// New retry count, if changing.
    pub retry_count: Option<u32>,
    /// Set (`Some(Some(_))`), clear (`Some(None)`) or keep (`None`) the error.
    pub last_error: Option<Option<String>>,
    /// Replacement payload (conflict resolution only).
    pub payload: Option<Value>,
}

impl MutationUpdate {
    /// An update that only changes the status.
    #[must_use]
    pub fn status(status: MutationStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    /// An update that marks the record failed with the given error.
    #[must_use]
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: Some(MutationStatus::Failed),
            last_error: Some(Some(error.into())),
            ..Self::default()
        }
    }

    /// An update that requeues the record as pending with a new retry count.
    #[must_use]
    pub fn requeued(retry_count: u32) -> Self {
        Self {
            status: Some(MutationStatus::Pending),
            retry_count: Some(retry_count),
            last_error: Some(None),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn kind_round_trips_through_str() {
        for kind in [MutationKind::Create, MutationKind::Update, MutationKind::Delete] {
            assert_eq!(kind.as_str().parse::<MutationKind>().unwrap(), kind);
        }
    }

    #[test]
    fn status_round_trips_through_str() {
        for status in [
            MutationStatus::Pending,
            MutationStatus::InFlight,
            MutationStatus::Failed,
            MutationStatus::ResolvedConflict,
        ] {
            assert_eq!(status.as_str().parse::<MutationStatus>().unwrap(), status);
        }
    }

    #[test]
    fn unknown_status_is_an_error() {
        assert!("removed".parse::<MutationStatus>().is_err());
    }

    #[test]
    fn new_record_starts_pending() {
        let record = MutationRecord::new(
            MutationKind::Create,
            "task",
            Some(json!({"title": "write tests"})),
        );
        assert_eq!(record.status, MutationStatus::Pending);
        assert_eq!(record.retry_count, 0);
        assert!(record.last_error.is_none());
    }

    #[test]
    fn requeued_update_clears_error() {
        let update = MutationUpdate::requeued(2);
        assert_eq!(update.status, Some(MutationStatus::Pending));
        assert_eq!(update.retry_count, Some(2));
        assert_eq!(update.last_error, Some(None));
    }
}
