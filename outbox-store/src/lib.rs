//! Durable storage for the outbox mutation queue.
//!
//! Four independent collections back the offline-first engine:
//! - `sync_queue` — pending/failed mutation records, indexed by status,
//!   creation time and entity type
//! - `cached_data` — non-authoritative remote-response cache, indexed by type
//! - `conflicts` — parked divergences awaiting human resolution
//! - `offline_actions` — append-only queue lifecycle log
//!
//! The [`SyncStore`] trait is the contract: named collections, secondary
//! indexes, every operation atomic at single-record granularity. The shipped
//! engine is SQLite ([`SqliteStore`]); anything honoring the trait works.

mod error;
mod sqlite;
mod store;

pub use error::{StoreError, StoreResult};
pub use sqlite::SqliteStore;
pub use store::{ActionEntry, SyncStore};
