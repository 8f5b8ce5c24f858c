//! Offline-first mutation queue and conflict reconciliation.
//!
//! Lets a client keep creating, editing and deleting entities while
//! disconnected: every intent is durably recorded, then replayed against the
//! remote authority once it is reachable, with conflicts detected and
//! resolved under a configurable policy.
//!
//! # Components
//!
//! - **Store** ([`outbox_store::SyncStore`]): durable four-collection
//!   persistence for queue, cache, conflicts and the action log
//! - **Resolver** ([`resolver`]): pure policy logic mapping a conflict to a
//!   directive (resubmit, discard, park)
//! - **Transport** ([`transport::RemoteTransport`]): per-entity-type
//!   mutation endpoint; HTTP implementation in [`http`]
//! - **Manager** ([`SyncQueueManager`]): the drain loop — batching, state
//!   transitions, fixed-delay bounded retry, progress reporting
//!
//! # Queue lifecycle
//!
//! 1. Caller enqueues a mutation; it is persisted as `pending`
//! 2. The drain loop dispatches pending records in bounded concurrent
//!    batches (batches themselves are strictly sequential)
//! 3. Success removes the record; a 409 goes through the conflict policy;
//!    anything else marks it `failed` for retry
//! 4. Failed records are requeued after a fixed delay until their retry
//!    budget is spent, after which only [`SyncQueueManager::retry_failed`]
//!    revives them
//!
//! # Example
//!
//! ```no_run
//! use outbox_store::SqliteStore;
//! use outbox_sync::{ConflictPolicy, HttpTransport, SyncConfig, SyncQueueManager};
//! use outbox_types::MutationKind;
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # async fn example() -> outbox_sync::SyncResult<()> {
//! let store = Arc::new(SqliteStore::open("queue.db")?);
//! let transport = Arc::new(HttpTransport::new("https://api.example.com/v1")?);
//! let manager = SyncQueueManager::new(
//!     store,
//!     transport,
//!     SyncConfig {
//!         policy: ConflictPolicy::LocalWins,
//!         ..SyncConfig::default()
//!     },
//! );
//!
//! manager
//!     .enqueue(MutationKind::Create, "task", Some(json!({"title": "ship"})))
//!     .await?;
//! manager.start();
//! # Ok(())
//! # }
//! ```

mod error;
mod http;
mod manager;
pub mod resolver;
pub mod transport;

pub use error::{SyncError, SyncResult};
pub use http::{HttpTransport, HttpTransportConfig};
pub use manager::{
    ProgressSubscription, QueueProgress, QueueStatus, SyncConfig, SyncQueueManager,
    MANUAL_RESOLUTION_ERROR,
};
pub use resolver::{ConflictDirective, ConflictPolicy};
pub use transport::{DispatchOutcome, MutationRequest, RemoteTransport};
