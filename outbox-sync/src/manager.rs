//! The sync queue manager — orchestrates queue draining.
//!
//! One logical drain worker per manager: reads pending mutations, dispatches
//! them to the remote transport in bounded concurrent batches, interprets
//! results, persists every state change, and retries failures on a fixed
//! delay until the retry budget runs out. Per-item failures never escape the
//! loop; they become persisted `Failed` state that callers observe through
//! [`SyncQueueManager::queue_status`]. Only storage unavailability aborts a
//! drain.

use crate::error::{SyncError, SyncResult};
use crate::resolver::{resolve, ConflictDirective, ConflictPolicy};
use crate::transport::{DispatchOutcome, MutationRequest, RemoteTransport};
use futures::future::join_all;
use outbox_store::{StoreError, SyncStore};
use outbox_types::{
    ConflictId, ConflictResolution, MutationId, MutationKind, MutationRecord, MutationStatus,
    MutationUpdate,
};
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

/// Error message marking a mutation parked for manual conflict resolution.
/// Records carrying it are excluded from automatic retry.
pub const MANUAL_RESOLUTION_ERROR: &str = "Conflict requires manual resolution";

/// Configuration for the sync queue manager.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// How many mutations are dispatched concurrently per batch.
    pub batch_size: usize,
    /// How many automatic requeues a failed mutation gets.
    pub max_retries: u32,
    /// Fixed wait between retry passes. Deliberately not exponential.
    pub retry_delay: Duration,
    /// Conflict policy, chosen once at construction.
    pub policy: ConflictPolicy,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            batch_size: 5,
            max_retries: 3,
            retry_delay: Duration::from_millis(2000),
            policy: ConflictPolicy::Manual,
        }
    }
}

/// Point-in-time view of the queue, computed from the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStatus {
    /// All records still in the queue, regardless of status.
    pub total: usize,
    /// Records waiting to be dispatched.
    pub pending: usize,
    /// Records currently dispatched.
    pub in_flight: usize,
    /// Records whose last dispatch failed (including manual parks).
    pub failed: usize,
    /// Records whose conflict a human resolved, awaiting requeue.
    pub awaiting_requeue: usize,
    /// Parked conflicts not yet resolved.
    pub unresolved_conflicts: usize,
}

/// Snapshot pushed to progress observers after every batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QueueProgress {
    /// Records remaining in the queue.
    pub total: usize,
    /// Records currently dispatched.
    pub in_progress: usize,
    /// Records in failed state.
    pub failed: usize,
}

type ProgressCallback = Arc<dyn Fn(QueueProgress) + Send + Sync>;

/// Handle for a registered progress observer. Dropping it (or calling
/// [`ProgressSubscription::unsubscribe`]) deregisters the callback.
pub struct ProgressSubscription {
    inner: Weak<Inner>,
    id: u64,
}

impl ProgressSubscription {
    /// Deregisters the observer.
    pub fn unsubscribe(self) {}
}

impl Drop for ProgressSubscription {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.upgrade() {
            inner
                .observers
                .lock()
                .unwrap()
                .retain(|(id, _)| *id != self.id);
        }
    }
}

struct Inner {
    store: Arc<dyn SyncStore>,
    transport: Arc<dyn RemoteTransport>,
    config: SyncConfig,
    /// Re-entrancy guard: exactly one drain loop runs at a time.
    is_processing: AtomicBool,
    cancelled: AtomicBool,
    /// Wakes the retry sleep when `stop()` is called.
    wake: Notify,
    observers: Mutex<Vec<(u64, ProgressCallback)>>,
    next_observer: AtomicU64,
}

/// The offline-first mutation queue manager.
///
/// Explicitly constructed and cheaply cloneable (the clone shares state with
/// the original); own it at the composition root and hand out clones. There
/// is no process-global instance.
#[derive(Clone)]
pub struct SyncQueueManager {
    inner: Arc<Inner>,
}

impl SyncQueueManager {
    /// Creates a manager over the given store and transport.
    pub fn new(
        store: Arc<dyn SyncStore>,
        transport: Arc<dyn RemoteTransport>,
        config: SyncConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                transport,
                config,
                is_processing: AtomicBool::new(false),
                cancelled: AtomicBool::new(false),
                wake: Notify::new(),
                observers: Mutex::new(Vec::new()),
                next_observer: AtomicU64::new(0),
            }),
        }
    }

    /// Durably records a new mutation intent and returns its id.
    ///
    /// The record is persisted as pending before this returns; a storage
    /// failure propagates, never disappears.
    pub async fn enqueue(
        &self,
        kind: MutationKind,
        entity_type: &str,
        payload: Option<Value>,
    ) -> SyncResult<MutationId> {
        let id = self.inner.store.enqueue(kind, entity_type, payload).await?;
        self.inner
            .store
            .record_action("enqueue", Some(entity_type))
            .await?;
        Ok(id)
    }

    /// Starts the drain loop on the tokio runtime.
    ///
    /// A second call while a drain is active is a no-op, not an error.
    /// Must be called from within a runtime.
    pub fn start(&self) {
        if self.inner.is_processing.swap(true, Ordering::SeqCst) {
            debug!("Drain already in progress; start is a no-op");
            return;
        }
        self.inner.cancelled.store(false, Ordering::SeqCst);

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            if let Err(e) = inner.run().await {
                error!("Sync drain aborted: {e}");
            }
            inner.is_processing.store(false, Ordering::SeqCst);
        });
    }

    /// Runs one full drain to completion on the caller's task.
    ///
    /// Same semantics as [`start`](Self::start) but awaitable; a call while
    /// a drain is active is a no-op. Used by tests and callers that want to
    /// know when the queue settles.
    pub async fn drain(&self) -> SyncResult<()> {
        if self.inner.is_processing.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.inner.cancelled.store(false, Ordering::SeqCst);

        let result = self.inner.run().await;
        self.inner.is_processing.store(false, Ordering::SeqCst);
        result
    }

    /// Signals the drain loop to stop.
    ///
    /// Dispatches already in flight settle normally; no new batch starts,
    /// and a pending retry sleep is interrupted immediately.
    pub fn stop(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.wake.notify_waiters();
    }

    /// True while a drain loop is active.
    pub fn is_processing(&self) -> bool {
        self.inner.is_processing.load(Ordering::SeqCst)
    }

    /// Registers a progress observer; snapshots are pushed after every batch.
    pub fn on_progress<F>(&self, callback: F) -> ProgressSubscription
    where
        F: Fn(QueueProgress) + Send + Sync + 'static,
    {
        let id = self.inner.next_observer.fetch_add(1, Ordering::SeqCst);
        self.inner
            .observers
            .lock()
            .unwrap()
            .push((id, Arc::new(callback)));
        ProgressSubscription {
            inner: Arc::downgrade(&self.inner),
            id,
        }
    }

    /// Computes the current queue status from the store.
    pub async fn queue_status(&self) -> SyncResult<QueueStatus> {
        self.inner.queue_status().await
    }

    /// Returns all parked conflicts awaiting a human decision.
    pub async fn unresolved_conflicts(&self) -> SyncResult<Vec<outbox_types::ConflictRecord>> {
        Ok(self.inner.store.list_unresolved_conflicts().await?)
    }

    /// Resolves a parked conflict and updates the linked queue record.
    ///
    /// `Remote` removes the record (the local intent is dropped); `Local`
    /// and `Merged` rewrite its payload and mark it ready for requeue via
    /// [`retry_failed`](Self::retry_failed).
    pub async fn resolve_conflict(
        &self,
        conflict_id: ConflictId,
        resolution: ConflictResolution,
        merged_payload: Option<Value>,
    ) -> SyncResult<()> {
        if resolution == ConflictResolution::Merged && merged_payload.is_none() {
            return Err(SyncError::MissingMergedPayload);
        }

        let store = &self.inner.store;
        let conflict = store
            .get_conflict(conflict_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(conflict_id.to_string()))?;

        store
            .resolve_conflict(conflict_id, resolution, merged_payload.clone())
            .await?;

        if let Some(mutation_id) = conflict.mutation_id {
            match resolution {
                ConflictResolution::Remote => {
                    store.remove(mutation_id).await?;
                }
                ConflictResolution::Local | ConflictResolution::Merged => {
                    let payload = match resolution {
                        ConflictResolution::Local => conflict.local,
                        _ => merged_payload.unwrap_or(conflict.local),
                    };
                    let update = MutationUpdate {
                        status: Some(MutationStatus::ResolvedConflict),
                        last_error: Some(None),
                        payload: Some(payload),
                        ..MutationUpdate::default()
                    };
                    if let Err(StoreError::NotFound(_)) = store.update(mutation_id, update).await {
                        // The record was removed out-of-band; nothing to requeue.
                        warn!("Conflict {} pointed at missing mutation {}", conflict_id, mutation_id);
                    }
                }
            }
        }

        store
            .record_action("conflict_resolved", Some(resolution.as_str()))
            .await?;
        Ok(())
    }

    /// Manually requeues every failed record (and every record whose
    /// conflict a human has resolved), resetting retry counts to zero, then
    /// restarts the drain loop if it is idle.
    ///
    /// This is the only way a record can be retried past its budget, and the
    /// only way a manual park re-enters the queue.
    pub async fn retry_failed(&self) -> SyncResult<usize> {
        let store = &self.inner.store;
        let mut records = store.list_by_status(MutationStatus::Failed).await?;
        records.extend(
            store
                .list_by_status(MutationStatus::ResolvedConflict)
                .await?,
        );

        for record in &records {
            store.update(record.id, MutationUpdate::requeued(0)).await?;
        }

        if !records.is_empty() {
            info!("Manually requeued {} mutations", records.len());
            store
                .record_action("retry_failed", Some(&records.len().to_string()))
                .await?;
            if !self.is_processing() {
                self.start();
            }
        }
        Ok(records.len())
    }

    /// Wipes all four collections. Used for logout/reset.
    pub async fn clear_queue(&self) -> SyncResult<()> {
        self.inner.store.clear_all().await?;
        info!("Cleared mutation queue");
        Ok(())
    }
}

impl Inner {
    /// The drain loop. Each pass dispatches a snapshot of pending records in
    /// sequential batches, then requeues retriable failures after a fixed
    /// delay. Terminates when nothing retriable remains or on cancellation.
    async fn run(&self) -> SyncResult<()> {
        info!("Sync drain started");
        self.store.record_action("sync_started", None).await?;

        loop {
            if self.cancelled.load(Ordering::SeqCst) {
                break;
            }

            let pending = self.store.list_by_status(MutationStatus::Pending).await?;
            if !pending.is_empty() {
                debug!("Draining {} pending mutations", pending.len());
            }

            for batch in pending.chunks(self.config.batch_size) {
                if self.cancelled.load(Ordering::SeqCst) {
                    break;
                }
                // Items within a batch race; batches are strictly sequential.
                let results = join_all(batch.iter().map(|r| self.process_one(r))).await;
                for result in results {
                    result?;
                }
                self.emit_progress().await?;
            }

            if self.cancelled.load(Ordering::SeqCst) {
                break;
            }

            let retriable = self.retriable_failed().await?;
            if retriable.is_empty() {
                break;
            }

            debug!(
                "Waiting {:?} before requeueing {} failed mutations",
                self.config.retry_delay,
                retriable.len()
            );
            tokio::select! {
                _ = tokio::time::sleep(self.config.retry_delay) => {}
                _ = self.wake.notified() => {}
            }
            if self.cancelled.load(Ordering::SeqCst) {
                break;
            }

            for record in &retriable {
                self.update_tolerant(record.id, MutationUpdate::requeued(record.retry_count + 1))
                    .await?;
            }
        }

        self.store.record_action("sync_finished", None).await?;
        info!("Sync drain finished");
        Ok(())
    }

    /// Dispatches one mutation and persists the outcome. Per-item failures
    /// are converted to stored state; only storage unavailability escapes.
    async fn process_one(&self, record: &MutationRecord) -> SyncResult<()> {
        match self
            .store
            .update(record.id, MutationUpdate::status(MutationStatus::InFlight))
            .await
        {
            Ok(()) => {}
            // Removed underneath us (e.g. clear_queue); nothing to dispatch.
            Err(StoreError::NotFound(_)) => return Ok(()),
            Err(e) => return Err(e.into()),
        }

        let request = MutationRequest::from(record);
        let outcome = match self.transport.dispatch(&request).await {
            Ok(outcome) => outcome,
            // Network-level errors are transient failures like any other.
            Err(e) => DispatchOutcome::Failed(e.to_string()),
        };

        match outcome {
            DispatchOutcome::Applied => {
                self.store.remove(record.id).await?;
                debug!("Applied mutation {}", record.id);
            }
            DispatchOutcome::Conflict(remote) => {
                self.handle_conflict(record, remote).await?;
            }
            DispatchOutcome::Failed(reason) => {
                warn!("Mutation {} failed: {}", record.id, reason);
                self.update_tolerant(record.id, MutationUpdate::failed(reason))
                    .await?;
            }
        }
        Ok(())
    }

    async fn handle_conflict(&self, record: &MutationRecord, remote: Value) -> SyncResult<()> {
        match resolve(self.config.policy, record, &remote) {
            ConflictDirective::Resubmit => {
                info!("Conflict on {}: local wins, resubmitting", record.id);
                self.update_tolerant(record.id, MutationUpdate::status(MutationStatus::Pending))
                    .await?;
            }
            ConflictDirective::Discard => {
                // Accepted silent-loss trade-off; the remote payload at least
                // lands in the response cache.
                warn!(
                    "Conflict on {}: remote wins, discarding local mutation",
                    record.id
                );
                self.store.cache(&record.entity_type, remote, None).await?;
                self.store.remove(record.id).await?;
            }
            ConflictDirective::Park => {
                info!("Conflict on {} parked for manual resolution", record.id);
                let local = record.payload.clone().unwrap_or(Value::Null);
                self.store.add_conflict(local, remote, Some(record.id)).await?;
                self.update_tolerant(record.id, MutationUpdate::failed(MANUAL_RESOLUTION_ERROR))
                    .await?;
            }
        }
        Ok(())
    }

    /// Failed records still inside their retry budget, minus manual parks.
    async fn retriable_failed(&self) -> SyncResult<Vec<MutationRecord>> {
        let failed = self.store.list_by_status(MutationStatus::Failed).await?;
        Ok(failed
            .into_iter()
            .filter(|r| {
                r.retry_count < self.config.max_retries
                    && r.last_error.as_deref() != Some(MANUAL_RESOLUTION_ERROR)
            })
            .collect())
    }

    /// Applies an update, tolerating a record that vanished concurrently.
    async fn update_tolerant(&self, id: MutationId, update: MutationUpdate) -> SyncResult<()> {
        match self.store.update(id, update).await {
            Ok(()) | Err(StoreError::NotFound(_)) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn queue_status(&self) -> SyncResult<QueueStatus> {
        let pending = self.store.list_by_status(MutationStatus::Pending).await?.len();
        let in_flight = self
            .store
            .list_by_status(MutationStatus::InFlight)
            .await?
            .len();
        let failed = self.store.list_by_status(MutationStatus::Failed).await?.len();
        let awaiting_requeue = self
            .store
            .list_by_status(MutationStatus::ResolvedConflict)
            .await?
            .len();
        let unresolved_conflicts = self.store.list_unresolved_conflicts().await?.len();

        Ok(QueueStatus {
            total: pending + in_flight + failed + awaiting_requeue,
            pending,
            in_flight,
            failed,
            awaiting_requeue,
            unresolved_conflicts,
        })
    }

    async fn emit_progress(&self) -> SyncResult<()> {
        let status = self.queue_status().await?;
        let progress = QueueProgress {
            total: status.total,
            in_progress: status.in_flight,
            failed: status.failed,
        };

        // Clone the callbacks out so observers may (un)register re-entrantly.
        let callbacks: Vec<ProgressCallback> = self
            .observers
            .lock()
            .unwrap()
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();
        for callback in callbacks {
            callback(progress);
        }
        Ok(())
    }
}
