use async_trait::async_trait;
use outbox_store::{SqliteStore, SyncStore};
use outbox_sync::transport::mock::MockTransport;
use outbox_sync::{
    ConflictPolicy, DispatchOutcome, MutationRequest, QueueProgress, RemoteTransport, SyncConfig,
    SyncQueueManager, SyncResult, MANUAL_RESOLUTION_ERROR,
};
use outbox_types::{ConflictResolution, MutationKind, MutationStatus};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn make_manager(policy: ConflictPolicy) -> (SyncQueueManager, Arc<SqliteStore>, Arc<MockTransport>) {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let transport = MockTransport::new();
    let config = SyncConfig {
        policy,
        retry_delay: Duration::from_millis(10),
        ..SyncConfig::default()
    };
    let manager = SyncQueueManager::new(store.clone(), transport.clone(), config);
    (manager, store, transport)
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met within 5s");
}

// ── Basic drain ──────────────────────────────────────────────────

#[tokio::test]
async fn seven_creates_drain_in_two_batches() {
    let (manager, _store, transport) = make_manager(ConflictPolicy::Manual);

    let progress: Arc<Mutex<Vec<QueueProgress>>> = Arc::new(Mutex::new(Vec::new()));
    let seen = progress.clone();
    let _sub = manager.on_progress(move |p| seen.lock().unwrap().push(p));

    for i in 0..7 {
        manager
            .enqueue(MutationKind::Create, "task", Some(json!({"n": i})))
            .await
            .unwrap();
    }

    manager.drain().await.unwrap();

    let status = manager.queue_status().await.unwrap();
    assert_eq!(status.total, 0);

    // Two batches: 5 then 2, each followed by a progress push.
    let requests = transport.requests();
    assert_eq!(requests.len(), 7);
    let snapshots = progress.lock().unwrap();
    assert!(snapshots.len() >= 2, "expected >=2 snapshots, got {}", snapshots.len());
    // After the final batch nothing remains.
    assert_eq!(snapshots.last().unwrap().total, 0);
}

#[tokio::test]
async fn drain_while_active_is_a_noop() {
    let (manager, _store, _transport) = make_manager(ConflictPolicy::Manual);
    manager
        .enqueue(MutationKind::Create, "task", Some(json!({})))
        .await
        .unwrap();

    // start() takes the processing guard; a concurrent drain() yields
    // immediately instead of running a second loop.
    manager.start();
    manager.drain().await.unwrap();

    wait_until(|| !manager.is_processing()).await;
    assert_eq!(manager.queue_status().await.unwrap().total, 0);
}

#[tokio::test]
async fn dropped_subscription_stops_receiving_progress() {
    let (manager, _store, _transport) = make_manager(ConflictPolicy::Manual);

    let count = Arc::new(AtomicUsize::new(0));
    let seen = count.clone();
    let sub = manager.on_progress(move |_| {
        seen.fetch_add(1, Ordering::SeqCst);
    });
    sub.unsubscribe();

    manager
        .enqueue(MutationKind::Create, "task", Some(json!({})))
        .await
        .unwrap();
    manager.drain().await.unwrap();

    assert_eq!(count.load(Ordering::SeqCst), 0);
}

// ── Idempotent replay ────────────────────────────────────────────

#[tokio::test]
async fn resubmitted_mutation_keeps_its_idempotency_key() {
    let (manager, _store, transport) = make_manager(ConflictPolicy::LocalWins);
    transport.script(DispatchOutcome::Conflict(json!({"v": 2})));

    let id = manager
        .enqueue(MutationKind::Update, "task", Some(json!({"v": 1})))
        .await
        .unwrap();

    // First drain hits the conflict; local-wins puts the record back to
    // pending under the same id.
    manager.drain().await.unwrap();
    // Second drain applies it.
    manager.drain().await.unwrap();

    let requests = transport.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].sync_id, id);
    assert_eq!(requests[1].sync_id, id);
    // The idempotent server saw one effect despite the replay.
    assert_eq!(transport.effects(id), 1);
}

// ── Conflict policies ────────────────────────────────────────────

#[tokio::test]
async fn local_wins_returns_record_to_pending_unchanged() {
    let (manager, store, transport) = make_manager(ConflictPolicy::LocalWins);
    transport.script(DispatchOutcome::Conflict(json!({"v": 2})));

    let id = manager
        .enqueue(MutationKind::Update, "task", Some(json!({"v": 1})))
        .await
        .unwrap();
    manager.drain().await.unwrap();

    let record = store.get(id).await.unwrap().unwrap();
    assert_eq!(record.status, MutationStatus::Pending);
    assert_eq!(record.payload, Some(json!({"v": 1})));
    assert!(store.list_unresolved_conflicts().await.unwrap().is_empty());
}

#[tokio::test]
async fn remote_wins_discards_record_and_caches_remote() {
    let (manager, store, transport) = make_manager(ConflictPolicy::RemoteWins);
    transport.script(DispatchOutcome::Conflict(json!({"v": 2})));

    let id = manager
        .enqueue(MutationKind::Update, "task", Some(json!({"v": 1})))
        .await
        .unwrap();
    manager.drain().await.unwrap();

    assert!(store.get(id).await.unwrap().is_none());
    assert!(store.list_unresolved_conflicts().await.unwrap().is_empty());
    // The discarded intent's remote payload lands in the response cache.
    let cached = store.read_cache("task").await.unwrap();
    assert_eq!(cached.len(), 1);
    assert_eq!(cached[0].payload, json!({"v": 2}));
}

#[tokio::test]
async fn manual_parks_exactly_one_conflict_outside_auto_retry() {
    let (manager, store, transport) = make_manager(ConflictPolicy::Manual);
    transport.script(DispatchOutcome::Conflict(json!({"v": 2})));

    let id = manager
        .enqueue(MutationKind::Update, "task", Some(json!({"v": 1})))
        .await
        .unwrap();
    manager.drain().await.unwrap();

    let conflicts = store.list_unresolved_conflicts().await.unwrap();
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0].mutation_id, Some(id));
    assert_eq!(conflicts[0].local, json!({"v": 1}));
    assert_eq!(conflicts[0].remote, json!({"v": 2}));

    let record = store.get(id).await.unwrap().unwrap();
    assert_eq!(record.status, MutationStatus::Failed);
    assert_eq!(record.last_error.as_deref(), Some(MANUAL_RESOLUTION_ERROR));

    // The park is excluded from auto-retry: another drain dispatches nothing.
    let before = transport.dispatch_count();
    manager.drain().await.unwrap();
    assert_eq!(transport.dispatch_count(), before);
}

#[tokio::test]
async fn resolving_a_park_as_merged_requeues_the_merged_payload() {
    let (manager, store, transport) = make_manager(ConflictPolicy::Manual);
    transport.script(DispatchOutcome::Conflict(json!({"v": 1})));

    let id = manager
        .enqueue(MutationKind::Update, "task", Some(json!({"v": 2})))
        .await
        .unwrap();
    manager.drain().await.unwrap();

    let conflicts = store.list_unresolved_conflicts().await.unwrap();
    manager
        .resolve_conflict(
            conflicts[0].id,
            ConflictResolution::Merged,
            Some(json!({"v": 3})),
        )
        .await
        .unwrap();

    let record = store.get(id).await.unwrap().unwrap();
    assert_eq!(record.status, MutationStatus::ResolvedConflict);
    assert_eq!(record.payload, Some(json!({"v": 3})));

    let requeued = manager.retry_failed().await.unwrap();
    assert_eq!(requeued, 1);
    wait_until(|| !manager.is_processing()).await;

    assert_eq!(manager.queue_status().await.unwrap().total, 0);
    // The merged payload is what went over the wire.
    let last = transport.requests().pop().unwrap();
    assert_eq!(last.payload, Some(json!({"v": 3})));
}

#[tokio::test]
async fn resolving_a_park_as_remote_drops_the_record() {
    let (manager, store, transport) = make_manager(ConflictPolicy::Manual);
    transport.script(DispatchOutcome::Conflict(json!({"v": 9})));

    let id = manager
        .enqueue(MutationKind::Update, "project", Some(json!({"v": 1})))
        .await
        .unwrap();
    manager.drain().await.unwrap();

    let conflicts = store.list_unresolved_conflicts().await.unwrap();
    manager
        .resolve_conflict(conflicts[0].id, ConflictResolution::Remote, None)
        .await
        .unwrap();

    assert!(store.get(id).await.unwrap().is_none());
    assert!(store.list_unresolved_conflicts().await.unwrap().is_empty());
}

// ── Retry behavior ───────────────────────────────────────────────

#[tokio::test]
async fn retry_budget_is_bounded() {
    let (manager, store, transport) = make_manager(ConflictPolicy::Manual);
    transport.set_default(DispatchOutcome::Failed("503 service unavailable".into()));

    let id = manager
        .enqueue(MutationKind::Create, "task", Some(json!({})))
        .await
        .unwrap();
    manager.drain().await.unwrap();

    // Initial attempt plus max_retries requeues.
    assert_eq!(transport.dispatch_count(), 4);
    let record = store.get(id).await.unwrap().unwrap();
    assert_eq!(record.status, MutationStatus::Failed);
    assert_eq!(record.retry_count, 3);
    assert_eq!(record.last_error.as_deref(), Some("503 service unavailable"));

    // Terminally failed: another drain never touches it.
    manager.drain().await.unwrap();
    assert_eq!(transport.dispatch_count(), 4);
}

#[tokio::test]
async fn retry_failed_revives_terminal_records() {
    let (manager, store, transport) = make_manager(ConflictPolicy::Manual);
    transport.set_default(DispatchOutcome::Failed("timeout".into()));

    let id = manager
        .enqueue(MutationKind::Create, "task", Some(json!({})))
        .await
        .unwrap();
    manager.drain().await.unwrap();
    assert_eq!(store.get(id).await.unwrap().unwrap().retry_count, 3);

    // The server recovers; a manual retry resets the budget and drains.
    transport.set_default(DispatchOutcome::Applied);
    let requeued = manager.retry_failed().await.unwrap();
    assert_eq!(requeued, 1);
    wait_until(|| !manager.is_processing()).await;

    assert_eq!(manager.queue_status().await.unwrap().total, 0);
    assert_eq!(transport.effects(id), 1);
}

// ── Cancellation ─────────────────────────────────────────────────

/// Transport that blocks each dispatch until the test releases it.
struct GatedTransport {
    started: AtomicUsize,
    gate: tokio::sync::Semaphore,
}

impl GatedTransport {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            started: AtomicUsize::new(0),
            gate: tokio::sync::Semaphore::new(0),
        })
    }
}

#[async_trait]
impl RemoteTransport for GatedTransport {
    async fn dispatch(&self, _request: &MutationRequest) -> SyncResult<DispatchOutcome> {
        self.started.fetch_add(1, Ordering::SeqCst);
        let _permit = self.gate.acquire().await.unwrap();
        Ok(DispatchOutcome::Applied)
    }
}

#[tokio::test]
async fn stop_lets_in_flight_settle_but_starts_no_new_batch() {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let transport = GatedTransport::new();
    let manager = SyncQueueManager::new(
        store.clone(),
        transport.clone(),
        SyncConfig {
            retry_delay: Duration::from_millis(10),
            ..SyncConfig::default()
        },
    );

    for i in 0..10 {
        manager
            .enqueue(MutationKind::Create, "task", Some(json!({"n": i})))
            .await
            .unwrap();
    }

    manager.start();

    // First batch of 5 is in flight, blocked on the gate.
    let t = transport.clone();
    wait_until(move || t.started.load(Ordering::SeqCst) == 5).await;
    let status = manager.queue_status().await.unwrap();
    assert_eq!(status.in_flight, 5);
    assert_eq!(status.pending, 5);

    manager.stop();
    transport.gate.add_permits(10);

    let m = manager.clone();
    wait_until(move || !m.is_processing()).await;

    // The in-flight five settled (removed); the second batch never started.
    assert_eq!(transport.started.load(Ordering::SeqCst), 5);
    let status = manager.queue_status().await.unwrap();
    assert_eq!(status.total, 5);
    assert_eq!(status.pending, 5);
    assert_eq!(status.in_flight, 0);
}

// ── Lifecycle bookkeeping ────────────────────────────────────────

#[tokio::test]
async fn drain_is_recorded_in_the_action_log() {
    let (manager, store, _transport) = make_manager(ConflictPolicy::Manual);
    manager
        .enqueue(MutationKind::Create, "task", Some(json!({})))
        .await
        .unwrap();
    manager.drain().await.unwrap();

    let actions: Vec<String> = store
        .recent_actions(10)
        .await
        .unwrap()
        .into_iter()
        .map(|a| a.action)
        .collect();
    assert!(actions.contains(&"enqueue".to_string()));
    assert!(actions.contains(&"sync_started".to_string()));
    assert!(actions.contains(&"sync_finished".to_string()));
}

#[tokio::test]
async fn clear_queue_resets_everything() {
    let (manager, store, transport) = make_manager(ConflictPolicy::Manual);
    transport.script(DispatchOutcome::Conflict(json!({})));

    manager
        .enqueue(MutationKind::Update, "task", Some(json!({})))
        .await
        .unwrap();
    manager.drain().await.unwrap();
    assert_eq!(manager.queue_status().await.unwrap().unresolved_conflicts, 1);

    manager.clear_queue().await.unwrap();

    let status = manager.queue_status().await.unwrap();
    assert_eq!(status, outbox_sync::QueueStatus::default());
    assert!(store.recent_actions(10).await.unwrap().is_empty());
}
