//! Transport layer abstraction.
//!
//! The core only needs the remote service to accept create/update/delete
//! verbs per entity type, echo a conflict indicator, and be idempotent per
//! mutation id. Anything meeting that contract can stand behind
//! [`RemoteTransport`] — the HTTP implementation, or the in-process mock
//! used by tests.

use crate::error::SyncResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use outbox_types::{MutationId, MutationKind, MutationRecord};
use serde_json::Value;

/// A single dispatchable mutation, as the transport sees it.
///
/// Built from a [`MutationRecord`]; the body is dropped for deletes per the
/// wire contract.
#[derive(Debug, Clone)]
pub struct MutationRequest {
    /// The idempotency key, sent as the `Sync-Id` header.
    pub sync_id: MutationId,
    /// The verb to apply.
    pub kind: MutationKind,
    /// Entity type; the endpoint is derived from it.
    pub entity_type: String,
    /// Request body; always `None` for deletes.
    pub payload: Option<Value>,
    /// Sent as the `Sync-Timestamp` header.
    pub timestamp: DateTime<Utc>,
}

impl From<&MutationRecord> for MutationRequest {
    fn from(record: &MutationRecord) -> Self {
        let payload = match record.kind {
            MutationKind::Delete => None,
            _ => record.payload.clone(),
        };
        Self {
            sync_id: record.id,
            kind: record.kind,
            entity_type: record.entity_type.clone(),
            payload,
            timestamp: record.created_at,
        }
    }
}

/// The remote service's verdict on one dispatched mutation.
#[derive(Debug, Clone)]
pub enum DispatchOutcome {
    /// 2xx: the mutation took effect (or already had, under the same id).
    Applied,
    /// 409: the remote state diverged; carries the current remote payload.
    Conflict(Value),
    /// Any other failure — transient, eligible for retry.
    Failed(String),
}

/// A remote sync transport dispatches mutations to the remote authority.
#[async_trait]
pub trait RemoteTransport: Send + Sync {
    /// Dispatches one mutation and reports the remote verdict.
    ///
    /// `Err` is reserved for network-level failures (connect errors,
    /// timeouts); the manager treats those the same as
    /// [`DispatchOutcome::Failed`].
    async fn dispatch(&self, request: &MutationRequest) -> SyncResult<DispatchOutcome>;
}

/// A mock transport for testing.
pub mod mock {
    use super::*;
    use std::collections::{HashMap, HashSet, VecDeque};
    use std::sync::{Arc, Mutex};

    /// Scripted in-process transport.
    ///
    /// Outcomes are served from a queue (front first); when the queue is
    /// empty the default outcome applies. The mock models an idempotent
    /// server: a `Sync-Id` that was already applied produces no second
    /// effect, so [`MockTransport::effects`] counts real applies.
    pub struct MockTransport {
        scripted: Mutex<VecDeque<DispatchOutcome>>,
        default_outcome: Mutex<DispatchOutcome>,
        applied_ids: Mutex<HashSet<MutationId>>,
        effects: Mutex<HashMap<MutationId, u32>>,
        requests: Mutex<Vec<MutationRequest>>,
    }

    impl MockTransport {
        /// Creates a mock that applies everything.
        pub fn new() -> Arc<Self> {
            Arc::new(Self {
                scripted: Mutex::new(VecDeque::new()),
                default_outcome: Mutex::new(DispatchOutcome::Applied),
                applied_ids: Mutex::new(HashSet::new()),
                effects: Mutex::new(HashMap::new()),
                requests: Mutex::new(Vec::new()),
            })
        }

        /// Queues an outcome for the next dispatch.
        pub fn script(&self, outcome: DispatchOutcome) {
            self.scripted.lock().unwrap().push_back(outcome);
        }

        /// Sets the outcome used when the script queue is empty.
        pub fn set_default(&self, outcome: DispatchOutcome) {
            *self.default_outcome.lock().unwrap() = outcome;
        }

        /// All requests seen so far, in dispatch order.
        pub fn requests(&self) -> Vec<MutationRequest> {
            self.requests.lock().unwrap().clone()
        }

        /// Number of dispatches seen so far.
        pub fn dispatch_count(&self) -> usize {
            self.requests.lock().unwrap().len()
        }

        /// How many times a mutation actually took effect remotely.
        /// Never exceeds 1 for an idempotent server.
        pub fn effects(&self, id: MutationId) -> u32 {
            self.effects.lock().unwrap().get(&id).copied().unwrap_or(0)
        }
    }

    #[async_trait]
    impl RemoteTransport for MockTransport {
        async fn dispatch(&self, request: &MutationRequest) -> SyncResult<DispatchOutcome> {
            self.requests.lock().unwrap().push(request.clone());

            let outcome = self
                .scripted
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| self.default_outcome.lock().unwrap().clone());

            if matches!(outcome, DispatchOutcome::Applied) {
                // Idempotency: only the first apply per Sync-Id has an effect.
                if self.applied_ids.lock().unwrap().insert(request.sync_id) {
                    *self.effects.lock().unwrap().entry(request.sync_id).or_insert(0) += 1;
                }
            }

            Ok(outcome)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::MockTransport;
    use super::*;
    use outbox_types::MutationRecord;
    use serde_json::json;

    #[tokio::test]
    async fn delete_request_carries_no_body() {
        let record = MutationRecord::new(MutationKind::Delete, "task", Some(json!({"id": 7})));
        let request = MutationRequest::from(&record);
        assert!(request.payload.is_none());
        assert_eq!(request.kind, MutationKind::Delete);
    }

    #[tokio::test]
    async fn mock_replaying_same_id_has_one_effect() {
        let transport = MockTransport::new();
        let record = MutationRecord::new(MutationKind::Create, "task", Some(json!({"t": 1})));
        let request = MutationRequest::from(&record);

        transport.dispatch(&request).await.unwrap();
        transport.dispatch(&request).await.unwrap();

        assert_eq!(transport.dispatch_count(), 2);
        assert_eq!(transport.effects(record.id), 1);
    }

    #[tokio::test]
    async fn mock_scripted_outcomes_run_in_order() {
        let transport = MockTransport::new();
        transport.script(DispatchOutcome::Failed("503".into()));
        transport.script(DispatchOutcome::Conflict(json!({"v": 2})));

        let record = MutationRecord::new(MutationKind::Update, "task", Some(json!({"v": 1})));
        let request = MutationRequest::from(&record);

        assert!(matches!(
            transport.dispatch(&request).await.unwrap(),
            DispatchOutcome::Failed(_)
        ));
        assert!(matches!(
            transport.dispatch(&request).await.unwrap(),
            DispatchOutcome::Conflict(_)
        ));
        // Script exhausted; default applies.
        assert!(matches!(
            transport.dispatch(&request).await.unwrap(),
            DispatchOutcome::Applied
        ));
    }
}
