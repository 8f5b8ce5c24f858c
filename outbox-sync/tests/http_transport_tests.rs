use outbox_store::SqliteStore;
use outbox_sync::{
    DispatchOutcome, HttpTransport, HttpTransportConfig, MutationRequest, RemoteTransport,
    SyncConfig, SyncError, SyncQueueManager,
};
use outbox_types::{MutationKind, MutationRecord};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn request_for(kind: MutationKind, entity_type: &str, payload: Option<serde_json::Value>) -> MutationRequest {
    MutationRequest::from(&MutationRecord::new(kind, entity_type, payload))
}

// ── Config defaults ─────────────────────────────────────────────

#[test]
fn transport_config_default() {
    let cfg = HttpTransportConfig::default();
    assert_eq!(cfg.base_url, "http://localhost:8080");
    assert_eq!(cfg.timeout_secs, 30);
}

// ── Verb and endpoint mapping ───────────────────────────────────

#[tokio::test]
async fn create_posts_to_pluralized_endpoint() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/tasks"))
        .and(header_exists("Sync-Id"))
        .and(header_exists("Sync-Timestamp"))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    let transport = HttpTransport::new(server.uri()).unwrap();
    let request = request_for(MutationKind::Create, "task", Some(json!({"title": "ship"})));

    let outcome = transport.dispatch(&request).await.unwrap();
    assert!(matches!(outcome, DispatchOutcome::Applied));
}

#[tokio::test]
async fn update_uses_put() {
    let server = MockServer::start().await;

    Mock::given(method("PUT"))
        .and(path("/projects"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let transport = HttpTransport::new(server.uri()).unwrap();
    let request = request_for(MutationKind::Update, "project", Some(json!({"name": "v2"})));

    let outcome = transport.dispatch(&request).await.unwrap();
    assert!(matches!(outcome, DispatchOutcome::Applied));
}

#[tokio::test]
async fn delete_sends_no_body() {
    let server = MockServer::start().await;

    Mock::given(method("DELETE"))
        .and(path("/tasks"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let transport = HttpTransport::new(server.uri()).unwrap();
    // Even if the record still carries a payload, the delete goes out bare.
    let request = request_for(MutationKind::Delete, "task", Some(json!({"id": 7})));
    assert!(request.payload.is_none());

    let outcome = transport.dispatch(&request).await.unwrap();
    assert!(matches!(outcome, DispatchOutcome::Applied));

    let received = server.received_requests().await.unwrap();
    assert_eq!(received.len(), 1);
    assert!(received[0].body.is_empty());
}

// ── Response interpretation ─────────────────────────────────────

#[tokio::test]
async fn conflict_carries_the_remote_payload() {
    let server = MockServer::start().await;

    Mock::given(method("PUT"))
        .and(path("/tasks"))
        .respond_with(ResponseTemplate::new(409).set_body_json(json!({
            "title": "renamed upstream",
            "version": 4
        })))
        .mount(&server)
        .await;

    let transport = HttpTransport::new(server.uri()).unwrap();
    let request = request_for(MutationKind::Update, "task", Some(json!({"title": "mine"})));

    match transport.dispatch(&request).await.unwrap() {
        DispatchOutcome::Conflict(remote) => {
            assert_eq!(remote["title"], "renamed upstream");
            assert_eq!(remote["version"], 4);
        }
        other => panic!("expected conflict, got {other:?}"),
    }
}

#[tokio::test]
async fn server_error_maps_to_failed() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/tasks"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let transport = HttpTransport::new(server.uri()).unwrap();
    let request = request_for(MutationKind::Create, "task", Some(json!({})));

    match transport.dispatch(&request).await.unwrap() {
        DispatchOutcome::Failed(reason) => assert!(reason.contains("500")),
        other => panic!("expected failed, got {other:?}"),
    }
}

#[tokio::test]
async fn unreachable_server_is_a_transport_error() {
    // Nothing listens here.
    let transport = HttpTransport::new("http://127.0.0.1:1").unwrap();
    let request = request_for(MutationKind::Create, "task", Some(json!({})));

    let result = transport.dispatch(&request).await;
    assert!(matches!(result, Err(SyncError::Transport(_))));
}

// ── Idempotency key ─────────────────────────────────────────────

#[tokio::test]
async fn replays_reuse_the_same_sync_id() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/tasks"))
        .respond_with(ResponseTemplate::new(201))
        .expect(2)
        .mount(&server)
        .await;

    let transport = HttpTransport::new(server.uri()).unwrap();
    let request = request_for(MutationKind::Create, "task", Some(json!({"n": 1})));

    transport.dispatch(&request).await.unwrap();
    transport.dispatch(&request).await.unwrap();

    let received = server.received_requests().await.unwrap();
    assert_eq!(received.len(), 2);
    let first = received[0].headers.get("Sync-Id").unwrap();
    let second = received[1].headers.get("Sync-Id").unwrap();
    assert_eq!(first, second);
    assert_eq!(first.to_str().unwrap(), request.sync_id.to_string());
}

// ── End to end through the manager ──────────────────────────────

#[tokio::test]
async fn manager_drains_over_http() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/notes"))
        .respond_with(ResponseTemplate::new(201))
        .expect(2)
        .mount(&server)
        .await;

    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let transport = Arc::new(HttpTransport::new(server.uri()).unwrap());
    let manager = SyncQueueManager::new(
        store,
        transport,
        SyncConfig {
            retry_delay: Duration::from_millis(10),
            ..SyncConfig::default()
        },
    );

    manager
        .enqueue(MutationKind::Create, "note", Some(json!({"text": "a"})))
        .await
        .unwrap();
    manager
        .enqueue(MutationKind::Create, "note", Some(json!({"text": "b"})))
        .await
        .unwrap();

    manager.drain().await.unwrap();
    assert_eq!(manager.queue_status().await.unwrap().total, 0);
}
