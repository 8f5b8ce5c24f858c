//! HTTP implementation of the remote sync transport.
//!
//! Endpoints follow the dashboard API's convention: one mutation endpoint
//! per entity type, at the pluralized noun (`POST {base}/tasks`,
//! `DELETE {base}/comments`, ...). Every request carries the mutation id as
//! a `Sync-Id` header so the server can deduplicate replays.

use crate::error::{SyncError, SyncResult};
use crate::transport::{DispatchOutcome, MutationRequest, RemoteTransport};
use async_trait::async_trait;
use outbox_types::MutationKind;
use reqwest::{Client, Method, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

/// Configuration for the HTTP transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpTransportConfig {
    /// Base URL of the remote mutation API (e.g. `https://api.example.com/v1`).
    pub base_url: String,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for HttpTransportConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            timeout_secs: 30,
        }
    }
}

/// HTTP remote sync transport.
pub struct HttpTransport {
    config: HttpTransportConfig,
    client: Client,
}

impl HttpTransport {
    /// Creates a transport against the given base URL with default settings.
    pub fn new(base_url: impl Into<String>) -> SyncResult<Self> {
        Self::with_config(HttpTransportConfig {
            base_url: base_url.into(),
            ..Default::default()
        })
    }

    /// Creates a transport from explicit configuration.
    pub fn with_config(config: HttpTransportConfig) -> SyncResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| SyncError::Transport(format!("failed to create HTTP client: {e}")))?;
        Ok(Self { config, client })
    }

    /// The mutation endpoint for an entity type: pluralized noun under the
    /// base URL.
    fn endpoint(&self, entity_type: &str) -> String {
        format!(
            "{}/{}s",
            self.config.base_url.trim_end_matches('/'),
            entity_type
        )
    }
}

const fn method_for(kind: MutationKind) -> Method {
    match kind {
        MutationKind::Create => Method::POST,
        MutationKind::Update => Method::PUT,
        MutationKind::Delete => Method::DELETE,
    }
}

#[async_trait]
impl RemoteTransport for HttpTransport {
    async fn dispatch(&self, request: &MutationRequest) -> SyncResult<DispatchOutcome> {
        let url = self.endpoint(&request.entity_type);
        let method = method_for(request.kind);

        debug!("Dispatching {} {} (sync id {})", method, url, request.sync_id);

        let mut builder = self
            .client
            .request(method, &url)
            .header("Sync-Id", request.sync_id.to_string())
            .header("Sync-Timestamp", request.timestamp.to_rfc3339());

        // Body omitted for deletes; MutationRequest already guarantees that.
        if let Some(payload) = &request.payload {
            builder = builder.json(payload);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| SyncError::Transport(format!("request failed: {e}")))?;

        let status = response.status();
        if status.is_success() {
            return Ok(DispatchOutcome::Applied);
        }

        if status == StatusCode::CONFLICT {
            // The 409 body is the current remote payload.
            let remote: Value = response.json().await.map_err(|e| {
                SyncError::Transport(format!("unreadable conflict body: {e}"))
            })?;
            return Ok(DispatchOutcome::Conflict(remote));
        }

        warn!("Dispatch of {} returned {}", request.sync_id, status);
        Ok(DispatchOutcome::Failed(format!(
            "unexpected status {status}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_pluralizes_entity_type() {
        let transport = HttpTransport::new("https://api.example.com/v1/").unwrap();
        assert_eq!(transport.endpoint("task"), "https://api.example.com/v1/tasks");
        assert_eq!(
            transport.endpoint("notification"),
            "https://api.example.com/v1/notifications"
        );
    }

    #[test]
    fn kind_maps_to_http_method() {
        assert_eq!(method_for(MutationKind::Create), Method::POST);
        assert_eq!(method_for(MutationKind::Update), Method::PUT);
        assert_eq!(method_for(MutationKind::Delete), Method::DELETE);
    }
}
