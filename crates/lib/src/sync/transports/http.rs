//! HTTP transport for snapshot pushes, using reqwest.

use async_trait::async_trait;

use super::EdgeTransport;
use crate::Result;
use crate::constants::{SNAPSHOT_VERSION_HEADER, SYNC_USERS_PATH};
use crate::registry::EdgeDescriptor;
use crate::sync::error::SyncError;
use crate::sync::protocol::{ErrorBody, SyncResponse};
use crate::sync::snapshot::SyncSnapshot;

/// Pushes snapshots as `POST http://{address}:{sync_port}/api/sync/users`.
#[derive(Debug, Clone, Default)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Create a new HTTP transport instance.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a preconfigured client (proxies, TLS roots).
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl EdgeTransport for HttpTransport {
    fn transport_type(&self) -> &'static str {
        "http"
    }

    async fn push_snapshot(
        &self,
        edge: &EdgeDescriptor,
        snapshot: &SyncSnapshot,
    ) -> Result<SyncResponse> {
        let target = edge.endpoint();
        let url = format!("http://{target}{SYNC_USERS_PATH}");

        let response = self
            .client
            .post(&url)
            .header(SNAPSHOT_VERSION_HEADER, snapshot.version.to_string())
            .json(&snapshot.users)
            .send()
            .await
            .map_err(|e| SyncError::Connectivity {
                target: target.clone(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let detail = match response.json::<ErrorBody>().await {
                Ok(body) => body.detail,
                Err(_) => status.canonical_reason().unwrap_or("unknown error").to_string(),
            };
            return Err(SyncError::Remote {
                target,
                status: status.as_u16(),
                detail,
            }
            .into());
        }

        let sync_response: SyncResponse =
            response
                .json()
                .await
                .map_err(|e| SyncError::UnexpectedResponse {
                    target,
                    reason: e.to_string(),
                })?;

        Ok(sync_response)
    }
}
