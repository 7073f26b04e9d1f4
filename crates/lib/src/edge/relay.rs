//! Edge-to-authority client: registration and password relay.

use std::time::Duration;

use reqwest::{StatusCode, Url};
use serde::de::DeserializeOwned;
use tracing::{info, warn};
use zeroize::Zeroizing;

use crate::Result;
use crate::constants::EDGE_HOST_HEADER;
use crate::registry::{EdgeDescriptor, EdgeRegistration};
use crate::sync::SyncError;
use crate::sync::protocol::{ErrorBody, PasswordRelayRequest, PasswordRelayResponse};

/// Talks to the authority's HTTP API on behalf of one edge.
#[derive(Debug, Clone)]
pub struct AuthorityClient {
    client: reqwest::Client,
    base_url: String,
    /// Sent as `x-edgedir-edge-host` so the authority can log where a change came from.
    edge_host: Option<String>,
}

impl AuthorityClient {
    /// `base_url` is e.g. `http://authority:8000`; a trailing slash is ignored.
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            client: reqwest::Client::new(),
            base_url,
            edge_host: None,
        }
    }

    pub fn with_edge_host(mut self, host: impl Into<String>) -> Self {
        self.edge_host = Some(host.into());
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Announce this edge. The authority marks it online and schedules a cycle.
    pub async fn register(&self, registration: &EdgeRegistration) -> Result<EdgeDescriptor> {
        let url = self.endpoint(&["api", "edges", "register"])?;
        let response = self
            .client
            .post(url)
            .json(registration)
            .send()
            .await
            .map_err(|e| self.connectivity(e))?;
        self.decode(response).await
    }

    /// [`register`](Self::register), retried `attempts` times with `delay` between tries.
    pub async fn register_with_retry(
        &self,
        registration: &EdgeRegistration,
        attempts: u32,
        delay: Duration,
    ) -> Result<EdgeDescriptor> {
        let attempts = attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.register(registration).await {
                Ok(edge) => {
                    info!(edge_id = edge.id, authority = %self.base_url, "Registered with authority");
                    return Ok(edge);
                }
                Err(e) if attempt < attempts => {
                    warn!(attempt, attempts, "Registration failed, retrying in {delay:?}: {e}");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Report a password changed locally on this edge.
    pub async fn relay_password_change(
        &self,
        username: &str,
        new_password: Zeroizing<String>,
    ) -> Result<PasswordRelayResponse> {
        let url = self.endpoint(&["api", "users", username, "change-password-from-edge"])?;
        let body = PasswordRelayRequest {
            new_password: new_password.as_str().to_string(),
        };
        let mut request = self.client.post(url).json(&body);
        if let Some(host) = &self.edge_host {
            request = request.header(EDGE_HOST_HEADER, host);
        }
        // The serialized copy lives inside the request from here on.
        drop(Zeroizing::new(body.new_password));

        let response = request.send().await.map_err(|e| self.connectivity(e))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(SyncError::NotFound(format!("user '{username}'")).into());
        }
        self.decode(response).await
    }

    /// `segments` appended to the base URL, each percent-encoded as a single segment.
    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let invalid = |reason: String| -> crate::Error {
            SyncError::Connectivity {
                target: self.base_url.clone(),
                reason,
            }
            .into()
        };
        let mut url =
            Url::parse(&self.base_url).map_err(|e| invalid(format!("invalid URL: {e}")))?;
        url.path_segments_mut()
            .map_err(|()| invalid("URL cannot carry a path".to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn connectivity(&self, err: reqwest::Error) -> crate::Error {
        SyncError::Connectivity {
            target: self.base_url.clone(),
            reason: err.to_string(),
        }
        .into()
    }

    async fn decode<T: DeserializeOwned>(&self, response: reqwest::Response) -> Result<T> {
        let status = response.status();
        if !status.is_success() {
            let detail = match response.json::<ErrorBody>().await {
                Ok(body) => body.detail,
                Err(_) => status.canonical_reason().unwrap_or("unknown error").to_string(),
            };
            return Err(SyncError::Remote {
                target: self.base_url.clone(),
                status: status.as_u16(),
                detail,
            }
            .into());
        }
        response.json().await.map_err(|e| {
            SyncError::UnexpectedResponse {
                target: self.base_url.clone(),
                reason: e.to_string(),
            }
            .into()
        })
    }
}
