//! Lifecycle and error mapping shared by the authority and edge HTTP servers.

use std::net::SocketAddr;

use axum::Json;
use axum::Router;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::sync::SyncError;
use crate::sync::protocol::ErrorBody;
use crate::{Error, Result};

/// A running axum server and the means to stop it.
struct Running {
    address: SocketAddr,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// Owns at most one axum server at a time.
///
/// All lifecycle methods take `&mut self`; callers that share a server wrap it
/// in a lock.
#[derive(Default)]
pub struct HttpServer {
    running: Option<Running>,
}

impl std::fmt::Debug for HttpServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpServer")
            .field("address", &self.address())
            .finish()
    }
}

impl HttpServer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Address the server actually bound, which differs from the requested
    /// one when port 0 was asked for.
    pub fn address(&self) -> Option<SocketAddr> {
        self.running.as_ref().map(|r| r.address)
    }

    /// Bind `addr` and serve `router` on a background task.
    ///
    /// Binding happens before this returns, so bind failures surface here
    /// rather than inside the task.
    pub async fn start(&mut self, addr: &str, router: Router) -> Result<SocketAddr> {
        if let Some(running) = &self.running {
            return Err(SyncError::ServerAlreadyRunning {
                address: running.address.to_string(),
            }
            .into());
        }

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| SyncError::ServerBind {
                address: addr.to_string(),
                reason: e.to_string(),
            })?;
        let address = listener.local_addr().map_err(|e| SyncError::ServerBind {
            address: addr.to_string(),
            reason: format!("Failed to get local address: {e}"),
        })?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let result = axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.await;
                })
                .await;
            if let Err(e) = result {
                error!(%address, "HTTP server failed: {e}");
            }
        });

        info!(%address, "HTTP server listening");
        self.running = Some(Running {
            address,
            shutdown: shutdown_tx,
            task,
        });
        Ok(address)
    }

    /// Stop accepting connections and wait for in-flight requests to finish.
    pub async fn stop(&mut self) -> Result<()> {
        let running = self.running.take().ok_or(SyncError::ServerNotRunning)?;
        let _ = running.shutdown.send(());
        if let Err(e) = running.task.await {
            error!(address = %running.address, "HTTP server task ended abnormally: {e}");
        }
        info!(address = %running.address, "HTTP server stopped");
        Ok(())
    }
}

/// Library error as an HTTP response with a `{ "detail": ... }` body.
#[derive(Debug)]
pub struct ApiError(pub Error);

impl ApiError {
    pub fn status(&self) -> StatusCode {
        if self.0.is_not_found() {
            StatusCode::NOT_FOUND
        } else if self.0.is_conflict() {
            StatusCode::CONFLICT
        } else if self.0.is_validation_error() {
            StatusCode::BAD_REQUEST
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl<E: Into<Error>> From<E> for ApiError {
    fn from(err: E) -> Self {
        ApiError(err.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("Request failed: {}", self.0);
        }
        let body = ErrorBody {
            detail: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}
