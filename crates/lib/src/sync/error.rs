//! Error types for the synchronization module.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while pushing or reconciling a snapshot.
///
/// The first six variants are the failure taxonomy every component reports
/// against. [`SyncError::is_hard_failure`] variants abort one edge's
/// reconciliation; [`SyncError::is_recoverable`] variants become warnings
/// inside an otherwise successful result.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SyncError {
    /// The target (an edge, the authority, or the local mirror) could not be reached.
    #[error("Failed to connect to {target}: {reason}")]
    Connectivity { target: String, reason: String },

    /// The local mirror schema could not be created or used.
    #[error("Mirror schema failure: {reason}")]
    Schema { reason: String },

    /// One row of a snapshot could not be applied.
    #[error("User {user_id} skipped: {reason}")]
    RowIntegrity { user_id: i64, reason: String },

    /// An artifact generation step failed or timed out.
    #[error("Artifact step '{step}' failed: {reason}")]
    ArtifactGeneration { step: String, reason: String },

    /// A push or request did not settle in time.
    #[error("Timed out after {after:?} waiting for {target}")]
    Timeout { target: String, after: Duration },

    /// The remote side does not know the requested resource.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The remote side answered with an error status.
    #[error("{target} returned HTTP {status}: {detail}")]
    Remote {
        target: String,
        status: u16,
        detail: String,
    },

    /// The remote side answered with a body we could not interpret.
    #[error("Unexpected response from {target}: {reason}")]
    UnexpectedResponse { target: String, reason: String },

    /// Command channel send error.
    #[error("Failed to send command to background sync: {0}")]
    CommandSendError(String),

    /// The background engine stopped before answering.
    #[error("Background sync engine stopped")]
    EngineStopped,

    /// A whole cycle failed before any push was attempted.
    #[error("Sync cycle failed: {0}")]
    CycleFailed(String),

    /// Attempted to start a server when one is already running.
    #[error("Server already running on {address}")]
    ServerAlreadyRunning { address: String },

    /// Attempted to stop a server when none is running.
    #[error("Server not running")]
    ServerNotRunning,

    /// Server bind error.
    #[error("Failed to bind server to {address}: {reason}")]
    ServerBind { address: String, reason: String },
}

impl SyncError {
    /// Connectivity and schema failures abort an edge's reconciliation outright.
    pub fn is_hard_failure(&self) -> bool {
        matches!(
            self,
            SyncError::Connectivity { .. } | SyncError::Schema { .. }
        )
    }

    /// Row and artifact failures are skipped and reported as warnings.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            SyncError::RowIntegrity { .. } | SyncError::ArtifactGeneration { .. }
        )
    }

    /// Check if this is a timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, SyncError::Timeout { .. })
    }

    /// Check if this is a not found error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, SyncError::NotFound(_))
    }

    /// Check if this is a network/connection error.
    pub fn is_network_error(&self) -> bool {
        matches!(
            self,
            SyncError::Connectivity { .. } | SyncError::Timeout { .. } | SyncError::Remote { .. }
        )
    }

    /// Check if this is a server lifecycle error.
    pub fn is_server_error(&self) -> bool {
        matches!(
            self,
            SyncError::ServerAlreadyRunning { .. }
                | SyncError::ServerNotRunning
                | SyncError::ServerBind { .. }
        )
    }
}

impl From<SyncError> for crate::Error {
    fn from(err: SyncError) -> Self {
        crate::Error::Sync(err)
    }
}
