//! Wire messages exchanged between the authority and its edges.
//!
//! A snapshot push is `POST /api/sync/users` with a JSON array of
//! [`UserRecord`](crate::user::UserRecord) as the body and the snapshot version in the
//! `x-edgedir-snapshot-version` header. Everything else in this module is a
//! response or a small request body.

use serde::{Deserialize, Serialize};

/// Edge reply to a snapshot push.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SyncResponse {
    /// True whenever the mirror transaction committed, warnings or not.
    pub success: bool,
    pub message: String,
    /// Number of records in the snapshot received.
    pub users_synced: usize,
    pub users_created: usize,
    pub users_updated: usize,
    pub users_deleted: usize,
    /// Ids of rows that could not be applied.
    #[serde(default)]
    pub users_skipped: Vec<i64>,
    /// Row and artifact warnings, one string each.
    #[serde(default)]
    pub warnings: Vec<String>,
}

/// Body of a relayed password change.
#[derive(Clone, Serialize, Deserialize)]
pub struct PasswordRelayRequest {
    pub new_password: String,
}

impl std::fmt::Debug for PasswordRelayRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PasswordRelayRequest").finish_non_exhaustive()
    }
}

/// Authority reply to a relayed password change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PasswordRelayResponse {
    pub success: bool,
    pub message: String,
    pub username: String,
    /// Edge that reported the change, when it said so.
    pub source_edge: Option<String>,
    /// Always false after a relay.
    pub must_change_password: bool,
}

/// Liveness signal from telemetry or an operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LivenessUpdate {
    pub online: bool,
}

/// Error body returned by every HTTP endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub detail: String,
}
