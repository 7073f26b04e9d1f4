//! The seam between directory mutations and sync cycles.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Why a cycle was requested. Carried into logs only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncReason {
    UserCreated,
    UserUpdated,
    UserDeleted,
    PasswordChanged,
    PasswordRelayed,
    BulkImport,
    EdgeRegistered,
    Manual,
    Periodic,
}

impl SyncReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncReason::UserCreated => "user_created",
            SyncReason::UserUpdated => "user_updated",
            SyncReason::UserDeleted => "user_deleted",
            SyncReason::PasswordChanged => "password_changed",
            SyncReason::PasswordRelayed => "password_relayed",
            SyncReason::BulkImport => "bulk_import",
            SyncReason::EdgeRegistered => "edge_registered",
            SyncReason::Manual => "manual",
            SyncReason::Periodic => "periodic",
        }
    }
}

impl fmt::Display for SyncReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Requests a sync cycle without waiting for it.
///
/// Called strictly after a mutation has committed. Implementations must not
/// block and must not fail the caller; a cycle that cannot be queued is
/// logged and dropped, since the next cycle carries the full state anyway.
pub trait SyncScheduler: Send + Sync + fmt::Debug {
    fn schedule(&self, reason: SyncReason);
}
