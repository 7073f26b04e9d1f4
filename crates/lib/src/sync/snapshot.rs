//! Full-state directory snapshots.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::authority::UserStore;
use crate::user::UserRecord;
use crate::{Clock, Result};

/// Every user record at one moment, in id order.
///
/// Built fresh for each cycle and never persisted. Because it is the whole
/// directory rather than a delta, applying it twice, late, or out of order is
/// always safe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSnapshot {
    /// Authority clock in milliseconds when the snapshot was taken, bumped past
    /// the previous snapshot's version if the clock has not moved beyond it.
    /// Strictly increasing across captures, even when the wall clock steps back.
    pub version: u64,
    /// The same instant as RFC 3339.
    pub taken_at: String,
    pub users: Vec<UserRecord>,
}

impl SyncSnapshot {
    /// Read the whole directory from the authority store.
    pub async fn capture(store: &UserStore, clock: &dyn Clock) -> Result<Self> {
        let version = store.next_snapshot_version(clock.now_millis()).await?;
        let taken_at = clock.now_rfc3339();
        let users = store.list_all().await?;
        Ok(Self {
            version,
            taken_at,
            users,
        })
    }

    /// Build a snapshot from records already in hand, sorting them by id.
    pub fn from_users(version: u64, taken_at: impl Into<String>, mut users: Vec<UserRecord>) -> Self {
        users.sort_by_key(|u| u.id);
        Self {
            version,
            taken_at: taken_at.into(),
            users,
        }
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    /// Ids present in this snapshot.
    pub fn ids(&self) -> BTreeSet<i64> {
        self.users.iter().map(|u| u.id).collect()
    }
}
