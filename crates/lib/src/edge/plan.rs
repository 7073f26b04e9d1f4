//! Set arithmetic behind a reconciliation.

use std::collections::BTreeSet;

/// Which ids to create, overwrite, and delete to make the mirror equal a snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcilePlan {
    /// In the snapshot, not in the mirror.
    pub to_create: BTreeSet<i64>,
    /// In both. Always overwritten, no field-level diff.
    pub to_update: BTreeSet<i64>,
    /// In the mirror, not in the snapshot.
    pub to_delete: BTreeSet<i64>,
}

impl ReconcilePlan {
    /// Plan from the snapshot id set `desired` and the mirror id set `existing`.
    pub fn compute(desired: &BTreeSet<i64>, existing: &BTreeSet<i64>) -> Self {
        Self {
            to_create: desired.difference(existing).copied().collect(),
            to_update: desired.intersection(existing).copied().collect(),
            to_delete: existing.difference(desired).copied().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.to_create.is_empty() && self.to_update.is_empty() && self.to_delete.is_empty()
    }

    /// Total number of row operations the plan implies.
    pub fn len(&self) -> usize {
        self.to_create.len() + self.to_update.len() + self.to_delete.len()
    }
}
