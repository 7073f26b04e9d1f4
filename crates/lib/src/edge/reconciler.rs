//! Edge-side snapshot application.
//!
//! A reconciliation makes the mirror equal to a received snapshot:
//!
//! 1. ensure the mirror schema exists
//! 2. plan creates, updates and deletes from the two id sets
//! 3. apply deletes, then updates, then creates in one transaction, each row
//!    under its own savepoint so a failing row is skipped instead of aborting.
//!    Rows whose username or email changes are first moved to placeholder
//!    names, so two rows may swap values within one snapshot
//! 4. commit, then regenerate the authentication artifacts
//!
//! Only connectivity or schema trouble makes a reconciliation fail. Skipped
//! rows and failed artifact steps come back as warnings on a successful
//! [`ReconciliationResult`].
//!
//! Pushes to the same edge are serialized, and a push whose snapshot version
//! is older than one already applied is acknowledged without touching the
//! mirror.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sqlx::{AnyConnection, Connection};
use tracing::{Instrument, debug, info, info_span, warn};

use super::artifacts::{ArtifactCommand, ArtifactGenerator, ArtifactOutcome};
use super::mirror::{Login, Mirror};
use super::plan::ReconcilePlan;
use crate::backend::SqlxResultExt;
use crate::constants::DEFAULT_ARTIFACT_TIMEOUT;
use crate::sync::SyncError;
use crate::sync::protocol::SyncResponse;
use crate::user::{UserRecord, is_valid_username};
use crate::{Error, Result};

/// Where the reconciler is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReconcilerState {
    Idle,
    Receiving,
    Reconciling,
    Regenerating,
    /// The last reconciliation hit a hard failure. Cleared by the next one.
    Failed,
}

impl ReconcilerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconcilerState::Idle => "idle",
            ReconcilerState::Receiving => "receiving",
            ReconcilerState::Reconciling => "reconciling",
            ReconcilerState::Regenerating => "regenerating",
            ReconcilerState::Failed => "failed",
        }
    }
}

impl fmt::Display for ReconcilerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Upper bound on each artifact step.
    pub artifact_timeout: Duration,
    pub artifacts: Vec<ArtifactCommand>,
    /// Handed to artifact steps so they can read the mirror.
    pub mirror_url: Option<String>,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            artifact_timeout: DEFAULT_ARTIFACT_TIMEOUT,
            artifacts: ArtifactCommand::defaults(),
            mirror_url: None,
        }
    }
}

impl ReconcilerConfig {
    /// No artifact steps at all.
    pub fn without_artifacts() -> Self {
        Self {
            artifacts: Vec::new(),
            ..Default::default()
        }
    }
}

/// Outcome of one reconciliation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationResult {
    /// True whenever the transaction committed.
    pub success: bool,
    /// Records received in the snapshot.
    pub users_synced: usize,
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    /// Ids of rows that could not be applied.
    pub skipped: Vec<i64>,
    pub warnings: Vec<String>,
    pub artifacts: Vec<ArtifactOutcome>,
    /// The snapshot was older than one already applied and was ignored.
    pub stale: bool,
}

impl ReconciliationResult {
    fn stale(users_synced: usize) -> Self {
        Self {
            success: true,
            users_synced,
            stale: true,
            ..Default::default()
        }
    }

    pub fn message(&self) -> String {
        if self.stale {
            return "stale snapshot ignored".to_string();
        }
        let mut message = format!("Successfully synchronized {} users", self.users_synced);
        if !self.warnings.is_empty() {
            message.push_str(&format!(" (Warnings: {})", self.warnings.join("; ")));
        }
        message
    }

    /// Wire form returned to the authority.
    pub fn to_response(&self) -> SyncResponse {
        SyncResponse {
            success: self.success,
            message: self.message(),
            users_synced: self.users_synced,
            users_created: self.created,
            users_updated: self.updated,
            users_deleted: self.deleted,
            users_skipped: self.skipped.clone(),
            warnings: self.warnings.clone(),
        }
    }
}

/// One row operation inside the reconciliation transaction.
enum RowOp<'a> {
    Delete(i64),
    /// Set only the username and email.
    Rename(i64, Login),
    Update(&'a UserRecord),
    Create(&'a UserRecord),
}

impl RowOp<'_> {
    fn user_id(&self) -> i64 {
        match self {
            RowOp::Delete(id) | RowOp::Rename(id, _) => *id,
            RowOp::Update(user) | RowOp::Create(user) => user.id,
        }
    }
}

/// Map a storage error to the hard-failure half of the taxonomy.
fn hard_failure(err: Error) -> Error {
    match err {
        Error::Sync(_) => err,
        Error::Backend(ref backend_err) if backend_err.is_connection_error() => {
            SyncError::Connectivity {
                target: "local mirror".to_string(),
                reason: err.to_string(),
            }
            .into()
        }
        other => SyncError::Schema {
            reason: other.to_string(),
        }
        .into(),
    }
}

/// Applies snapshots to the local mirror.
#[derive(Debug)]
pub struct Reconciler {
    mirror: Mirror,
    artifacts: ArtifactGenerator,
    state: Mutex<ReconcilerState>,
    /// Held for the whole of a reconciliation; remembers the newest applied version.
    last_version: tokio::sync::Mutex<Option<u64>>,
}

impl Reconciler {
    pub fn new(mirror: Mirror, config: ReconcilerConfig) -> Self {
        let mut artifacts = ArtifactGenerator::new(config.artifacts, config.artifact_timeout);
        if let Some(url) = config.mirror_url {
            artifacts = artifacts.with_mirror_url(url);
        }
        Self::with_generator(mirror, artifacts)
    }

    pub fn with_generator(mirror: Mirror, artifacts: ArtifactGenerator) -> Self {
        Self {
            mirror,
            artifacts,
            state: Mutex::new(ReconcilerState::Idle),
            last_version: tokio::sync::Mutex::new(None),
        }
    }

    pub fn mirror(&self) -> &Mirror {
        &self.mirror
    }

    pub fn state(&self) -> ReconcilerState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: ReconcilerState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    /// Newest snapshot version applied so far.
    pub async fn last_applied_version(&self) -> Option<u64> {
        *self.last_version.lock().await
    }

    /// Make the mirror equal to `users`.
    ///
    /// `version` is the snapshot version from the push, if it carried one.
    /// Returns `Err` only for connectivity or schema failures, in which case
    /// nothing was committed.
    pub async fn reconcile(
        &self,
        users: Vec<UserRecord>,
        version: Option<u64>,
    ) -> Result<ReconciliationResult> {
        let mut last_version = self.last_version.lock().await;
        if let (Some(incoming), Some(applied)) = (version, *last_version)
            && incoming < applied
        {
            info!(incoming, applied, "Ignoring stale snapshot");
            return Ok(ReconciliationResult::stale(users.len()));
        }

        self.set_state(ReconcilerState::Receiving);
        let span = info_span!("reconcile", users = users.len(), version = ?version);
        let applied = self.apply(users).instrument(span.clone()).await;

        let mut result = match applied {
            Ok(result) => result,
            Err(e) => {
                self.set_state(ReconcilerState::Failed);
                warn!(parent: &span, "Reconciliation failed: {e}");
                return Err(e);
            }
        };
        if let Some(incoming) = version {
            *last_version = Some((*last_version).map_or(incoming, |v| v.max(incoming)));
        }

        self.set_state(ReconcilerState::Regenerating);
        result.artifacts = self.artifacts.regenerate().await;
        for outcome in result.artifacts.iter().filter(|o| !o.success) {
            result.warnings.push(outcome.detail.clone());
        }
        self.set_state(ReconcilerState::Idle);

        info!(
            parent: &span,
            created = result.created,
            updated = result.updated,
            deleted = result.deleted,
            skipped = result.skipped.len(),
            warnings = result.warnings.len(),
            "Reconciliation complete"
        );
        Ok(result)
    }

    async fn apply(&self, users: Vec<UserRecord>) -> Result<ReconciliationResult> {
        self.mirror.ensure_schema().await.map_err(hard_failure)?;

        let mut result = ReconciliationResult {
            users_synced: users.len(),
            ..Default::default()
        };

        // Last occurrence of an id wins.
        let desired: BTreeMap<i64, UserRecord> = users.into_iter().map(|u| (u.id, u)).collect();
        let desired_ids: BTreeSet<i64> = desired.keys().copied().collect();

        self.set_state(ReconcilerState::Reconciling);
        let mut tx = self
            .mirror
            .backend()
            .pool()
            .begin()
            .await
            .sql_context("Failed to begin mirror transaction")
            .map_err(hard_failure)?;

        let existing = Mirror::logins_on(&mut tx).await.map_err(hard_failure)?;
        let existing_ids: BTreeSet<i64> = existing.keys().copied().collect();
        let plan = ReconcilePlan::compute(&desired_ids, &existing_ids);
        debug!(
            create = plan.to_create.len(),
            update = plan.to_update.len(),
            delete = plan.to_delete.len(),
            "Reconciliation planned"
        );

        // Updated rows whose username or email changes. They are parked on
        // placeholders before any update runs, so rows can trade values.
        let parked: BTreeMap<i64, &Login> = plan
            .to_update
            .iter()
            .filter(|id| is_valid_username(&desired[*id].username))
            .filter_map(|id| {
                let current = &existing[id];
                (*current != Login::of(&desired[id])).then_some((*id, current))
            })
            .collect();

        // Deletes first free usernames, emails and uids for recreated accounts.
        let mut ops = Vec::with_capacity(plan.len() + parked.len());
        ops.extend(plan.to_delete.iter().map(|id| RowOp::Delete(*id)));
        ops.extend(parked.keys().map(|id| RowOp::Rename(*id, Login::placeholder(*id))));
        ops.extend(plan.to_update.iter().map(|id| RowOp::Update(&desired[id])));
        ops.extend(plan.to_create.iter().map(|id| RowOp::Create(&desired[id])));

        for op in ops {
            let user_id = op.user_id();
            if let RowOp::Update(user) | RowOp::Create(user) = &op
                && !is_valid_username(&user.username)
            {
                self.skip(&mut result, user_id, "invalid username".to_string());
                continue;
            }

            match Self::apply_row(&mut tx, &op).await? {
                Ok(()) => match op {
                    RowOp::Delete(_) => result.deleted += 1,
                    RowOp::Rename(..) => {}
                    RowOp::Update(_) => result.updated += 1,
                    RowOp::Create(_) => result.created += 1,
                },
                // The update then runs against the original names.
                Err(reason) if matches!(op, RowOp::Rename(..)) => {
                    debug!(user_id, "Could not park row: {reason}");
                }
                Err(mut reason) => {
                    if let (RowOp::Update(_), Some(previous)) = (&op, parked.get(&user_id)) {
                        let restore = RowOp::Rename(user_id, (*previous).clone());
                        if let Err(e) = Self::apply_row(&mut tx, &restore).await? {
                            reason.push_str(&format!(
                                "; previous username could not be restored: {e}"
                            ));
                        }
                    }
                    self.skip(&mut result, user_id, reason);
                }
            }
        }

        tx.commit()
            .await
            .sql_context("Failed to commit mirror transaction")
            .map_err(hard_failure)?;
        result.success = true;
        Ok(result)
    }

    fn skip(&self, result: &mut ReconciliationResult, user_id: i64, reason: String) {
        let warning = SyncError::RowIntegrity { user_id, reason }.to_string();
        warn!("{warning}");
        result.skipped.push(user_id);
        result.warnings.push(warning);
    }

    /// Run one row operation under a savepoint.
    ///
    /// The outer `Result` is a hard failure; the inner one is a row that was
    /// rolled back to its savepoint and should be skipped.
    async fn apply_row(
        conn: &mut AnyConnection,
        op: &RowOp<'_>,
    ) -> Result<std::result::Result<(), String>> {
        let mut savepoint = conn
            .begin()
            .await
            .sql_context("Failed to open savepoint")
            .map_err(hard_failure)?;

        let outcome = match op {
            RowOp::Delete(id) => Mirror::delete_row(&mut savepoint, *id).await,
            RowOp::Rename(id, login) => Mirror::rename_row(&mut savepoint, *id, login).await,
            RowOp::Update(user) => Mirror::update_row(&mut savepoint, user).await,
            RowOp::Create(user) => Mirror::insert_row(&mut savepoint, user).await,
        };

        match outcome {
            Ok(()) => {
                savepoint
                    .commit()
                    .await
                    .sql_context("Failed to release savepoint")
                    .map_err(hard_failure)?;
                Ok(Ok(()))
            }
            Err(Error::Backend(e)) if !e.is_connection_error() => {
                savepoint
                    .rollback()
                    .await
                    .sql_context("Failed to roll back savepoint")
                    .map_err(hard_failure)?;
                Ok(Err(e.to_string()))
            }
            Err(e) => Err(hard_failure(e)),
        }
    }
}
