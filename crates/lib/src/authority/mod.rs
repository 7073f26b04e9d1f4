//! The identity authority: system of record for user accounts.
//!
//! Every operation that changes a row validates its input, commits through
//! [`UserStore`], and only then calls [`SyncScheduler::schedule`] exactly once.
//! Reads never schedule. Scheduling is fire-and-forget: the caller's result
//! depends on the commit alone, never on how the following sync cycle goes.

pub mod http;
pub mod import;
pub mod schema;
pub mod service;
pub mod store;

use std::sync::Arc;

use tracing::{debug, info};

use crate::backend::SqlxBackend;
use crate::constants::DEFAULT_GID;
use crate::sync::protocol::PasswordRelayResponse;
use crate::sync::{SyncReason, SyncScheduler};
use crate::user::crypto::hash_password_async;
use crate::user::{NewUser, UserError, UserRecord, UserUpdate, validate_username};
use crate::{Clock, Result};

pub use import::{ImportFailure, ImportFormat, ImportOptions, ImportReport, ImportedUser};
pub use service::{AuthorityService, AuthorityServiceConfig};
pub use store::UserStore;

use store::{PendingUser, UserChanges};

/// Minimal shape check: one `@` with something on both sides and a dot in the domain.
pub(crate) fn validate_email(email: &str) -> Result<()> {
    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !email.chars().any(char::is_whitespace)
        }
        None => false,
    };
    if valid {
        Ok(())
    } else {
        Err(UserError::InvalidEmail {
            email: email.to_string(),
        }
        .into())
    }
}

/// Account directory plus the hook that keeps edges converged on it.
#[derive(Debug, Clone)]
pub struct Authority {
    store: UserStore,
    clock: Arc<dyn Clock>,
    scheduler: Arc<dyn SyncScheduler>,
}

impl Authority {
    /// Open the directory on `backend`, creating the schema if needed.
    pub async fn open(
        backend: Arc<SqlxBackend>,
        clock: Arc<dyn Clock>,
        scheduler: Arc<dyn SyncScheduler>,
    ) -> Result<Self> {
        schema::initialize(&backend).await?;
        Ok(Self::new(UserStore::new(backend), clock, scheduler))
    }

    pub fn new(store: UserStore, clock: Arc<dyn Clock>, scheduler: Arc<dyn SyncScheduler>) -> Self {
        Self {
            store,
            clock,
            scheduler,
        }
    }

    /// The underlying store, for components that only read (the dispatcher).
    pub fn store(&self) -> &UserStore {
        &self.store
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Create an account and schedule a cycle.
    pub async fn create_user(&self, new_user: NewUser) -> Result<UserRecord> {
        let record = self.insert_user(new_user).await?;
        info!(id = record.id, username = %record.username, uid = record.system_uid, "User created");
        self.scheduler.schedule(SyncReason::UserCreated);
        Ok(record)
    }

    /// Validate, hash and insert without scheduling. Bulk import batches on this.
    pub(crate) async fn insert_user(&self, new_user: NewUser) -> Result<UserRecord> {
        validate_username(&new_user.username)?;
        validate_email(&new_user.email)?;
        if new_user.password.is_empty() {
            return Err(UserError::EmptyPassword.into());
        }

        let pending = PendingUser {
            password_hash: hash_password_async(&new_user.password).await?,
            username: new_user.username,
            email: new_user.email,
            is_admin: new_user.is_admin,
            is_active: true,
            must_change_password: new_user.must_change_password,
            system_gid: new_user.system_gid.unwrap_or(DEFAULT_GID),
            ssh_public_key: new_user.ssh_public_key,
            created_at: self.clock.now_rfc3339(),
        };
        self.store.insert(pending).await
    }

    pub async fn get_user(&self, id: i64) -> Result<UserRecord> {
        self.store.get(id).await?.ok_or_else(|| {
            UserError::UserNotFound {
                key: id.to_string(),
            }
            .into()
        })
    }

    pub async fn get_user_by_username(&self, username: &str) -> Result<UserRecord> {
        self.store
            .find_by_username(username)
            .await?
            .ok_or_else(|| {
                UserError::UserNotFound {
                    key: username.to_string(),
                }
                .into()
            })
    }

    pub async fn get_user_by_email(&self, email: &str) -> Result<UserRecord> {
        self.store.find_by_email(email).await?.ok_or_else(|| {
            UserError::UserNotFound {
                key: email.to_string(),
            }
            .into()
        })
    }

    pub async fn list_users(&self, skip: i64, limit: i64) -> Result<Vec<UserRecord>> {
        self.store.list(skip, limit).await
    }

    pub async fn list_active_users(&self, skip: i64, limit: i64) -> Result<Vec<UserRecord>> {
        self.store.list_active(skip, limit).await
    }

    pub async fn list_admin_users(&self) -> Result<Vec<UserRecord>> {
        self.store.list_admins().await
    }

    pub async fn count_users(&self) -> Result<i64> {
        self.store.count().await
    }

    pub async fn count_active_users(&self) -> Result<i64> {
        self.store.count_active().await
    }

    pub async fn count_admin_users(&self) -> Result<i64> {
        self.store.count_admins().await
    }

    /// Apply a partial update.
    ///
    /// Only the columns named in `update` are written, so a concurrent change
    /// to another column survives. An empty update returns the current record
    /// and schedules nothing.
    pub async fn update_user(&self, id: i64, update: UserUpdate) -> Result<UserRecord> {
        if update.is_empty() {
            return self.get_user(id).await;
        }
        if let Some(username) = &update.username {
            validate_username(username)?;
        }
        if let Some(email) = &update.email {
            validate_email(email)?;
        }
        let password_hash = match &update.password {
            Some(password) if password.is_empty() => return Err(UserError::EmptyPassword.into()),
            Some(password) => Some(hash_password_async(password).await?),
            None => None,
        };

        let changes = UserChanges {
            username: update.username,
            email: update.email,
            password_hash,
            is_admin: update.is_admin,
            is_active: update.is_active,
            must_change_password: update.must_change_password,
            ssh_public_key: update.ssh_public_key,
        };
        let record = self.store.apply(id, &changes).await?;
        debug!(id, "User updated");
        self.scheduler.schedule(SyncReason::UserUpdated);
        Ok(record)
    }

    /// Set a new password on behalf of an administrator.
    pub async fn change_password(&self, id: i64, password: &str) -> Result<UserRecord> {
        if password.is_empty() {
            return Err(UserError::EmptyPassword.into());
        }
        let changes = UserChanges {
            password_hash: Some(hash_password_async(password).await?),
            ..Default::default()
        };
        let record = self.store.apply(id, &changes).await?;
        info!(id, username = %record.username, "Password changed");
        self.scheduler.schedule(SyncReason::PasswordChanged);
        Ok(record)
    }

    pub async fn activate_user(&self, id: i64) -> Result<UserRecord> {
        self.set_active(id, true).await
    }

    /// Soft delete: the account stays in the directory (and on every edge) but is inactive.
    pub async fn deactivate_user(&self, id: i64) -> Result<UserRecord> {
        self.set_active(id, false).await
    }

    async fn set_active(&self, id: i64, active: bool) -> Result<UserRecord> {
        let changes = UserChanges {
            is_active: Some(active),
            ..Default::default()
        };
        let record = self.store.apply(id, &changes).await?;
        info!(id, active, "User activation changed");
        self.scheduler.schedule(SyncReason::UserUpdated);
        Ok(record)
    }

    /// Flip the admin flag.
    pub async fn toggle_admin(&self, id: i64) -> Result<UserRecord> {
        let record = self.store.toggle_admin(id).await?;
        info!(id, is_admin = record.is_admin, "Admin flag toggled");
        self.scheduler.schedule(SyncReason::UserUpdated);
        Ok(record)
    }

    /// Remove an account for good. Its id is never handed out again.
    pub async fn delete_user(&self, id: i64) -> Result<()> {
        if !self.store.delete(id).await? {
            return Err(UserError::UserNotFound {
                key: id.to_string(),
            }
            .into());
        }
        info!(id, "User deleted");
        self.scheduler.schedule(SyncReason::UserDeleted);
        Ok(())
    }

    /// Accept a password that was changed on an edge.
    ///
    /// The authority keeps whichever relay arrives last and clears the
    /// must-change flag. The next cycle carries the new hash back to every
    /// edge, including the one it came from.
    pub async fn relay_password_change(
        &self,
        username: &str,
        new_password: &str,
        source_edge: Option<&str>,
    ) -> Result<PasswordRelayResponse> {
        if new_password.is_empty() {
            return Err(UserError::EmptyPassword.into());
        }
        let password_hash = hash_password_async(new_password).await?;
        let record = self
            .store
            .set_relayed_password(username, &password_hash)
            .await?
            .ok_or_else(|| UserError::UserNotFound {
                key: username.to_string(),
            })?;

        let source = source_edge.unwrap_or("unknown");
        info!(username, source_edge = source, "Password relayed from edge");
        self.scheduler.schedule(SyncReason::PasswordRelayed);

        Ok(PasswordRelayResponse {
            success: true,
            message: format!("Password updated for user '{username}' from edge {source}"),
            username: record.username,
            source_edge: source_edge.map(str::to_string),
            must_change_password: false,
        })
    }

    /// Ask for a cycle without changing anything.
    pub fn trigger_sync(&self) {
        self.scheduler.schedule(SyncReason::Manual);
    }
}
