//! Persistence for the user directory.
//!
//! [`UserStore`] is plain SQL over the authority database. It validates
//! nothing and schedules nothing; [`super::Authority`] layers both on top.

use std::sync::Arc;

use tracing::{debug, trace};

use crate::Result;
use crate::backend::{SqlxBackend, SqlxResultExt};
use crate::constants::UID_BASE;
use crate::user::UserError;
use crate::user::record::{USER_COLUMNS, UserRecord, UserRow, flag};

/// How many times an insert retries when a concurrent create takes its uid.
const UID_ATTEMPTS: u32 = 3;

/// A fully prepared row waiting for its id and uid.
#[derive(Debug, Clone)]
pub(crate) struct PendingUser {
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub is_admin: bool,
    pub is_active: bool,
    pub must_change_password: bool,
    pub system_gid: i64,
    pub ssh_public_key: Option<String>,
    pub created_at: String,
}

/// Next uid after the current maximum, never below [`UID_BASE`].
pub(crate) fn next_uid(current_max: Option<i64>) -> i64 {
    match current_max {
        Some(max) if max >= UID_BASE => max + 1,
        _ => UID_BASE,
    }
}

/// Turn a unique violation on username or email into the matching user error.
fn map_conflict(err: crate::Error, username: &str, email: &str) -> crate::Error {
    if let crate::Error::Backend(backend_err) = &err
        && backend_err.is_unique_violation()
    {
        if backend_err.violates("username") {
            return UserError::UsernameTaken {
                username: username.to_string(),
            }
            .into();
        }
        if backend_err.violates("email") {
            return UserError::EmailTaken {
                email: email.to_string(),
            }
            .into();
        }
    }
    err
}

fn not_found(id: i64) -> crate::Error {
    UserError::UserNotFound {
        key: id.to_string(),
    }
    .into()
}

fn is_uid_collision(err: &crate::Error) -> bool {
    matches!(err, crate::Error::Backend(backend_err)
        if backend_err.is_unique_violation() && backend_err.violates("system_uid"))
}

/// Column values an update writes. `None` leaves the column alone.
#[derive(Debug, Clone, Default)]
pub(crate) struct UserChanges {
    pub username: Option<String>,
    pub email: Option<String>,
    pub password_hash: Option<String>,
    pub is_admin: Option<bool>,
    pub is_active: Option<bool>,
    pub must_change_password: Option<bool>,
    /// `Some(None)` clears the key.
    pub ssh_public_key: Option<Option<String>>,
}

/// SQL access to the `users` table.
#[derive(Debug, Clone)]
pub struct UserStore {
    backend: Arc<SqlxBackend>,
}

impl UserStore {
    /// Wrap a backend whose schema has already been initialized.
    pub fn new(backend: Arc<SqlxBackend>) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &SqlxBackend {
        &self.backend
    }

    /// Insert a new account, allocating its uid in the same transaction.
    pub(crate) async fn insert(&self, user: PendingUser) -> Result<UserRecord> {
        for attempt in 1..=UID_ATTEMPTS {
            match self.try_insert(&user).await {
                Ok(record) => return Ok(record),
                Err(e) if is_uid_collision(&e) => {
                    debug!(attempt, username = %user.username, "uid taken concurrently, retrying");
                }
                Err(e) => return Err(map_conflict(e, &user.username, &user.email)),
            }
        }
        Err(UserError::UidExhausted {
            attempts: UID_ATTEMPTS,
        }
        .into())
    }

    async fn try_insert(&self, user: &PendingUser) -> Result<UserRecord> {
        let mut tx = self
            .backend
            .pool()
            .begin()
            .await
            .sql_context("Failed to begin transaction")?;

        let (current_max,): (Option<i64>,) = sqlx::query_as("SELECT MAX(system_uid) FROM users")
            .fetch_one(&mut *tx)
            .await
            .sql_context("Failed to read highest uid")?;
        let system_uid = next_uid(current_max);

        let (id,): (i64,) = sqlx::query_as(
            "INSERT INTO users (username, email, password_hash, is_admin, is_active,
                must_change_password, system_uid, system_gid, ssh_public_key, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
             RETURNING id",
        )
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(flag(user.is_admin))
        .bind(flag(user.is_active))
        .bind(flag(user.must_change_password))
        .bind(system_uid)
        .bind(user.system_gid)
        .bind(&user.ssh_public_key)
        .bind(&user.created_at)
        .fetch_one(&mut *tx)
        .await
        .sql_context("Failed to insert user")?;

        tx.commit().await.sql_context("Failed to commit user insert")?;
        trace!(id, system_uid, "user row inserted");

        Ok(UserRecord {
            id,
            username: user.username.clone(),
            email: user.email.clone(),
            password_hash: user.password_hash.clone(),
            is_admin: user.is_admin,
            is_active: user.is_active,
            must_change_password: user.must_change_password,
            system_uid,
            system_gid: user.system_gid,
            ssh_public_key: user.ssh_public_key.clone(),
            created_at: user.created_at.clone(),
        })
    }

    /// Write only the columns named in `changes`, returning the row as it now stands.
    ///
    /// One statement, so a concurrent writer touching other columns keeps its
    /// changes. `id`, `system_uid` and `created_at` are never rewritten.
    pub(crate) async fn apply(&self, id: i64, changes: &UserChanges) -> Result<UserRecord> {
        let columns = [
            ("username", changes.username.is_some()),
            ("email", changes.email.is_some()),
            ("password_hash", changes.password_hash.is_some()),
            ("is_admin", changes.is_admin.is_some()),
            ("is_active", changes.is_active.is_some()),
            ("must_change_password", changes.must_change_password.is_some()),
            ("ssh_public_key", changes.ssh_public_key.is_some()),
        ];
        let assignments: Vec<String> = columns
            .iter()
            .filter(|(_, present)| *present)
            .enumerate()
            .map(|(i, (column, _))| format!("{column} = ${}", i + 1))
            .collect();
        if assignments.is_empty() {
            return self.get(id).await?.ok_or_else(|| not_found(id));
        }

        let sql = format!(
            "UPDATE users SET {} WHERE id = ${} RETURNING {USER_COLUMNS}",
            assignments.join(", "),
            assignments.len() + 1
        );
        let mut query = sqlx::query_as::<_, UserRow>(&sql);
        if let Some(username) = &changes.username {
            query = query.bind(username);
        }
        if let Some(email) = &changes.email {
            query = query.bind(email);
        }
        if let Some(password_hash) = &changes.password_hash {
            query = query.bind(password_hash);
        }
        if let Some(is_admin) = changes.is_admin {
            query = query.bind(flag(is_admin));
        }
        if let Some(is_active) = changes.is_active {
            query = query.bind(flag(is_active));
        }
        if let Some(must_change_password) = changes.must_change_password {
            query = query.bind(flag(must_change_password));
        }
        if let Some(ssh_public_key) = &changes.ssh_public_key {
            query = query.bind(ssh_public_key);
        }

        let row = query
            .bind(id)
            .fetch_optional(self.backend.pool())
            .await
            .sql_context("Failed to update user")
            .map_err(|e| {
                map_conflict(
                    e,
                    changes.username.as_deref().unwrap_or_default(),
                    changes.email.as_deref().unwrap_or_default(),
                )
            })?;
        row.map(UserRecord::from).ok_or_else(|| not_found(id))
    }

    /// Store a relayed password hash and clear the must-change flag.
    ///
    /// Returns `None` when no account has that username.
    pub(crate) async fn set_relayed_password(
        &self,
        username: &str,
        password_hash: &str,
    ) -> Result<Option<UserRecord>> {
        let row: Option<UserRow> = sqlx::query_as(&format!(
            "UPDATE users SET password_hash = $1, must_change_password = 0
             WHERE username = $2 RETURNING {USER_COLUMNS}"
        ))
        .bind(password_hash)
        .bind(username)
        .fetch_optional(self.backend.pool())
        .await
        .sql_context("Failed to store relayed password")?;
        Ok(row.map(UserRecord::from))
    }

    /// Flip the admin flag in place.
    pub(crate) async fn toggle_admin(&self, id: i64) -> Result<UserRecord> {
        let row: Option<UserRow> = sqlx::query_as(&format!(
            "UPDATE users SET is_admin = 1 - is_admin WHERE id = $1 RETURNING {USER_COLUMNS}"
        ))
        .bind(id)
        .fetch_optional(self.backend.pool())
        .await
        .sql_context("Failed to toggle admin flag")?;
        row.map(UserRecord::from).ok_or_else(|| not_found(id))
    }

    /// Next snapshot version: `now`, or one past the last version handed out if
    /// the clock has not moved beyond it.
    ///
    /// The counter lives in the authority database so it survives restarts and
    /// never goes backwards when the wall clock does.
    pub async fn next_snapshot_version(&self, now: u64) -> Result<u64> {
        let now = i64::try_from(now).unwrap_or(i64::MAX);
        let (version,): (i64,) = sqlx::query_as(
            "UPDATE sync_state
             SET last_version = CASE WHEN last_version >= $1 THEN last_version + 1 ELSE $1 END
             WHERE id = 1
             RETURNING last_version",
        )
        .bind(now)
        .fetch_one(self.backend.pool())
        .await
        .sql_context("Failed to advance snapshot version")?;
        Ok(version.max(0) as u64)
    }

    /// Delete a row. Returns false when no row had that id.
    pub async fn delete(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(self.backend.pool())
            .await
            .sql_context("Failed to delete user")?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn get(&self, id: i64) -> Result<Option<UserRecord>> {
        let row: Option<UserRow> =
            sqlx::query_as(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
                .bind(id)
                .fetch_optional(self.backend.pool())
                .await
                .sql_context("Failed to get user")?;
        Ok(row.map(UserRecord::from))
    }

    pub async fn find_by_username(&self, username: &str) -> Result<Option<UserRecord>> {
        self.find_by_text("username", username).await
    }

    pub async fn find_by_email(&self, email: &str) -> Result<Option<UserRecord>> {
        self.find_by_text("email", email).await
    }

    async fn find_by_text(&self, column: &str, value: &str) -> Result<Option<UserRecord>> {
        let row: Option<UserRow> =
            sqlx::query_as(&format!("SELECT {USER_COLUMNS} FROM users WHERE {column} = $1"))
                .bind(value)
                .fetch_optional(self.backend.pool())
                .await
                .sql_context(&format!("Failed to get user by {column}"))?;
        Ok(row.map(UserRecord::from))
    }

    /// Every account, in id order. This is what a snapshot carries.
    pub async fn list_all(&self) -> Result<Vec<UserRecord>> {
        let rows: Vec<UserRow> =
            sqlx::query_as(&format!("SELECT {USER_COLUMNS} FROM users ORDER BY id"))
                .fetch_all(self.backend.pool())
                .await
                .sql_context("Failed to list users")?;
        Ok(rows.into_iter().map(UserRecord::from).collect())
    }

    /// One page of accounts, in id order.
    pub async fn list(&self, skip: i64, limit: i64) -> Result<Vec<UserRecord>> {
        let rows: Vec<UserRow> = sqlx::query_as(&format!(
            "SELECT {USER_COLUMNS} FROM users ORDER BY id LIMIT $1 OFFSET $2"
        ))
        .bind(limit)
        .bind(skip)
        .fetch_all(self.backend.pool())
        .await
        .sql_context("Failed to list users")?;
        Ok(rows.into_iter().map(UserRecord::from).collect())
    }

    /// One page of active accounts, in id order.
    pub async fn list_active(&self, skip: i64, limit: i64) -> Result<Vec<UserRecord>> {
        let rows: Vec<UserRow> = sqlx::query_as(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE is_active = 1 ORDER BY id LIMIT $1 OFFSET $2"
        ))
        .bind(limit)
        .bind(skip)
        .fetch_all(self.backend.pool())
        .await
        .sql_context("Failed to list active users")?;
        Ok(rows.into_iter().map(UserRecord::from).collect())
    }

    pub async fn list_admins(&self) -> Result<Vec<UserRecord>> {
        let rows: Vec<UserRow> = sqlx::query_as(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE is_admin = 1 ORDER BY id"
        ))
        .fetch_all(self.backend.pool())
        .await
        .sql_context("Failed to list admin users")?;
        Ok(rows.into_iter().map(UserRecord::from).collect())
    }

    pub async fn count(&self) -> Result<i64> {
        self.count_where("1 = 1").await
    }

    pub async fn count_active(&self) -> Result<i64> {
        self.count_where("is_active = 1").await
    }

    pub async fn count_admins(&self) -> Result<i64> {
        self.count_where("is_admin = 1").await
    }

    async fn count_where(&self, predicate: &str) -> Result<i64> {
        let (count,): (i64,) =
            sqlx::query_as(&format!("SELECT COUNT(*) FROM users WHERE {predicate}"))
                .fetch_one(self.backend.pool())
                .await
                .sql_context("Failed to count users")?;
        Ok(count)
    }
}
