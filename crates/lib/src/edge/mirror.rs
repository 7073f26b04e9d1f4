//! The edge-local replica of the user directory.
//!
//! Only the reconciler writes here. Ids, uids and timestamps are copied from
//! the authority verbatim, so the table has no identity column of its own.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use sqlx::AnyConnection;

use crate::Result;
use crate::backend::{DbKind, SqlxBackend, SqlxResultExt};
use crate::user::record::{USER_COLUMNS, UserRecord, UserRow, flag};

/// CHECK expression enforcing the login-name grammar in each dialect.
fn username_check(kind: DbKind) -> &'static str {
    match kind {
        DbKind::Sqlite => {
            "length(username) BETWEEN 1 AND 32 \
             AND substr(username, 1, 1) GLOB '[a-z_]' \
             AND username NOT GLOB '*[^a-z0-9_-]*'"
        }
        DbKind::Postgres => "username ~ '^[a-z_][a-z0-9_-]{0,31}$'",
    }
}

/// Statements that create the mirror table and its indexes if absent.
pub fn create_statements(kind: DbKind) -> Vec<String> {
    vec![
        format!(
            "CREATE TABLE IF NOT EXISTS users (
                id BIGINT PRIMARY KEY,
                username TEXT NOT NULL UNIQUE,
                email TEXT NOT NULL UNIQUE,
                password_hash TEXT NOT NULL,
                is_admin BIGINT NOT NULL DEFAULT 0,
                is_active BIGINT NOT NULL DEFAULT 1,
                must_change_password BIGINT NOT NULL DEFAULT 0,
                system_uid BIGINT NOT NULL UNIQUE,
                system_gid BIGINT NOT NULL,
                ssh_public_key TEXT,
                created_at TEXT NOT NULL,
                CONSTRAINT valid_username CHECK ({})
            )",
            username_check(kind)
        ),
        "CREATE INDEX IF NOT EXISTS idx_mirror_users_is_active ON users(is_active)".to_string(),
    ]
}

/// The two unique login columns of a mirrored row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Login {
    pub username: String,
    pub email: String,
}

impl Login {
    pub fn of(user: &UserRecord) -> Self {
        Self {
            username: user.username.clone(),
            email: user.email.clone(),
        }
    }

    /// Unique stand-in held while rows trade usernames or emails.
    pub fn placeholder(id: i64) -> Self {
        Self {
            username: format!("_edgedir_tmp_{id}"),
            email: format!("_edgedir_tmp_{id}@invalid"),
        }
    }
}

/// Handle on the mirror table.
#[derive(Debug, Clone)]
pub struct Mirror {
    backend: Arc<SqlxBackend>,
}

impl Mirror {
    /// Open the mirror, creating its table if needed.
    pub async fn open(backend: Arc<SqlxBackend>) -> Result<Self> {
        let mirror = Self { backend };
        mirror.ensure_schema().await?;
        Ok(mirror)
    }

    pub fn backend(&self) -> &SqlxBackend {
        &self.backend
    }

    /// Idempotent create-if-absent of the table, its indexes and the username check.
    pub async fn ensure_schema(&self) -> Result<()> {
        for statement in create_statements(self.backend.kind()) {
            sqlx::query(&statement)
                .execute(self.backend.pool())
                .await
                .sql_context("Failed to create mirror schema")?;
        }
        Ok(())
    }

    /// Every mirrored id.
    pub async fn ids(&self) -> Result<BTreeSet<i64>> {
        let rows: Vec<(i64,)> = sqlx::query_as("SELECT id FROM users")
            .fetch_all(self.backend.pool())
            .await
            .sql_context("Failed to read mirror ids")?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    /// Every mirrored row, in id order.
    pub async fn all(&self) -> Result<Vec<UserRecord>> {
        let rows: Vec<UserRow> =
            sqlx::query_as(&format!("SELECT {USER_COLUMNS} FROM users ORDER BY id"))
                .fetch_all(self.backend.pool())
                .await
                .sql_context("Failed to read mirror")?;
        Ok(rows.into_iter().map(UserRecord::from).collect())
    }

    pub async fn get(&self, id: i64) -> Result<Option<UserRecord>> {
        let row: Option<UserRow> =
            sqlx::query_as(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
                .bind(id)
                .fetch_optional(self.backend.pool())
                .await
                .sql_context("Failed to read mirror row")?;
        Ok(row.map(UserRecord::from))
    }

    pub async fn get_by_username(&self, username: &str) -> Result<Option<UserRecord>> {
        let row: Option<UserRow> =
            sqlx::query_as(&format!("SELECT {USER_COLUMNS} FROM users WHERE username = $1"))
                .bind(username)
                .fetch_optional(self.backend.pool())
                .await
                .sql_context("Failed to read mirror row")?;
        Ok(row.map(UserRecord::from))
    }

    pub async fn count(&self) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users")
            .fetch_one(self.backend.pool())
            .await
            .sql_context("Failed to count mirror rows")?;
        Ok(count)
    }

    /// Username and email of every row visible on `conn`, keyed by id.
    ///
    /// Read inside the reconciliation transaction.
    pub(crate) async fn logins_on(conn: &mut AnyConnection) -> Result<BTreeMap<i64, Login>> {
        let rows: Vec<(i64, String, String)> =
            sqlx::query_as("SELECT id, username, email FROM users")
                .fetch_all(&mut *conn)
                .await
                .sql_context("Failed to read mirror logins")?;
        Ok(rows
            .into_iter()
            .map(|(id, username, email)| (id, Login { username, email }))
            .collect())
    }

    /// Change only the unique login columns of a row.
    pub(crate) async fn rename_row(
        conn: &mut AnyConnection,
        id: i64,
        login: &Login,
    ) -> Result<()> {
        sqlx::query("UPDATE users SET username = $1, email = $2 WHERE id = $3")
            .bind(&login.username)
            .bind(&login.email)
            .bind(id)
            .execute(&mut *conn)
            .await
            .sql_context("Failed to rename mirror row")?;
        Ok(())
    }

    pub(crate) async fn insert_row(conn: &mut AnyConnection, user: &UserRecord) -> Result<()> {
        sqlx::query(&format!(
            "INSERT INTO users ({USER_COLUMNS})
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)"
        ))
        .bind(user.id)
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(flag(user.is_admin))
        .bind(flag(user.is_active))
        .bind(flag(user.must_change_password))
        .bind(user.system_uid)
        .bind(user.system_gid)
        .bind(&user.ssh_public_key)
        .bind(&user.created_at)
        .execute(&mut *conn)
        .await
        .sql_context("Failed to insert mirror row")?;
        Ok(())
    }

    /// Overwrite every column of the row with the same id.
    pub(crate) async fn update_row(conn: &mut AnyConnection, user: &UserRecord) -> Result<()> {
        sqlx::query(
            "UPDATE users SET username = $1, email = $2, password_hash = $3, is_admin = $4,
                is_active = $5, must_change_password = $6, system_uid = $7, system_gid = $8,
                ssh_public_key = $9, created_at = $10
             WHERE id = $11",
        )
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(flag(user.is_admin))
        .bind(flag(user.is_active))
        .bind(flag(user.must_change_password))
        .bind(user.system_uid)
        .bind(user.system_gid)
        .bind(&user.ssh_public_key)
        .bind(&user.created_at)
        .bind(user.id)
        .execute(&mut *conn)
        .await
        .sql_context("Failed to update mirror row")?;
        Ok(())
    }

    pub(crate) async fn delete_row(conn: &mut AnyConnection, id: i64) -> Result<()> {
        sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&mut *conn)
            .await
            .sql_context("Failed to delete mirror row")?;
        Ok(())
    }
}
