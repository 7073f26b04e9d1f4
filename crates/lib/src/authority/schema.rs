//! Authority database schema and migrations.
//!
//! The authority database holds the user directory and the edge registry.
//! Tables are created with `IF NOT EXISTS`, so [`initialize`] is safe to call
//! from every component that opens the database.
//!
//! # Migrations
//!
//! Migrations are code rather than SQL files so each step can branch on the
//! dialect. To add one:
//!
//! 1. Increment `SCHEMA_VERSION`
//! 2. Add a `migrate_vN_to_vM` async function
//! 3. Add it to the match in `run_migration`

use crate::Result;
use crate::backend::{BackendError, DbKind, SqlxBackend};

/// Current schema version.
pub const SCHEMA_VERSION: i64 = 2;

/// Single row (id = 1) holding the highest snapshot version handed out so far.
const SYNC_STATE_TABLE: &str = "CREATE TABLE IF NOT EXISTS sync_state (
    id BIGINT PRIMARY KEY,
    last_version BIGINT NOT NULL
)";

/// Primary key column that never hands out a deleted id again.
fn identity_column(kind: DbKind) -> &'static str {
    match kind {
        // AUTOINCREMENT keeps SQLite from reusing the rowid of a deleted max row.
        DbKind::Sqlite => "id INTEGER PRIMARY KEY AUTOINCREMENT",
        DbKind::Postgres => "id BIGINT GENERATED BY DEFAULT AS IDENTITY PRIMARY KEY",
    }
}

/// SQL statements to create the schema tables for the given dialect.
pub fn create_tables(kind: DbKind) -> Vec<String> {
    let id = identity_column(kind);
    vec![
        "CREATE TABLE IF NOT EXISTS schema_version (
            version BIGINT PRIMARY KEY
        )"
        .to_string(),
        format!(
            "CREATE TABLE IF NOT EXISTS users (
                {id},
                username TEXT NOT NULL UNIQUE,
                email TEXT NOT NULL UNIQUE,
                password_hash TEXT NOT NULL,
                is_admin BIGINT NOT NULL DEFAULT 0,
                is_active BIGINT NOT NULL DEFAULT 1,
                must_change_password BIGINT NOT NULL DEFAULT 0,
                system_uid BIGINT NOT NULL UNIQUE,
                system_gid BIGINT NOT NULL,
                ssh_public_key TEXT,
                created_at TEXT NOT NULL
            )"
        ),
        // liveness is 'online' or 'offline'; last_sync_* describe the latest push
        format!(
            "CREATE TABLE IF NOT EXISTS edges (
                {id},
                name TEXT NOT NULL,
                address TEXT NOT NULL UNIQUE,
                sync_port BIGINT NOT NULL,
                ssh_port BIGINT NOT NULL,
                ssh_user TEXT NOT NULL,
                liveness TEXT NOT NULL DEFAULT 'offline',
                registered_at TEXT NOT NULL,
                last_seen_at TEXT NOT NULL,
                last_sync_at TEXT,
                last_sync_ok BIGINT,
                last_sync_message TEXT
            )"
        ),
        SYNC_STATE_TABLE.to_string(),
    ]
}

/// SQL statements to create indexes.
pub const CREATE_INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_users_is_active ON users(is_active)",
    "CREATE INDEX IF NOT EXISTS idx_users_is_admin ON users(is_admin)",
    "CREATE INDEX IF NOT EXISTS idx_edges_liveness ON edges(liveness)",
];

/// Create tables and indexes if missing and bring the schema up to date.
pub async fn initialize(backend: &SqlxBackend) -> Result<()> {
    let pool = backend.pool();

    for statement in create_tables(backend.kind()) {
        sqlx::query(&statement)
            .execute(pool)
            .await
            .map_err(|e| BackendError::SqlxError {
                reason: format!("Schema creation failed: {e} - SQL: {statement}"),
                source: Some(e),
            })?;
    }

    let row: Option<(i64,)> = sqlx::query_as("SELECT version FROM schema_version")
        .fetch_optional(pool)
        .await
        .map_err(|e| BackendError::SqlxError {
            reason: format!("Failed to check schema version: {e}"),
            source: Some(e),
        })?;

    match row {
        None => {
            // ON CONFLICT keeps two components initializing at once from colliding
            sqlx::query(
                "INSERT INTO schema_version (version) VALUES ($1) ON CONFLICT (version) DO NOTHING",
            )
            .bind(SCHEMA_VERSION)
            .execute(pool)
            .await
            .map_err(|e| BackendError::SqlxError {
                reason: format!("Failed to initialize schema version: {e}"),
                source: Some(e),
            })?;
        }
        Some((current,)) if current < SCHEMA_VERSION => {
            migrate(backend, current, SCHEMA_VERSION).await?;
        }
        Some((current,)) if current > SCHEMA_VERSION => {
            return Err(BackendError::Schema {
                reason: format!(
                    "database schema v{current} is newer than this build understands (v{SCHEMA_VERSION})"
                ),
            }
            .into());
        }
        Some(_) => {}
    }

    sqlx::query("INSERT INTO sync_state (id, last_version) VALUES (1, 0) ON CONFLICT (id) DO NOTHING")
        .execute(pool)
        .await
        .map_err(|e| BackendError::SqlxError {
            reason: format!("Failed to seed sync state: {e}"),
            source: Some(e),
        })?;

    for statement in CREATE_INDEXES {
        sqlx::query(statement)
            .execute(pool)
            .await
            .map_err(|e| BackendError::SqlxError {
                reason: format!("Index creation failed: {e} - SQL: {statement}"),
                source: Some(e),
            })?;
    }

    Ok(())
}

/// Run migrations one version at a time, recording progress after each step.
async fn migrate(backend: &SqlxBackend, from: i64, to: i64) -> Result<()> {
    tracing::info!(from, to, "Starting authority schema migration");

    let mut current = from;
    while current < to {
        let next = current + 1;
        run_migration(backend, current, next).await?;

        sqlx::query("UPDATE schema_version SET version = $1")
            .bind(next)
            .execute(backend.pool())
            .await
            .map_err(|e| BackendError::SqlxError {
                reason: format!("Failed to update schema version to {next}: {e}"),
                source: Some(e),
            })?;

        tracing::info!(version = next, "Migration completed");
        current = next;
    }

    Ok(())
}

/// Execute a single migration step.
async fn run_migration(backend: &SqlxBackend, from: i64, to: i64) -> Result<()> {
    match (from, to) {
        (1, 2) => migrate_v1_to_v2(backend).await,
        _ => Err(BackendError::Schema {
            reason: format!("Unknown migration path: v{from} to v{to}"),
        }
        .into()),
    }
}

/// v2 adds `sync_state`; [`initialize`] seeds its row afterwards.
async fn migrate_v1_to_v2(backend: &SqlxBackend) -> Result<()> {
    sqlx::query(SYNC_STATE_TABLE)
        .execute(backend.pool())
        .await
        .map_err(|e| BackendError::SqlxError {
            reason: format!("Failed to create sync_state: {e}"),
            source: Some(e),
        })?;
    Ok(())
}
