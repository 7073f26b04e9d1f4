//! Edge registry
//!
//! Tracks every edge the authority knows about and whether it is currently
//! online. The dispatcher pushes only to edges this registry reports online;
//! it never checks reachability itself.
//!
//! Liveness changes through three doors:
//! - [`EdgeRegistry::register`]: an edge announcing itself (upsert keyed by address, marks it online)
//! - [`EdgeRegistry::set_liveness`] / [`EdgeRegistry::set_liveness_by_address`]: telemetry
//!   connect/disconnect signals and operator overrides
//! - nothing else; a failed push is recorded in `last_sync` but does not flip liveness

pub mod errors;
pub mod types;

use std::sync::Arc;

use tracing::{debug, info};

use crate::backend::{SqlxBackend, SqlxResultExt};
use crate::constants::{DEFAULT_EDGE_PORT, DEFAULT_SSH_PORT};
use crate::{Clock, Result, authority::schema};

pub use errors::RegistryError;
pub use types::{EdgeDescriptor, EdgeRegistration, Liveness, SyncOutcome};

const EDGE_COLUMNS: &str = "id, name, address, sync_port, ssh_port, ssh_user, liveness, \
     registered_at, last_seen_at, last_sync_at, last_sync_ok, last_sync_message";

type EdgeRow = (
    i64,
    String,
    String,
    i64,
    i64,
    String,
    String,
    String,
    String,
    Option<String>,
    Option<i64>,
    Option<String>,
);

fn descriptor_from_row(row: EdgeRow) -> Result<EdgeDescriptor> {
    let (
        id,
        name,
        address,
        sync_port,
        ssh_port,
        ssh_user,
        liveness,
        registered_at,
        last_seen_at,
        last_sync_at,
        last_sync_ok,
        last_sync_message,
    ) = row;

    let last_sync = match (last_sync_at, last_sync_ok) {
        (Some(at), Some(ok)) => Some(SyncOutcome {
            at,
            success: ok != 0,
            message: last_sync_message.unwrap_or_default(),
        }),
        _ => None,
    };

    Ok(EdgeDescriptor {
        id,
        name,
        address,
        sync_port: u16::try_from(sync_port).unwrap_or(DEFAULT_EDGE_PORT),
        ssh_port: u16::try_from(ssh_port).unwrap_or(DEFAULT_SSH_PORT),
        ssh_user,
        liveness: liveness.parse()?,
        registered_at,
        last_seen_at,
        last_sync,
    })
}

/// Persistent registry of edges, stored in the authority database.
#[derive(Debug, Clone)]
pub struct EdgeRegistry {
    backend: Arc<SqlxBackend>,
    clock: Arc<dyn Clock>,
}

impl EdgeRegistry {
    /// Open the registry, creating its tables if needed.
    pub async fn open(backend: Arc<SqlxBackend>, clock: Arc<dyn Clock>) -> Result<Self> {
        schema::initialize(&backend).await?;
        Ok(Self { backend, clock })
    }

    /// Register an edge, or refresh an existing registration with the same address.
    ///
    /// Either way the edge comes back online. The returned descriptor carries
    /// the id assigned on first registration.
    pub async fn register(&self, registration: &EdgeRegistration) -> Result<EdgeDescriptor> {
        if registration.name.trim().is_empty() {
            return Err(RegistryError::InvalidRegistration {
                reason: "name must not be empty".to_string(),
            }
            .into());
        }
        if registration.address.trim().is_empty() {
            return Err(RegistryError::InvalidRegistration {
                reason: "address must not be empty".to_string(),
            }
            .into());
        }

        let now = self.clock.now_rfc3339();
        let (id,): (i64,) = sqlx::query_as(
            "INSERT INTO edges (name, address, sync_port, ssh_port, ssh_user, liveness, registered_at, last_seen_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $7)
             ON CONFLICT (address) DO UPDATE SET
                name = excluded.name,
                sync_port = excluded.sync_port,
                ssh_port = excluded.ssh_port,
                ssh_user = excluded.ssh_user,
                liveness = excluded.liveness,
                last_seen_at = excluded.last_seen_at
             RETURNING id",
        )
        .bind(&registration.name)
        .bind(&registration.address)
        .bind(i64::from(registration.sync_port))
        .bind(i64::from(registration.ssh_port))
        .bind(&registration.ssh_user)
        .bind(Liveness::Online.as_str())
        .bind(&now)
        .fetch_one(self.backend.pool())
        .await
        .sql_context("Failed to register edge")?;

        info!(edge_id = id, name = %registration.name, address = %registration.address, "Edge registered");
        self.get(id).await
    }

    /// Mark an edge online or offline.
    pub async fn set_liveness(&self, id: i64, liveness: Liveness) -> Result<EdgeDescriptor> {
        let result =
            sqlx::query("UPDATE edges SET liveness = $1, last_seen_at = $2 WHERE id = $3")
                .bind(liveness.as_str())
                .bind(self.clock.now_rfc3339())
                .bind(id)
                .execute(self.backend.pool())
                .await
                .sql_context("Failed to update edge liveness")?;

        if result.rows_affected() == 0 {
            return Err(RegistryError::EdgeNotFound {
                key: id.to_string(),
            }
            .into());
        }
        debug!(edge_id = id, %liveness, "Edge liveness changed");
        self.get(id).await
    }

    /// Mark the edge at `address` online or offline.
    pub async fn set_liveness_by_address(
        &self,
        address: &str,
        liveness: Liveness,
    ) -> Result<EdgeDescriptor> {
        let edge = self.get_by_address(address).await?;
        self.set_liveness(edge.id, liveness).await
    }

    /// Get an edge by id.
    pub async fn get(&self, id: i64) -> Result<EdgeDescriptor> {
        let row: Option<EdgeRow> =
            sqlx::query_as(&format!("SELECT {EDGE_COLUMNS} FROM edges WHERE id = $1"))
                .bind(id)
                .fetch_optional(self.backend.pool())
                .await
                .sql_context("Failed to get edge")?;

        match row {
            Some(row) => descriptor_from_row(row),
            None => Err(RegistryError::EdgeNotFound {
                key: id.to_string(),
            }
            .into()),
        }
    }

    /// Get an edge by the address it registered with.
    pub async fn get_by_address(&self, address: &str) -> Result<EdgeDescriptor> {
        let row: Option<EdgeRow> =
            sqlx::query_as(&format!("SELECT {EDGE_COLUMNS} FROM edges WHERE address = $1"))
                .bind(address)
                .fetch_optional(self.backend.pool())
                .await
                .sql_context("Failed to get edge by address")?;

        match row {
            Some(row) => descriptor_from_row(row),
            None => Err(RegistryError::EdgeNotFound {
                key: address.to_string(),
            }
            .into()),
        }
    }

    /// All registered edges, in id order.
    pub async fn list(&self) -> Result<Vec<EdgeDescriptor>> {
        let rows: Vec<EdgeRow> =
            sqlx::query_as(&format!("SELECT {EDGE_COLUMNS} FROM edges ORDER BY id"))
                .fetch_all(self.backend.pool())
                .await
                .sql_context("Failed to list edges")?;
        rows.into_iter().map(descriptor_from_row).collect()
    }

    /// Edges currently marked online, in id order.
    pub async fn list_online(&self) -> Result<Vec<EdgeDescriptor>> {
        let rows: Vec<EdgeRow> = sqlx::query_as(&format!(
            "SELECT {EDGE_COLUMNS} FROM edges WHERE liveness = $1 ORDER BY id"
        ))
        .bind(Liveness::Online.as_str())
        .fetch_all(self.backend.pool())
        .await
        .sql_context("Failed to list online edges")?;
        rows.into_iter().map(descriptor_from_row).collect()
    }

    /// Remember how the latest push to an edge went.
    pub async fn record_sync_outcome(&self, id: i64, outcome: &SyncOutcome) -> Result<()> {
        let result = sqlx::query(
            "UPDATE edges SET last_sync_at = $1, last_sync_ok = $2, last_sync_message = $3 WHERE id = $4",
        )
        .bind(&outcome.at)
        .bind(i64::from(outcome.success))
        .bind(&outcome.message)
        .bind(id)
        .execute(self.backend.pool())
        .await
        .sql_context("Failed to record sync outcome")?;

        if result.rows_affected() == 0 {
            return Err(RegistryError::EdgeNotFound {
                key: id.to_string(),
            }
            .into());
        }
        Ok(())
    }

    /// Forget an edge entirely.
    pub async fn remove(&self, id: i64) -> Result<()> {
        let result = sqlx::query("DELETE FROM edges WHERE id = $1")
            .bind(id)
            .execute(self.backend.pool())
            .await
            .sql_context("Failed to remove edge")?;

        if result.rows_affected() == 0 {
            return Err(RegistryError::EdgeNotFound {
                key: id.to_string(),
            }
            .into());
        }
        info!(edge_id = id, "Edge removed");
        Ok(())
    }
}
