//! Storage error types for the edgedir backend.

use thiserror::Error;

/// Errors that can occur while talking to the SQL store.
///
/// # Stability
///
/// - New variants may be added in minor versions (enum is `#[non_exhaustive]`)
/// - Helper methods like `is_*()` provide stable APIs
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum BackendError {
    /// A sqlx operation failed.
    #[error("SQL error: {reason}")]
    SqlxError {
        /// What was being attempted, plus the driver message
        reason: String,
        /// The underlying sqlx error, when there is one
        #[source]
        source: Option<sqlx::Error>,
    },

    /// The connection URL names a database this build cannot open.
    #[error("Unsupported database URL scheme: {scheme}")]
    UnsupportedUrl {
        /// Scheme portion of the rejected URL
        scheme: String,
    },

    /// Schema creation or migration failed.
    #[error("Schema error: {reason}")]
    Schema {
        /// Description of the failure
        reason: String,
    },
}

impl BackendError {
    fn database_error(&self) -> Option<&(dyn sqlx::error::DatabaseError + 'static)> {
        match self {
            BackendError::SqlxError {
                source: Some(sqlx::Error::Database(db)),
                ..
            } => Some(db.as_ref()),
            _ => None,
        }
    }

    /// Check if a UNIQUE constraint rejected the statement.
    pub fn is_unique_violation(&self) -> bool {
        self.database_error()
            .is_some_and(|db| db.is_unique_violation())
    }

    /// Check if the statement was rejected by a constraint touching `column`.
    ///
    /// SQLite reports `UNIQUE constraint failed: users.email`, PostgreSQL reports
    /// the constraint name (`users_email_key`); both mention the column.
    pub fn violates(&self, column: &str) -> bool {
        self.database_error().is_some_and(|db| {
            db.message().contains(column)
                || db.constraint().is_some_and(|name| name.contains(column))
        })
    }

    /// Check if the store could not be reached at all.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            BackendError::SqlxError {
                source: Some(
                    sqlx::Error::Io(_)
                        | sqlx::Error::Tls(_)
                        | sqlx::Error::PoolTimedOut
                        | sqlx::Error::PoolClosed
                        | sqlx::Error::WorkerCrashed
                ),
                ..
            }
        )
    }

    /// Check if this error came from schema setup.
    pub fn is_schema_error(&self) -> bool {
        matches!(self, BackendError::Schema { .. })
    }
}

impl From<BackendError> for crate::Error {
    fn from(err: BackendError) -> Self {
        crate::Error::Backend(err)
    }
}
