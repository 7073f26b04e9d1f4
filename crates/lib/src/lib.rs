//!
//! edgedir: one authoritative user directory, many converged edge mirrors.
//!
//! The library carries both halves of the system so that a single binary can
//! run either role.
//!
//! ## Core Concepts
//!
//! * **Authority (`authority::Authority`)**: The system of record for user accounts. Every
//!   committed mutation schedules a sync cycle through a [`sync::SyncScheduler`].
//! * **Edge Registry (`registry::EdgeRegistry`)**: Known edges and their online/offline liveness.
//!   The dispatcher trusts it exclusively when choosing push targets.
//! * **Dispatcher (`sync::Dispatcher`)**: Captures a full [`sync::SyncSnapshot`] and pushes it to every
//!   online edge concurrently, each push bounded by its own timeout.
//! * **Reconciler (`edge::Reconciler`)**: Edge-resident. Diffs a received snapshot against the local
//!   mirror, applies create/update/delete in one transaction, then regenerates the OS
//!   authentication artifacts.
//! * **Password relay (`edge::AuthorityClient`)**: Feeds credential changes made on an edge back to the
//!   authority, which fans them out again on the next cycle.
//!
//! Every push carries the complete directory, so duplicate, reordered, or retried deliveries
//! all converge to the same mirror.

pub mod authority;
pub mod backend;
pub mod clock;
pub mod constants;
pub mod edge;
pub mod registry;
pub mod server;
pub mod sync;
pub mod user;

pub use clock::{Clock, SystemClock};

#[cfg(any(test, feature = "testing"))]
pub use clock::FixedClock;

/// Result type used throughout the edgedir library.
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for the edgedir library.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Structured storage errors from the backend module
    #[error(transparent)]
    Backend(backend::BackendError),

    /// Structured user directory errors from the user module
    #[error(transparent)]
    User(user::UserError),

    /// Structured edge registry errors from the registry module
    #[error(transparent)]
    Registry(registry::RegistryError),

    /// Structured synchronization errors from the sync module
    #[error(transparent)]
    Sync(sync::SyncError),
}

impl Error {
    /// Get the originating module for this error.
    pub fn module(&self) -> &'static str {
        match self {
            Error::Backend(_) => "backend",
            Error::User(_) => "user",
            Error::Registry(_) => "registry",
            Error::Sync(_) => "sync",
            Error::Io(_) => "io",
            Error::Serialize(_) => "serialize",
        }
    }

    /// Check if this error indicates a resource was not found.
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::User(user_err) => user_err.is_not_found(),
            Error::Registry(registry_err) => registry_err.is_not_found(),
            Error::Sync(sync_err) => sync_err.is_not_found(),
            _ => false,
        }
    }

    /// Check if this error indicates a conflict (already exists).
    pub fn is_conflict(&self) -> bool {
        match self {
            Error::User(user_err) => user_err.is_conflict(),
            Error::Backend(backend_err) => backend_err.is_unique_violation(),
            _ => false,
        }
    }

    /// Check if this error is validation-related.
    pub fn is_validation_error(&self) -> bool {
        match self {
            Error::User(user_err) => user_err.is_validation_error(),
            Error::Registry(registry_err) => registry_err.is_validation_error(),
            _ => false,
        }
    }

    /// Check if this error is database/backend-related.
    pub fn is_database_error(&self) -> bool {
        matches!(self, Error::Backend(_))
    }

    /// Check if this error means the store could not be reached at all.
    pub fn is_connection_error(&self) -> bool {
        match self {
            Error::Backend(backend_err) => backend_err.is_connection_error(),
            Error::Io(_) => true,
            _ => false,
        }
    }

    /// Check if this error indicates a timeout.
    pub fn is_timeout_error(&self) -> bool {
        match self {
            Error::Sync(sync_err) => sync_err.is_timeout(),
            _ => false,
        }
    }

    /// Check if this error can be skipped without failing the surrounding operation.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Error::Sync(sync_err) => sync_err.is_recoverable(),
            _ => false,
        }
    }
}
