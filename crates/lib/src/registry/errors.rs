//! Error types for the edge registry.

use thiserror::Error;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RegistryError {
    /// No edge with this id or address is registered.
    #[error("Edge not found: {key}")]
    EdgeNotFound { key: String },

    /// A stored liveness value is neither `online` nor `offline`.
    #[error("Invalid liveness value: {value}")]
    InvalidLiveness { value: String },

    /// Registration with an empty name or address.
    #[error("Invalid edge registration: {reason}")]
    InvalidRegistration { reason: String },
}

impl RegistryError {
    /// Check if this error indicates a resource was not found.
    pub fn is_not_found(&self) -> bool {
        matches!(self, RegistryError::EdgeNotFound { .. })
    }

    /// Check if the caller supplied malformed input.
    pub fn is_validation_error(&self) -> bool {
        matches!(
            self,
            RegistryError::InvalidLiveness { .. } | RegistryError::InvalidRegistration { .. }
        )
    }
}

impl From<RegistryError> for crate::Error {
    fn from(err: RegistryError) -> Self {
        crate::Error::Registry(err)
    }
}
