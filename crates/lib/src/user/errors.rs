//! Error types for the user directory
use thiserror::Error;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum UserError {
    /// No account matches the id, username, or email that was looked up.
    #[error("User not found: {key}")]
    UserNotFound { key: String },

    #[error("Username already exists: {username}")]
    UsernameTaken { username: String },

    #[error("Email already registered: {email}")]
    EmailTaken { email: String },

    /// Username fails `^[a-z_][a-z0-9_-]*$` or the length limit.
    #[error("Invalid username '{username}': {reason}")]
    InvalidUsername { username: String, reason: String },

    #[error("Invalid email '{email}'")]
    InvalidEmail { email: String },

    #[error("Password hashing failed: {reason}")]
    PasswordHashing { reason: String },

    #[error("Password must not be empty")]
    EmptyPassword,

    #[error("Invalid password")]
    InvalidPassword,

    #[error("Password verification failed")]
    PasswordVerificationFailed,

    /// Concurrent creates kept colliding on the next uid.
    #[error("Could not allocate a system uid after {attempts} attempts")]
    UidExhausted { attempts: u32 },

    /// Bulk import input could not be parsed at all.
    #[error("Invalid import file: {reason}")]
    InvalidImport { reason: String },
}

impl UserError {
    /// Check if this error indicates a resource was not found.
    pub fn is_not_found(&self) -> bool {
        matches!(self, UserError::UserNotFound { .. })
    }

    /// Check if this error indicates a uniqueness conflict.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            UserError::UsernameTaken { .. } | UserError::EmailTaken { .. }
        )
    }

    /// Check if the caller supplied malformed input.
    pub fn is_validation_error(&self) -> bool {
        matches!(
            self,
            UserError::InvalidUsername { .. }
                | UserError::InvalidEmail { .. }
                | UserError::EmptyPassword
                | UserError::InvalidImport { .. }
        )
    }

    /// Check if a password was rejected.
    pub fn is_authentication_error(&self) -> bool {
        matches!(
            self,
            UserError::InvalidPassword | UserError::PasswordVerificationFailed
        )
    }
}

impl From<UserError> for crate::Error {
    fn from(err: UserError) -> Self {
        crate::Error::User(err)
    }
}
