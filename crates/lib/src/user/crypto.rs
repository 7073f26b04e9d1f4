//! Password hashing for directory accounts
//!
//! Hashes are Argon2id PHC strings. The authority is the only place a
//! plaintext password is hashed; edges receive and store the PHC string as-is.

use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core},
};

use zeroize::Zeroizing;

use super::errors::UserError;
use crate::Result;

/// Hash a password using Argon2id with a fresh random salt.
///
/// # Returns
/// The PHC-format hash string, salt included.
pub fn hash_password(password: impl AsRef<str>) -> Result<String> {
    let salt = SaltString::generate(&mut rand_core::OsRng);

    let password_hash = Argon2::default()
        .hash_password(password.as_ref().as_bytes(), &salt)
        .map_err(|e| UserError::PasswordHashing {
            reason: e.to_string(),
        })?
        .to_string();

    Ok(password_hash)
}

/// [`hash_password`] on tokio's blocking pool.
///
/// Argon2 takes tens of milliseconds of CPU per hash; running it inline would
/// stall every other task on the worker.
pub async fn hash_password_async(password: &str) -> Result<String> {
    let password = Zeroizing::new(password.to_string());
    tokio::task::spawn_blocking(move || hash_password(password.as_str()))
        .await
        .map_err(|e| UserError::PasswordHashing {
            reason: format!("hashing task failed: {e}"),
        })?
}

/// Verify a password against its hash
///
/// # Returns
/// Ok(()) if password is correct, Err otherwise
pub fn verify_password(password: impl AsRef<str>, password_hash: impl AsRef<str>) -> Result<()> {
    let parsed_hash = PasswordHash::new(password_hash.as_ref())
        .map_err(|_| UserError::PasswordVerificationFailed)?;

    Argon2::default()
        .verify_password(password.as_ref().as_bytes(), &parsed_hash)
        .map_err(|_| UserError::InvalidPassword.into())
}
