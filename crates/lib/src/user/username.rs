//! POSIX login-name grammar.
//!
//! Accepted names match `^[a-z_][a-z0-9_-]*$` and are at most
//! [`USERNAME_MAX_LEN`] bytes long.

use super::errors::UserError;
use crate::Result;
use crate::constants::USERNAME_MAX_LEN;

fn is_lead_char(c: char) -> bool {
    c.is_ascii_lowercase() || c == '_'
}

fn is_body_char(c: char) -> bool {
    c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-'
}

/// Check a username against the grammar without building an error.
pub fn is_valid_username(username: &str) -> bool {
    let mut chars = username.chars();
    match chars.next() {
        Some(first) if is_lead_char(first) => {}
        _ => return false,
    }
    username.len() <= USERNAME_MAX_LEN && chars.all(is_body_char)
}

/// Validate a username, explaining what is wrong with it.
pub fn validate_username(username: &str) -> Result<()> {
    let reason = if username.is_empty() {
        "must not be empty".to_string()
    } else if username.len() > USERNAME_MAX_LEN {
        format!("must be at most {USERNAME_MAX_LEN} characters")
    } else if !username.chars().next().is_some_and(is_lead_char) {
        "must start with a lowercase letter or underscore".to_string()
    } else if !username.chars().all(is_body_char) {
        "may only contain lowercase letters, digits, underscores, and hyphens".to_string()
    } else {
        return Ok(());
    };

    Err(UserError::InvalidUsername {
        username: username.to_string(),
        reason,
    }
    .into())
}

/// Coerce a free-form name into something the grammar is likely to accept.
///
/// Lowercases and trims, replaces every disallowed character with `_`, and
/// prefixes `_` when the result does not start with a letter or underscore.
/// The output is not guaranteed valid (it may be empty or too long), so
/// callers still run [`validate_username`].
pub fn normalize_username(raw: &str) -> String {
    let mut name: String = raw
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| if is_body_char(c) { c } else { '_' })
        .collect();

    if name.chars().next().is_some_and(|c| !is_lead_char(c)) {
        name.insert(0, '_');
    }
    name
}
