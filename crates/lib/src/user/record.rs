//! Account records as stored by the authority and mirrored on every edge.

use std::fmt;

use serde::{Deserialize, Serialize};

/// One account in the directory.
///
/// This is also the wire format of a snapshot push: the body is a JSON array
/// of these, in id order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    /// Assigned once by the authority, never reused.
    pub id: i64,
    pub username: String,
    pub email: String,
    /// Argon2id PHC string. Edges store it verbatim.
    pub password_hash: String,
    pub is_admin: bool,
    pub is_active: bool,
    pub must_change_password: bool,
    pub system_uid: i64,
    pub system_gid: i64,
    #[serde(default)]
    pub ssh_public_key: Option<String>,
    /// RFC 3339 creation timestamp.
    pub created_at: String,
}

/// Column order shared by every `SELECT` of a user row, on both sides.
pub(crate) const USER_COLUMNS: &str = "id, username, email, password_hash, is_admin, is_active, \
     must_change_password, system_uid, system_gid, ssh_public_key, created_at";

/// Raw row shape for [`USER_COLUMNS`]. Flags are `BIGINT` 0/1 in storage.
pub(crate) type UserRow = (
    i64,
    String,
    String,
    String,
    i64,
    i64,
    i64,
    i64,
    i64,
    Option<String>,
    String,
);

impl From<UserRow> for UserRecord {
    fn from(row: UserRow) -> Self {
        let (
            id,
            username,
            email,
            password_hash,
            is_admin,
            is_active,
            must_change_password,
            system_uid,
            system_gid,
            ssh_public_key,
            created_at,
        ) = row;
        Self {
            id,
            username,
            email,
            password_hash,
            is_admin: is_admin != 0,
            is_active: is_active != 0,
            must_change_password: must_change_password != 0,
            system_uid,
            system_gid,
            ssh_public_key,
            created_at,
        }
    }
}

/// Store a flag the way every table expects it.
pub(crate) fn flag(value: bool) -> i64 {
    i64::from(value)
}

/// Input for creating an account. The password is plaintext and is hashed
/// before it reaches storage.
#[derive(Clone, Default)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password: String,
    pub is_admin: bool,
    pub must_change_password: bool,
    pub ssh_public_key: Option<String>,
    /// Falls back to the directory default group when unset.
    pub system_gid: Option<i64>,
}

impl NewUser {
    /// Active, non-admin account with the default group.
    pub fn new(
        username: impl Into<String>,
        email: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into(),
            email: email.into(),
            password: password.into(),
            ..Default::default()
        }
    }
}

impl fmt::Debug for NewUser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NewUser")
            .field("username", &self.username)
            .field("email", &self.email)
            .field("is_admin", &self.is_admin)
            .field("must_change_password", &self.must_change_password)
            .field("system_gid", &self.system_gid)
            .finish_non_exhaustive()
    }
}

/// Partial update. `None` leaves a field untouched.
#[derive(Clone, Default)]
pub struct UserUpdate {
    pub username: Option<String>,
    pub email: Option<String>,
    /// Plaintext; hashed before storage.
    pub password: Option<String>,
    pub is_admin: Option<bool>,
    pub is_active: Option<bool>,
    pub must_change_password: Option<bool>,
    /// `Some(None)` clears the key.
    pub ssh_public_key: Option<Option<String>>,
}

impl UserUpdate {
    /// True when applying this update would change nothing.
    pub fn is_empty(&self) -> bool {
        self.username.is_none()
            && self.email.is_none()
            && self.password.is_none()
            && self.is_admin.is_none()
            && self.is_active.is_none()
            && self.must_change_password.is_none()
            && self.ssh_public_key.is_none()
    }
}

impl fmt::Debug for UserUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserUpdate")
            .field("username", &self.username)
            .field("email", &self.email)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("is_admin", &self.is_admin)
            .field("is_active", &self.is_active)
            .field("must_change_password", &self.must_change_password)
            .field("ssh_public_key", &self.ssh_public_key)
            .finish()
    }
}
