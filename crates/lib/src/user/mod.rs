//! User directory model
//!
//! Account records, the login-name grammar, and password hashing shared by
//! the authority and the edge mirror.

pub mod crypto;
pub mod errors;
pub mod record;
pub mod username;

pub use errors::UserError;
pub use record::{NewUser, UserRecord, UserUpdate};
pub use username::{is_valid_username, normalize_username, validate_username};
