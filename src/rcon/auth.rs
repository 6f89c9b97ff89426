//! Per-call credential keys.
//!
//! Every command and subscription carries a key proving knowledge of the
//! password without sending it:
//!
//! ```text
//! key = hex(sha256(username + name + password + salt))
//! ```
//!
//! where `name` is the method for commands and the source for subscriptions.

use std::fmt;

use sha2::{Digest, Sha256};

/// Derive the lowercase hex key for one operation.
///
/// Deterministic and pure; always 64 characters.
pub fn derive_key(username: &str, name: &str, password: &str, salt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(username.as_bytes());
    hasher.update(name.as_bytes());
    hasher.update(password.as_bytes());
    hasher.update(salt.as_bytes());
    hex::encode(hasher.finalize())
}

/// Immutable account credentials, supplied once at client construction.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    pub salt: String,
}

impl Credentials {
    pub fn new(
        username: impl Into<String>,
        password: impl Into<String>,
        salt: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            salt: salt.into(),
        }
    }

    /// Key for a command method or subscription source.
    pub fn key_for(&self, name: &str) -> String {
        derive_key(&self.username, name, &self.password, &self.salt)
    }
}

// Keep secrets out of logs.
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("salt", &"<redacted>")
            .finish()
    }
}
