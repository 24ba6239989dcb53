//! Secret-carrying types used throughout Lockbox.

use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// A user-supplied backup passphrase.
///
/// The buffer is owned by the caller and scrubbed when dropped. Key
/// providers only ever borrow it.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct Passphrase(Vec<u8>);

impl Passphrase {
    /// Take ownership of a passphrase buffer.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Take ownership of a passphrase string without copying it.
    pub fn from_string(passphrase: String) -> Self {
        Self(passphrase.into_bytes())
    }

    /// Get the passphrase bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for Passphrase {
    fn from(value: &str) -> Self {
        Self(value.as_bytes().to_vec())
    }
}

impl fmt::Debug for Passphrase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Passphrase([REDACTED])")
    }
}

/// A bearer access token handed out by the token lifecycle.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct AccessToken(String);

impl AccessToken {
    /// Wrap a raw token.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Get the raw token.
    ///
    /// # Security
    /// The returned slice should be used immediately and not stored.
    pub fn secret(&self) -> &str {
        &self.0
    }

    /// Format as an `Authorization` header value.
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.0)
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AccessToken([REDACTED])")
    }
}
