//! Persisted OAuth credential.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

use lockbox_common::AccessToken;

/// Access token plus the data needed to refresh it.
///
/// A missing `expires_at` means the expiry is unknown, not that the token
/// never expires.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct StoredCredential {
    /// Bearer token for API requests.
    pub access_token: String,
    /// Token used to obtain new access tokens.
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Expiry as epoch milliseconds.
    #[serde(default)]
    pub expires_at: Option<i64>,
    /// Account the token was issued for.
    #[serde(default)]
    pub user_id: Option<String>,
}

impl StoredCredential {
    /// Create a credential with only an access token.
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: None,
            expires_at: None,
            user_id: None,
        }
    }

    /// Placeholder written over a backend on sign-out.
    pub fn tombstone() -> Self {
        Self::new(String::new())
    }

    /// Whether this is a sign-out placeholder rather than a real credential.
    pub fn is_tombstone(&self) -> bool {
        self.access_token.is_empty()
    }

    /// Set the refresh token.
    pub fn with_refresh_token(mut self, refresh_token: impl Into<String>) -> Self {
        self.refresh_token = Some(refresh_token.into());
        self
    }

    /// Set the expiry.
    pub fn with_expires_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at.timestamp_millis());
        self
    }

    /// Set the user identifier.
    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Expiry as a timestamp, if known and representable.
    pub fn expiry(&self) -> Option<DateTime<Utc>> {
        self.expires_at
            .and_then(|millis| Utc.timestamp_millis_opt(millis).single())
    }

    /// The access token as a bearer token.
    pub fn token(&self) -> AccessToken {
        AccessToken::new(self.access_token.clone())
    }
}

impl fmt::Debug for StoredCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoredCredential")
            .field("access_token", &"[REDACTED]")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("expires_at", &self.expires_at)
            .field("user_id", &self.user_id)
            .finish()
    }
}
