//! Identity provider abstraction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

use lockbox_common::ConsentIntent;
use lockbox_storage::StoredCredential;

/// Parameters for one token exchange.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct ExchangeRequest {
    /// Account the token is requested for.
    pub account_id: String,
    /// OAuth scopes to request.
    pub scopes: Vec<String>,
    /// Refresh token from the stored credential, if any.
    pub refresh_token: Option<String>,
}

impl fmt::Debug for ExchangeRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExchangeRequest")
            .field("account_id", &self.account_id)
            .field("scopes", &self.scopes)
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

/// A freshly issued access token.
#[derive(Clone, PartialEq, Zeroize, ZeroizeOnDrop)]
pub struct IssuedToken {
    /// Access token.
    pub access_token: String,
    /// Refresh token, when the provider issued or kept one.
    pub refresh_token: Option<String>,
    /// Expiry, when the provider reported one.
    #[zeroize(skip)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl IssuedToken {
    /// Build the credential to persist for `account_id`.
    pub fn to_credential(&self, account_id: &str) -> StoredCredential {
        let mut credential = StoredCredential::new(self.access_token.as_str()).with_user_id(account_id);
        credential.refresh_token = self.refresh_token.clone();
        credential.expires_at = self.expires_at.map(|t| t.timestamp_millis());
        credential
    }
}

impl fmt::Debug for IssuedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssuedToken")
            .field("access_token", &"[REDACTED]")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Result of a token exchange.
#[derive(Debug, Clone)]
pub enum ExchangeOutcome {
    /// A usable token.
    Token(IssuedToken),
    /// The user has to complete an interactive consent step first.
    ConsentRequired(ConsentIntent),
    /// Any other failure.
    Failure(String),
}

/// Exchanges account credentials for access tokens.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Obtain a fresh access token.
    async fn exchange_token(&self, request: ExchangeRequest) -> ExchangeOutcome;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issued_token_to_credential() {
        let expires_at = DateTime::from_timestamp_millis(1_700_000_000_000).unwrap();
        let issued = IssuedToken {
            access_token: "access".to_string(),
            refresh_token: Some("refresh".to_string()),
            expires_at: Some(expires_at),
        };

        let credential = issued.to_credential("user@example.com");
        assert_eq!(credential.access_token, "access");
        assert_eq!(credential.refresh_token.as_deref(), Some("refresh"));
        assert_eq!(credential.expires_at, Some(1_700_000_000_000));
        assert_eq!(credential.user_id.as_deref(), Some("user@example.com"));
    }

    #[test]
    fn test_debug_redacts_tokens() {
        let request = ExchangeRequest {
            account_id: "user@example.com".to_string(),
            scopes: vec![],
            refresh_token: Some("secret-refresh".to_string()),
        };
        let debug = format!("{:?}", request);
        assert!(!debug.contains("secret-refresh"));
        assert!(debug.contains("user@example.com"));
    }
}
