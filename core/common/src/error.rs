//! Common error types for Lockbox.
//!
//! Each layer owns a narrow error enum; [`Error`] wraps all of them for
//! callers that drive whole backup or restore flows.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Failures of the symmetric cipher and key providers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    /// The GCM tag did not verify: tampered data or wrong key.
    #[error("Authentication failed")]
    AuthenticationFailed,

    /// Envelope length fields are inconsistent with the data.
    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// No key could be obtained or created.
    #[error("Key unavailable: {0}")]
    KeyUnavailable(String),

    /// The cipher itself refused the operation.
    #[error("Cipher failure: {0}")]
    CipherFailure(String),
}

/// Failures of the tiered credential store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// No backend accepted the write.
    #[error("Failed to persist credential: {0}")]
    PersistFailed(String),

    /// Every backend failed to answer a read.
    #[error("Failed to read credential: {0}")]
    ReadFailed(String),
}

/// An interactive step the user must complete before a token can be issued.
///
/// The core never acts on this; it is handed to the presentation layer as-is.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsentIntent {
    /// URL the user has to visit to grant consent.
    pub url: String,
    /// Account the consent is requested for, when known.
    pub account: Option<String>,
    /// Reason reported by the identity provider.
    pub reason: String,
}

impl fmt::Debug for ConsentIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsentIntent")
            .field("account", &self.account)
            .field("reason", &self.reason)
            .finish_non_exhaustive()
    }
}

/// Failures of the token lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenError {
    /// The user must complete an external consent step.
    #[error("User consent required: {}", .0.reason)]
    ConsentRequired(ConsentIntent),

    /// The identity provider refused or failed the exchange.
    #[error("Token exchange failed: {0}")]
    ExchangeFailed(String),

    /// A token exchange is needed but no account is known.
    #[error("No account available for token exchange")]
    NoAccount,
}

/// Failures talking to the remote object store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The remote rejected the bearer token.
    #[error("Unauthorized")]
    Unauthorized,

    /// Connection failure or a non-success status.
    #[error("Network failure: {0}")]
    NetworkFailure(String),

    /// The requested object does not exist.
    #[error("Not found: {0}")]
    NotFound(String),
}

/// Failures decoding a backup.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackupError {
    /// Decryption succeeded but the plaintext is not a valid payload.
    #[error("Corrupt backup payload: {0}")]
    CorruptPayload(String),

    /// Decryption failed; the passphrase is wrong or the backup is damaged.
    #[error("Wrong passphrase or corrupted backup")]
    WrongPassphrase,
}

/// Top-level error type for Lockbox operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Cryptographic operation failed.
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// Credential storage failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Token acquisition failed.
    #[error(transparent)]
    Token(#[from] TokenError),

    /// Remote transport failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Backup decoding failed.
    #[error(transparent)]
    Backup(#[from] BackupError),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl Error {
    /// The consent intent carried by this error, if it is a consent request.
    pub fn consent_intent(&self) -> Option<&ConsentIntent> {
        match self {
            Error::Token(TokenError::ConsentRequired(intent)) => Some(intent),
            _ => None,
        }
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;
