//! Common utilities and types shared across Lockbox modules.
//!
//! This module provides the error taxonomy used by every layer and the
//! secret-carrying wrapper types that zeroize their memory on drop.

pub mod error;
pub mod types;

pub use error::{
    BackupError, ConsentIntent, CryptoError, Error, Result, StoreError, TokenError,
    TransportError,
};
pub use types::{AccessToken, Passphrase};
