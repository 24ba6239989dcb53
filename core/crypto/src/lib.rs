//! Cryptographic primitives for Lockbox.
//!
//! This module provides:
//! - Authenticated encryption using AES-256-GCM
//! - A self-describing envelope format (salt, IV, ciphertext and tag)
//! - Passphrase key derivation using PBKDF2-HMAC-SHA256
//! - Device keys held in a platform secure store
//!
//! # Security Guarantees
//! - All key material is automatically zeroized on drop
//! - No plaintext or key material is ever logged
//! - Key comparisons are constant-time

pub mod aead;
pub mod envelope;
pub mod kdf;
pub mod keys;
pub mod keystore;
pub mod provider;

pub use aead::{decrypt, encrypt};
pub use envelope::Envelope;
pub use kdf::{derive_key, PBKDF2_ITERATIONS};
pub use keys::{KeyMaterial, KeySpec, Salt, KEY_LENGTH};
pub use keystore::{KeyringKeyStore, MemoryKeyStore, SecureKeyStore};
pub use provider::{DeviceKeyProvider, KeyProvider, PassphraseKeyProvider};
