//! Key types with secure memory handling.
//!
//! All key types automatically zeroize their memory on drop to prevent
//! sensitive data from persisting in memory.

use rand::RngCore;
use std::fmt;
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Length of encryption keys in bytes (256-bit).
pub const KEY_LENGTH: usize = 32;

/// Length of freshly generated passphrase salts in bytes.
pub const SALT_LENGTH: usize = 16;

/// Opaque AES-256 key.
///
/// Owned by whichever provider produced it. Comparison is constant-time.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct KeyMaterial {
    key: [u8; KEY_LENGTH],
}

impl KeyMaterial {
    /// Create key material from raw bytes.
    pub fn from_bytes(key: [u8; KEY_LENGTH]) -> Self {
        Self { key }
    }

    /// Create key material from a slice, rejecting wrong lengths.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let key: [u8; KEY_LENGTH] = bytes.try_into().ok()?;
        Some(Self { key })
    }

    /// Generate a random key.
    pub fn generate() -> Self {
        let mut key = [0u8; KEY_LENGTH];
        rand::rng().fill_bytes(&mut key);
        Self { key }
    }

    /// Get the key bytes.
    ///
    /// # Security
    /// The returned slice should be used immediately and not stored.
    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.key
    }
}

impl PartialEq for KeyMaterial {
    fn eq(&self, other: &Self) -> bool {
        self.key.ct_eq(&other.key).into()
    }
}

impl Eq for KeyMaterial {}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyMaterial([REDACTED])")
    }
}

/// Salt for passphrase key derivation.
///
/// Freshly generated salts are [`SALT_LENGTH`] bytes; salts read back from
/// an envelope keep whatever length was stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Salt(Vec<u8>);

impl Salt {
    /// Generate a random salt.
    pub fn generate() -> Self {
        let mut salt = vec![0u8; SALT_LENGTH];
        rand::rng().fill_bytes(&mut salt);
        Self(salt)
    }

    /// Create from bytes.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Get the salt bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Block cipher algorithm a secure-store key is restricted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAlgorithm {
    /// AES.
    Aes,
}

/// Block mode a secure-store key is restricted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockMode {
    /// Galois/Counter Mode.
    Gcm,
}

/// Padding a secure-store key is restricted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Padding {
    /// No padding.
    None,
}

/// Generation parameters for a key held by a secure store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeySpec {
    /// Key algorithm.
    pub algorithm: KeyAlgorithm,
    /// Permitted block mode.
    pub block_mode: BlockMode,
    /// Permitted padding.
    pub padding: Padding,
    /// Key size in bits.
    pub size_bits: u32,
    /// Key may be used to encrypt.
    pub encrypt: bool,
    /// Key may be used to decrypt.
    pub decrypt: bool,
}

impl KeySpec {
    /// AES-256, GCM only, no padding, encrypt and decrypt.
    pub const fn aes_gcm_256() -> Self {
        Self {
            algorithm: KeyAlgorithm::Aes,
            block_mode: BlockMode::Gcm,
            padding: Padding::None,
            size_bits: (KEY_LENGTH * 8) as u32,
            encrypt: true,
            decrypt: true,
        }
    }
}

impl Default for KeySpec {
    fn default() -> Self {
        Self::aes_gcm_256()
    }
}
