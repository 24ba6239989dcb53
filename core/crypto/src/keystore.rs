//! Secure key stores holding device keys.
//!
//! A [`SecureKeyStore`] models a platform facility that generates and keeps
//! named keys. [`KeyringKeyStore`] uses the OS credential vault through the
//! `keyring` crate; [`MemoryKeyStore`] keeps keys in process memory.

use base64::{engine::general_purpose::STANDARD, Engine};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;
use zeroize::Zeroizing;

use lockbox_common::CryptoError;

use crate::keys::{BlockMode, KeyAlgorithm, KeyMaterial, KeySpec, Padding, KEY_LENGTH};

/// Platform store for named symmetric keys.
pub trait SecureKeyStore: Send + Sync {
    /// Whether a key exists under `alias`.
    fn has_key(&self, alias: &str) -> Result<bool, CryptoError>;

    /// Generate a new key under `alias`, replacing any existing one.
    fn create_key(&self, alias: &str, spec: &KeySpec) -> Result<(), CryptoError>;

    /// Fetch the key stored under `alias`.
    fn get_key(&self, alias: &str) -> Result<Option<KeyMaterial>, CryptoError>;
}

fn check_spec(spec: &KeySpec) -> Result<(), CryptoError> {
    let supported = spec.algorithm == KeyAlgorithm::Aes
        && spec.block_mode == BlockMode::Gcm
        && spec.padding == Padding::None
        && spec.size_bits as usize == KEY_LENGTH * 8;
    if supported {
        Ok(())
    } else {
        Err(CryptoError::KeyUnavailable(format!(
            "Unsupported key spec: {:?}",
            spec
        )))
    }
}

/// Key store backed by the OS keychain.
pub struct KeyringKeyStore {
    service: String,
}

impl KeyringKeyStore {
    /// Create a store that files keys under `service`.
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self, alias: &str) -> Result<keyring::Entry, CryptoError> {
        keyring::Entry::new(&self.service, alias)
            .map_err(|e| CryptoError::KeyUnavailable(format!("Keychain error: {}", e)))
    }
}

impl SecureKeyStore for KeyringKeyStore {
    fn has_key(&self, alias: &str) -> Result<bool, CryptoError> {
        match self.entry(alias)?.get_password() {
            Ok(_) => Ok(true),
            Err(keyring::Error::NoEntry) => Ok(false),
            Err(e) => Err(CryptoError::KeyUnavailable(format!(
                "Failed to query keychain: {}",
                e
            ))),
        }
    }

    fn create_key(&self, alias: &str, spec: &KeySpec) -> Result<(), CryptoError> {
        check_spec(spec)?;

        let key = KeyMaterial::generate();
        let encoded = Zeroizing::new(STANDARD.encode(key.as_bytes()));

        self.entry(alias)?
            .set_password(&encoded)
            .map_err(|e| CryptoError::KeyUnavailable(format!("Failed to store in keychain: {}", e)))
    }

    fn get_key(&self, alias: &str) -> Result<Option<KeyMaterial>, CryptoError> {
        let encoded = match self.entry(alias)?.get_password() {
            Ok(encoded) => Zeroizing::new(encoded),
            Err(keyring::Error::NoEntry) => return Ok(None),
            Err(e) => {
                return Err(CryptoError::KeyUnavailable(format!(
                    "Failed to read from keychain: {}",
                    e
                )))
            }
        };

        let bytes = Zeroizing::new(
            STANDARD
                .decode(encoded.as_bytes())
                .map_err(|e| CryptoError::KeyUnavailable(format!("Invalid key format: {}", e)))?,
        );

        KeyMaterial::from_slice(&bytes)
            .map(Some)
            .ok_or_else(|| CryptoError::KeyUnavailable("Stored key has wrong length".to_string()))
    }
}

/// In-memory key store.
///
/// Useful for testing. Counts how many keys it has generated.
#[derive(Default)]
pub struct MemoryKeyStore {
    keys: RwLock<HashMap<String, KeyMaterial>>,
    created: AtomicUsize,
}

impl MemoryKeyStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys generated so far.
    pub fn creations(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

impl SecureKeyStore for MemoryKeyStore {
    fn has_key(&self, alias: &str) -> Result<bool, CryptoError> {
        let keys = self
            .keys
            .read()
            .map_err(|_| CryptoError::KeyUnavailable("Key store lock poisoned".to_string()))?;
        Ok(keys.contains_key(alias))
    }

    fn create_key(&self, alias: &str, spec: &KeySpec) -> Result<(), CryptoError> {
        check_spec(spec)?;

        let mut keys = self
            .keys
            .write()
            .map_err(|_| CryptoError::KeyUnavailable("Key store lock poisoned".to_string()))?;
        keys.insert(alias.to_string(), KeyMaterial::generate());
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn get_key(&self, alias: &str) -> Result<Option<KeyMaterial>, CryptoError> {
        let keys = self
            .keys
            .read()
            .map_err(|_| CryptoError::KeyUnavailable("Key store lock poisoned".to_string()))?;
        Ok(keys.get(alias).cloned())
    }
}
