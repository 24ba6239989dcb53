//! Key providers.
//!
//! A [`KeyProvider`] hands out the key for one encrypt or decrypt call.
//! [`DeviceKeyProvider`] keeps a single long-lived key in a
//! [`SecureKeyStore`]; [`PassphraseKeyProvider`] derives a transient key
//! from a user passphrase and a per-encryption salt.

use std::sync::{Arc, Mutex};
use tracing::{debug, info};

use lockbox_common::{CryptoError, Passphrase};

use crate::kdf::derive_key;
use crate::keys::{KeyMaterial, KeySpec, Salt};
use crate::keystore::SecureKeyStore;

/// Source of the key for a single cipher operation.
pub trait KeyProvider: Send + Sync {
    /// Return the key, creating it first if needed.
    fn get_or_create_key(&self) -> Result<KeyMaterial, CryptoError>;

    /// Salt to record in the envelope, if this provider derives keys.
    fn salt(&self) -> Option<&Salt> {
        None
    }
}

/// Provider for the device key held in a secure store.
///
/// Creation is serialized: concurrent first-use callers see exactly one
/// key generated and all of them get that key.
pub struct DeviceKeyProvider {
    store: Arc<dyn SecureKeyStore>,
    alias: String,
    spec: KeySpec,
    create_lock: Mutex<()>,
}

impl DeviceKeyProvider {
    /// Create a provider for the key named `alias`.
    pub fn new(store: Arc<dyn SecureKeyStore>, alias: impl Into<String>) -> Self {
        Self {
            store,
            alias: alias.into(),
            spec: KeySpec::aes_gcm_256(),
            create_lock: Mutex::new(()),
        }
    }

    /// The key alias.
    pub fn alias(&self) -> &str {
        &self.alias
    }
}

impl KeyProvider for DeviceKeyProvider {
    fn get_or_create_key(&self) -> Result<KeyMaterial, CryptoError> {
        if let Some(key) = self.store.get_key(&self.alias)? {
            return Ok(key);
        }

        let _guard = self
            .create_lock
            .lock()
            .map_err(|_| CryptoError::KeyUnavailable("Key creation lock poisoned".to_string()))?;

        // Another caller may have created it while we waited.
        if !self.store.has_key(&self.alias)? {
            info!(alias = %self.alias, "Creating device key");
            self.store.create_key(&self.alias, &self.spec)?;
        } else {
            debug!(alias = %self.alias, "Device key created concurrently");
        }

        self.store.get_key(&self.alias)?.ok_or_else(|| {
            CryptoError::KeyUnavailable(format!("Key '{}' missing after creation", self.alias))
        })
    }
}

/// Provider deriving a key from a borrowed passphrase.
pub struct PassphraseKeyProvider<'a> {
    passphrase: &'a Passphrase,
    salt: Salt,
}

impl<'a> PassphraseKeyProvider<'a> {
    /// Provider for a new encryption: generates a fresh salt.
    pub fn for_encryption(passphrase: &'a Passphrase) -> Self {
        Self {
            passphrase,
            salt: Salt::generate(),
        }
    }

    /// Provider for decrypting an envelope written with `salt`.
    pub fn for_decryption(passphrase: &'a Passphrase, salt: Salt) -> Self {
        Self { passphrase, salt }
    }
}

impl KeyProvider for PassphraseKeyProvider<'_> {
    fn get_or_create_key(&self) -> Result<KeyMaterial, CryptoError> {
        derive_key(self.passphrase, &self.salt)
    }

    fn salt(&self) -> Option<&Salt> {
        Some(&self.salt)
    }
}
