//! Primary credential tier backed by the OS credential vault.

use async_trait::async_trait;
use std::sync::Arc;
use zeroize::Zeroizing;

use lockbox_common::StoreError;

use crate::backend::CredentialBackend;
use crate::credential::StoredCredential;

/// Keychain entry name holding the serialized credential.
pub const CREDENTIAL_ENTRY: &str = "oauth_credential";

/// Credential backend storing a JSON credential in one keychain entry.
///
/// Sign-out overwrites the entry with a tombstone instead of deleting it.
pub struct KeychainBackend {
    entry: Arc<keyring::Entry>,
}

impl KeychainBackend {
    /// Open the credential entry under `service`.
    ///
    /// # Errors
    /// - The platform credential vault is unavailable
    pub fn new(service: &str) -> Result<Self, StoreError> {
        let entry = keyring::Entry::new(service, CREDENTIAL_ENTRY)
            .map_err(|e| StoreError::ReadFailed(format!("Keychain error: {}", e)))?;
        Ok(Self {
            entry: Arc::new(entry),
        })
    }

    async fn blocking<T, F>(&self, op: F) -> Result<T, String>
    where
        T: Send + 'static,
        F: FnOnce(&keyring::Entry) -> Result<T, String> + Send + 'static,
    {
        let entry = self.entry.clone();
        tokio::task::spawn_blocking(move || op(&entry))
            .await
            .map_err(|e| format!("Keychain task failed: {}", e))?
    }

    async fn put(&self, credential: &StoredCredential) -> Result<(), StoreError> {
        let json = Zeroizing::new(
            serde_json::to_string(credential)
                .map_err(|e| StoreError::PersistFailed(format!("Failed to serialize: {}", e)))?,
        );

        self.blocking(move |entry| {
            entry
                .set_password(&json)
                .map_err(|e| format!("Failed to store in keychain: {}", e))
        })
        .await
        .map_err(StoreError::PersistFailed)
    }
}

#[async_trait]
impl CredentialBackend for KeychainBackend {
    fn name(&self) -> &str {
        "keychain"
    }

    async fn read(&self) -> Result<Option<StoredCredential>, StoreError> {
        let stored = self
            .blocking(|entry| match entry.get_password() {
                Ok(json) => Ok(Some(Zeroizing::new(json))),
                Err(keyring::Error::NoEntry) => Ok(None),
                Err(e) => Err(format!("Failed to read from keychain: {}", e)),
            })
            .await
            .map_err(StoreError::ReadFailed)?;

        let Some(json) = stored else {
            return Ok(None);
        };

        let credential: StoredCredential = serde_json::from_str(&json)
            .map_err(|e| StoreError::ReadFailed(format!("Invalid keychain credential: {}", e)))?;

        Ok(Some(credential).filter(|c| !c.is_tombstone()))
    }

    async fn write(&self, credential: &StoredCredential) -> Result<(), StoreError> {
        self.put(credential).await
    }

    async fn clear(&self) -> Result<(), StoreError> {
        self.put(&StoredCredential::tombstone()).await
    }
}
