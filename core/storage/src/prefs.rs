//! File-backed preference namespaces.
//!
//! [`PlainPrefs`] is an unencrypted JSON key-value file for non-secret
//! flags. [`EncryptedPrefs`] is the fallback credential tier: the same file
//! format, with every value sealed under a device key.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::fs;
use tracing::debug;
use zeroize::Zeroizing;

use lockbox_common::StoreError;
use lockbox_crypto::{DeviceKeyProvider, Envelope, KeyMaterial, KeyProvider};

use crate::backend::CredentialBackend;
use crate::credential::StoredCredential;

/// Key holding the access token.
pub const KEY_ACCESS_TOKEN: &str = "access_token";
/// Key holding the refresh token.
pub const KEY_REFRESH_TOKEN: &str = "refresh_token";
/// Key holding the expiry in epoch milliseconds.
pub const KEY_EXPIRES_AT: &str = "expires_at";
/// Key holding the user identifier.
pub const KEY_USER_ID: &str = "user_id";

async fn read_map(path: &Path) -> std::io::Result<Map<String, Value>> {
    match fs::read(path).await {
        Ok(bytes) => serde_json::from_slice(&bytes)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Map::new()),
        Err(e) => Err(e),
    }
}

/// Write via a sibling temp file and rename so readers never see a
/// partially written file.
async fn write_map(path: &Path, map: &Map<String, Value>) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }

    let bytes = serde_json::to_vec_pretty(map)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    fs::write(&tmp, &bytes).await?;
    fs::rename(&tmp, path).await
}

/// Unencrypted preference namespace.
pub struct PlainPrefs {
    path: Option<PathBuf>,
    cache: Mutex<Map<String, Value>>,
}

impl PlainPrefs {
    /// Open (or lazily create) the namespace stored at `path`.
    ///
    /// # Errors
    /// - The file exists but cannot be read or parsed
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let map = read_map(&path)
            .await
            .map_err(|e| StoreError::ReadFailed(format!("Failed to read {}: {}", path.display(), e)))?;

        Ok(Self {
            path: Some(path),
            cache: Mutex::new(map),
        })
    }

    /// Namespace that lives only in process memory.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            cache: Mutex::new(Map::new()),
        }
    }

    /// Read a boolean value.
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.cache
            .lock()
            .ok()
            .and_then(|map| map.get(key).and_then(Value::as_bool))
    }

    /// Set a boolean value and persist the namespace.
    ///
    /// The in-memory value is updated even when persisting fails.
    pub async fn set_bool(&self, key: &str, value: bool) -> Result<(), StoreError> {
        let snapshot = {
            let mut map = self
                .cache
                .lock()
                .map_err(|_| StoreError::PersistFailed("Preferences lock poisoned".to_string()))?;
            map.insert(key.to_string(), Value::Bool(value));
            map.clone()
        };

        match &self.path {
            Some(path) => write_map(path, &snapshot).await.map_err(|e| {
                StoreError::PersistFailed(format!("Failed to write {}: {}", path.display(), e))
            }),
            None => Ok(()),
        }
    }
}

/// Fallback credential tier: one encrypted key-value namespace.
///
/// Each of `access_token`, `refresh_token`, `expires_at` and `user_id` is
/// stored as a base64 envelope under the device key.
pub struct EncryptedPrefs {
    path: PathBuf,
    keys: Arc<DeviceKeyProvider>,
}

impl EncryptedPrefs {
    /// Create a namespace stored at `path`, sealed with keys from `keys`.
    pub fn new(path: impl Into<PathBuf>, keys: Arc<DeviceKeyProvider>) -> Self {
        Self {
            path: path.into(),
            keys,
        }
    }

    async fn key(&self) -> Result<KeyMaterial, String> {
        let keys = self.keys.clone();
        tokio::task::spawn_blocking(move || keys.get_or_create_key())
            .await
            .map_err(|e| format!("Key task failed: {}", e))?
            .map_err(|e| e.to_string())
    }

    fn open_value(
        map: &Map<String, Value>,
        name: &str,
        key: &KeyMaterial,
    ) -> Result<Option<Zeroizing<String>>, StoreError> {
        let Some(sealed) = map.get(name).and_then(Value::as_str) else {
            return Ok(None);
        };

        let envelope = Envelope::from_base64(sealed)
            .map_err(|e| StoreError::ReadFailed(format!("{}: {}", name, e)))?;
        let plaintext = Zeroizing::new(
            lockbox_crypto::decrypt(key, &envelope)
                .map_err(|e| StoreError::ReadFailed(format!("{}: {}", name, e)))?,
        );

        String::from_utf8(plaintext.to_vec())
            .map(|s| Some(Zeroizing::new(s)))
            .map_err(|_| StoreError::ReadFailed(format!("{}: not UTF-8", name)))
    }

    fn seal_value(value: &str, key: &KeyMaterial) -> Result<Value, StoreError> {
        let envelope = lockbox_crypto::encrypt(key, value.as_bytes(), None)
            .map_err(|e| StoreError::PersistFailed(e.to_string()))?;
        Ok(Value::String(envelope.to_base64()))
    }
}

#[async_trait]
impl CredentialBackend for EncryptedPrefs {
    fn name(&self) -> &str {
        "prefs"
    }

    async fn read(&self) -> Result<Option<StoredCredential>, StoreError> {
        let map = read_map(&self.path)
            .await
            .map_err(|e| StoreError::ReadFailed(format!("Failed to read preferences: {}", e)))?;

        if !map.contains_key(KEY_ACCESS_TOKEN) {
            return Ok(None);
        }

        let key = self.key().await.map_err(StoreError::ReadFailed)?;

        let Some(access_token) = Self::open_value(&map, KEY_ACCESS_TOKEN, &key)? else {
            return Ok(None);
        };
        let refresh_token = Self::open_value(&map, KEY_REFRESH_TOKEN, &key)?;
        let user_id = Self::open_value(&map, KEY_USER_ID, &key)?;
        let expires_at = match Self::open_value(&map, KEY_EXPIRES_AT, &key)? {
            Some(raw) => Some(raw.parse::<i64>().map_err(|_| {
                StoreError::ReadFailed(format!("{}: not a timestamp", KEY_EXPIRES_AT))
            })?),
            None => None,
        };

        let mut credential = StoredCredential::new(access_token.as_str());
        credential.refresh_token = refresh_token.map(|t| t.as_str().to_owned());
        credential.user_id = user_id.map(|u| u.as_str().to_owned());
        credential.expires_at = expires_at;

        Ok(Some(credential).filter(|c| !c.is_tombstone()))
    }

    async fn write(&self, credential: &StoredCredential) -> Result<(), StoreError> {
        let key = self.key().await.map_err(StoreError::PersistFailed)?;

        let mut map = Map::new();
        map.insert(
            KEY_ACCESS_TOKEN.to_string(),
            Self::seal_value(&credential.access_token, &key)?,
        );
        if let Some(refresh_token) = &credential.refresh_token {
            map.insert(
                KEY_REFRESH_TOKEN.to_string(),
                Self::seal_value(refresh_token, &key)?,
            );
        }
        if let Some(expires_at) = credential.expires_at {
            map.insert(
                KEY_EXPIRES_AT.to_string(),
                Self::seal_value(&expires_at.to_string(), &key)?,
            );
        }
        if let Some(user_id) = &credential.user_id {
            map.insert(KEY_USER_ID.to_string(), Self::seal_value(user_id, &key)?);
        }

        write_map(&self.path, &map)
            .await
            .map_err(|e| StoreError::PersistFailed(format!("Failed to write preferences: {}", e)))?;

        debug!("Credential written to encrypted preferences");
        Ok(())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        write_map(&self.path, &Map::new())
            .await
            .map_err(|e| StoreError::PersistFailed(format!("Failed to clear preferences: {}", e)))
    }
}
