//! Backup encoding: payload JSON sealed into a base64 envelope.

use std::sync::Arc;
use tracing::debug;
use zeroize::Zeroizing;

use lockbox_common::{BackupError, Error, Passphrase, Result};
use lockbox_crypto::{Envelope, KeyProvider, PassphraseKeyProvider};

use crate::payload::BackupPayload;

/// Which key protects a backup.
pub enum BackupMode {
    /// The device key; restorable only on this device.
    Device,
    /// A key derived from a passphrase with a fresh salt per backup.
    Passphrase(Passphrase),
}

impl BackupMode {
    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            BackupMode::Device => "device",
            BackupMode::Passphrase(_) => "passphrase",
        }
    }
}

/// Encodes and decodes encrypted backups.
///
/// Both directions do blocking work (keychain access, PBKDF2); async
/// callers should run them on a blocking thread.
pub struct BackupCodec {
    device: Arc<dyn KeyProvider>,
}

impl BackupCodec {
    /// Create a codec using `device` for device-mode backups.
    pub fn new(device: Arc<dyn KeyProvider>) -> Self {
        Self { device }
    }

    /// Serialize and encrypt a payload.
    ///
    /// # Errors
    /// - Key unavailable or empty passphrase
    /// - Serialization failure
    pub fn encode(&self, payload: &BackupPayload, mode: &BackupMode) -> Result<String> {
        let json = Zeroizing::new(
            serde_json::to_string(payload).map_err(|e| Error::Serialization(e.to_string()))?,
        );
        self.encode_json(&json, mode)
    }

    /// Encrypt already-serialized payload JSON.
    pub fn encode_json(&self, json: &str, mode: &BackupMode) -> Result<String> {
        let envelope = match mode {
            BackupMode::Device => {
                let key = self.device.get_or_create_key()?;
                lockbox_crypto::encrypt(&key, json.as_bytes(), None)?
            }
            BackupMode::Passphrase(passphrase) => {
                let provider = PassphraseKeyProvider::for_encryption(passphrase);
                let key = provider.get_or_create_key()?;
                lockbox_crypto::encrypt(&key, json.as_bytes(), provider.salt())?
            }
        };

        debug!(mode = mode.name(), "Backup encoded");
        Ok(envelope.to_base64())
    }

    /// Decrypt and deserialize a backup.
    ///
    /// # Postconditions
    /// - `Ok(None)` if the blob cannot be decrypted with `mode` (wrong
    ///   passphrase, foreign device, damaged envelope)
    ///
    /// # Errors
    /// - `CorruptPayload` if decryption succeeded but the content is not a
    ///   valid payload
    pub fn decode(
        &self,
        blob: &str,
        mode: &BackupMode,
    ) -> std::result::Result<Option<BackupPayload>, BackupError> {
        let Some(json) = self.decode_json(blob, mode)? else {
            return Ok(None);
        };

        serde_json::from_str(&json)
            .map(Some)
            .map_err(|e| BackupError::CorruptPayload(format!("Invalid payload JSON: {}", e)))
    }

    /// Decrypt a backup to its JSON text.
    pub fn decode_json(
        &self,
        blob: &str,
        mode: &BackupMode,
    ) -> std::result::Result<Option<Zeroizing<String>>, BackupError> {
        let plaintext = match self.open(blob, mode) {
            Ok(plaintext) => plaintext,
            Err(e) => {
                debug!(mode = mode.name(), "Backup could not be opened: {}", e);
                return Ok(None);
            }
        };

        let json = std::str::from_utf8(&plaintext)
            .map_err(|_| BackupError::CorruptPayload("Payload is not UTF-8".to_string()))?;
        Ok(Some(Zeroizing::new(json.to_string())))
    }

    fn open(
        &self,
        blob: &str,
        mode: &BackupMode,
    ) -> std::result::Result<Zeroizing<Vec<u8>>, lockbox_common::CryptoError> {
        let envelope = Envelope::from_base64(blob)?;

        let key = match mode {
            BackupMode::Device => self.device.get_or_create_key()?,
            BackupMode::Passphrase(passphrase) => {
                let salt = envelope.salt().ok_or_else(|| {
                    lockbox_common::CryptoError::MalformedEnvelope(
                        "Envelope carries no salt".to_string(),
                    )
                })?;
                PassphraseKeyProvider::for_decryption(passphrase, salt).get_or_create_key()?
            }
        };

        lockbox_crypto::decrypt(&key, &envelope).map(Zeroizing::new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::{Note, PasswordEntry};
    use lockbox_crypto::{DeviceKeyProvider, MemoryKeyStore};

    fn codec() -> BackupCodec {
        BackupCodec::new(Arc::new(DeviceKeyProvider::new(
            Arc::new(MemoryKeyStore::new()),
            "backup",
        )))
    }

    fn passphrase(s: &str) -> BackupMode {
        BackupMode::Passphrase(Passphrase::from(s))
    }

    fn sample() -> BackupPayload {
        BackupPayload {
            notes: vec![Note {
                id: 1,
                title: "groceries".to_string(),
                content: "milk".to_string(),
                created_at: 1_700_000_000_000,
                updated_at: 1_700_000_000_500,
            }],
            passwords: vec![PasswordEntry {
                id: 2,
                site: "example.com".to_string(),
                username: "user".to_string(),
                password: "hunter2".to_string(),
                notes: String::new(),
            }],
            cards: vec![],
        }
    }

    #[test]
    fn test_passphrase_scenario() {
        let codec = codec();
        let json = r#"{"notes":[],"passwords":[],"cards":[]}"#;

        let blob = codec.encode_json(json, &passphrase("correct-horse")).unwrap();

        assert!(codec
            .decode_json(&blob, &passphrase("wrong-horse"))
            .unwrap()
            .is_none());
        assert_eq!(
            codec
                .decode_json(&blob, &passphrase("correct-horse"))
                .unwrap()
                .as_deref()
                .map(String::as_str),
            Some(json)
        );
    }

    #[test]
    fn test_device_roundtrip() {
        let codec = codec();
        let blob = codec.encode(&sample(), &BackupMode::Device).unwrap();

        assert!(!blob.contains("hunter2"));
        assert_eq!(
            codec.decode(&blob, &BackupMode::Device).unwrap(),
            Some(sample())
        );
    }

    #[test]
    fn test_passphrase_roundtrip() {
        let codec = codec();
        let blob = codec.encode(&sample(), &passphrase("s3cret")).unwrap();

        assert_eq!(
            codec.decode(&blob, &passphrase("s3cret")).unwrap(),
            Some(sample())
        );
    }

    #[test]
    fn test_foreign_device_cannot_decode() {
        let blob = codec().encode(&sample(), &BackupMode::Device).unwrap();
        assert!(codec().decode(&blob, &BackupMode::Device).unwrap().is_none());
    }

    #[test]
    fn test_device_blob_with_passphrase_mode() {
        let codec = codec();
        let blob = codec.encode(&sample(), &BackupMode::Device).unwrap();

        assert!(codec.decode(&blob, &passphrase("anything")).unwrap().is_none());
    }

    #[test]
    fn test_garbage_blob_is_none() {
        let codec = codec();
        assert!(codec
            .decode("not base64 at all!", &BackupMode::Device)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_corrupt_payload_after_decrypt() {
        let codec = codec();
        let blob = codec
            .encode_json("{not json", &BackupMode::Device)
            .unwrap();

        assert!(matches!(
            codec.decode(&blob, &BackupMode::Device),
            Err(BackupError::CorruptPayload(_))
        ));
    }

    #[test]
    fn test_empty_passphrase_rejected() {
        let codec = codec();
        let result = codec.encode(&sample(), &passphrase(""));
        assert!(matches!(result, Err(Error::Crypto(_))));
    }
}
