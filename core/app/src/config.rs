//! Application configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

use lockbox_auth::{OAuthConfig, DEFAULT_REFRESH_MARGIN_SECS, DRIVE_APPDATA_SCOPE};
use lockbox_common::{Error, Result};
use lockbox_storage::DriveConfig;

/// Encrypted fallback credential file.
pub const CREDENTIALS_FILE: &str = "credentials.json";
/// Plain preferences file holding the sign-out marker.
pub const PREFS_FILE: &str = "prefs.json";

/// Lockbox configuration, stored as JSON.
///
/// Every field has a default; a missing file means "all defaults".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockboxConfig {
    /// Directory for local state.
    pub data_dir: PathBuf,
    /// Service name for keychain entries.
    pub keyring_service: String,
    /// Alias of the device key protecting device-mode backups.
    pub device_key_alias: String,
    /// Alias of the device key protecting the fallback credential file.
    pub prefs_key_alias: String,
    /// OAuth2 client settings.
    pub oauth: OAuthConfig,
    /// Scopes requested on token exchange.
    pub scopes: Vec<String>,
    /// Remote store endpoints.
    pub drive: DriveConfig,
    /// Seconds before expiry at which a token is refreshed.
    pub refresh_margin_secs: i64,
}

impl Default for LockboxConfig {
    fn default() -> Self {
        Self {
            data_dir: dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("lockbox"),
            keyring_service: "lockbox".to_string(),
            device_key_alias: "lockbox_backup_key".to_string(),
            prefs_key_alias: "lockbox_prefs_key".to_string(),
            oauth: OAuthConfig::default(),
            scopes: vec![DRIVE_APPDATA_SCOPE.to_string()],
            drive: DriveConfig::default(),
            refresh_margin_secs: DEFAULT_REFRESH_MARGIN_SECS,
        }
    }
}

impl LockboxConfig {
    /// Default location: `<config_dir>/lockbox/config.json`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("lockbox").join("config.json"))
    }

    /// Load from `path`, or from the default location when `None`.
    ///
    /// # Errors
    /// - The file exists but cannot be read
    /// - The file is not valid configuration JSON
    pub async fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => match Self::default_path() {
                Some(path) => path,
                None => return Ok(Self::default()),
            },
        };

        match tokio::fs::read_to_string(&path).await {
            Ok(json) => Self::from_json(&json),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No config at {}; using defaults", path.display());
                Ok(Self::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Write to `path`, creating parent directories.
    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, self.to_json()?).await?;
        Ok(())
    }

    /// Serialize configuration to JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Deserialize configuration from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Path of the encrypted fallback credential file.
    pub fn credentials_path(&self) -> PathBuf {
        self.data_dir.join(CREDENTIALS_FILE)
    }

    /// Path of the plain preferences file.
    pub fn prefs_path(&self) -> PathBuf {
        self.data_dir.join(PREFS_FILE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_missing_file_yields_defaults() {
        let dir = tempdir().unwrap();
        let config = LockboxConfig::load(Some(&dir.path().join("absent.json")))
            .await
            .unwrap();

        assert_eq!(config, LockboxConfig::default());
        assert_eq!(config.refresh_margin_secs, 60);
        assert_eq!(config.drive.folder, "appDataFolder");
    }

    #[tokio::test]
    async fn test_partial_file_fills_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"keyring_service":"custom","oauth":{"client_id":"abc"}}"#,
        )
        .unwrap();

        let config = LockboxConfig::load(Some(&path)).await.unwrap();
        assert_eq!(config.keyring_service, "custom");
        assert_eq!(config.oauth.client_id, "abc");
        assert_eq!(config.oauth.token_url, OAuthConfig::default().token_url);
        assert_eq!(config.device_key_alias, "lockbox_backup_key");
    }

    #[tokio::test]
    async fn test_save_and_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let config = LockboxConfig {
            data_dir: dir.path().join("data"),
            refresh_margin_secs: 120,
            ..LockboxConfig::default()
        };
        config.save(&path).await.unwrap();

        assert_eq!(LockboxConfig::load(Some(&path)).await.unwrap(), config);
        assert_eq!(config.prefs_path(), dir.path().join("data").join("prefs.json"));
    }

    #[tokio::test]
    async fn test_invalid_file_is_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{").unwrap();

        assert!(matches!(
            LockboxConfig::load(Some(&path)).await,
            Err(Error::Serialization(_))
        ));
    }
}
