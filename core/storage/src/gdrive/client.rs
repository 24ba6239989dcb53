//! Google Drive REST transport.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::multipart::{Form, Part};
use reqwest::{header, Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use lockbox_common::{AccessToken, TransportError};

use crate::transport::RemoteBackupTransport;

/// Google Drive upload endpoint.
pub const DEFAULT_UPLOAD_URL: &str = "https://www.googleapis.com/upload/drive/v3/files";
/// Google Drive files endpoint.
pub const DEFAULT_FILES_URL: &str = "https://www.googleapis.com/drive/v3/files";
/// Private per-application folder.
pub const APP_DATA_FOLDER: &str = "appDataFolder";
/// Name of the backup object.
pub const DEFAULT_BACKUP_NAME: &str = "lockbox_backup.enc";

/// Drive endpoints and object naming.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriveConfig {
    /// Multipart upload endpoint.
    pub upload_url: String,
    /// Listing and media download endpoint.
    pub files_url: String,
    /// Folder (and space) holding backups.
    pub folder: String,
    /// Fixed name of every backup object.
    pub backup_name: String,
}

impl Default for DriveConfig {
    fn default() -> Self {
        Self {
            upload_url: DEFAULT_UPLOAD_URL.to_string(),
            files_url: DEFAULT_FILES_URL.to_string(),
            folder: APP_DATA_FOLDER.to_string(),
            backup_name: DEFAULT_BACKUP_NAME.to_string(),
        }
    }
}

/// Drive file metadata, as requested by the listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveFile {
    /// File ID.
    pub id: String,
    /// File name.
    #[serde(default)]
    pub name: String,
    /// Created time.
    #[serde(default)]
    pub created_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct FileListResponse {
    #[serde(default)]
    files: Vec<DriveFile>,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    id: String,
}

/// Backup transport over the Drive v3 REST API.
pub struct DriveTransport {
    http: Client,
    config: DriveConfig,
}

impl DriveTransport {
    /// Create a transport for the given endpoints.
    ///
    /// # Errors
    /// - `NetworkFailure` if the HTTP client cannot be initialized
    pub fn new(config: DriveConfig) -> Result<Self, TransportError> {
        let http = Client::builder()
            .user_agent("Lockbox/0.1")
            .build()
            .map_err(|e| {
                TransportError::NetworkFailure(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self { http, config })
    }

    /// Endpoint configuration.
    pub fn config(&self) -> &DriveConfig {
        &self.config
    }

    /// Query parameters of the newest-backup listing.
    fn list_params(&self) -> [(&'static str, String); 4] {
        [
            (
                "q",
                format!(
                    "name='{}' and parents in {}",
                    self.config.backup_name.replace('\'', "\\'"),
                    self.config.folder
                ),
            ),
            ("fields", "files(id,name,createdTime)".to_string()),
            ("orderBy", "createdTime desc".to_string()),
            ("pageSize", "1".to_string()),
        ]
    }

    /// Find the newest backup object.
    pub async fn find_latest(&self, token: &AccessToken) -> Result<Option<DriveFile>, TransportError> {
        let response = self
            .http
            .get(&self.config.files_url)
            .header(header::AUTHORIZATION, token.bearer())
            .query(&self.list_params())
            .send()
            .await
            .map_err(|e| TransportError::NetworkFailure(format!("Failed to list backups: {}", e)))?;

        let list: FileListResponse = handle_response(response).await?.json().await.map_err(|e| {
            TransportError::NetworkFailure(format!("Failed to parse listing: {}", e))
        })?;

        Ok(list.files.into_iter().next())
    }

    /// Download the content of one file.
    pub async fn download(&self, file_id: &str, token: &AccessToken) -> Result<Vec<u8>, TransportError> {
        let url = format!("{}/{}", self.config.files_url.trim_end_matches('/'), file_id);

        let response = self
            .http
            .get(&url)
            .header(header::AUTHORIZATION, token.bearer())
            .query(&[("alt", "media")])
            .send()
            .await
            .map_err(|e| TransportError::NetworkFailure(format!("Failed to download backup: {}", e)))?;

        handle_response(response)
            .await?
            .bytes()
            .await
            .map(|b| b.to_vec())
            .map_err(|e| TransportError::NetworkFailure(format!("Failed to read download: {}", e)))
    }
}

#[async_trait]
impl RemoteBackupTransport for DriveTransport {
    async fn upload(&self, blob: &[u8], token: &AccessToken) -> Result<(), TransportError> {
        let metadata = serde_json::json!({
            "name": self.config.backup_name,
            "parents": [self.config.folder],
        });

        let metadata = Part::text(metadata.to_string())
            .mime_str("application/json")
            .map_err(|e| TransportError::NetworkFailure(format!("Invalid metadata part: {}", e)))?;
        let file = Part::bytes(blob.to_vec())
            .mime_str("application/octet-stream")
            .map_err(|e| TransportError::NetworkFailure(format!("Invalid file part: {}", e)))?;
        let form = Form::new().part("metadata", metadata).part("file", file);

        let response = self
            .http
            .post(&self.config.upload_url)
            .header(header::AUTHORIZATION, token.bearer())
            .query(&[("uploadType", "multipart"), ("fields", "id")])
            .multipart(form)
            .send()
            .await
            .map_err(|e| TransportError::NetworkFailure(format!("Failed to upload backup: {}", e)))?;

        let response = handle_response(response).await?;

        // The body only carries the new id; a missing one is not an error.
        match response.json::<UploadResponse>().await {
            Ok(uploaded) => debug!(file_id = %uploaded.id, "Backup uploaded"),
            Err(_) => debug!("Backup uploaded"),
        }
        Ok(())
    }

    async fn download_latest(&self, token: &AccessToken) -> Result<Option<Vec<u8>>, TransportError> {
        let Some(file) = self.find_latest(token).await? else {
            debug!("No backup found");
            return Ok(None);
        };

        self.download(&file.id, token).await.map(Some)
    }

    async fn latest_created_time(
        &self,
        token: &AccessToken,
    ) -> Result<Option<DateTime<Utc>>, TransportError> {
        Ok(self.find_latest(token).await?.and_then(|f| f.created_time))
    }
}

/// Map non-success statuses to transport errors.
async fn handle_response(response: reqwest::Response) -> Result<reqwest::Response, TransportError> {
    let status = response.status();

    if status.is_success() {
        Ok(response)
    } else if status == StatusCode::UNAUTHORIZED {
        Err(TransportError::Unauthorized)
    } else if status == StatusCode::NOT_FOUND {
        Err(TransportError::NotFound(response.url().path().to_string()))
    } else {
        let body = response.text().await.unwrap_or_default();
        Err(TransportError::NetworkFailure(format!(
            "API error: {} - {}",
            status, body
        )))
    }
}
