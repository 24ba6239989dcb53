//! Remote backup transport abstraction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::RwLock;

use lockbox_common::{AccessToken, TransportError};

/// Moves encrypted backup blobs to and from a remote object store.
///
/// Every call is authorized with the bearer token passed in; the transport
/// never acquires or refreshes tokens itself.
#[async_trait]
pub trait RemoteBackupTransport: Send + Sync {
    /// Upload a new backup object.
    ///
    /// # Errors
    /// - `Unauthorized` if the store rejected the token (HTTP 401)
    /// - `NetworkFailure` for connection errors and other non-2xx responses
    async fn upload(&self, blob: &[u8], token: &AccessToken) -> Result<(), TransportError>;

    /// Download the most recently created backup object.
    ///
    /// # Postconditions
    /// - `Ok(None)` if no backup exists; no download is attempted
    async fn download_latest(&self, token: &AccessToken) -> Result<Option<Vec<u8>>, TransportError>;

    /// Creation time of the most recent backup object.
    async fn latest_created_time(
        &self,
        token: &AccessToken,
    ) -> Result<Option<DateTime<Utc>>, TransportError>;
}

/// In-memory transport for testing.
///
/// Keeps every uploaded blob in creation order and can be told to reject
/// all tokens.
pub struct MemoryTransport {
    objects: RwLock<Vec<(DateTime<Utc>, Vec<u8>)>>,
    reject_tokens: AtomicBool,
    downloads: AtomicUsize,
    uploads: AtomicUsize,
}

impl MemoryTransport {
    /// Create an empty transport.
    pub fn new() -> Self {
        Self {
            objects: RwLock::new(Vec::new()),
            reject_tokens: AtomicBool::new(false),
            downloads: AtomicUsize::new(0),
            uploads: AtomicUsize::new(0),
        }
    }

    /// Answer every subsequent call with `Unauthorized`.
    pub fn set_reject_tokens(&self, reject: bool) {
        self.reject_tokens.store(reject, Ordering::SeqCst);
    }

    /// Number of successful media downloads.
    pub fn download_count(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }

    /// Number of successful uploads.
    pub fn upload_count(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }

    fn authorize(&self, token: &AccessToken) -> Result<(), TransportError> {
        if self.reject_tokens.load(Ordering::SeqCst) || token.secret().is_empty() {
            return Err(TransportError::Unauthorized);
        }
        Ok(())
    }

    fn latest(&self) -> Result<Option<(DateTime<Utc>, Vec<u8>)>, TransportError> {
        let objects = self
            .objects
            .read()
            .map_err(|_| TransportError::NetworkFailure("Lock poisoned".to_string()))?;
        Ok(objects.iter().max_by_key(|(created, _)| *created).cloned())
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteBackupTransport for MemoryTransport {
    async fn upload(&self, blob: &[u8], token: &AccessToken) -> Result<(), TransportError> {
        self.authorize(token)?;

        let mut objects = self
            .objects
            .write()
            .map_err(|_| TransportError::NetworkFailure("Lock poisoned".to_string()))?;

        // Keep creation times strictly increasing even within one clock tick.
        let now = Utc::now();
        let created = match objects.last() {
            Some((last, _)) if *last >= now => *last + chrono::Duration::milliseconds(1),
            _ => now,
        };
        objects.push((created, blob.to_vec()));
        self.uploads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn download_latest(&self, token: &AccessToken) -> Result<Option<Vec<u8>>, TransportError> {
        self.authorize(token)?;

        let latest = self.latest()?;
        if latest.is_some() {
            self.downloads.fetch_add(1, Ordering::SeqCst);
        }
        Ok(latest.map(|(_, blob)| blob))
    }

    async fn latest_created_time(
        &self,
        token: &AccessToken,
    ) -> Result<Option<DateTime<Utc>>, TransportError> {
        self.authorize(token)?;
        Ok(self.latest()?.map(|(created, _)| created))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_latest_wins() {
        let transport = MemoryTransport::new();
        let token = AccessToken::new("token");

        assert!(transport.download_latest(&token).await.unwrap().is_none());
        assert_eq!(transport.download_count(), 0);

        transport.upload(b"first", &token).await.unwrap();
        transport.upload(b"second", &token).await.unwrap();

        assert_eq!(
            transport.download_latest(&token).await.unwrap(),
            Some(b"second".to_vec())
        );
        assert_eq!(transport.upload_count(), 2);
        assert!(transport.latest_created_time(&token).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_rejects_tokens() {
        let transport = MemoryTransport::new();
        transport.set_reject_tokens(true);

        let result = transport.upload(b"blob", &AccessToken::new("token")).await;
        assert!(matches!(result, Err(TransportError::Unauthorized)));
        assert_eq!(transport.upload_count(), 0);
    }
}
