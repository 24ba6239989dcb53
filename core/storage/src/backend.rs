//! Credential backend trait definition.

use async_trait::async_trait;

use lockbox_common::StoreError;

use crate::credential::StoredCredential;

/// One tier of credential persistence.
///
/// Implementations need not be internally synchronized;
/// [`CredentialStore`](crate::CredentialStore) runs at most one operation
/// per backend at a time.
#[async_trait]
pub trait CredentialBackend: Send + Sync {
    /// Short backend name for logs (e.g., "keychain", "prefs").
    fn name(&self) -> &str;

    /// Read the stored credential.
    ///
    /// # Postconditions
    /// - `Ok(None)` when nothing (or only a tombstone) is stored
    async fn read(&self) -> Result<Option<StoredCredential>, StoreError>;

    /// Replace the stored credential.
    async fn write(&self, credential: &StoredCredential) -> Result<(), StoreError>;

    /// Remove or overwrite whatever is stored.
    async fn clear(&self) -> Result<(), StoreError>;
}
