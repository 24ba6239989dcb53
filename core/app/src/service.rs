//! Backup service: the boundary the user interface talks to.

use std::sync::Arc;
use tracing::{info, warn};

use lockbox_auth::{IdentityProvider, OAuthIdentity, SessionScope, TokenLifecycleManager};
use lockbox_common::{AccessToken, BackupError, Error, Result, TokenError, TransportError};
use lockbox_crypto::{DeviceKeyProvider, KeyringKeyStore, SecureKeyStore};
use lockbox_storage::{
    CredentialBackend, CredentialStore, DriveTransport, EncryptedPrefs, KeychainBackend,
    PlainPrefs, RemoteBackupTransport, SignOutFlag, StoredCredential,
};
use lockbox_vault::{BackupCodec, BackupMode, BackupPayload};

use crate::config::LockboxConfig;

/// Run blocking codec work off the async executor.
async fn blocking<T, F>(op: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    tokio::task::spawn_blocking(op)
        .await
        .map_err(|e| Error::Io(std::io::Error::other(format!("Blocking task failed: {}", e))))
}

/// Backup, restore and session operations.
///
/// Owns the session scope on which background token refreshes run; signing
/// out cancels them.
pub struct BackupService {
    tokens: Arc<TokenLifecycleManager>,
    transport: Arc<dyn RemoteBackupTransport>,
    codec: Arc<BackupCodec>,
    scope: Arc<SessionScope>,
    account: Option<String>,
}

impl BackupService {
    /// Assemble a service from its parts.
    pub fn new(
        tokens: Arc<TokenLifecycleManager>,
        transport: Arc<dyn RemoteBackupTransport>,
        codec: Arc<BackupCodec>,
        scope: Arc<SessionScope>,
    ) -> Self {
        Self {
            tokens,
            transport,
            codec,
            scope,
            account: None,
        }
    }

    /// Build the production service described by `config`.
    ///
    /// Credentials go to the OS keychain first and to an encrypted file in
    /// the data directory second. If the keychain is unavailable only the
    /// file is used.
    ///
    /// # Errors
    /// - The preferences file exists but is unreadable
    /// - The OAuth or Drive configuration is invalid
    pub async fn from_config(config: &LockboxConfig) -> Result<Self> {
        let key_store: Arc<dyn SecureKeyStore> =
            Arc::new(KeyringKeyStore::new(config.keyring_service.as_str()));

        let mut backends: Vec<Arc<dyn CredentialBackend>> = Vec::new();
        match KeychainBackend::new(&config.keyring_service) {
            Ok(keychain) => backends.push(Arc::new(keychain)),
            Err(e) => warn!("Keychain unavailable, using encrypted file only: {}", e),
        }
        let prefs_keys = Arc::new(DeviceKeyProvider::new(
            key_store.clone(),
            config.prefs_key_alias.as_str(),
        ));
        backends.push(Arc::new(EncryptedPrefs::new(
            config.credentials_path(),
            prefs_keys,
        )));

        let sign_out = Arc::new(SignOutFlag::new(
            PlainPrefs::open(config.prefs_path()).await?,
        ));
        let store = Arc::new(CredentialStore::new(backends, sign_out));

        let identity: Arc<dyn IdentityProvider> = Arc::new(OAuthIdentity::new(config.oauth.clone())?);
        let scope = Arc::new(SessionScope::new());
        let tokens = Arc::new(
            TokenLifecycleManager::new(store, identity, scope.clone(), config.scopes.clone())
                .with_refresh_margin(chrono::Duration::seconds(config.refresh_margin_secs)),
        );

        let transport = Arc::new(DriveTransport::new(config.drive.clone())?);
        let codec = Arc::new(BackupCodec::new(Arc::new(DeviceKeyProvider::new(
            key_store,
            config.device_key_alias.as_str(),
        ))));

        Ok(Self::new(tokens, transport, codec, scope))
    }

    /// Use `account` when a token exchange needs an account.
    pub fn with_account(mut self, account: impl Into<String>) -> Self {
        self.account = Some(account.into());
        self
    }

    /// Session scope owning background refreshes.
    pub fn scope(&self) -> &Arc<SessionScope> {
        &self.scope
    }

    async fn token(&self) -> Result<AccessToken> {
        self.tokens
            .get_token(self.account.as_deref())
            .await?
            .ok_or_else(|| {
                Error::Token(TokenError::ExchangeFailed(
                    "No access token available".to_string(),
                ))
            })
    }

    /// Invalidate the stored token when the remote store rejected it.
    async fn transport_error(&self, error: TransportError) -> Error {
        if error == TransportError::Unauthorized {
            warn!("Access token rejected by remote store; invalidating");
            if let Err(e) = self.tokens.invalidate().await {
                warn!("Failed to invalidate access token: {}", e);
            }
        }
        Error::Transport(error)
    }

    /// Encrypt `payload` and upload it as a new backup.
    ///
    /// # Errors
    /// - `ConsentRequired` if the user has to grant access first
    /// - `Unauthorized` if the remote store rejected the token; the stored
    ///   token is invalidated and the call is not retried
    pub async fn perform_backup(&self, payload: BackupPayload, mode: BackupMode) -> Result<()> {
        let codec = self.codec.clone();
        let mode_name = mode.name();
        let blob = blocking(move || codec.encode(&payload, &mode)).await??;

        let token = self.token().await?;
        if let Err(e) = self.transport.upload(blob.as_bytes(), &token).await {
            return Err(self.transport_error(e).await);
        }

        info!(mode = mode_name, "Backup uploaded");
        Ok(())
    }

    /// Download and decrypt the newest backup.
    ///
    /// # Postconditions
    /// - `Ok(None)` if no backup exists
    ///
    /// # Errors
    /// - `WrongPassphrase` if the backup cannot be opened or parsed with `mode`
    pub async fn perform_restore(&self, mode: BackupMode) -> Result<Option<BackupPayload>> {
        let token = self.token().await?;
        let blob = match self.transport.download_latest(&token).await {
            Ok(Some(blob)) => blob,
            Ok(None) => {
                info!("No backup to restore");
                return Ok(None);
            }
            Err(e) => return Err(self.transport_error(e).await),
        };

        let Ok(blob) = String::from_utf8(blob) else {
            warn!("Downloaded backup is not text");
            return Err(BackupError::WrongPassphrase.into());
        };

        let codec = self.codec.clone();
        match blocking(move || codec.decode(&blob, &mode)).await? {
            Ok(Some(payload)) => {
                info!(counts = %payload.counts(), "Backup restored");
                Ok(Some(payload))
            }
            Ok(None) => Err(BackupError::WrongPassphrase.into()),
            Err(e) => {
                warn!("Restored backup is unreadable: {}", e);
                Err(BackupError::WrongPassphrase.into())
            }
        }
    }

    /// Creation time of the newest backup, RFC 3339 formatted.
    pub async fn last_backup_timestamp(&self) -> Result<Option<String>> {
        let token = self.token().await?;
        match self.transport.latest_created_time(&token).await {
            Ok(created) => Ok(created.map(|t| t.to_rfc3339())),
            Err(e) => Err(self.transport_error(e).await),
        }
    }

    /// Store the credential obtained from an interactive sign-in.
    ///
    /// Lifts a previous sign-out.
    pub async fn sign_in(&self, credential: StoredCredential) -> Result<()> {
        self.tokens.store().save(&credential).await?;
        info!("Signed in");
        Ok(())
    }

    /// Cancel background work and forget all credentials.
    pub async fn sign_out(&self) -> Result<()> {
        self.tokens.sign_out().await?;
        Ok(())
    }

    /// Whether an explicit sign-out is in effect.
    pub fn is_signed_out(&self) -> bool {
        self.tokens.store().is_signed_out()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{Duration, Utc};
    use lockbox_auth::{ExchangeOutcome, ExchangeRequest, IssuedToken};
    use lockbox_common::{ConsentIntent, Passphrase};
    use lockbox_crypto::MemoryKeyStore;
    use lockbox_storage::{MemoryBackend, MemoryTransport};
    use lockbox_vault::Note;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Issues `token-N` for the N-th exchange, or asks for consent.
    struct CountingIdentity {
        calls: AtomicUsize,
        consent: bool,
    }

    #[async_trait]
    impl IdentityProvider for CountingIdentity {
        async fn exchange_token(&self, request: ExchangeRequest) -> ExchangeOutcome {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.consent {
                return ExchangeOutcome::ConsentRequired(ConsentIntent {
                    url: "https://accounts.example.com/consent".to_string(),
                    account: Some(request.account_id.clone()),
                    reason: "invalid_grant".to_string(),
                });
            }
            ExchangeOutcome::Token(IssuedToken {
                access_token: format!("token-{}", n),
                refresh_token: None,
                expires_at: Some(Utc::now() + Duration::hours(1)),
            })
        }
    }

    struct Fixture {
        service: BackupService,
        transport: Arc<MemoryTransport>,
        identity: Arc<CountingIdentity>,
        store: Arc<CredentialStore>,
    }

    fn fixture(consent: bool) -> Fixture {
        let store = Arc::new(CredentialStore::two_tier(
            Arc::new(MemoryBackend::new("primary")),
            Arc::new(MemoryBackend::new("fallback")),
            Arc::new(SignOutFlag::in_memory()),
        ));
        let identity = Arc::new(CountingIdentity {
            calls: AtomicUsize::new(0),
            consent,
        });
        let scope = Arc::new(SessionScope::new());
        let tokens = Arc::new(TokenLifecycleManager::new(
            store.clone(),
            identity.clone(),
            scope.clone(),
            vec![],
        ));
        let transport = Arc::new(MemoryTransport::new());
        let codec = Arc::new(BackupCodec::new(Arc::new(DeviceKeyProvider::new(
            Arc::new(MemoryKeyStore::new()),
            "backup",
        ))));

        Fixture {
            service: BackupService::new(tokens, transport.clone(), codec, scope),
            transport,
            identity,
            store,
        }
    }

    async fn signed_in(consent: bool) -> Fixture {
        let f = fixture(consent);
        f.service
            .sign_in(
                StoredCredential::new("signed-in")
                    .with_refresh_token("rt")
                    .with_user_id("user@example.com")
                    .with_expires_at(Utc::now() + Duration::hours(1)),
            )
            .await
            .unwrap();
        f
    }

    fn payload() -> BackupPayload {
        BackupPayload {
            notes: vec![Note {
                id: 1,
                title: "hello".to_string(),
                content: "world".to_string(),
                created_at: 1,
                updated_at: 2,
            }],
            ..BackupPayload::default()
        }
    }

    #[tokio::test]
    async fn test_device_backup_and_restore() {
        let f = signed_in(false).await;

        f.service
            .perform_backup(payload(), BackupMode::Device)
            .await
            .unwrap();
        let restored = f.service.perform_restore(BackupMode::Device).await.unwrap();

        assert_eq!(restored, Some(payload()));
        assert_eq!(f.identity.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_wrong_passphrase() {
        let f = signed_in(false).await;

        f.service
            .perform_backup(payload(), BackupMode::Passphrase(Passphrase::from("correct-horse")))
            .await
            .unwrap();
        let result = f
            .service
            .perform_restore(BackupMode::Passphrase(Passphrase::from("wrong-horse")))
            .await;

        assert!(matches!(
            result,
            Err(Error::Backup(BackupError::WrongPassphrase))
        ));
    }

    #[tokio::test]
    async fn test_restore_without_backup() {
        let f = signed_in(false).await;

        assert!(f
            .service
            .perform_restore(BackupMode::Device)
            .await
            .unwrap()
            .is_none());
        assert_eq!(f.transport.download_count(), 0);
    }

    #[tokio::test]
    async fn test_unauthorized_invalidates_token() {
        let f = signed_in(false).await;
        f.transport.set_reject_tokens(true);

        let result = f.service.perform_backup(payload(), BackupMode::Device).await;
        assert!(matches!(
            result,
            Err(Error::Transport(TransportError::Unauthorized))
        ));

        let stored = f.store.load().await.unwrap().unwrap();
        assert!(stored.expiry().unwrap() < Utc::now());
        assert_eq!(stored.refresh_token.as_deref(), Some("rt"));

        // The next call exchanges instead of reusing the rejected token.
        f.transport.set_reject_tokens(false);
        f.service
            .perform_backup(payload(), BackupMode::Device)
            .await
            .unwrap();
        assert_eq!(f.identity.calls.load(Ordering::SeqCst), 1);
        assert_eq!(f.transport.upload_count(), 1);
    }

    #[tokio::test]
    async fn test_last_backup_timestamp() {
        let f = signed_in(false).await;
        assert!(f.service.last_backup_timestamp().await.unwrap().is_none());

        f.service
            .perform_backup(payload(), BackupMode::Device)
            .await
            .unwrap();
        let timestamp = f.service.last_backup_timestamp().await.unwrap().unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(&timestamp).is_ok());
    }

    #[tokio::test]
    async fn test_sign_out_then_sign_in() {
        let f = signed_in(false).await;

        f.service.sign_out().await.unwrap();
        assert!(f.service.is_signed_out());

        let result = f.service.perform_backup(payload(), BackupMode::Device).await;
        assert!(matches!(result, Err(Error::Token(TokenError::NoAccount))));

        f.service
            .sign_in(StoredCredential::new("again").with_expires_at(Utc::now() + Duration::hours(1)))
            .await
            .unwrap();
        assert!(!f.service.is_signed_out());
        f.service
            .perform_backup(payload(), BackupMode::Device)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_consent_required_surfaces() {
        let f = fixture(true);
        let service = f.service.with_account("user@example.com");

        let error = service
            .perform_backup(payload(), BackupMode::Device)
            .await
            .unwrap_err();

        let intent = error.consent_intent().unwrap();
        assert_eq!(intent.account.as_deref(), Some("user@example.com"));
        assert_eq!(f.transport.upload_count(), 0);
    }
}
