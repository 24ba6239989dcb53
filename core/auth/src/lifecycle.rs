//! Token lifecycle management.
//!
//! Decides, per request, whether the stored access token can be used as-is,
//! must be exchanged before returning, or can be returned while a refresh
//! runs in the background:
//!
//! | stored expiry            | action                                  |
//! |--------------------------|-----------------------------------------|
//! | more than margin ahead   | return stored token                     |
//! | within margin or past    | exchange now, return the new token      |
//! | unknown                  | return stored token, refresh in background |
//! | no credential            | exchange now                            |

use chrono::{Duration, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use lockbox_common::{AccessToken, StoreError, TokenError};
use lockbox_storage::CredentialStore;

use crate::identity::{ExchangeOutcome, ExchangeRequest, IdentityProvider};
use crate::scope::{ScopeGuard, SessionScope};

/// Default window before expiry in which a token is refreshed.
pub const DEFAULT_REFRESH_MARGIN_SECS: i64 = 60;

/// In-flight marker for background refreshes.
///
/// Holds `generation + 1` of the refresh currently running, or 0. A refresh
/// left over from a cancelled generation never blocks or releases one
/// started after it.
struct RefreshSlot(Arc<AtomicU64>);

impl RefreshSlot {
    fn claim(&self, session: &ScopeGuard) -> Option<InFlightReset> {
        let tag = session.generation() + 1;
        let held = self.0.load(Ordering::SeqCst);
        if held == tag {
            return None;
        }

        self.0
            .compare_exchange(held, tag, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| InFlightReset {
                slot: self.0.clone(),
                tag,
            })
    }
}

/// Releases the in-flight marker when the background refresh ends or is
/// dropped, unless a newer generation has taken it over.
struct InFlightReset {
    slot: Arc<AtomicU64>,
    tag: u64,
}

impl Drop for InFlightReset {
    fn drop(&mut self) {
        let _ = self
            .slot
            .compare_exchange(self.tag, 0, Ordering::SeqCst, Ordering::SeqCst);
    }
}

/// Hands out usable access tokens, refreshing them as needed.
pub struct TokenLifecycleManager {
    store: Arc<CredentialStore>,
    identity: Arc<dyn IdentityProvider>,
    scope: Arc<SessionScope>,
    scopes: Vec<String>,
    refresh_margin: Duration,
    refresh_in_flight: RefreshSlot,
}

impl TokenLifecycleManager {
    /// Create a manager with the default refresh margin.
    pub fn new(
        store: Arc<CredentialStore>,
        identity: Arc<dyn IdentityProvider>,
        scope: Arc<SessionScope>,
        scopes: Vec<String>,
    ) -> Self {
        Self {
            store,
            identity,
            scope,
            scopes,
            refresh_margin: Duration::seconds(DEFAULT_REFRESH_MARGIN_SECS),
            refresh_in_flight: RefreshSlot(Arc::new(AtomicU64::new(0))),
        }
    }

    /// Override the refresh margin.
    pub fn with_refresh_margin(mut self, margin: Duration) -> Self {
        self.refresh_margin = margin;
        self
    }

    /// Credential store backing this manager.
    pub fn store(&self) -> &Arc<CredentialStore> {
        &self.store
    }

    /// Get a usable access token.
    ///
    /// `account_hint` names the account to exchange for when the stored
    /// credential carries none.
    ///
    /// # Postconditions
    /// - `Ok(None)` if no token could be obtained for a reason other than
    ///   consent or a missing account
    /// - `Ok(None)` if the session was signed out while an exchange was
    ///   running; the exchanged token is neither persisted nor returned
    ///
    /// # Errors
    /// - `ConsentRequired` if the user has to grant access interactively
    /// - `NoAccount` if an exchange is needed and no account is known
    pub async fn get_token(
        &self,
        account_hint: Option<&str>,
    ) -> Result<Option<AccessToken>, TokenError> {
        let credential = match self.store.load().await {
            Ok(credential) => credential,
            Err(e) => {
                warn!("Credential load failed, exchanging: {}", e);
                None
            }
        };

        let Some(credential) = credential else {
            let account = account_hint.ok_or(TokenError::NoAccount)?;
            debug!("No stored credential; exchanging on demand");
            return self.exchange(account, None).await;
        };

        let account = account_hint
            .map(str::to_string)
            .or_else(|| credential.user_id.clone());

        match credential.expiry() {
            Some(expires_at) if Utc::now() < expires_at - self.refresh_margin => {
                Ok(Some(credential.token()))
            }
            Some(_) => {
                let account = account.ok_or(TokenError::NoAccount)?;
                info!("Access token expiring; refreshing");
                self.exchange(&account, credential.refresh_token.as_deref())
                    .await
            }
            None => {
                match account {
                    Some(account) => {
                        self.schedule_refresh(account, credential.refresh_token.clone())
                    }
                    None => debug!("Unknown expiry and no account; skipping refresh"),
                }
                Ok(Some(credential.token()))
            }
        }
    }

    async fn exchange(
        &self,
        account: &str,
        refresh_token: Option<&str>,
    ) -> Result<Option<AccessToken>, TokenError> {
        let session = self.scope.current();
        let request = ExchangeRequest {
            account_id: account.to_string(),
            scopes: self.scopes.clone(),
            refresh_token: refresh_token.map(str::to_string),
        };

        match self.identity.exchange_token(request).await {
            ExchangeOutcome::Token(issued) => {
                if !self.scope.is_current(&session) {
                    info!("Session ended during exchange; discarding token");
                    return Ok(None);
                }

                let mut credential = issued.to_credential(account);
                if credential.refresh_token.is_none() {
                    credential.refresh_token = refresh_token.map(str::to_string);
                }

                match self.store.save_if_signed_in(&credential).await {
                    Ok(true) => {}
                    Ok(false) => {
                        info!("Signed out during exchange; discarding token");
                        return Ok(None);
                    }
                    Err(e) => warn!("Failed to persist exchanged token: {}", e),
                }
                Ok(Some(credential.token()))
            }
            ExchangeOutcome::ConsentRequired(intent) => Err(TokenError::ConsentRequired(intent)),
            ExchangeOutcome::Failure(reason) => {
                warn!("Token exchange failed: {}", reason);
                Ok(None)
            }
        }
    }

    fn schedule_refresh(&self, account: String, refresh_token: Option<String>) {
        let session = self.scope.current();
        let Some(reset) = self.refresh_in_flight.claim(&session) else {
            debug!("Background refresh already in flight");
            return;
        };

        let identity = self.identity.clone();
        let store = self.store.clone();
        let scope = self.scope.clone();
        let request = ExchangeRequest {
            account_id: account,
            scopes: self.scopes.clone(),
            refresh_token,
        };

        debug!("Scheduling background refresh");
        self.scope.spawn(move |_| async move {
            let _reset = reset;
            if !scope.is_current(&session) {
                debug!("Session ended before refresh started");
                return;
            }

            let previous_refresh = request.refresh_token.clone();
            let account = request.account_id.clone();

            match identity.exchange_token(request).await {
                ExchangeOutcome::Token(issued) => {
                    if !scope.is_current(&session) {
                        debug!("Session ended; discarding refreshed token");
                        return;
                    }

                    let mut credential = issued.to_credential(&account);
                    if credential.refresh_token.is_none() {
                        credential.refresh_token = previous_refresh;
                    }

                    match store.save_if_signed_in(&credential).await {
                        Ok(true) => info!("Access token refreshed in background"),
                        Ok(false) => debug!("Signed out; refreshed token discarded"),
                        Err(e) => warn!("Failed to persist refreshed token: {}", e),
                    }
                }
                ExchangeOutcome::ConsentRequired(_) => {
                    warn!("Background refresh needs user consent")
                }
                ExchangeOutcome::Failure(reason) => warn!("Background refresh failed: {}", reason),
            }
        });
    }

    /// Mark the stored access token as expired.
    ///
    /// The refresh token is kept, so the next [`get_token`](Self::get_token)
    /// exchanges instead of reusing a token the server rejected.
    pub async fn invalidate(&self) -> Result<(), StoreError> {
        let Some(mut credential) = self.store.load().await? else {
            return Ok(());
        };

        let expired = Utc::now() - Duration::seconds(1);
        credential.expires_at = Some(expired.timestamp_millis());

        self.store.save_if_signed_in(&credential).await?;
        info!("Stored access token invalidated");
        Ok(())
    }

    /// Sign out: cancel background refreshes and clear all credentials.
    ///
    /// # Errors
    /// - `PersistFailed` if the sign-out marker could not be persisted
    ///   (it is still in effect for this process)
    pub async fn sign_out(&self) -> Result<(), StoreError> {
        self.scope.cancel_and_reset();
        self.store.clear().await?;
        info!("Signed out");
        Ok(())
    }
}
