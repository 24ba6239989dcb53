//! Tiered credential store.
//!
//! Backends form an ordered list, highest precedence first:
//! - write: the first backend that accepts the credential wins; backends
//!   above it that rejected the write are cleared, and any that cannot be
//!   cleared are skipped on read until they accept a write again
//! - read: the first backend that returns a credential wins; misses and
//!   errors fall through to the next backend
//! - after any read, the sign-out marker is checked again and suppresses
//!   the result if it was set meanwhile
//!
//! While the sign-out marker is set, no backend is consulted at all.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use lockbox_common::StoreError;

use crate::backend::CredentialBackend;
use crate::credential::StoredCredential;
use crate::signout::SignOutFlag;

struct Tier {
    backend: Arc<dyn CredentialBackend>,
    /// One in-flight operation per backend.
    lock: Mutex<()>,
    /// Holds a credential older than one written to a lower tier.
    stale: AtomicBool,
}

/// Credential persistence over an ordered list of backends.
pub struct CredentialStore {
    tiers: Vec<Tier>,
    sign_out: Arc<SignOutFlag>,
    /// Serializes saves against clears so a save cannot interleave with
    /// a sign-out.
    transition: Mutex<()>,
}

impl CredentialStore {
    /// Create a store over `backends`, highest precedence first.
    pub fn new(backends: Vec<Arc<dyn CredentialBackend>>, sign_out: Arc<SignOutFlag>) -> Self {
        let tiers = backends
            .into_iter()
            .map(|backend| Tier {
                backend,
                lock: Mutex::new(()),
                stale: AtomicBool::new(false),
            })
            .collect();

        Self {
            tiers,
            sign_out,
            transition: Mutex::new(()),
        }
    }

    /// Create the usual primary/fallback pair.
    pub fn two_tier(
        primary: Arc<dyn CredentialBackend>,
        fallback: Arc<dyn CredentialBackend>,
        sign_out: Arc<SignOutFlag>,
    ) -> Self {
        Self::new(vec![primary, fallback], sign_out)
    }

    /// Whether an explicit sign-out is in effect.
    pub fn is_signed_out(&self) -> bool {
        self.sign_out.is_set()
    }

    async fn write_first(&self, credential: &StoredCredential) -> Result<(), StoreError> {
        let mut failures = Vec::new();

        for (index, tier) in self.tiers.iter().enumerate() {
            let guard = tier.lock.lock().await;
            match tier.backend.write(credential).await {
                Ok(()) => {
                    tier.stale.store(false, Ordering::SeqCst);
                    drop(guard);
                    debug!(backend = tier.backend.name(), "Credential saved");
                    self.retire_above(index).await;
                    return Ok(());
                }
                Err(e) => {
                    warn!(backend = tier.backend.name(), "Credential write failed: {}", e);
                    failures.push(format!("{}: {}", tier.backend.name(), e));
                }
            }
        }

        Err(StoreError::PersistFailed(if failures.is_empty() {
            "No credential backends configured".to_string()
        } else {
            failures.join("; ")
        }))
    }

    /// Clear the tiers above `index` after a write landed on `index`, so
    /// their older credential cannot shadow the new one.
    async fn retire_above(&self, index: usize) {
        for tier in &self.tiers[..index] {
            let _guard = tier.lock.lock().await;
            match tier.backend.clear().await {
                Ok(()) => tier.stale.store(false, Ordering::SeqCst),
                Err(e) => {
                    warn!(
                        backend = tier.backend.name(),
                        "Could not clear outdated credential, ignoring backend on read: {}", e
                    );
                    tier.stale.store(true, Ordering::SeqCst);
                }
            }
        }
    }

    /// Persist a credential and lift any sign-out.
    ///
    /// # Errors
    /// - `PersistFailed` if every backend rejected the write
    pub async fn save(&self, credential: &StoredCredential) -> Result<(), StoreError> {
        let _transition = self.transition.lock().await;

        self.write_first(credential).await?;
        self.sign_out.clear().await;
        Ok(())
    }

    /// Persist a credential unless the user has signed out.
    ///
    /// Used by background refreshes, which must never undo a sign-out.
    /// Returns whether the credential was written.
    pub async fn save_if_signed_in(&self, credential: &StoredCredential) -> Result<bool, StoreError> {
        let _transition = self.transition.lock().await;

        if self.sign_out.is_set() {
            debug!("Signed out; discarding refreshed credential");
            return Ok(false);
        }

        self.write_first(credential).await?;
        Ok(true)
    }

    /// Load the current credential.
    ///
    /// # Errors
    /// - `ReadFailed` if every backend errored and none had a credential
    pub async fn load(&self) -> Result<Option<StoredCredential>, StoreError> {
        if self.sign_out.is_set() {
            return Ok(None);
        }

        let mut found = None;
        let mut failures = Vec::new();
        let mut consulted = 0;

        for tier in &self.tiers {
            if tier.stale.load(Ordering::SeqCst) {
                debug!(backend = tier.backend.name(), "Skipping outdated backend");
                continue;
            }

            consulted += 1;
            let _guard = tier.lock.lock().await;
            match tier.backend.read().await {
                Ok(Some(credential)) => {
                    debug!(backend = tier.backend.name(), "Credential loaded");
                    found = Some(credential);
                    break;
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(backend = tier.backend.name(), "Credential read failed: {}", e);
                    failures.push(format!("{}: {}", tier.backend.name(), e));
                }
            }
        }

        // Sign-out may have happened while we were reading.
        if self.sign_out.is_set() {
            return Ok(None);
        }

        match found {
            Some(credential) => Ok(Some(credential)),
            None if consulted > 0 && failures.len() == consulted => {
                Err(StoreError::ReadFailed(failures.join("; ")))
            }
            None => Ok(None),
        }
    }

    /// Sign out: tombstone or clear every backend and set the marker.
    ///
    /// The marker is set even if every backend fails to clear.
    ///
    /// # Errors
    /// - `PersistFailed` if the marker itself could not be persisted
    pub async fn clear(&self) -> Result<(), StoreError> {
        let _transition = self.transition.lock().await;

        let marker = self.sign_out.set().await;

        for tier in &self.tiers {
            let _guard = tier.lock.lock().await;
            match tier.backend.clear().await {
                Ok(()) => tier.stale.store(false, Ordering::SeqCst),
                Err(e) => warn!(backend = tier.backend.name(), "Credential clear failed: {}", e),
            }
        }

        info!("Credentials cleared");
        marker
    }
}
