//! Durable sign-out marker.

use std::sync::atomic::{AtomicBool, Ordering};
use tracing::warn;

use lockbox_common::StoreError;

use crate::prefs::PlainPrefs;

/// Preference key holding the marker.
pub const KEY_USER_SIGNED_OUT: &str = "user_signed_out";

/// Flag recording an explicit sign-out.
///
/// While set, credential reads report "no credential" regardless of what
/// the backends still hold. The in-process value changes immediately;
/// persisting it is best effort.
pub struct SignOutFlag {
    prefs: PlainPrefs,
    set: AtomicBool,
}

impl SignOutFlag {
    /// Load the flag from a plain preference namespace.
    pub fn new(prefs: PlainPrefs) -> Self {
        let set = prefs.get_bool(KEY_USER_SIGNED_OUT).unwrap_or(false);
        Self {
            prefs,
            set: AtomicBool::new(set),
        }
    }

    /// Flag that is not persisted.
    pub fn in_memory() -> Self {
        Self::new(PlainPrefs::in_memory())
    }

    /// Whether the user has signed out.
    pub fn is_set(&self) -> bool {
        self.set.load(Ordering::SeqCst)
    }

    /// Record a sign-out.
    ///
    /// # Errors
    /// - The marker could not be persisted (it is still set in-process)
    pub async fn set(&self) -> Result<(), StoreError> {
        self.set.store(true, Ordering::SeqCst);
        self.prefs.set_bool(KEY_USER_SIGNED_OUT, true).await
    }

    /// Forget a previous sign-out.
    pub async fn clear(&self) {
        self.set.store(false, Ordering::SeqCst);
        if let Err(e) = self.prefs.set_bool(KEY_USER_SIGNED_OUT, false).await {
            warn!("Failed to persist sign-out marker clear: {}", e);
        }
    }
}
