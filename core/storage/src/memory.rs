//! In-memory credential backend for testing.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::Notify;

use lockbox_common::StoreError;

use crate::backend::CredentialBackend;
use crate::credential::StoredCredential;

/// In-memory credential backend.
///
/// Useful for testing and development. Reads and writes can be made to
/// fail to exercise tier fallback.
pub struct MemoryBackend {
    name: String,
    slot: RwLock<Option<StoredCredential>>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    reads: AtomicUsize,
    read_gate: Mutex<Option<Arc<Notify>>>,
}

impl MemoryBackend {
    /// Create a new empty backend.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            slot: RwLock::new(None),
            fail_reads: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
            reads: AtomicUsize::new(0),
            read_gate: Mutex::new(None),
        }
    }

    /// Make subsequent reads fail.
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Make subsequent writes and clears fail.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Hold every subsequent read until `gate` is notified.
    pub fn set_read_gate(&self, gate: Option<Arc<Notify>>) {
        if let Ok(mut slot) = self.read_gate.lock() {
            *slot = gate;
        }
    }

    /// Raw slot content, bypassing tombstone filtering.
    pub fn peek(&self) -> Option<StoredCredential> {
        self.slot.read().ok().and_then(|slot| slot.clone())
    }

    /// Number of reads served or attempted.
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CredentialBackend for MemoryBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn read(&self) -> Result<Option<StoredCredential>, StoreError> {
        self.reads.fetch_add(1, Ordering::SeqCst);

        let gate = self.read_gate.lock().ok().and_then(|gate| gate.clone());
        if let Some(gate) = gate {
            gate.notified().await;
        }

        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::ReadFailed(format!("{} unavailable", self.name)));
        }

        let slot = self
            .slot
            .read()
            .map_err(|_| StoreError::ReadFailed("Lock poisoned".to_string()))?;
        Ok(slot.clone().filter(|c| !c.is_tombstone()))
    }

    async fn write(&self, credential: &StoredCredential) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::PersistFailed(format!("{} unavailable", self.name)));
        }

        let mut slot = self
            .slot
            .write()
            .map_err(|_| StoreError::PersistFailed("Lock poisoned".to_string()))?;
        *slot = Some(credential.clone());
        Ok(())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::PersistFailed(format!("{} unavailable", self.name)));
        }

        let mut slot = self
            .slot
            .write()
            .map_err(|_| StoreError::PersistFailed("Lock poisoned".to_string()))?;
        *slot = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_read_clear() {
        let backend = MemoryBackend::new("memory");
        assert!(backend.read().await.unwrap().is_none());

        backend.write(&StoredCredential::new("a")).await.unwrap();
        assert_eq!(backend.read().await.unwrap(), Some(StoredCredential::new("a")));

        backend.clear().await.unwrap();
        assert!(backend.read().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_tombstone_reads_as_empty() {
        let backend = MemoryBackend::new("memory");
        backend.write(&StoredCredential::tombstone()).await.unwrap();

        assert!(backend.read().await.unwrap().is_none());
        assert!(backend.peek().unwrap().is_tombstone());
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let backend = MemoryBackend::new("memory");
        backend.set_fail_writes(true);
        assert!(backend.write(&StoredCredential::new("a")).await.is_err());

        backend.set_fail_reads(true);
        assert!(backend.read().await.is_err());
        assert_eq!(backend.read_count(), 1);
    }

    #[tokio::test]
    async fn test_read_gate_holds_read() {
        let backend = Arc::new(MemoryBackend::new("memory"));
        let gate = Arc::new(Notify::new());
        backend.set_read_gate(Some(gate.clone()));

        let reader = tokio::spawn({
            let backend = backend.clone();
            async move { backend.read().await }
        });
        tokio::task::yield_now().await;
        assert_eq!(backend.read_count(), 1);
        assert!(!reader.is_finished());

        gate.notify_one();
        assert!(reader.await.unwrap().unwrap().is_none());
    }
}
