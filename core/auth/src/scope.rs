//! Cancellable background task scope tied to a signed-in session.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::debug;

struct ScopeInner {
    cancel: CancellationToken,
    tracker: TaskTracker,
}

impl ScopeInner {
    fn new() -> Self {
        Self {
            cancel: CancellationToken::new(),
            tracker: TaskTracker::new(),
        }
    }
}

/// Proof that a task was started in a particular scope generation.
#[derive(Debug, Clone)]
pub struct ScopeGuard {
    generation: u64,
    cancel: CancellationToken,
}

impl ScopeGuard {
    /// Generation this guard belongs to.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether the owning scope has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Supervised group of background tasks for one session.
///
/// Cancelling the scope stops every task at its next await point and opens
/// a fresh generation for tasks spawned afterwards. Tasks must check
/// [`SessionScope::is_current`] before any side effect that outlives them.
pub struct SessionScope {
    inner: Mutex<ScopeInner>,
    generation: AtomicU64,
}

impl SessionScope {
    /// Create an empty scope.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(ScopeInner::new()),
            generation: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ScopeInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Current generation.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Guard for the current generation without spawning anything.
    ///
    /// Lets foreground work check, after an await, that no sign-out
    /// happened in between.
    pub fn current(&self) -> ScopeGuard {
        let inner = self.lock();
        ScopeGuard {
            generation: self.generation(),
            cancel: inner.cancel.clone(),
        }
    }

    /// Spawn a task in the current generation.
    ///
    /// The task is dropped as soon as the scope is cancelled.
    ///
    /// # Preconditions
    /// - Called from within a Tokio runtime
    pub fn spawn<F, Fut>(&self, task: F) -> ScopeGuard
    where
        F: FnOnce(ScopeGuard) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let inner = self.lock();
        let guard = ScopeGuard {
            generation: self.generation(),
            cancel: inner.cancel.clone(),
        };

        let cancel = inner.cancel.clone();
        let future = task(guard.clone());
        inner.tracker.spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => debug!("Background task cancelled"),
                _ = future => {}
            }
        });

        guard
    }

    /// Whether a task holding `guard` may still act on behalf of the session.
    pub fn is_current(&self, guard: &ScopeGuard) -> bool {
        !guard.is_cancelled() && guard.generation == self.generation()
    }

    /// Cancel every task and start a new generation.
    pub fn cancel_and_reset(&self) {
        let mut inner = self.lock();
        inner.cancel.cancel();
        inner.tracker.close();
        *inner = ScopeInner::new();
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(generation, "Session scope reset");
    }

    /// Number of tasks still running in the current generation.
    pub fn in_flight(&self) -> usize {
        self.lock().tracker.len()
    }

    /// Wait until every task of the current generation has finished.
    pub async fn wait_idle(&self) {
        let tracker = self.lock().tracker.clone();
        tracker.close();
        tracker.wait().await;
        tracker.reopen();
    }
}

impl Default for SessionScope {
    fn default() -> Self {
        Self::new()
    }
}
