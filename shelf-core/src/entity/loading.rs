//! Loading Signal
//!
//! An entity whose initial state arrives asynchronously exposes a
//! [`LoadingSignal`] through [`Entity::loading`](super::Entity::loading).
//! The subscription hook reports the entity as loading until the signal
//! resolves, and treats resolution as the event that first reveals it.
//!
//! The signal resolves once and stays resolved.

use std::sync::Arc;

use tokio::sync::watch;

/// One-shot "initial data is available" marker.
///
/// Clones share state, so an entity can keep one copy and hand another to
/// the task that fills it in.
#[derive(Clone)]
pub struct LoadingSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl LoadingSignal {
    /// A signal that has not resolved yet.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// A signal that is already resolved.
    pub fn resolved() -> Self {
        let signal = Self::new();
        signal.resolve();
        signal
    }

    /// Mark the entity as loaded and wake every waiter.
    ///
    /// Returns true if this call performed the resolution.
    pub fn resolve(&self) -> bool {
        !self.tx.send_replace(true)
    }

    pub fn is_resolved(&self) -> bool {
        *self.tx.borrow()
    }

    /// Wait until the signal resolves. Returns immediately if it already has.
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so this only returns once resolved.
        let _ = rx.wait_for(|loaded| *loaded).await;
    }
}

impl Default for LoadingSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for LoadingSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadingSignal")
            .field("resolved", &self.is_resolved())
            .finish()
    }
}
