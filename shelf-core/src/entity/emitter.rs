//! Change Emitter
//!
//! Every entity owns one emitter. Consumers subscribe a callback and get back
//! a [`ChangeSubscription`] guard; the entity calls [`ChangeEmitter::emit`]
//! after mutating state it wants observed. Mutation alone is never observable.
//!
//! # Delivery
//!
//! - Listeners run synchronously on the emitting thread, in subscription order.
//! - Each emission calls each listener at most once.
//! - The listener list is snapshotted before delivery, so a listener may
//!   subscribe, unsubscribe, or emit again without deadlocking.
//! - A listener removed while an emission is in flight is skipped for the
//!   rest of that emission.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::Mutex;
use smallvec::SmallVec;
use tracing::trace;

/// Unique identifier for a change listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl ListenerId {
    fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

type Listener = Arc<dyn Fn() + Send + Sync>;

struct Slot {
    callback: Listener,
    /// Cleared on unsubscribe so in-flight emissions skip the listener.
    active: Arc<AtomicBool>,
}

struct EmitterInner {
    listeners: Mutex<IndexMap<ListenerId, Slot>>,
    version: AtomicU64,
}

impl EmitterInner {
    fn remove(&self, id: ListenerId) -> bool {
        match self.listeners.lock().shift_remove(&id) {
            Some(slot) => {
                slot.active.store(false, Ordering::SeqCst);
                trace!(?id, "change listener removed");
                true
            }
            None => false,
        }
    }
}

/// Per-entity publish/subscribe channel for "changed" notifications.
///
/// Cloning an emitter yields another handle to the same listener list.
#[derive(Clone)]
pub struct ChangeEmitter {
    inner: Arc<EmitterInner>,
}

impl ChangeEmitter {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(EmitterInner {
                listeners: Mutex::new(IndexMap::new()),
                version: AtomicU64::new(0),
            }),
        }
    }

    /// Register a listener.
    ///
    /// The listener stays registered until the returned guard is dropped or
    /// [`ChangeSubscription::unsubscribe`] is called. Subscribing the same
    /// closure twice creates two independent listeners.
    #[must_use = "dropping the subscription unsubscribes immediately"]
    pub fn subscribe<F>(&self, listener: F) -> ChangeSubscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        let id = ListenerId::next();
        self.inner.listeners.lock().insert(
            id,
            Slot {
                callback: Arc::new(listener),
                active: Arc::new(AtomicBool::new(true)),
            },
        );
        trace!(?id, "change listener added");

        ChangeSubscription {
            id,
            emitter: Arc::downgrade(&self.inner),
        }
    }

    /// Remove a listener by ID. Returns false if it was already gone.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        self.inner.remove(id)
    }

    /// Notify every current listener.
    pub fn emit(&self) {
        let version = self.inner.version.fetch_add(1, Ordering::SeqCst) + 1;

        let snapshot: SmallVec<[(Listener, Arc<AtomicBool>); 4]> = self
            .inner
            .listeners
            .lock()
            .values()
            .map(|slot| (Arc::clone(&slot.callback), Arc::clone(&slot.active)))
            .collect();

        trace!(version, listeners = snapshot.len(), "emitting change");

        for (callback, active) in snapshot {
            if active.load(Ordering::SeqCst) {
                callback();
            }
        }
    }

    /// Number of emissions so far.
    pub fn version(&self) -> u64 {
        self.inner.version.load(Ordering::SeqCst)
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.lock().len()
    }

    /// Drop every listener. Used when the owning entity is destroyed.
    pub(crate) fn clear(&self) {
        let drained: Vec<Slot> = self.inner.listeners.lock().drain(..).map(|(_, slot)| slot).collect();
        for slot in drained {
            slot.active.store(false, Ordering::SeqCst);
        }
    }
}

impl Default for ChangeEmitter {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ChangeEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeEmitter")
            .field("version", &self.version())
            .field("listener_count", &self.listener_count())
            .finish()
    }
}

/// Guard for a registered change listener. Dropping it unsubscribes.
///
/// The guard holds the emitter weakly, so it never keeps an entity's
/// listener list alive on its own.
#[derive(Debug)]
pub struct ChangeSubscription {
    id: ListenerId,
    emitter: Weak<EmitterInner>,
}

impl ChangeSubscription {
    pub fn id(&self) -> ListenerId {
        self.id
    }

    /// Unsubscribe now.
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for ChangeSubscription {
    fn drop(&mut self) {
        if let Some(inner) = self.emitter.upgrade() {
            inner.remove(self.id);
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
