//! Internal bookkeeping embedded in every entity.
//!
//! Author-defined state and registry bookkeeping never share a namespace:
//! an entity struct holds one [`EntityCore`] field and exposes it through
//! [`Entity::core`](super::Entity::core). Everything the registry and the
//! hook need (client handle, model id, change emitter, disposers, destroyed
//! flag) lives here.

use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use super::emitter::ChangeEmitter;
use super::EntityInit;

/// Opaque handle to the sync client injected into every entity.
///
/// The registry passes it through untouched. Entity authors recover the
/// concrete client with [`ClientHandle::downcast_ref`].
#[derive(Clone)]
pub struct ClientHandle(Arc<dyn Any + Send + Sync>);

impl ClientHandle {
    pub fn new<C: Any + Send + Sync>(client: C) -> Self {
        Self(Arc::new(client))
    }

    pub fn from_arc<C: Any + Send + Sync>(client: Arc<C>) -> Self {
        Self(client)
    }

    pub fn downcast_ref<C: Any + Send + Sync>(&self) -> Option<&C> {
        self.0.downcast_ref::<C>()
    }

    pub fn downcast<C: Any + Send + Sync>(&self) -> Option<Arc<C>> {
        Arc::clone(&self.0).downcast::<C>().ok()
    }

    /// Whether both handles point at the same client.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl std::fmt::Debug for ClientHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ClientHandle(..)")
    }
}

type Disposer = Box<dyn FnOnce() + Send>;

/// Registry-owned state carried by each entity.
pub struct EntityCore {
    client: ClientHandle,
    id: Option<String>,
    emitter: ChangeEmitter,
    disposers: Mutex<Vec<Disposer>>,
    destroyed: AtomicBool,
}

impl EntityCore {
    pub fn new(init: EntityInit) -> Self {
        let (client, id) = init.into_parts();
        Self {
            client,
            id,
            emitter: ChangeEmitter::new(),
            disposers: Mutex::new(Vec::new()),
            destroyed: AtomicBool::new(false),
        }
    }

    pub fn client(&self) -> &ClientHandle {
        &self.client
    }

    /// The model id, or `None` for stores.
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn emitter(&self) -> &ChangeEmitter {
        &self.emitter
    }

    /// Announce a change to every subscriber. No-op once destroyed.
    pub fn emit(&self) {
        if self.is_destroyed() {
            trace!(id = ?self.id, "ignoring change on destroyed entity");
            return;
        }
        self.emitter.emit();
    }

    /// Register cleanup to run after the entity's destroy hook.
    ///
    /// Disposers run in registration order. A disposer registered after
    /// destruction runs immediately.
    pub fn on_dispose<F>(&self, disposer: F)
    where
        F: FnOnce() + Send + 'static,
    {
        {
            let mut disposers = self.disposers.lock();
            if !self.is_destroyed() {
                disposers.push(Box::new(disposer));
                return;
            }
        }
        disposer();
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    /// Flip the destroyed flag. Only the first caller gets `true`.
    pub(crate) fn mark_destroyed(&self) -> bool {
        let _guard = self.disposers.lock();
        !self.destroyed.swap(true, Ordering::SeqCst)
    }

    pub(crate) fn run_disposers(&self) {
        let disposers = std::mem::take(&mut *self.disposers.lock());
        for disposer in disposers {
            disposer();
        }
        self.emitter.clear();
    }
}

impl std::fmt::Debug for EntityCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityCore")
            .field("id", &self.id)
            .field("emitter", &self.emitter)
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}
