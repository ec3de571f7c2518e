//! Registry entries and the type-erased view of an entity.

use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;
use std::thread::{self, ThreadId};

use parking_lot::{Condvar, Mutex};
use tokio::task::JoinHandle;

use crate::entity::{Entity, EntityCore};

/// Registry key: the entity type plus, for models, the id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntryKey {
    type_id: TypeId,
    entity: &'static str,
    id: Option<String>,
}

impl EntryKey {
    pub fn of<E: Entity>(id: Option<&str>) -> Self {
        Self {
            type_id: TypeId::of::<E>(),
            entity: std::any::type_name::<E>(),
            id: id.map(str::to_owned),
        }
    }

    /// Type name of the entity this key addresses.
    pub fn entity(&self) -> &'static str {
        self.entity
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }
}

impl fmt::Display for EntryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.id {
            Some(id) => write!(f, "{}#{}", self.entity, id),
            None => f.write_str(self.entity),
        }
    }
}

/// Object-safe view of an entity, used for teardown and downcasting.
pub(crate) trait AnyEntity: Send + Sync {
    fn entity_core(&self) -> &EntityCore;

    /// Run the destroy hook and disposers, at most once per instance.
    fn tear_down(&self);

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<E: Entity> AnyEntity for E {
    fn entity_core(&self) -> &EntityCore {
        Entity::core(self)
    }

    fn tear_down(&self) {
        let core = Entity::core(self);
        if core.mark_destroyed() {
            self.on_destroy();
            core.run_disposers();
        }
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// An in-flight construction.
///
/// The placeholder sits in the map while the constructor runs without any
/// map lock held. Other threads acquiring the same key wait on it and then
/// look the key up again.
pub(crate) struct Construction {
    builder: ThreadId,
    done: Mutex<bool>,
    finished: Condvar,
}

impl Construction {
    pub(crate) fn start() -> Arc<Self> {
        Arc::new(Self {
            builder: thread::current().id(),
            done: Mutex::new(false),
            finished: Condvar::new(),
        })
    }

    /// Whether the calling thread is the one running the constructor.
    pub(crate) fn is_builder(&self) -> bool {
        thread::current().id() == self.builder
    }

    pub(crate) fn finish(&self) {
        *self.done.lock() = true;
        self.finished.notify_all();
    }

    pub(crate) fn wait(&self) {
        let mut done = self.done.lock();
        while !*done {
            self.finished.wait(&mut done);
        }
    }
}

pub(crate) enum Slot {
    Constructing(Arc<Construction>),
    Live(Arc<dyn AnyEntity>),
}

/// A registry slot with its reference count and pending destroy timer.
pub(crate) struct Entry {
    pub(crate) slot: Slot,
    pub(crate) refs: usize,
    /// Bumped every time a destroy timer is scheduled. A timer only fires
    /// if the generation it was scheduled with is still current.
    pub(crate) generation: u64,
    pub(crate) pending: Option<JoinHandle<()>>,
}

impl Entry {
    pub(crate) fn new(instance: Arc<dyn AnyEntity>) -> Self {
        Self {
            slot: Slot::Live(instance),
            refs: 1,
            generation: 0,
            pending: None,
        }
    }

    /// Placeholder holding no references until the constructor finishes.
    pub(crate) fn constructing(construction: Arc<Construction>) -> Self {
        Self {
            slot: Slot::Constructing(construction),
            refs: 0,
            generation: 0,
            pending: None,
        }
    }

    pub(crate) fn instance(&self) -> Option<&Arc<dyn AnyEntity>> {
        match &self.slot {
            Slot::Live(instance) => Some(instance),
            Slot::Constructing(_) => None,
        }
    }

    pub(crate) fn is_live(&self) -> bool {
        matches!(self.slot, Slot::Live(_))
    }

    pub(crate) fn is_built_by(&self, construction: &Arc<Construction>) -> bool {
        matches!(&self.slot, Slot::Constructing(c) if Arc::ptr_eq(c, construction))
    }

    /// Take another reference. Returns true if a pending destroy was cancelled.
    pub(crate) fn retain(&mut self) -> bool {
        self.refs += 1;
        self.cancel_pending()
    }

    /// Drop a reference and return the remaining count.
    pub(crate) fn release(&mut self) -> usize {
        self.refs = self.refs.saturating_sub(1);
        self.refs
    }

    pub(crate) fn cancel_pending(&mut self) -> bool {
        match self.pending.take() {
            Some(timer) => {
                timer.abort();
                true
            }
            None => false,
        }
    }

    pub(crate) fn downcast<E: Entity>(&self) -> Option<Arc<E>> {
        let instance = Arc::clone(self.instance()?);
        instance.into_any().downcast::<E>().ok()
    }
}
