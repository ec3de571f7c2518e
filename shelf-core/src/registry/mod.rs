//! Entity Registry
//!
//! The registry owns every live entity. It creates an instance the first
//! time a key is acquired, hands the same instance to every later acquirer,
//! and destroys it once nobody holds a reference.
//!
//! # Lifecycle
//!
//! 1. `acquire` on an unknown key constructs the entity with the registry's
//!    client handle and stores it with a reference count of 1.
//!
//! 2. `acquire` on a known key bumps the count and cancels any pending
//!    destroy timer.
//!
//! 3. `release` drops the count. At zero, a destroy timer is scheduled for
//!    the configured grace period instead of destroying right away, so a
//!    consumer that unmounts and remounts quickly keeps the same instance.
//!
//! 4. When the timer fires with the count still at zero, the entry is
//!    removed and the entity's destroy hook runs.
//!
//! # Concurrency
//!
//! Entries live in a `DashMap`. `acquire` claims an unknown key by
//! inserting a construction placeholder through the entry API, then runs the
//! constructor with no map lock held, so a constructor may use the registry
//! freely. Other threads acquiring the same key block until the placeholder
//! is resolved and then look the key up again, so each instance is built
//! exactly once. A constructor that acquires its own key on the same thread,
//! directly or through other constructors, gets
//! [`ShelfError::CyclicConstruction`].
//! Destroy hooks run after the entry is removed and no lock is held.
//!
//! Timers are tokio tasks on the runtime the registry was created in. They
//! hold the registry weakly and check a per-entry generation when they wake,
//! so a timer that loses a race with reacquisition does nothing.

mod entry;
pub mod provider;

use std::sync::{Arc, Weak};

use dashmap::mapref::entry::Entry as MapEntry;
use dashmap::DashMap;
use tokio::runtime::Handle;
use tracing::{debug, trace, warn};

use crate::config::RegistryConfig;
use crate::entity::{check_arity, ClientHandle, Entity, EntityInit};
use crate::error::{Result, ShelfError};

pub use entry::EntryKey;
pub use provider::Provider;

use entry::{AnyEntity, Construction, Entry, Slot};

struct RegistryInner {
    client: ClientHandle,
    config: RegistryConfig,
    entries: DashMap<EntryKey, Entry>,
    runtime: Handle,
}

impl RegistryInner {
    /// Destroy timer callback.
    fn expire(&self, key: &EntryKey, generation: u64) {
        let removed = self
            .entries
            .remove_if(key, |_, entry| {
                entry.is_live() && entry.refs == 0 && entry.generation == generation
            })
            .and_then(|(key, entry)| Some((key, entry.instance()?.clone())));

        match removed {
            Some((key, instance)) => {
                debug!(
                    %key,
                    listeners = instance.entity_core().emitter().listener_count(),
                    "destroying entity"
                );
                instance.tear_down();
            }
            None => trace!(%key, generation, "stale destroy timer"),
        }
    }

    /// Destroy every live entity. Entries still under construction are
    /// left to their builders.
    fn tear_down_all(&self) {
        let keys: Vec<EntryKey> = self
            .entries
            .iter()
            .filter(|e| e.is_live())
            .map(|e| e.key().clone())
            .collect();
        for key in keys {
            let Some((key, mut entry)) = self.entries.remove_if(&key, |_, e| e.is_live()) else {
                continue;
            };
            entry.cancel_pending();
            if let Some(instance) = entry.instance() {
                debug!(%key, refs = entry.refs, "destroying entity on shutdown");
                instance.tear_down();
            }
        }
    }

    /// Resolve a placeholder: install the instance or, if construction did
    /// not complete, remove the placeholder.
    fn settle(
        &self,
        key: &EntryKey,
        construction: &Arc<Construction>,
        instance: Option<Arc<dyn AnyEntity>>,
    ) {
        match instance {
            Some(instance) => {
                if let Some(mut entry) = self.entries.get_mut(key) {
                    if entry.is_built_by(construction) {
                        *entry = Entry::new(instance);
                    }
                }
            }
            None => {
                self.entries.remove_if(key, |_, entry| entry.is_built_by(construction));
            }
        }
        construction.finish();
    }
}

/// Resolves its placeholder on drop, so waiters wake even if the
/// constructor fails or panics.
struct Build<'a> {
    inner: &'a RegistryInner,
    key: &'a EntryKey,
    construction: Arc<Construction>,
    instance: Option<Arc<dyn AnyEntity>>,
}

impl Drop for Build<'_> {
    fn drop(&mut self) {
        let instance = self.instance.take();
        self.inner.settle(self.key, &self.construction, instance);
    }
}

impl Drop for RegistryInner {
    fn drop(&mut self) {
        self.tear_down_all();
    }
}

/// Shared owner of live entities.
///
/// `Registry` is a cheap handle; clones refer to the same entries. When the
/// last handle is dropped every remaining entity is destroyed.
#[derive(Clone)]
pub struct Registry {
    inner: Arc<RegistryInner>,
}

impl Registry {
    /// Create a registry with the default config.
    ///
    /// Must be called inside a tokio runtime, which runs the destroy timers.
    pub fn new(client: ClientHandle) -> Result<Self> {
        Self::with_config(client, RegistryConfig::default())
    }

    pub fn with_config(client: ClientHandle, config: RegistryConfig) -> Result<Self> {
        config.validate()?;
        let runtime = Handle::try_current().map_err(|_| ShelfError::NoRuntime)?;

        debug!(grace_period_ms = config.grace_period_ms, "registry created");
        Ok(Self {
            inner: Arc::new(RegistryInner {
                client,
                config,
                entries: DashMap::new(),
                runtime,
            }),
        })
    }

    pub fn client(&self) -> &ClientHandle {
        &self.inner.client
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.inner.config
    }

    pub(crate) fn runtime(&self) -> &Handle {
        &self.inner.runtime
    }

    /// Get the instance for `key`, creating it if needed, and take a reference.
    ///
    /// Every successful call must be balanced by one [`Registry::release`].
    /// If construction fails the error is returned and nothing is registered.
    pub fn acquire<E: Entity>(&self, key: Option<&str>) -> Result<Arc<E>> {
        check_arity::<E>(key)?;
        let entry_key = EntryKey::of::<E>(key);

        loop {
            let construction = match self.inner.entries.entry(entry_key.clone()) {
                MapEntry::Occupied(mut occupied) => {
                    let pending = match &occupied.get().slot {
                        Slot::Live(_) => None,
                        Slot::Constructing(construction) => Some(Arc::clone(construction)),
                    };
                    match pending {
                        Some(construction) if construction.is_builder() => {
                            warn!(key = %entry_key, "entity acquired during its own construction");
                            return Err(ShelfError::CyclicConstruction {
                                key: entry_key.to_string(),
                            });
                        }
                        Some(construction) => construction,
                        None => {
                            // Keys carry the TypeId, so a live entry always holds an `E`.
                            let Some(instance) = occupied.get().downcast::<E>() else {
                                unreachable!("entry {} holds another entity type", occupied.key());
                            };
                            let cancelled = occupied.get_mut().retain();
                            let refs = occupied.get().refs;
                            debug!(key = %occupied.key(), refs, cancelled, "reusing entity");
                            return Ok(instance);
                        }
                    }
                }
                MapEntry::Vacant(vacant) => {
                    let construction = Construction::start();
                    vacant.insert(Entry::constructing(Arc::clone(&construction)));
                    return self.construct::<E>(key, &entry_key, construction);
                }
            };

            trace!(key = %entry_key, "waiting for entity construction");
            construction.wait();
        }
    }

    /// Run the constructor for a key this thread has claimed. No map lock is
    /// held here.
    fn construct<E: Entity>(
        &self,
        key: Option<&str>,
        entry_key: &EntryKey,
        construction: Arc<Construction>,
    ) -> Result<Arc<E>> {
        let entity = std::any::type_name::<E>();
        let mut build = Build {
            inner: &self.inner,
            key: entry_key,
            construction,
            instance: None,
        };

        let init = EntityInit::new(self.inner.client.clone(), key.map(str::to_owned));
        let instance = E::create(init).map_err(|source| {
            warn!(entity, ?key, error = %source, "entity construction failed");
            ShelfError::Construction { entity, source }
        })?;
        let instance = Arc::new(instance);

        debug!(key = %entry_key, "constructed entity");
        let erased: Arc<dyn AnyEntity> = instance.clone();
        build.instance = Some(erased);
        Ok(instance)
    }

    /// Drop a reference taken by [`Registry::acquire`].
    ///
    /// When the count reaches zero the entity is destroyed after the grace
    /// period, unless it is acquired again first.
    pub fn release<E: Entity>(&self, key: Option<&str>) {
        self.release_key(&EntryKey::of::<E>(key));
    }

    pub(crate) fn release_key(&self, key: &EntryKey) {
        let Some(mut entry) = self.inner.entries.get_mut(key) else {
            warn!(%key, "release of unknown entity");
            return;
        };
        if entry.refs == 0 {
            warn!(%key, "release of entity with no references");
            return;
        }

        let refs = entry.release();
        if refs > 0 {
            debug!(%key, refs, "released entity");
            return;
        }

        entry.generation += 1;
        let generation = entry.generation;
        let grace_period = self.inner.config.grace_period();
        let registry: Weak<RegistryInner> = Arc::downgrade(&self.inner);
        let timer_key = key.clone();

        entry.pending = Some(self.inner.runtime.spawn(async move {
            tokio::time::sleep(grace_period).await;
            if let Some(registry) = registry.upgrade() {
                registry.expire(&timer_key, generation);
            }
        }));
        debug!(%key, ?grace_period, "scheduled entity destroy");
    }

    /// The live instance for `key`, without taking a reference.
    pub fn peek<E: Entity>(&self, key: Option<&str>) -> Option<Arc<E>> {
        self.inner
            .entries
            .get(&EntryKey::of::<E>(key))
            .and_then(|entry| entry.downcast::<E>())
    }

    pub fn contains<E: Entity>(&self, key: Option<&str>) -> bool {
        self.inner
            .entries
            .get(&EntryKey::of::<E>(key))
            .is_some_and(|entry| entry.is_live())
    }

    /// Current reference count, or `None` if the key is not live.
    pub fn ref_count<E: Entity>(&self, key: Option<&str>) -> Option<usize> {
        self.inner
            .entries
            .get(&EntryKey::of::<E>(key))
            .filter(|entry| entry.is_live())
            .map(|entry| entry.refs)
    }

    /// Number of live entries, including those waiting out their grace period.
    pub fn len(&self) -> usize {
        self.inner.entries.iter().filter(|entry| entry.is_live()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Destroy every live entity now, whatever its reference count.
    pub fn shutdown(&self) {
        debug!(entries = self.len(), "registry shutdown");
        self.inner.tear_down_all();
    }

    /// Whether both handles refer to the same registry.
    pub fn ptr_eq(&self, other: &Registry) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("entries", &self.len())
            .field("config", &self.inner.config)
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
