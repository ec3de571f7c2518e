//! Entities
//!
//! An entity is a unit of shared reactive state handed out by the
//! [`Registry`](crate::Registry). There are two kinds:
//!
//! - A **store** is unkeyed. At most one instance of a store type is live
//!   per registry.
//! - A **model** is keyed by a string id. Each id gets its own independently
//!   counted instance.
//!
//! # Authoring
//!
//! An entity is a plain struct that embeds an [`EntityCore`] and implements
//! [`Entity`]. The core carries the injected client handle, the model id and
//! the change emitter, so author fields can use any names they like.
//!
//! ```rust,ignore
//! struct Counter {
//!     core: EntityCore,
//!     value: AtomicI64,
//! }
//!
//! impl Entity for Counter {
//!     const KIND: EntityKind = EntityKind::Store;
//!
//!     fn create(init: EntityInit) -> Result<Self, BoxError> {
//!         Ok(Self { core: EntityCore::new(init), value: AtomicI64::new(0) })
//!     }
//!
//!     fn core(&self) -> &EntityCore {
//!         &self.core
//!     }
//! }
//!
//! impl Counter {
//!     fn increment(&self) {
//!         self.value.fetch_add(1, Ordering::SeqCst);
//!         self.emit();
//!     }
//! }
//! ```

pub mod emitter;
pub mod loading;
mod base;

use std::fmt;
use std::sync::Arc;

use tracing::warn;

pub use base::{ClientHandle, EntityCore};
pub use emitter::{ChangeEmitter, ChangeSubscription, ListenerId};
pub use loading::LoadingSignal;

use crate::error::{BoxError, Result, ShelfError};

/// Whether an entity type is addressed by type alone or by type and id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    /// Unkeyed; one instance per type.
    Store,
    /// Keyed by a string id; one instance per id.
    Model,
}

impl EntityKind {
    pub fn is_keyed(self) -> bool {
        matches!(self, EntityKind::Model)
    }

    /// Human-readable description of the key this kind takes.
    pub fn expected_arity(self) -> &'static str {
        match self {
            EntityKind::Store => "no key",
            EntityKind::Model => "a string key",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Store => f.write_str("store"),
            EntityKind::Model => f.write_str("model"),
        }
    }
}

/// Constructor arguments the registry hands to [`Entity::create`].
#[derive(Debug, Clone)]
pub struct EntityInit {
    client: ClientHandle,
    id: Option<String>,
}

impl EntityInit {
    pub fn new(client: ClientHandle, id: Option<String>) -> Self {
        Self { client, id }
    }

    pub fn client(&self) -> &ClientHandle {
        &self.client
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn into_parts(self) -> (ClientHandle, Option<String>) {
        (self.client, self.id)
    }
}

/// A shared, registry-managed unit of reactive state.
pub trait Entity: Send + Sync + Sized + 'static {
    /// Store (unkeyed) or model (keyed).
    const KIND: EntityKind;

    /// Build a fresh instance. Called once per key by the registry.
    fn create(init: EntityInit) -> std::result::Result<Self, BoxError>;

    fn core(&self) -> &EntityCore;

    /// Called at most once, when the registry tears the instance down.
    fn on_destroy(&self) {}

    /// Signal for asynchronous initial state, if the entity has one.
    fn loading(&self) -> Option<&LoadingSignal> {
        None
    }

    /// True unless the entity has a loading signal that is still pending.
    fn is_loaded(&self) -> bool {
        self.loading().map_or(true, LoadingSignal::is_resolved)
    }

    /// Announce a state change to subscribers.
    fn emit(&self) {
        self.core().emit();
    }
}

/// Listener helpers for entities held in an `Arc`.
pub trait EntityExt: Entity {
    /// Subscribe a listener that receives the entity on every change.
    ///
    /// The listener holds the entity weakly and is skipped once the last
    /// strong reference is gone.
    #[must_use = "dropping the subscription unsubscribes immediately"]
    fn on_change<F>(self: &Arc<Self>, listener: F) -> ChangeSubscription
    where
        F: Fn(&Self) + Send + Sync + 'static,
    {
        let entity = Arc::downgrade(self);
        self.core().emitter().subscribe(move || {
            if let Some(entity) = entity.upgrade() {
                listener(&entity);
            }
        })
    }
}

impl<E: Entity> EntityExt for E {}

/// Reject a key that does not match the entity's kind.
pub(crate) fn check_arity<E: Entity>(key: Option<&str>) -> Result<()> {
    let supplied = key.is_some();
    if supplied == E::KIND.is_keyed() {
        return Ok(());
    }

    let entity = std::any::type_name::<E>();
    warn!(entity, kind = %E::KIND, supplied, "key arity mismatch");
    Err(ShelfError::KeyArity {
        entity,
        kind: E::KIND,
        supplied,
    })
}
