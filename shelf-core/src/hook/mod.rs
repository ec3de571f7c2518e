//! Subscription Hook
//!
//! This is the entry point a UI consumer calls on every render to get an
//! entity. It binds the consumer's lifetime to the entity's reference count
//! and forwards change notifications as re-render requests.
//!
//! # Usage
//!
//! A consumer keeps one [`Observer`] per hook call site for as long as it is
//! mounted, and calls [`use_store`] / [`use_model`] with it on each render:
//!
//! ```rust,ignore
//! let mut slot = Observer::<UserModel>::new(move || schedule_render());
//!
//! // render
//! let user = use_model(&mut slot, "user:7")?;
//! if user.is_loading() {
//!     return spinner();
//! }
//! draw(&user);
//!
//! // unmount
//! drop(slot);
//! ```
//!
//! # Rules
//!
//! - The registry comes from the innermost [`Provider`]. With no provider the
//!   call fails with [`ShelfError::MissingProvider`] before anything else is
//!   checked.
//! - Stores take no key and models require one. A mismatch fails with
//!   [`ShelfError::KeyArity`] naming the entity type.
//! - Rendering with a different key tears down the old subscription and
//!   starts a new one.
//! - Dropping the observer (or calling [`Observer::stop`]) releases the
//!   reference. The registry decides when to destroy.

mod subscription;

use std::ops::Deref;
use std::sync::Arc;

use tracing::warn;

use crate::entity::{check_arity, Entity};
use crate::error::{Result, ShelfError};
use crate::registry::{Provider, Registry};

pub use subscription::{Rerender, Subscription, SubscriptionState};

/// What a hook call hands back to the consumer for this render.
pub struct UseStore<E> {
    loading: bool,
    entity: Arc<E>,
}

impl<E> UseStore<E> {
    pub(crate) fn new(loading: bool, entity: Arc<E>) -> Self {
        Self { loading, entity }
    }

    /// True while the entity's initial data has not arrived.
    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn entity(&self) -> &Arc<E> {
        &self.entity
    }

    pub fn into_entity(self) -> Arc<E> {
        self.entity
    }

    /// The `(is_loading, entity)` pair.
    pub fn into_parts(self) -> (bool, Arc<E>) {
        (self.loading, self.entity)
    }
}

impl<E> Deref for UseStore<E> {
    type Target = E;

    fn deref(&self) -> &E {
        &self.entity
    }
}

impl<E> Clone for UseStore<E> {
    fn clone(&self) -> Self {
        Self {
            loading: self.loading,
            entity: Arc::clone(&self.entity),
        }
    }
}

impl<E> std::fmt::Debug for UseStore<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UseStore")
            .field("loading", &self.loading)
            .field("entity", &std::any::type_name::<E>())
            .finish()
    }
}

/// Per-consumer hook slot that persists across renders.
pub struct Observer<E: Entity> {
    rerender: Rerender,
    current: Option<Subscription<E>>,
}

impl<E: Entity> Observer<E> {
    /// Create a slot. `rerender` is called whenever the consumer should render
    /// again.
    pub fn new<F>(rerender: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self {
            rerender: Arc::new(rerender),
            current: None,
        }
    }

    /// Render-time hook call using the registry from the current [`Provider`].
    pub fn observe(&mut self, key: Option<&str>) -> Result<UseStore<E>> {
        let Some(registry) = Provider::current() else {
            warn!(entity = std::any::type_name::<E>(), "hook called outside a provider");
            return Err(ShelfError::MissingProvider);
        };
        self.observe_in(&registry, key)
    }

    /// Render-time hook call against an explicit registry.
    pub fn observe_in(&mut self, registry: &Registry, key: Option<&str>) -> Result<UseStore<E>> {
        check_arity::<E>(key)?;

        let subscription = match self.current.take() {
            Some(existing) if existing.matches(registry, key) => self.current.insert(existing),
            previous => {
                // Tear down the old key before acquiring the new one.
                drop(previous);
                let fresh = Subscription::new(registry, key, Arc::clone(&self.rerender))?;
                self.current.insert(fresh)
            }
        };

        Ok(subscription.snapshot())
    }

    /// Stop observing (unmount).
    pub fn stop(&mut self) {
        self.current = None;
    }

    pub fn subscription(&self) -> Option<&Subscription<E>> {
        self.current.as_ref()
    }

    /// Lifecycle state of the current subscription.
    pub fn state(&self) -> SubscriptionState {
        self.current
            .as_ref()
            .map_or(SubscriptionState::Unmounted, Subscription::state)
    }
}

impl<E: Entity> std::fmt::Debug for Observer<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Observer")
            .field("current", &self.current)
            .finish()
    }
}

/// Hook call with an optional key, for callers generic over entity kind.
pub fn use_entity<E: Entity>(observer: &mut Observer<E>, key: Option<&str>) -> Result<UseStore<E>> {
    observer.observe(key)
}

/// Hook call for an unkeyed store.
pub fn use_store<E: Entity>(observer: &mut Observer<E>) -> Result<UseStore<E>> {
    observer.observe(None)
}

/// Hook call for a keyed model.
pub fn use_model<E: Entity>(observer: &mut Observer<E>, id: &str) -> Result<UseStore<E>> {
    observer.observe(Some(id))
}

impl Registry {
    /// Subscribe to an entity without going through a [`Provider`].
    ///
    /// The subscription holds a reference until dropped.
    pub fn subscribe<E, F>(&self, key: Option<&str>, rerender: F) -> Result<Subscription<E>>
    where
        E: Entity,
        F: Fn() + Send + Sync + 'static,
    {
        Subscription::new(self, key, Arc::new(rerender))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{ClientHandle, EntityCore, EntityInit, EntityKind};
    use crate::error::BoxError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Theme {
        core: EntityCore,
    }

    impl Entity for Theme {
        const KIND: EntityKind = EntityKind::Store;

        fn create(init: EntityInit) -> std::result::Result<Self, BoxError> {
            Ok(Self {
                core: EntityCore::new(init),
            })
        }

        fn core(&self) -> &EntityCore {
            &self.core
        }
    }

    struct Note {
        core: EntityCore,
    }

    impl Entity for Note {
        const KIND: EntityKind = EntityKind::Model;

        fn create(init: EntityInit) -> std::result::Result<Self, BoxError> {
            Ok(Self {
                core: EntityCore::new(init),
            })
        }

        fn core(&self) -> &EntityCore {
            &self.core
        }
    }

    fn registry() -> Registry {
        Registry::new(ClientHandle::new(())).unwrap()
    }

    fn observer<E: Entity>() -> (Observer<E>, Arc<AtomicUsize>) {
        let renders = Arc::new(AtomicUsize::new(0));
        let renders_clone = renders.clone();
        let observer = Observer::new(move || {
            renders_clone.fetch_add(1, Ordering::SeqCst);
        });
        (observer, renders)
    }

    #[test]
    fn missing_provider_is_reported_first() {
        // Wrong arity too, but the missing provider wins.
        let (mut notes, _) = observer::<Note>();
        assert!(matches!(use_entity(&mut notes, None), Err(ShelfError::MissingProvider)));

        let (mut theme, _) = observer::<Theme>();
        assert!(matches!(use_store(&mut theme), Err(ShelfError::MissingProvider)));
        assert_eq!(theme.state(), SubscriptionState::Unmounted);
    }

    #[tokio::test]
    async fn key_arity_is_checked_inside_provider() {
        let registry = registry();
        let _provider = Provider::enter(registry.clone());

        let (mut theme, _) = observer::<Theme>();
        let err = use_entity(&mut theme, Some("dark")).unwrap_err();
        assert!(matches!(err, ShelfError::KeyArity { supplied: true, .. }));
        assert!(err.to_string().contains("Theme"));

        let (mut notes, _) = observer::<Note>();
        let err = use_entity(&mut notes, None).unwrap_err();
        assert!(matches!(err, ShelfError::KeyArity { supplied: false, .. }));
        assert!(err.to_string().contains("Note"));

        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn store_hook_returns_ready_instance() {
        let registry = registry();
        let _provider = Provider::enter(registry.clone());
        let (mut theme, renders) = observer::<Theme>();

        let first = use_store(&mut theme).unwrap();
        assert!(!first.is_loading());
        assert_eq!(theme.state(), SubscriptionState::Ready);

        // Re-rendering keeps the same subscription and reference.
        let second = use_store(&mut theme).unwrap();
        assert!(Arc::ptr_eq(first.entity(), second.entity()));
        assert_eq!(registry.ref_count::<Theme>(None), Some(1));

        first.emit();
        assert_eq!(renders.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn key_switch_moves_subscription() {
        let registry = registry();
        let _provider = Provider::enter(registry.clone());
        let (mut notes, renders) = observer::<Note>();

        let a = use_model(&mut notes, "a").unwrap().into_entity();
        let b = use_model(&mut notes, "b").unwrap().into_entity();
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(registry.ref_count::<Note>(Some("a")), Some(0));
        assert_eq!(registry.ref_count::<Note>(Some("b")), Some(1));

        a.emit();
        assert_eq!(renders.load(Ordering::SeqCst), 0);
        b.emit();
        assert_eq!(renders.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stop_releases_reference() {
        let registry = registry();
        let (mut notes, _) = observer::<Note>();

        notes.observe_in(&registry, Some("n")).unwrap();
        assert_eq!(registry.ref_count::<Note>(Some("n")), Some(1));

        notes.stop();
        assert_eq!(notes.state(), SubscriptionState::Unmounted);
        assert_eq!(registry.ref_count::<Note>(Some("n")), Some(0));
    }

    #[tokio::test]
    async fn registry_subscribe_without_provider() {
        let registry = registry();
        let renders = Arc::new(AtomicUsize::new(0));
        let renders_clone = renders.clone();

        let sub = registry
            .subscribe::<Note, _>(Some("x"), move || {
                renders_clone.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        sub.entity().emit();
        assert_eq!(renders.load(Ordering::SeqCst), 1);
        assert_eq!(sub.key().id(), Some("x"));
    }

    #[tokio::test]
    async fn use_store_parts() {
        let registry = registry();
        let (mut theme, _) = observer::<Theme>();

        let (loading, entity) = theme.observe_in(&registry, None).unwrap().into_parts();
        assert!(!loading);
        assert!(entity.core().id().is_none());
    }
}
