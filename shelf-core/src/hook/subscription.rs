//! One consumer's subscription to one entity.
//!
//! A [`Subscription`] holds a registry reference and a change listener for a
//! single (entity type, key) pair. It decides when the consumer re-renders:
//!
//! - If the entity had a pending loading signal at acquisition, the
//!   subscription starts in `Loading`. Changes emitted while loading are
//!   ignored. Resolution moves it to `Ready` and triggers one re-render.
//! - In `Ready`, each change triggers one re-render.
//!
//! A resolution and a change in the same turn are two re-renders, not one.
//!
//! Dropping the subscription unsubscribes and releases the registry
//! reference. Destruction is left to the registry's grace period.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::entity::{ChangeSubscription, Entity, LoadingSignal};
use crate::error::Result;
use crate::registry::{EntryKey, Registry};

use super::UseStore;

/// Callback a consumer supplies to be re-rendered.
pub type Rerender = Arc<dyn Fn() + Send + Sync>;

/// Where a (consumer, key) subscription is in its lifecycle.
///
/// `Acquiring` and `Releasing` are transient. `Acquiring` only appears in
/// trace events and is never returned by [`Subscription::state`].
/// `Releasing` is visible only while a release is in progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Unmounted,
    /// Taking a registry reference. Transient.
    Acquiring,
    /// Waiting for the entity's loading signal.
    Loading,
    Ready,
    /// Giving the reference back. Transient.
    Releasing,
}

impl fmt::Display for SubscriptionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SubscriptionState::Unmounted => "unmounted",
            SubscriptionState::Acquiring => "acquiring",
            SubscriptionState::Loading => "loading",
            SubscriptionState::Ready => "ready",
            SubscriptionState::Releasing => "releasing",
        };
        f.write_str(name)
    }
}

/// State shared with the change listener and the loading task.
struct Shared {
    state: Mutex<SubscriptionState>,
    loading: Option<LoadingSignal>,
    rerender: Rerender,
}

impl Shared {
    fn on_change(&self) {
        let renders = {
            let mut state = self.state.lock();
            match *state {
                SubscriptionState::Ready => 1,
                // Resolved but the loading task has not run yet: the
                // resolution and this change each get their own render.
                SubscriptionState::Loading
                    if self.loading.as_ref().is_some_and(LoadingSignal::is_resolved) =>
                {
                    *state = SubscriptionState::Ready;
                    2
                }
                _ => 0,
            }
        };

        trace!(renders, "change received");
        for _ in 0..renders {
            (self.rerender)();
        }
    }

    fn on_loaded(&self) {
        {
            let mut state = self.state.lock();
            if *state != SubscriptionState::Loading {
                return;
            }
            *state = SubscriptionState::Ready;
        }
        trace!("loading resolved, re-rendering");
        (self.rerender)();
    }

    fn set(&self, next: SubscriptionState) {
        *self.state.lock() = next;
    }

    fn get(&self) -> SubscriptionState {
        *self.state.lock()
    }
}

/// A consumer's live subscription to one entity instance.
pub struct Subscription<E: Entity> {
    registry: Registry,
    key: EntryKey,
    entity: Arc<E>,
    shared: Arc<Shared>,
    listener: Option<ChangeSubscription>,
    loader: Option<JoinHandle<()>>,
}

impl<E: Entity> Subscription<E> {
    pub(crate) fn new(registry: &Registry, key: Option<&str>, rerender: Rerender) -> Result<Self> {
        let entry_key = EntryKey::of::<E>(key);
        trace!(key = %entry_key, state = %SubscriptionState::Acquiring, "subscribing");

        let entity = registry.acquire::<E>(key)?;

        let pending = entity.loading().filter(|signal| !signal.is_resolved()).cloned();
        let initial = if pending.is_some() {
            SubscriptionState::Loading
        } else {
            SubscriptionState::Ready
        };

        let shared = Arc::new(Shared {
            state: Mutex::new(initial),
            loading: pending.clone(),
            rerender,
        });

        let listener = {
            let shared = Arc::clone(&shared);
            entity.core().emitter().subscribe(move || shared.on_change())
        };

        let loader = pending.map(|signal| {
            let shared = Arc::clone(&shared);
            registry.runtime().spawn(async move {
                signal.wait().await;
                shared.on_loaded();
            })
        });

        debug!(key = %entry_key, state = %initial, "subscribed");
        Ok(Self {
            registry: registry.clone(),
            key: entry_key,
            entity,
            shared,
            listener: Some(listener),
            loader,
        })
    }

    pub fn entity(&self) -> &Arc<E> {
        &self.entity
    }

    pub fn key(&self) -> &EntryKey {
        &self.key
    }

    pub fn state(&self) -> SubscriptionState {
        self.shared.get()
    }

    pub fn is_loading(&self) -> bool {
        self.state() == SubscriptionState::Loading
    }

    /// Current render value for the consumer.
    pub fn snapshot(&self) -> UseStore<E> {
        UseStore::new(self.is_loading(), Arc::clone(&self.entity))
    }

    /// Whether this subscription already serves `key` from `registry`.
    pub(crate) fn matches(&self, registry: &Registry, key: Option<&str>) -> bool {
        self.registry.ptr_eq(registry) && self.key.id() == key
    }

    /// Stop observing now. Equivalent to dropping the subscription.
    pub fn unsubscribe(self) {
        drop(self);
    }

    fn release(&mut self) {
        let Some(listener) = self.listener.take() else {
            return;
        };

        self.shared.set(SubscriptionState::Releasing);
        listener.unsubscribe();
        if let Some(loader) = self.loader.take() {
            loader.abort();
        }
        self.registry.release_key(&self.key);
        self.shared.set(SubscriptionState::Unmounted);
        debug!(key = %self.key, "unsubscribed");
    }
}

impl<E: Entity> Drop for Subscription<E> {
    fn drop(&mut self) {
        self.release();
    }
}

impl<E: Entity> fmt::Debug for Subscription<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("key", &self.key)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{ClientHandle, EntityCore, EntityInit, EntityKind};
    use crate::error::BoxError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Feed {
        core: EntityCore,
        loading: LoadingSignal,
    }

    impl Entity for Feed {
        const KIND: EntityKind = EntityKind::Model;

        fn create(init: EntityInit) -> std::result::Result<Self, BoxError> {
            let loading = if init.id() == Some("cached") {
                LoadingSignal::resolved()
            } else {
                LoadingSignal::new()
            };
            Ok(Self {
                core: EntityCore::new(init),
                loading,
            })
        }

        fn core(&self) -> &EntityCore {
            &self.core
        }

        fn loading(&self) -> Option<&LoadingSignal> {
            Some(&self.loading)
        }
    }

    fn counter() -> (Arc<AtomicUsize>, Rerender) {
        let renders = Arc::new(AtomicUsize::new(0));
        let renders_clone = renders.clone();
        let rerender: Rerender = Arc::new(move || {
            renders_clone.fetch_add(1, Ordering::SeqCst);
        });
        (renders, rerender)
    }

    async fn settle() {
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn starts_loading_until_signal_resolves() {
        let registry = Registry::new(ClientHandle::new(())).unwrap();
        let (renders, rerender) = counter();

        let sub = Subscription::<Feed>::new(&registry, Some("1"), rerender).unwrap();
        assert_eq!(sub.state(), SubscriptionState::Loading);
        assert!(sub.snapshot().is_loading());

        sub.entity().emit();
        sub.entity().emit();
        settle().await;
        assert_eq!(renders.load(Ordering::SeqCst), 0);

        sub.entity().loading.resolve();
        settle().await;
        assert_eq!(sub.state(), SubscriptionState::Ready);
        assert_eq!(renders.load(Ordering::SeqCst), 1);

        sub.entity().emit();
        assert_eq!(renders.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn change_right_after_resolution_renders_twice() {
        let registry = Registry::new(ClientHandle::new(())).unwrap();
        let (renders, rerender) = counter();

        let sub = Subscription::<Feed>::new(&registry, Some("1"), rerender).unwrap();
        sub.entity().loading.resolve();
        sub.entity().emit();
        assert_eq!(renders.load(Ordering::SeqCst), 2);
        assert_eq!(sub.state(), SubscriptionState::Ready);

        // The loading task finds the subscription ready and stays quiet.
        settle().await;
        assert_eq!(renders.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn resolved_signal_starts_ready() {
        let registry = Registry::new(ClientHandle::new(())).unwrap();
        let (renders, rerender) = counter();

        let sub = Subscription::<Feed>::new(&registry, Some("cached"), rerender).unwrap();
        assert_eq!(sub.state(), SubscriptionState::Ready);
        assert!(!sub.snapshot().is_loading());

        sub.entity().emit();
        assert_eq!(renders.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn drop_releases_and_silences() {
        let registry = Registry::new(ClientHandle::new(())).unwrap();
        let (renders, rerender) = counter();

        let sub = Subscription::<Feed>::new(&registry, Some("cached"), rerender).unwrap();
        let entity = Arc::clone(sub.entity());
        assert_eq!(registry.ref_count::<Feed>(Some("cached")), Some(1));
        assert_eq!(entity.core().emitter().listener_count(), 1);

        sub.unsubscribe();
        assert_eq!(registry.ref_count::<Feed>(Some("cached")), Some(0));
        assert_eq!(entity.core().emitter().listener_count(), 0);

        entity.emit();
        assert_eq!(renders.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn resolution_after_unsubscribe_does_not_render() {
        let registry = Registry::new(ClientHandle::new(())).unwrap();
        let (renders, rerender) = counter();

        let sub = Subscription::<Feed>::new(&registry, Some("1"), rerender).unwrap();
        let entity = Arc::clone(sub.entity());
        drop(sub);

        entity.loading.resolve();
        settle().await;
        assert_eq!(renders.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn matches_registry_and_key() {
        let registry = Registry::new(ClientHandle::new(())).unwrap();
        let other = Registry::new(ClientHandle::new(())).unwrap();
        let (_renders, rerender) = counter();

        let sub = Subscription::<Feed>::new(&registry, Some("1"), rerender).unwrap();
        assert!(sub.matches(&registry, Some("1")));
        assert!(!sub.matches(&registry, Some("2")));
        assert!(!sub.matches(&other, Some("1")));
    }
}
