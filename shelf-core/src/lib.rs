//! Shelf Core
//!
//! This crate provides the shared-entity registry behind the Shelf reactive
//! UI layer. It implements:
//!
//! - Entities: unkeyed stores and keyed models with per-instance change
//!   emitters and optional asynchronous loading
//! - A reference-counted registry with delayed destruction
//! - A subscription hook binding a consumer's render lifecycle to an entity
//!
//! Many consumers of the same logical entity share one instance and its
//! in-memory state. The instance is destroyed once nobody observes it,
//! after a short grace period that absorbs quick unmount/remount cycles.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `entity`: the `Entity` trait, internal bookkeeping, emitter, loading signal
//! - `registry`: the registry, its entries and timers, and the `Provider` scope
//! - `hook`: per-consumer subscriptions and the `use_store` / `use_model` calls
//! - `config`: registry configuration
//!
//! The sync client that entities use to persist and replay state is opaque
//! here: it is injected into every entity as a [`ClientHandle`].
//!
//! # Example
//!
//! ```rust,ignore
//! use shelf_core::{use_model, ClientHandle, Observer, Provider, Registry};
//!
//! let registry = Registry::new(ClientHandle::new(sync_client))?;
//! let _provider = Provider::enter(registry);
//!
//! let mut slot = Observer::<UserModel>::new(|| request_render());
//! let user = use_model(&mut slot, "user:7")?;
//! if !user.is_loading() {
//!     println!("{}", user.name());
//! }
//! ```

pub mod config;
pub mod entity;
pub mod error;
pub mod hook;
pub mod registry;

pub use config::RegistryConfig;
pub use entity::{
    ChangeEmitter, ChangeSubscription, ClientHandle, Entity, EntityCore, EntityExt, EntityInit,
    EntityKind, ListenerId, LoadingSignal,
};
pub use error::{BoxError, Result, ShelfError};
pub use hook::{
    use_entity, use_model, use_store, Observer, Rerender, Subscription, SubscriptionState,
    UseStore,
};
pub use registry::{EntryKey, Provider, Registry};
