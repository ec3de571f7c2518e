//! Registry Provider
//!
//! The provider is the boundary that makes a registry available to every
//! hook call within its scope, the way a UI framework's context provider
//! makes a value available to its subtree.
//!
//! # Implementation
//!
//! We use a thread-local stack of registries. Entering a provider pushes its
//! registry; dropping the guard pops it. Hooks read the top of the stack.
//! Nesting is allowed, and the innermost provider wins.
//!
//! The guard is not `Send`: it must be dropped on the thread that entered it.

use std::cell::RefCell;
use std::marker::PhantomData;

use super::Registry;

thread_local! {
    static PROVIDER_STACK: RefCell<Vec<Registry>> = const { RefCell::new(Vec::new()) };
}

/// Guard that keeps a registry in scope until dropped.
pub struct Provider {
    registry: Registry,
    _not_send: PhantomData<*const ()>,
}

impl Provider {
    /// Make `registry` the current registry for this thread.
    pub fn enter(registry: Registry) -> Self {
        PROVIDER_STACK.with(|stack| stack.borrow_mut().push(registry.clone()));
        Self {
            registry,
            _not_send: PhantomData,
        }
    }

    /// Run `f` with `registry` in scope.
    pub fn scope<R>(registry: Registry, f: impl FnOnce() -> R) -> R {
        let _provider = Self::enter(registry);
        f()
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// The innermost registry in scope, if any.
    pub fn current() -> Option<Registry> {
        PROVIDER_STACK.with(|stack| stack.borrow().last().cloned())
    }

    pub fn is_active() -> bool {
        PROVIDER_STACK.with(|stack| !stack.borrow().is_empty())
    }
}

impl Drop for Provider {
    fn drop(&mut self) {
        PROVIDER_STACK.with(|stack| {
            let popped = stack.borrow_mut().pop();

            if let Some(registry) = popped {
                debug_assert!(
                    registry.ptr_eq(&self.registry),
                    "Provider guards dropped out of order"
                );
            }
        });
    }
}

impl std::fmt::Debug for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provider")
            .field("registry", &self.registry)
            .finish()
    }
}
