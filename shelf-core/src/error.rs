//! Error types for the registry and the subscription hook.

use thiserror::Error;

use crate::entity::EntityKind;

/// Result type for registry and hook operations.
pub type Result<T> = std::result::Result<T, ShelfError>;

/// Error type entity constructors return.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors surfaced by the registry, the provider scope, and the hook.
#[derive(Debug, Error)]
pub enum ShelfError {
    /// The hook was called with no enclosing [`Provider`](crate::Provider).
    #[error("no registry in scope: consumers must run inside a shelf_core::Provider")]
    MissingProvider,

    /// A key was supplied to a store, or omitted for a model.
    #[error("{entity} is a {kind} and takes {}, but {}", .kind.expected_arity(), supplied_message(.supplied))]
    KeyArity {
        entity: &'static str,
        kind: EntityKind,
        supplied: bool,
    },

    /// The entity constructor failed. Nothing was registered.
    #[error("failed to construct {entity}: {source}")]
    Construction {
        entity: &'static str,
        #[source]
        source: BoxError,
    },

    /// An entity was acquired from inside its own constructor.
    #[error("{key} was acquired while it was still being constructed")]
    CyclicConstruction { key: String },

    /// The registry was created outside a tokio runtime.
    #[error("registry must be created inside a tokio runtime")]
    NoRuntime,

    #[error("invalid registry config: {0}")]
    InvalidConfig(String),

    #[error("failed to parse registry config: {0}")]
    Config(#[from] serde_json::Error),
}

fn supplied_message(supplied: &bool) -> &'static str {
    if *supplied {
        "a key was supplied"
    } else {
        "no key was supplied"
    }
}
