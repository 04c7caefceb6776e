//! Statically-typed adapter storage.
//!
//! The coordination layer never calls a kind-specific method through `dyn
//! Any` downcasting — instead the manager stores one concrete trait-object
//! variant per kind, and callers that need `insert`/`merge_node`/`search`/...
//! match on the kind they already know they're holding. The lookup is a
//! `match` the compiler checks, not a dynamic attribute lookup resolved by
//! name at runtime.

use std::sync::Arc;

use super::traits::{BackendAdapter, DocumentAdapter, FileAdapter, GraphAdapter, RelationalAdapter, VectorAdapter};
use super::types::BackendKind;

/// One constructed adapter, held as the narrowest trait object its kind
/// supports. `KeyValue` has no kind-specific operations, so it's held as
/// the base contract only.
#[derive(Clone)]
pub enum AdapterHandle {
    Relational(Arc<dyn RelationalAdapter>),
    Document(Arc<dyn DocumentAdapter>),
    Vector(Arc<dyn VectorAdapter>),
    Graph(Arc<dyn GraphAdapter>),
    File(Arc<dyn FileAdapter>),
    KeyValue(Arc<dyn BackendAdapter>),
}

impl AdapterHandle {
    /// The kind this handle was built for. Always matches
    /// `self.as_backend_adapter().kind()`.
    #[must_use]
    pub fn kind(&self) -> BackendKind {
        self.as_backend_adapter().kind()
    }

    /// Borrow the kind-independent contract, for lifecycle operations
    /// (`connect`/`disconnect`/`is_available`/`get_stats`) that don't care
    /// which kind-specific trait backs the handle.
    #[must_use]
    pub fn as_backend_adapter(&self) -> &dyn BackendAdapter {
        match self {
            Self::Relational(a) => a.as_ref(),
            Self::Document(a) => a.as_ref(),
            Self::Vector(a) => a.as_ref(),
            Self::Graph(a) => a.as_ref(),
            Self::File(a) => a.as_ref(),
            Self::KeyValue(a) => a.as_ref(),
        }
    }

    #[must_use]
    pub fn as_relational(&self) -> Option<Arc<dyn RelationalAdapter>> {
        match self {
            Self::Relational(a) => Some(a.clone()),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_document(&self) -> Option<Arc<dyn DocumentAdapter>> {
        match self {
            Self::Document(a) => Some(a.clone()),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_vector(&self) -> Option<Arc<dyn VectorAdapter>> {
        match self {
            Self::Vector(a) => Some(a.clone()),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_graph(&self) -> Option<Arc<dyn GraphAdapter>> {
        match self {
            Self::Graph(a) => Some(a.clone()),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_file(&self) -> Option<Arc<dyn FileAdapter>> {
        match self {
            Self::File(a) => Some(a.clone()),
            _ => None,
        }
    }
}
