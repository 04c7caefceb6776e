//! Backend Adapter Contract.
//!
//! Defines the uniform capability set every concrete storage adapter must
//! implement, independent of the underlying engine. The coordination layer
//! (governance, manager, strategy selector, CRUD façade, saga orchestrator)
//! never talks to a concrete store directly — only through [`BackendAdapter`]
//! and the kind-specific extension traits below.

mod handle;
mod traits;
mod types;

pub use handle::AdapterHandle;
pub use traits::{
    BackendAdapter, DocumentAdapter, FileAdapter, GraphAdapter, RelationalAdapter, VectorAdapter,
};
pub use types::{BackendDescriptor, BackendKind, BackendStats, CrudResult, PoolMetrics};
