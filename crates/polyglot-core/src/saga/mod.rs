//! SAGA Orchestrator: durable multi-backend transactions with
//! compensating rollback, event-sourced audit, and advisory-lock-guarded
//! resumable execution.

mod compensation;
mod coordinator;
mod lock;
mod step_op;
mod store;
mod types;

pub use compensation::{
    CompensationContext, CompensationHandler, CompensationRegistry, FileDeleteAssetHandler, GraphDeleteNodeHandler,
    RelationalDeleteHandler, VectorDeleteChunksHandler,
};
pub use coordinator::{SagaCoordinator, SagaCoordinatorConfig};
pub use lock::{AdvisoryLock, InProcessMutexLock, PostgresAdvisoryLock};
pub use step_op::operation_from_step;
pub use store::{InMemorySagaStore, PostgresSagaStore, SagaStore};
pub use types::{EventStatus, Saga, SagaEvent, SagaExecutionResult, SagaStatus, SagaStep};
