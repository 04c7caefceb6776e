//! Errors raised by the SAGA orchestrator and recovery worker.

/// Errors raised by the SAGA orchestrator.
#[derive(Debug, thiserror::Error)]
pub enum SagaError {
    #[error("saga '{saga_id}' not found")]
    NotFound { saga_id: String },

    #[error("saga '{saga_id}' step '{step_name}' failed after retries: {message}")]
    StepFatal {
        saga_id: String,
        step_name: String,
        message: String,
    },

    #[error(
        "saga '{saga_id}' idempotency key '{idempotency_key}' requires an indexed \
         idempotency_key column on step '{step_name}', which the configured store does not have"
    )]
    IdempotencyColumnMissing {
        saga_id: String,
        step_name: String,
        idempotency_key: String,
    },

    #[error("could not acquire advisory lock for saga '{saga_id}' after {attempts} attempts")]
    LockContention { saga_id: String, attempts: u32 },

    #[error("saga '{saga_id}' exceeded its execution deadline of {deadline_secs}s")]
    Timeout { saga_id: String, deadline_secs: u64 },

    #[error(
        "saga '{saga_id}' compensation partially failed: {failed_count} of {total_count} \
         compensations did not succeed"
    )]
    CompensationPartialFailure {
        saga_id: String,
        failed_count: usize,
        total_count: usize,
    },

    #[error("no compensation handler registered under name '{name}'")]
    UnknownCompensationHandler { name: String },

    #[error("saga store error: {0}")]
    Store(String),
}

impl SagaError {
    /// Stable machine-readable error code, matching the taxonomy's `Kind` column.
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "saga_not_found",
            Self::StepFatal { .. } => "saga_step_fatal",
            Self::IdempotencyColumnMissing { .. } => "saga_idempotency_column_missing",
            Self::LockContention { .. } => "lock_contention",
            Self::Timeout { .. } => "saga_timeout",
            Self::CompensationPartialFailure { .. } => "compensation_partial_failure",
            Self::UnknownCompensationHandler { .. } => "saga_unknown_compensation_handler",
            Self::Store(_) => "saga_store_error",
        }
    }
}
