//! Errors raised at the backend adapter boundary, and by the manager
//! and connection pool that sit above it.

use serde::{Deserialize, Serialize};

/// Adapter-reported error classes. Adapters must classify their own failures
/// into one of these; the core never inspects free-form error strings beyond
/// this boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackendErrorKind {
    /// Network drop or broken connection; safe to retry with a fresh connection.
    ConnectionLost,
    /// Unique key or foreign key violation; retry is pointless without a payload change.
    ConstraintViolation,
    /// Relational deadlock; retry with backoff is expected to succeed.
    Deadlock,
    /// Malformed query, bad schema reference, or other caller error; never retry.
    SyntaxOrUsage,
    /// The operation exceeded its deadline.
    Timeout,
}

/// Errors surfaced by a concrete backend adapter.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("backend '{kind}' operation '{operation}' failed ({error_kind:?}): {message}")]
    Operation {
        kind: String,
        operation: String,
        error_kind: BackendErrorKind,
        message: String,
    },

    #[error("backend '{kind}' is unavailable or unhealthy")]
    Unavailable { kind: String },

    #[error("backend '{kind}' connect failed: {message}")]
    ConnectFailed { kind: String, message: String },
}

impl BackendError {
    /// Stable machine-readable error code.
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::Operation { .. } => "backend_operation_error",
            Self::Unavailable { .. } => "backend_unavailable",
            Self::ConnectFailed { .. } => "backend_connect_failed",
        }
    }

    /// Whether the failure is worth retrying without caller intervention.
    #[must_use]
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::Operation {
                error_kind: BackendErrorKind::ConnectionLost
                    | BackendErrorKind::Deadlock
                    | BackendErrorKind::Timeout,
                ..
            }
        )
    }
}

/// Errors raised by the bounded connection pool.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("connection pool exhausted: waited past deadline for a free connection")]
    Exhausted,

    #[error("connection pool closed")]
    Closed,

    #[error("failed to establish a pooled connection after {attempts} attempts: {message}")]
    ConnectFailed { attempts: u32, message: String },

    #[error("validation query failed on leased connection: {message}")]
    ValidationFailed { message: String },
}

impl PoolError {
    /// Stable machine-readable error code.
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::Exhausted => "pool_exhausted",
            Self::Closed => "pool_closed",
            Self::ConnectFailed { .. } => "pool_connect_failed",
            Self::ValidationFailed { .. } => "pool_validation_failed",
        }
    }
}
