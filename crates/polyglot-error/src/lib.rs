//! Unified error types for the polyglot persistence coordinator.
//!
//! Every crate in this workspace returns `Result<T, PersistenceError>` (or a
//! narrower domain error convertible into it via `#[from]`) at its public
//! boundary. Domain errors live in their own module so call sites can match on
//! the narrower type when they need to (e.g. the CRUD façade only cares about
//! `GovernanceError`), while callers further out see one unified enum.

// Error variants are self-documenting via their #[error(...)] messages.
#![allow(missing_docs)]

mod backend;
mod config;
mod governance;
mod saga;

pub use backend::{BackendError, BackendErrorKind, PoolError};
pub use config::ConfigError;
pub use governance::{GovernanceError, GovernanceViolation};
pub use saga::SagaError;

/// Unified error type returned at the boundary of every public API in this workspace.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error(transparent)]
    Governance(#[from] GovernanceError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error(transparent)]
    Saga(#[from] SagaError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("internal error: {message}")]
    Internal {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl PersistenceError {
    /// Build an internal error wrapping an arbitrary source, for failure modes
    /// that don't belong to one of the named domains above.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
            source: None,
        }
    }

    /// Stable machine-readable error code, matching the taxonomy in the design
    /// documentation (`governance_violation`, `backend_unavailable`, ...).
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Governance(e) => e.error_code(),
            Self::Backend(e) => e.error_code(),
            Self::Pool(e) => e.error_code(),
            Self::Saga(e) => e.error_code(),
            Self::Config(e) => e.error_code(),
            Self::Internal { .. } => "internal_error",
        }
    }

    /// Whether this failure is worth retrying without caller intervention.
    #[must_use]
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::Backend(e) => e.is_retriable(),
            Self::Pool(PoolError::Exhausted | PoolError::ConnectFailed { .. }) => true,
            Self::Saga(SagaError::LockContention { .. }) => true,
            _ => false,
        }
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, PersistenceError>;
