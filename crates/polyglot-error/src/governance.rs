//! Errors raised by the governance engine.

use serde::{Deserialize, Serialize};

/// A single rule violation detected while validating an operation or payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GovernanceViolation {
    /// Backend kind the rule was checked against.
    pub backend: String,
    /// Operation that was attempted.
    pub operation: String,
    /// Dotted/indexed path to the offending field, if the violation is payload-shaped.
    pub field_path: Option<String>,
    /// Human-readable explanation.
    pub message: String,
}

/// Governance failures: disallowed operation, or a payload shape violating policy.
#[derive(Debug, thiserror::Error)]
pub enum GovernanceError {
    #[error("operation '{operation}' is not allowed for backend '{backend}'")]
    OperationNotAllowed { backend: String, operation: String },

    #[error("{message}")]
    PayloadRejected {
        message: String,
        violations: Vec<GovernanceViolation>,
    },
}

impl GovernanceError {
    /// Build a `PayloadRejected` from a collected violation list, joining messages.
    pub fn payload_rejected(violations: Vec<GovernanceViolation>) -> Self {
        let message = violations
            .iter()
            .map(|v| v.message.as_str())
            .collect::<Vec<_>>()
            .join("; ");
        Self::PayloadRejected { message, violations }
    }

    /// Stable machine-readable error code.
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::OperationNotAllowed { .. } => "governance_violation_operation",
            Self::PayloadRejected { .. } => "governance_violation_payload",
        }
    }

    /// Violations carried by this error, if any (empty for `OperationNotAllowed`).
    pub fn violations(&self) -> &[GovernanceViolation] {
        match self {
            Self::OperationNotAllowed { .. } => &[],
            Self::PayloadRejected { violations, .. } => violations,
        }
    }
}
