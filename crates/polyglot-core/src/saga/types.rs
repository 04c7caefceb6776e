//! SAGA data model: statuses, steps, events, and execution results, shaped
//! around the six `BackendKind`s this workspace coordinates rather than any
//! single backend's own step representation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::backend::BackendKind;

/// Saga lifecycle status. `Compensating` is a transient state held only
/// while [`crate::saga::SagaCoordinator::compensate_saga`] is running; it is
/// never the terminal state returned to a caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SagaStatus {
    Created,
    Running,
    Completed,
    Aborted,
    Compensating,
    Compensated,
    CompensationFailed,
}

impl SagaStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Aborted => "aborted",
            Self::Compensating => "compensating",
            Self::Compensated => "compensated",
            Self::CompensationFailed => "compensation_failed",
        }
    }

    #[must_use]
    pub fn from_str(value: &str) -> Option<Self> {
        Some(match value {
            "created" => Self::Created,
            "running" => Self::Running,
            "completed" => Self::Completed,
            "aborted" => Self::Aborted,
            "compensating" => Self::Compensating,
            "compensated" => Self::Compensated,
            "compensation_failed" => Self::CompensationFailed,
            _ => return None,
        })
    }

    /// Whether a saga in this status is finished and will never be
    /// re-executed — terminal sagas are read-only from here on.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Aborted | Self::Compensated | Self::CompensationFailed)
    }
}

impl std::fmt::Display for SagaStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of a single [`SagaEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventStatus {
    Pending,
    Success,
    Fail,
    Compensated,
    Skipped,
}

impl EventStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Success => "SUCCESS",
            Self::Fail => "FAIL",
            Self::Compensated => "COMPENSATED",
            Self::Skipped => "SKIPPED",
        }
    }

    #[must_use]
    pub fn from_str(value: &str) -> Option<Self> {
        Some(match value {
            "PENDING" => Self::Pending,
            "SUCCESS" => Self::Success,
            "FAIL" => Self::Fail,
            "COMPENSATED" => Self::Compensated,
            "SKIPPED" => Self::Skipped,
            _ => return None,
        })
    }
}

impl std::fmt::Display for EventStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One step of a saga's ordered forward-action list. `operation` names the
/// kind-specific adapter method (`"insert"`, `"merge_node"`, ...); `payload`
/// carries its arguments as a JSON object, translated into a concrete
/// `CrudOperation` by [`crate::saga::step_op::operation_from_step`] at
/// dispatch time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SagaStep {
    pub step_id: String,
    pub backend: BackendKind,
    pub operation: String,
    pub payload: JsonValue,
    pub compensation_name: Option<String>,
    pub idempotency_key: Option<String>,
}

/// A persisted saga record: identity, status, and its ordered step list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Saga {
    pub saga_id: Uuid,
    pub name: String,
    pub trace_id: Option<String>,
    pub status: SagaStatus,
    pub steps: Vec<SagaStep>,
    pub current_step: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One append-only event in a saga's event log — the single source of truth
/// for idempotency checks and resume. A saga's in-memory state is always
/// rebuildable from its events; nothing is tracked only in memory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SagaEvent {
    pub event_id: Uuid,
    pub saga_id: Uuid,
    pub trace_id: Option<String>,
    pub step_name: String,
    pub event_type: String,
    pub status: EventStatus,
    pub duration_ms: Option<u64>,
    pub payload_json: JsonValue,
    pub error: Option<String>,
    pub idempotency_key: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// The result record returned by `execute`/`compensate_saga`/`resume_saga`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SagaExecutionResult {
    pub saga_id: Uuid,
    pub status: SagaStatus,
    pub executed_steps: Vec<String>,
    pub errors: Vec<String>,
    pub compensation_errors: Vec<String>,
}
