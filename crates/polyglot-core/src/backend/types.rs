//! Value types shared by every backend adapter.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;

/// The family of storage a backend belongs to, independent of the concrete
/// implementation behind it. Each kind has exactly zero or one active adapter
/// at a time inside a [`crate::manager::BackendManager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Relational,
    Document,
    Vector,
    Graph,
    File,
    KeyValue,
}

impl BackendKind {
    /// All backend kinds, in the order they're listed throughout the design.
    pub const ALL: [Self; 6] = [
        Self::Relational,
        Self::Document,
        Self::Vector,
        Self::Graph,
        Self::File,
        Self::KeyValue,
    ];

    /// The "primary" kinds counted by the strategy selector. The file
    /// and key-value kinds are accelerators and never drive strategy tier.
    pub const PRIMARY: [Self; 4] = [Self::Relational, Self::Document, Self::Vector, Self::Graph];

    /// Lowercase string form, used as a config-section and policy-table key.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Relational => "relational",
            Self::Document => "document",
            Self::Vector => "vector",
            Self::Graph => "graph",
            Self::File => "file",
            Self::KeyValue => "key_value",
        }
    }

    /// Parse a backend kind from its config-key form, case-insensitively.
    #[must_use]
    pub fn from_str(value: &str) -> Option<Self> {
        Some(match value.to_lowercase().as_str() {
            "relational" => Self::Relational,
            "document" => Self::Document,
            "vector" => Self::Vector,
            "graph" => Self::Graph,
            "file" => Self::File,
            "key_value" | "keyvalue" | "key-value" => Self::KeyValue,
            _ => return None,
        })
    }

    /// Whether this kind counts toward the primary-backend tally used by
    /// strategy selection.
    #[must_use]
    pub const fn is_primary(self) -> bool {
        matches!(
            self,
            Self::Relational | Self::Document | Self::Vector | Self::Graph
        )
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable description of one configured backend, built once from config at
/// manager construction time and never mutated afterward.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendDescriptor {
    pub kind: BackendKind,
    pub implementation_name: String,
    pub host: Option<String>,
    pub port: Option<u16>,
    /// A reference (e.g. an env var name or secret-manager key) to the
    /// credentials, never the credentials themselves.
    pub credentials_ref: Option<String>,
    /// Opaque, adapter-specific settings forwarded verbatim.
    pub settings: HashMap<String, JsonValue>,
    pub enabled: bool,
}

/// Uniform result of a kind-specific CRUD-like operation. Adapters never
/// raise for business-level failures (missing record, constraint violation
/// already handled as idempotent success, ...) — those are reported here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrudResult {
    pub success: bool,
    pub data: JsonValue,
    pub error: Option<String>,
}

impl CrudResult {
    /// A successful result carrying `data`.
    #[must_use]
    pub fn ok(data: JsonValue) -> Self {
        Self {
            success: true,
            data,
            error: None,
        }
    }

    /// A failed result carrying an explanatory message.
    #[must_use]
    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: JsonValue::Null,
            error: Some(message.into()),
        }
    }
}

/// Optional adapter-reported counters, surfaced via `get_stats()`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackendStats {
    pub operations_total: u64,
    pub errors_total: u64,
    pub last_latency_ms: Option<u64>,
}

/// Connection pool metrics exposed by the relational connection pool.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PoolMetrics {
    pub active: usize,
    pub idle: usize,
    pub total: usize,
    pub created_total: u64,
    pub reused_total: u64,
    pub errors_total: u64,
}
