//! Value types for discovery and strategy selection.

use std::collections::HashMap;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::backend::BackendKind;

/// Per-backend reachability and health as of the last probe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendAvailability {
    pub reachable: bool,
    pub health_score: f64,
    pub latency_ms: Option<u64>,
    pub details: HashMap<String, JsonValue>,
}

impl BackendAvailability {
    #[must_use]
    pub fn unreachable() -> Self {
        Self {
            reachable: false,
            health_score: 0.0,
            latency_ms: None,
            details: HashMap::new(),
        }
    }

    /// `health_score = clamp(0, 1, 1000 / latency_ms)`.
    #[must_use]
    pub fn from_latency(latency_ms: u64) -> Self {
        let score = if latency_ms == 0 { 1.0 } else { (1000.0 / latency_ms as f64).clamp(0.0, 1.0) };
        Self {
            reachable: true,
            health_score: score,
            latency_ms: Some(latency_ms),
            details: HashMap::new(),
        }
    }
}

/// A full probe result, cached for `discovery_cache_ttl`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseAvailability {
    pub per_kind: HashMap<BackendKind, BackendAvailability>,
    #[serde(skip, default = "SystemTime::now")]
    pub last_probed_at: SystemTime,
}

impl DatabaseAvailability {
    /// The average health score across `kinds` that are present in the
    /// snapshot; kinds with no entry count as `0.0` (unreachable).
    #[must_use]
    pub fn average_health(&self, kinds: &[BackendKind]) -> f64 {
        if kinds.is_empty() {
            return 0.0;
        }
        let total: f64 = kinds
            .iter()
            .map(|k| self.per_kind.get(k).map(|a| a.health_score).unwrap_or(0.0))
            .sum();
        total / kinds.len() as f64
    }

    /// Primary kinds that are reachable in this snapshot.
    #[must_use]
    pub fn reachable_primaries(&self) -> Vec<BackendKind> {
        BackendKind::PRIMARY
            .into_iter()
            .filter(|k| self.per_kind.get(k).is_some_and(|a| a.reachable))
            .collect()
    }
}

/// Ordered strategy tiers, richest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyType {
    RelationalMonolith,
    RelationalEnhanced,
    DualDatabase,
    TriDatabase,
    FullPolyglot,
}

impl StrategyType {
    /// The expected performance rating for this tier.
    #[must_use]
    pub const fn rating(self) -> u8 {
        match self {
            Self::FullPolyglot => 10,
            Self::TriDatabase => 8,
            Self::DualDatabase => 6,
            Self::RelationalEnhanced => 7,
            Self::RelationalMonolith => 4,
        }
    }

    /// The next-weaker tier, used when the selector demotes on low average
    /// health. `relational_monolith` has no weaker tier and demotes to
    /// itself.
    #[must_use]
    pub const fn demote(self) -> Self {
        match self {
            Self::FullPolyglot => Self::TriDatabase,
            Self::TriDatabase => Self::DualDatabase,
            Self::DualDatabase => Self::RelationalEnhanced,
            Self::RelationalEnhanced | Self::RelationalMonolith => Self::RelationalMonolith,
        }
    }
}

/// A named substitution recipe for a capability normally provided by a
/// missing backend kind.
pub type CompensationRecipe = String;

/// The selector's output: chosen strategy, per-kind role assignment, and the
/// compensation recipe for each missing capability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyPlan {
    pub selected: StrategyType,
    pub role_map: HashMap<BackendKind, Vec<String>>,
    pub compensation_map: HashMap<String, CompensationRecipe>,
    pub expected_performance_rating: u8,
}
