//! Discovery & Strategy Selector.
//!
//! Probes every configured backend concurrently, caches the resulting
//! availability snapshot for `discovery_cache_ttl`, and derives one of five
//! fixed [`StrategyType`] tiers plus a capability-compensation map.

mod types;

pub use types::{BackendAvailability, CompensationRecipe, DatabaseAvailability, StrategyPlan, StrategyType};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use polyglot_error::Result;
use tokio::net::TcpStream;

use crate::backend::BackendKind;

/// One probe tactic per backend kind. Implementations are
/// supplied by the caller (the core never hardcodes a concrete driver); the
/// default [`TcpProbe`] below covers the plain TCP-connect tactic used for
/// key-value/cache backends and as a generic fallback.
#[async_trait::async_trait]
pub trait BackendProbe: Send + Sync {
    async fn probe(&self) -> Result<BackendAvailability>;
}

/// TCP-connect-only probe, used for the key-value/cache backend.
pub struct TcpProbe {
    pub address: String,
}

#[async_trait::async_trait]
impl BackendProbe for TcpProbe {
    async fn probe(&self) -> Result<BackendAvailability> {
        let start = Instant::now();
        match TcpStream::connect(&self.address).await {
            Ok(_) => Ok(BackendAvailability::from_latency(start.elapsed().as_millis() as u64)),
            Err(_) => Ok(BackendAvailability::unreachable()),
        }
    }
}

/// HTTP heartbeat probe (`GET /_up` or equivalent), used for
/// document/vector backends.
pub struct HttpProbe {
    pub url: String,
    pub client: reqwest::Client,
}

#[async_trait::async_trait]
impl BackendProbe for HttpProbe {
    async fn probe(&self) -> Result<BackendAvailability> {
        let start = Instant::now();
        match self.client.get(&self.url).send().await {
            Ok(resp) if resp.status().is_success() => {
                Ok(BackendAvailability::from_latency(start.elapsed().as_millis() as u64))
            },
            _ => Ok(BackendAvailability::unreachable()),
        }
    }
}

/// Local path writable probe, used for the file backend.
pub struct FileWritableProbe {
    pub path: std::path::PathBuf,
}

#[async_trait::async_trait]
impl BackendProbe for FileWritableProbe {
    async fn probe(&self) -> Result<BackendAvailability> {
        let start = Instant::now();
        let probe_file = self.path.join(".polyglot-probe");
        let writable = tokio::fs::write(&probe_file, b"probe").await.is_ok();
        if writable {
            let _ = tokio::fs::remove_file(&probe_file).await;
        }
        if writable {
            Ok(BackendAvailability::from_latency(start.elapsed().as_millis() as u64))
        } else {
            Ok(BackendAvailability::unreachable())
        }
    }
}

/// Discovers backend availability and derives the operating strategy.
pub struct StrategySelector {
    probes: HashMap<BackendKind, Arc<dyn BackendProbe>>,
    cache_ttl: Duration,
    probe_deadline: Duration,
    cache: RwLock<Option<(Instant, Arc<DatabaseAvailability>)>>,
}

impl StrategySelector {
    #[must_use]
    pub fn new(probes: HashMap<BackendKind, Arc<dyn BackendProbe>>, cache_ttl: Duration) -> Self {
        Self {
            probes,
            cache_ttl,
            probe_deadline: Duration::from_secs(5),
            cache: RwLock::new(None),
        }
    }

    /// Override the per-probe hard deadline (default 5s).
    #[must_use]
    pub fn with_probe_deadline(mut self, deadline: Duration) -> Self {
        self.probe_deadline = deadline;
        self
    }

    /// Probe every configured backend in parallel. A call within
    /// `discovery_cache_ttl` of the last probe returns the cached snapshot
    /// unchanged (byte-identical) rather than re-probing.
    pub async fn probe_all(&self) -> Arc<DatabaseAvailability> {
        if let Some((probed_at, snapshot)) = self.cache.read().clone() {
            if probed_at.elapsed() < self.cache_ttl {
                return snapshot;
            }
        }

        let mut join_set = tokio::task::JoinSet::new();
        for (kind, probe) in &self.probes {
            let kind = *kind;
            let probe = probe.clone();
            let deadline = self.probe_deadline;
            join_set.spawn(async move {
                let outcome = tokio::time::timeout(deadline, probe.probe()).await;
                let availability = match outcome {
                    Ok(Ok(availability)) => availability,
                    Ok(Err(_)) | Err(_) => BackendAvailability::unreachable(),
                };
                (kind, availability)
            });
        }

        let mut per_kind = HashMap::new();
        while let Some(joined) = join_set.join_next().await {
            if let Ok((kind, availability)) = joined {
                per_kind.insert(kind, availability);
            }
        }

        let snapshot = Arc::new(DatabaseAvailability {
            per_kind,
            last_probed_at: std::time::SystemTime::now(),
        });
        *self.cache.write() = Some((Instant::now(), snapshot.clone()));
        snapshot
    }

    /// Force the next [`Self::probe_all`] call to re-probe rather than serve
    /// the cache, for callers that need an on-demand refresh.
    pub fn invalidate_cache(&self) {
        *self.cache.write() = None;
    }

    /// Derive a [`StrategyPlan`] from an availability snapshot. Deterministic:
    /// the same snapshot always yields the same plan.
    #[must_use]
    pub fn select_strategy(availability: &DatabaseAvailability) -> StrategyPlan {
        let reachable = availability.reachable_primaries();

        // `reachable` only counts the four primary kinds: whether the file
        // backend is itself reachable doesn't change the tier, only whether
        // its role later gets an accelerator slot.
        let mut tier = match reachable.len() {
            4 => StrategyType::FullPolyglot,
            3 => StrategyType::TriDatabase,
            2 => StrategyType::DualDatabase,
            1 if reachable[0] == BackendKind::Relational => StrategyType::RelationalEnhanced,
            _ => StrategyType::RelationalMonolith,
        };

        let considered: Vec<BackendKind> = if reachable.is_empty() { vec![BackendKind::Relational] } else { reachable.clone() };
        let avg_health = availability.average_health(&considered);
        if avg_health < 0.3 && tier != StrategyType::RelationalMonolith {
            tier = tier.demote();
        }

        let role_map = build_role_map(availability, &reachable);
        let compensation_map = build_compensation_map(tier, &reachable);

        StrategyPlan {
            selected: tier,
            role_map,
            compensation_map,
            expected_performance_rating: tier.rating(),
        }
    }
}

/// Per-kind role assignment: every reachable primary kind plays
/// `primary_store`; `file`/`key_value`, when reachable, play `accelerator`.
/// No role is ever assigned to a kind whose availability is
/// `reachable = false`: both the primaries-only `reachable` slice and the
/// direct `per_kind` lookup for file/key-value are gated on that flag.
fn build_role_map(availability: &DatabaseAvailability, reachable: &[BackendKind]) -> HashMap<BackendKind, Vec<String>> {
    let mut map = HashMap::new();
    for kind in reachable {
        map.insert(*kind, vec!["primary_store".to_string()]);
    }
    for kind in [BackendKind::File, BackendKind::KeyValue] {
        if availability.per_kind.get(&kind).is_some_and(|a| a.reachable) {
            map.insert(kind, vec!["accelerator".to_string()]);
        }
    }
    map
}

/// Named substitution recipe per missing primary kind.
fn recipe_for(kind: BackendKind) -> CompensationRecipe {
    match kind {
        BackendKind::Graph => "relational_adjacency_table_recursive_query".to_string(),
        BackendKind::Vector => "relational_vector_extension_or_hash_table".to_string(),
        BackendKind::Document => "relational_json_column".to_string(),
        BackendKind::Relational => "local_embedded_relational_fallback".to_string(),
        BackendKind::File | BackendKind::KeyValue => "none_accelerator_only".to_string(),
    }
}

fn build_compensation_map(tier: StrategyType, reachable: &[BackendKind]) -> HashMap<String, CompensationRecipe> {
    if tier == StrategyType::FullPolyglot {
        return HashMap::new();
    }
    BackendKind::PRIMARY
        .into_iter()
        .filter(|k| !reachable.contains(k))
        .map(|k| (k.as_str().to_string(), recipe_for(k)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn availability(pairs: &[(BackendKind, bool, f64)]) -> DatabaseAvailability {
        let per_kind = pairs
            .iter()
            .map(|(kind, reachable, health)| {
                (
                    *kind,
                    BackendAvailability {
                        reachable: *reachable,
                        health_score: *health,
                        latency_ms: Some(10),
                        details: HashMap::new(),
                    },
                )
            })
            .collect();
        DatabaseAvailability {
            per_kind,
            last_probed_at: std::time::SystemTime::now(),
        }
    }

    #[test]
    fn four_primaries_select_full_polyglot() {
        let availability = availability(&[
            (BackendKind::Relational, true, 0.9),
            (BackendKind::Document, true, 0.9),
            (BackendKind::Vector, true, 0.9),
            (BackendKind::Graph, true, 0.9),
        ]);
        let plan = StrategySelector::select_strategy(&availability);
        assert_eq!(plan.selected, StrategyType::FullPolyglot);
        assert_eq!(plan.expected_performance_rating, 10);
        assert!(plan.compensation_map.is_empty());
    }

    #[test]
    fn e6_relational_only_selects_relational_enhanced() {
        let availability = availability(&[
            (BackendKind::Relational, true, 0.9),
            (BackendKind::Document, false, 0.0),
            (BackendKind::Vector, false, 0.0),
            (BackendKind::Graph, false, 0.0),
            (BackendKind::File, true, 0.9),
        ]);
        let plan = StrategySelector::select_strategy(&availability);
        assert_eq!(plan.selected, StrategyType::RelationalEnhanced);
        assert_eq!(plan.compensation_map.len(), 3);
    }

    #[test]
    fn nothing_reachable_selects_relational_monolith() {
        let availability = availability(&[
            (BackendKind::Relational, false, 0.0),
            (BackendKind::Document, false, 0.0),
        ]);
        let plan = StrategySelector::select_strategy(&availability);
        assert_eq!(plan.selected, StrategyType::RelationalMonolith);
    }

    #[test]
    fn low_average_health_demotes_one_tier() {
        let availability = availability(&[
            (BackendKind::Relational, true, 0.1),
            (BackendKind::Document, true, 0.1),
            (BackendKind::Vector, true, 0.1),
            (BackendKind::Graph, true, 0.1),
        ]);
        let plan = StrategySelector::select_strategy(&availability);
        assert_eq!(plan.selected, StrategyType::TriDatabase);
    }

    #[test]
    fn low_health_single_relational_demotes_to_monolith() {
        let availability = availability(&[(BackendKind::Relational, true, 0.01)]);
        let plan = StrategySelector::select_strategy(&availability);
        assert_eq!(plan.selected, StrategyType::RelationalMonolith);
    }

    #[test]
    fn role_map_never_assigns_a_role_to_an_unreachable_kind() {
        let availability = availability(&[
            (BackendKind::Relational, false, 0.0),
            (BackendKind::Graph, false, 0.0),
            (BackendKind::Document, true, 0.9),
            (BackendKind::Vector, true, 0.9),
        ]);
        let plan = StrategySelector::select_strategy(&availability);
        assert_eq!(plan.selected, StrategyType::DualDatabase);
        assert!(!plan.role_map.contains_key(&BackendKind::Relational));
        assert!(!plan.role_map.contains_key(&BackendKind::Graph));
    }

    #[test]
    fn reachable_accelerators_get_an_accelerator_role() {
        let availability = availability(&[
            (BackendKind::Relational, true, 0.9),
            (BackendKind::File, true, 0.9),
            (BackendKind::KeyValue, false, 0.0),
        ]);
        let plan = StrategySelector::select_strategy(&availability);
        assert_eq!(plan.role_map.get(&BackendKind::File), Some(&vec!["accelerator".to_string()]));
        assert!(!plan.role_map.contains_key(&BackendKind::KeyValue));
    }

    #[test]
    fn selection_is_deterministic() {
        let availability = availability(&[
            (BackendKind::Relational, true, 0.9),
            (BackendKind::Document, true, 0.9),
            (BackendKind::Vector, true, 0.9),
        ]);
        let first = StrategySelector::select_strategy(&availability);
        let second = StrategySelector::select_strategy(&availability);
        assert_eq!(first.selected, second.selected);
        assert_eq!(first.role_map.len(), second.role_map.len());
    }

    #[tokio::test]
    async fn probe_all_is_cached_within_ttl() {
        let mut probes: HashMap<BackendKind, Arc<dyn BackendProbe>> = HashMap::new();
        probes.insert(
            BackendKind::KeyValue,
            Arc::new(TcpProbe {
                address: "127.0.0.1:1".to_string(),
            }),
        );
        let selector = StrategySelector::new(probes, Duration::from_secs(300));
        let first = selector.probe_all().await;
        let second = selector.probe_all().await;
        assert!(Arc::ptr_eq(&first, &second));
    }

    fn arb_availability() -> impl proptest::strategy::Strategy<Value = DatabaseAvailability> {
        use proptest::prelude::*;
        let per_backend = (any::<bool>(), 0.0f64..=1.0f64).prop_map(|(reachable, health)| BackendAvailability {
            reachable,
            health_score: if reachable { health } else { 0.0 },
            latency_ms: Some(10),
            details: HashMap::new(),
        });
        prop::collection::vec(per_backend, BackendKind::ALL.len()).prop_map(|scores| {
            let per_kind = BackendKind::ALL.into_iter().zip(scores).collect();
            DatabaseAvailability { per_kind, last_probed_at: std::time::SystemTime::now() }
        })
    }

    proptest::proptest! {
        /// Determinism property: given an availability snapshot,
        /// `select_strategy` always returns the same `StrategyType` and
        /// role_map, for arbitrary reachability/health combinations.
        #[test]
        fn select_strategy_is_deterministic_over_arbitrary_availability(availability in arb_availability()) {
            let first = StrategySelector::select_strategy(&availability);
            let second = StrategySelector::select_strategy(&availability);
            proptest::prop_assert_eq!(first.selected, second.selected);
            proptest::prop_assert_eq!(first.expected_performance_rating, second.expected_performance_rating);
            proptest::prop_assert_eq!(first.role_map.len(), second.role_map.len());
            proptest::prop_assert_eq!(first.compensation_map, second.compensation_map);
        }
    }
}
