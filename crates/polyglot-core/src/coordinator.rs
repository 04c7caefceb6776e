//! The single entry point this crate exposes to a host process.
//!
//! `PersistenceCoordinator` owns nothing a concrete driver would need to
//! exist — the adapter contract is agnostic to any concrete database or
//! client library — so callers supply one deferred
//! [`crate::manager::BackendFactory`] per backend kind they want wired up,
//! plus a [`SagaStore`], [`AdvisoryLock`] and [`AuditBackend`]. From those it
//! assembles the governance engine, backend manager, strategy selector,
//! CRUD façade, saga coordinator, and recovery worker, wiring each the way
//! the independent unit tests in those modules already assume.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex as SyncMutex;
use polyglot_error::Result;
use serde_json::Value as JsonValue;
use tokio::task::JoinHandle;

use crate::audit::AuditBackend;
use crate::backend::{BackendKind, CrudResult};
use crate::config::CoordinatorConfig;
use crate::crud::CrudFacade;
use crate::governance::{GovernanceEngine, GovernancePolicy, Operation, ValueTypeTag};
use crate::manager::{BackendFactory, BackendManager, FailurePolicy};
use crate::recovery::{RecoveryPassSummary, RecoveryWorker};
use crate::saga::{AdvisoryLock, CompensationRegistry, Saga, SagaCoordinator, SagaCoordinatorConfig, SagaStep, SagaStore};
use crate::strategy::{BackendProbe, DatabaseAvailability, StrategyPlan, StrategySelector};

/// Everything a caller hands in to assemble a [`PersistenceCoordinator`].
/// Kept as one struct (rather than a long parameter list) since every field
/// is a trait object or factory the host process is responsible for
/// supplying — the core itself never constructs a concrete driver.
pub struct PersistenceCoordinatorDeps {
    pub factories: HashMap<BackendKind, BackendFactory>,
    pub probes: HashMap<BackendKind, Arc<dyn BackendProbe>>,
    pub audit: Arc<dyn AuditBackend>,
    pub saga_store: Arc<dyn SagaStore>,
    pub saga_lock: Arc<dyn AdvisoryLock>,
}

/// Assembles and owns the coordinated components for one deployment.
///
/// Construction never connects to a backend — no blocking I/O runs in the
/// constructor; [`Self::new`] only wires components together and, when
/// `config.autostart` is set, kicks off [`BackendManager::start_all_backends`]
/// and the background recovery loop.
pub struct PersistenceCoordinator {
    config: CoordinatorConfig,
    governance: Arc<GovernanceEngine>,
    manager: Arc<BackendManager>,
    strategy: Arc<StrategySelector>,
    facade: Arc<CrudFacade>,
    saga: Arc<SagaCoordinator>,
    recovery: Arc<RecoveryWorker>,
    recovery_handle: SyncMutex<Option<JoinHandle<()>>>,
}

impl PersistenceCoordinator {
    /// Build every component and, if `config.autostart` is set, start all
    /// registered backends and the background recovery loop.
    ///
    /// # Errors
    ///
    /// Propagates a [`SagaStore::ensure_schema`] failure — the saga schema is
    /// made ready eagerly so the first `create_saga` call never pays for it.
    pub async fn new(config: CoordinatorConfig, deps: PersistenceCoordinatorDeps) -> Result<Self> {
        let governance = Arc::new(GovernanceEngine::new(parse_policy_overrides(&config), config.governance.strict));

        // Lenient: a polyglot deployment is built to degrade to a smaller
        // `StrategyType` tier rather than refuse to start because one
        // secondary store is down.
        let manager = Arc::new(BackendManager::new(FailurePolicy::Lenient));
        for (kind, factory) in deps.factories {
            manager.register(kind, factory);
        }

        let strategy = Arc::new(StrategySelector::new(deps.probes, Duration::from_secs(config.discovery_cache_ttl_secs)));
        let facade = Arc::new(CrudFacade::new(governance.clone(), manager.clone(), deps.audit));

        deps.saga_store.ensure_schema().await?;
        let saga = Arc::new(SagaCoordinator::new(
            facade.clone(),
            manager.clone(),
            deps.saga_store,
            deps.saga_lock,
            CompensationRegistry::with_defaults(),
            SagaCoordinatorConfig::default(),
        ));
        let recovery = Arc::new(RecoveryWorker::new(saga.clone(), 3));

        let coordinator = Self {
            config,
            governance,
            manager,
            strategy,
            facade,
            saga,
            recovery,
            recovery_handle: SyncMutex::new(None),
        };

        if coordinator.config.autostart {
            coordinator.start_backends(None).await;
        }
        Ok(coordinator)
    }

    /// The governance engine guarding every façade dispatch.
    #[must_use]
    pub fn governance(&self) -> &Arc<GovernanceEngine> {
        &self.governance
    }

    /// The backend manager owning adapter lifetimes.
    #[must_use]
    pub fn manager(&self) -> &Arc<BackendManager> {
        &self.manager
    }

    /// The discovery/strategy selector.
    #[must_use]
    pub fn strategy(&self) -> &Arc<StrategySelector> {
        &self.strategy
    }

    /// The governed, audited CRUD entry point.
    #[must_use]
    pub fn facade(&self) -> &Arc<CrudFacade> {
        &self.facade
    }

    /// The SAGA orchestrator.
    #[must_use]
    pub fn saga(&self) -> &Arc<SagaCoordinator> {
        &self.saga
    }

    /// The recovery worker, for callers that want to drive
    /// [`RecoveryWorker::run_once`] on their own schedule instead of
    /// [`Self::start_recovery_loop`].
    #[must_use]
    pub fn recovery(&self) -> &Arc<RecoveryWorker> {
        &self.recovery
    }

    /// Start every registered backend (or just `subset`), each under
    /// `config.start_timeout_secs`. Delegates to
    /// [`BackendManager::start_all_backends`]; failures are recorded on the
    /// manager's error list, never raised here.
    pub async fn start_backends(&self, subset: Option<&[BackendKind]>) -> HashMap<BackendKind, bool> {
        self.manager
            .start_all_backends(subset, Duration::from_secs(self.config.start_timeout_secs))
            .await
    }

    /// Re-probe every configured backend and derive the current
    /// [`StrategyPlan`] from the result. Cheap to call often: within
    /// `discovery_cache_ttl`, [`StrategySelector::probe_all`] returns the
    /// cached snapshot instead of re-probing.
    pub async fn refresh_strategy(&self) -> (Arc<DatabaseAvailability>, StrategyPlan) {
        let availability = self.strategy.probe_all().await;
        let plan = StrategySelector::select_strategy(&availability);
        (availability, plan)
    }

    /// Start the background recovery loop on `interval`, unless one is
    /// already running. Idempotent: a second call while a loop is active is
    /// a no-op.
    pub fn start_recovery_loop(&self, store: Arc<dyn SagaStore>, interval: Duration) {
        let mut handle = self.recovery_handle.lock();
        if handle.is_some() {
            return;
        }
        *handle = Some(self.recovery.clone().spawn(store, interval));
    }

    /// Run one recovery scan synchronously, for callers driving recovery on
    /// their own schedule rather than [`Self::start_recovery_loop`].
    ///
    /// # Errors
    ///
    /// See [`RecoveryWorker::run_once`].
    pub async fn run_recovery_once(&self, store: &dyn SagaStore) -> Result<RecoveryPassSummary> {
        self.recovery.run_once(store).await
    }

    /// Create a new saga, delegating to [`SagaCoordinator::create_saga`].
    ///
    /// # Errors
    ///
    /// See [`SagaCoordinator::create_saga`].
    pub async fn create_saga(&self, name: impl Into<String> + Send, steps: Vec<SagaStep>, trace_id: Option<String>) -> Result<Saga> {
        self.saga.create_saga(name, steps, trace_id).await
    }

    /// Dispatch one governed CRUD operation through the façade.
    ///
    /// # Errors
    ///
    /// See [`CrudFacade::execute`].
    pub async fn execute(&self, operation: crate::crud::CrudOperation) -> Result<CrudResult> {
        self.facade.execute(operation).await
    }

    /// Stop the background recovery loop, if running, and disconnect every
    /// backend. Safe to call even if [`Self::start_recovery_loop`] was never
    /// called.
    pub async fn shutdown(&self) {
        self.recovery.stop();
        let handle = self.recovery_handle.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        self.manager.stop_all_backends().await;
    }
}

/// Parse `config.governance.policies`'s raw JSON overrides into the typed
/// map [`GovernanceEngine::new`] expects. Each top-level key names a
/// [`BackendKind`] (`BackendKind::from_str`); unrecognized keys are logged
/// and skipped rather than failing configuration load, since an operator
/// typo here shouldn't prevent the whole coordinator from starting with
/// default policies for every other kind.
fn parse_policy_overrides(config: &CoordinatorConfig) -> HashMap<BackendKind, GovernancePolicy> {
    let mut overrides = HashMap::new();
    for (key, value) in &config.governance.policies {
        let Some(kind) = BackendKind::from_str(key) else {
            tracing::warn!(key = %key, "unrecognized backend kind in [governance.policies], ignoring override");
            continue;
        };
        overrides.insert(kind, parse_policy(value));
    }
    overrides
}

fn parse_policy(value: &JsonValue) -> GovernancePolicy {
    let allowed_operations = value
        .get("allowed_operations")
        .and_then(JsonValue::as_array)
        .map(|ops| ops.iter().filter_map(JsonValue::as_str).filter_map(parse_operation).collect())
        .unwrap_or_default();
    let forbidden_fields = value
        .get("forbidden_fields")
        .and_then(JsonValue::as_array)
        .map(|fields| fields.iter().filter_map(JsonValue::as_str).map(str::to_lowercase).collect())
        .unwrap_or_default();
    let forbidden_value_types = value
        .get("forbidden_value_types")
        .and_then(JsonValue::as_array)
        .map(|types| types.iter().filter_map(JsonValue::as_str).filter_map(parse_value_type_tag).collect())
        .unwrap_or_default();
    GovernancePolicy {
        allowed_operations,
        forbidden_fields,
        forbidden_value_types,
    }
}

fn parse_operation(raw: &str) -> Option<Operation> {
    match raw.to_lowercase().as_str() {
        "create" => Some(Operation::Create),
        "read" => Some(Operation::Read),
        "update" => Some(Operation::Update),
        "delete" => Some(Operation::Delete),
        _ => None,
    }
}

fn parse_value_type_tag(raw: &str) -> Option<ValueTypeTag> {
    match raw.to_lowercase().as_str() {
        "null" => Some(ValueTypeTag::Null),
        "bool" | "boolean" => Some(ValueTypeTag::Bool),
        "number" => Some(ValueTypeTag::Number),
        "string" => Some(ValueTypeTag::String),
        "array" => Some(ValueTypeTag::Array),
        "object" => Some(ValueTypeTag::Object),
        "binary" => Some(ValueTypeTag::Binary),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::TracingAuditBackend;
    use crate::backend::{AdapterHandle, BackendAdapter, BackendStats, RelationalAdapter};
    use crate::saga::InMemorySagaStore;
    use crate::saga::InProcessMutexLock;
    use async_trait::async_trait;
    use serde_json::json;

    struct StubRelational;

    #[async_trait]
    impl BackendAdapter for StubRelational {
        async fn connect(&self) -> Result<()> {
            Ok(())
        }
        async fn disconnect(&self) -> Result<()> {
            Ok(())
        }
        fn is_available(&self) -> bool {
            true
        }
        fn kind(&self) -> BackendKind {
            BackendKind::Relational
        }
        fn get_stats(&self) -> BackendStats {
            BackendStats::default()
        }
    }

    #[async_trait]
    impl RelationalAdapter for StubRelational {
        async fn create_table(&self, _name: &str, _schema: &JsonValue) -> Result<CrudResult> {
            Ok(CrudResult::ok(JsonValue::Null))
        }
        async fn insert(&self, _table: &str, record: &JsonValue) -> Result<CrudResult> {
            Ok(CrudResult::ok(record.clone()))
        }
        async fn update(&self, _table: &str, _id: &str, fields: &JsonValue) -> Result<CrudResult> {
            Ok(CrudResult::ok(fields.clone()))
        }
        async fn select(&self, _table: &str, _filter: &JsonValue, _order: Option<&str>, _limit: Option<u32>) -> Result<CrudResult> {
            Ok(CrudResult::ok(json!([])))
        }
        async fn delete(&self, _table: &str, _filter: &JsonValue) -> Result<CrudResult> {
            Ok(CrudResult::ok(JsonValue::Null))
        }
        async fn execute_query(&self, _sql: &str, _params: &[JsonValue]) -> Result<CrudResult> {
            Ok(CrudResult::ok(JsonValue::Null))
        }
    }

    fn deps() -> PersistenceCoordinatorDeps {
        let mut factories: HashMap<BackendKind, BackendFactory> = HashMap::new();
        factories.insert(
            BackendKind::Relational,
            Box::new(|| AdapterHandle::Relational(Arc::new(StubRelational))),
        );
        PersistenceCoordinatorDeps {
            factories,
            probes: HashMap::new(),
            audit: Arc::new(TracingAuditBackend),
            saga_store: Arc::new(InMemorySagaStore::new()),
            saga_lock: Arc::new(InProcessMutexLock::new()),
        }
    }

    #[tokio::test]
    async fn autostart_false_never_connects_backends() {
        let config = CoordinatorConfig::default();
        let coordinator = PersistenceCoordinator::new(config, deps()).await.unwrap();
        assert!(coordinator.manager.get_backend(BackendKind::Relational).unwrap().is_none());
    }

    #[tokio::test]
    async fn autostart_true_connects_registered_backends() {
        let mut config = CoordinatorConfig::default();
        config.autostart = true;
        let coordinator = PersistenceCoordinator::new(config, deps()).await.unwrap();
        assert!(coordinator.manager.get_backend(BackendKind::Relational).unwrap().is_some());
    }

    #[tokio::test]
    async fn create_and_execute_saga_through_the_coordinator() {
        let mut config = CoordinatorConfig::default();
        config.autostart = true;
        let coordinator = PersistenceCoordinator::new(config, deps()).await.unwrap();

        let step = SagaStep {
            step_id: "insert-case".to_string(),
            backend: BackendKind::Relational,
            operation: "insert".to_string(),
            payload: json!({ "table": "cases", "record": { "id": "case-1" } }),
            compensation_name: Some("relational_delete".to_string()),
            idempotency_key: Some("case-1".to_string()),
        };
        let saga = coordinator.create_saga("onboard-case", vec![step], None).await.unwrap();
        let result = coordinator.saga().execute(saga.saga_id).await.unwrap();
        assert_eq!(result.status, crate::saga::SagaStatus::Completed);
    }

    #[test]
    fn unknown_policy_kind_is_skipped_not_fatal() {
        let mut config = CoordinatorConfig::default();
        config
            .governance
            .policies
            .insert("not_a_real_kind".to_string(), json!({ "allowed_operations": ["read"] }));
        let overrides = parse_policy_overrides(&config);
        assert!(overrides.is_empty());
    }

    #[test]
    fn policy_override_parses_operations_and_forbidden_fields() {
        let mut config = CoordinatorConfig::default();
        config.governance.policies.insert(
            "relational".to_string(),
            json!({
                "allowed_operations": ["read", "update"],
                "forbidden_fields": ["ssn"],
                "forbidden_value_types": ["binary"],
            }),
        );
        let overrides = parse_policy_overrides(&config);
        let policy = overrides.get(&BackendKind::Relational).unwrap();
        assert_eq!(policy.allowed_operations.len(), 2);
        assert!(policy.forbidden_fields.contains("ssn"));
        assert!(policy.forbidden_value_types.contains(&ValueTypeTag::Binary));
    }
}
