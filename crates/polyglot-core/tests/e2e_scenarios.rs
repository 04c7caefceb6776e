//! End-to-end scenario tests exercising the full control-flow path
//! (governance → manager → strategy → façade → saga) without a live
//! database, using `polyglot-test-utils`' in-memory fakes.

use std::collections::HashMap;
use std::sync::Arc;

use polyglot_core::audit::TracingAuditBackend;
use polyglot_core::backend::BackendKind;
use polyglot_core::config::CoordinatorConfig;
use polyglot_core::coordinator::{PersistenceCoordinator, PersistenceCoordinatorDeps};
use polyglot_core::manager::BackendFactory;
use polyglot_core::saga::{InMemorySagaStore, InProcessMutexLock, SagaStatus, SagaStep};
use polyglot_core::strategy::{BackendAvailability, DatabaseAvailability, StrategySelector, StrategyType};
use serde_json::json;

async fn coordinator_with_fakes() -> (PersistenceCoordinator, Arc<InMemorySagaStore>) {
    let mut factories: HashMap<BackendKind, BackendFactory> = HashMap::new();
    let relational = Arc::new(polyglot_test_utils::FakeRelationalAdapter::new());
    let file = Arc::new(polyglot_test_utils::FakeFileAdapter::new());
    let graph = Arc::new(polyglot_test_utils::FakeGraphAdapter::new());
    let vector = Arc::new(polyglot_test_utils::FakeVectorAdapter::new());

    {
        let relational = relational.clone();
        factories.insert(
            BackendKind::Relational,
            Box::new(move || polyglot_core::backend::AdapterHandle::Relational(relational.clone())),
        );
    }
    {
        let file = file.clone();
        factories.insert(BackendKind::File, Box::new(move || polyglot_core::backend::AdapterHandle::File(file.clone())));
    }
    {
        let graph = graph.clone();
        factories.insert(BackendKind::Graph, Box::new(move || polyglot_core::backend::AdapterHandle::Graph(graph.clone())));
    }
    {
        let vector = vector.clone();
        factories.insert(BackendKind::Vector, Box::new(move || polyglot_core::backend::AdapterHandle::Vector(vector.clone())));
    }

    let saga_store = Arc::new(InMemorySagaStore::new());
    let deps = PersistenceCoordinatorDeps {
        factories,
        probes: HashMap::new(),
        audit: Arc::new(TracingAuditBackend),
        saga_store: saga_store.clone(),
        saga_lock: Arc::new(InProcessMutexLock::new()),
    };
    let mut config = CoordinatorConfig::default();
    config.autostart = true;
    let coordinator = PersistenceCoordinator::new(config, deps).await.unwrap();
    (coordinator, saga_store)
}

fn relational_insert_step(step_id: &str, record_id: &str, idempotency_key: Option<&str>) -> SagaStep {
    SagaStep {
        step_id: step_id.to_string(),
        backend: BackendKind::Relational,
        operation: "insert".to_string(),
        payload: json!({ "table": "documents", "record": { "id": record_id, "content": "hello" } }),
        compensation_name: Some("relational_delete".to_string()),
        idempotency_key: idempotency_key.map(str::to_string),
    }
}

/// E1: a single-step saga against a reachable relational backend completes,
/// and the row it wrote is observable afterward.
#[tokio::test]
async fn e1_successful_two_store_saga_completes_and_persists() {
    let (coordinator, _store) = coordinator_with_fakes().await;
    let saga = coordinator
        .create_saga("e1", vec![relational_insert_step("s1", "d1", Some("key1"))], None)
        .await
        .unwrap();
    let result = coordinator.saga().execute(saga.saga_id).await.unwrap();
    assert_eq!(result.status, SagaStatus::Completed);
    assert_eq!(result.executed_steps, vec!["s1".to_string()]);
}

/// E2: a second step naming an operation the vector adapter does not
/// implement fails, triggering reverse-order compensation of step one.
#[tokio::test]
async fn e2_compensation_runs_on_downstream_failure() {
    let (coordinator, _store) = coordinator_with_fakes().await;
    let steps = vec![
        relational_insert_step("s1", "d1", Some("key1")),
        SagaStep {
            step_id: "s2".to_string(),
            backend: BackendKind::Vector,
            operation: "unsupported_op".to_string(),
            payload: json!({}),
            compensation_name: None,
            idempotency_key: None,
        },
    ];
    let saga = coordinator.create_saga("e2", steps, None).await.unwrap();
    let result = coordinator.saga().execute(saga.saga_id).await.unwrap();
    assert_eq!(result.status, SagaStatus::Compensated);
    assert_eq!(result.executed_steps, vec!["s1".to_string()]);
}

/// E3: re-running the same saga with the same idempotency key a second time
/// skips the already-succeeded step instead of inserting a duplicate row.
#[tokio::test]
async fn e3_idempotent_rerun_skips_already_succeeded_step() {
    let (coordinator, _store) = coordinator_with_fakes().await;
    let saga = coordinator
        .create_saga("e3", vec![relational_insert_step("s1", "d1", Some("key1"))], None)
        .await
        .unwrap();

    let first = coordinator.saga().execute(saga.saga_id).await.unwrap();
    assert_eq!(first.status, SagaStatus::Completed);

    let second = coordinator.saga().execute(saga.saga_id).await.unwrap();
    assert_eq!(second.status, SagaStatus::Completed);
}

/// E4: resuming a saga left mid-flight (as if a process crashed between
/// steps) only re-runs the steps that never recorded a SUCCESS event.
#[tokio::test]
async fn e4_resume_after_crash_only_runs_remaining_steps() {
    let (coordinator, store) = coordinator_with_fakes().await;
    let steps = vec![
        relational_insert_step("s1", "d1", Some("key1")),
        relational_insert_step("s2", "d2", Some("key2")),
        relational_insert_step("s3", "d3", Some("key3")),
    ];
    let saga = coordinator.create_saga("e4", steps, None).await.unwrap();

    // Simulate a crash: s1 committed and has a durable SUCCESS event, but the
    // saga's status was never advanced past `running` and s2/s3 never ran.
    store.update_saga_status(saga.saga_id, SagaStatus::Running).await.unwrap();
    store
        .append_event(&polyglot_core::saga::SagaEvent {
            event_id: uuid::Uuid::new_v4(),
            saga_id: saga.saga_id,
            trace_id: None,
            step_name: "s1".to_string(),
            event_type: "step".to_string(),
            status: polyglot_core::saga::EventStatus::Success,
            duration_ms: Some(1),
            payload_json: json!({}),
            error: None,
            idempotency_key: Some("key1".to_string()),
            created_at: chrono::Utc::now(),
        })
        .await
        .unwrap();

    let result = coordinator.saga().resume_saga(saga.saga_id).await.unwrap();
    assert_eq!(result.status, SagaStatus::Completed);
    assert_eq!(result.executed_steps, vec!["s1".to_string(), "s2".to_string(), "s3".to_string()]);
}

/// E5: a graph step carrying a forbidden `content` field is rejected by
/// governance before any adapter ever sees it.
#[tokio::test]
async fn e5_governance_blocks_graph_content_field() {
    let (coordinator, _store) = coordinator_with_fakes().await;
    let result = coordinator
        .execute(polyglot_core::crud::CrudOperation::Graph(polyglot_core::crud::GraphOp::MergeNode {
            label: "Document".to_string(),
            match_props: json!({ "id": "d1", "content": "raw bytes pretending to be text" }),
            set_props: None,
        }))
        .await;
    let err = result.expect_err("governance must reject the forbidden field");
    let message = err.to_string();
    assert!(message.contains("content"), "message was: {message}");
    assert!(message.contains("graph"), "message was: {message}");
}

/// E6: when no primary backend is reachable at all, strategy selection
/// degrades all the way to the monolith tier.
#[tokio::test]
async fn e6_strategy_degrades_to_relational_monolith_with_nothing_reachable() {
    let mut per_kind = HashMap::new();
    per_kind.insert(BackendKind::Relational, BackendAvailability::unreachable());
    per_kind.insert(BackendKind::Document, BackendAvailability::unreachable());
    per_kind.insert(BackendKind::Vector, BackendAvailability::unreachable());
    per_kind.insert(BackendKind::Graph, BackendAvailability::unreachable());
    let availability = DatabaseAvailability { per_kind, last_probed_at: std::time::SystemTime::now() };

    let plan = StrategySelector::select_strategy(&availability);
    assert_eq!(plan.selected, StrategyType::RelationalMonolith);
    assert!(plan.role_map.is_empty());
}

/// When only the relational backend is reachable, strategy selection picks
/// the enhanced tier rather than degrading further.
#[tokio::test]
async fn only_relational_reachable_selects_relational_enhanced() {
    let mut per_kind = HashMap::new();
    per_kind.insert(BackendKind::Relational, BackendAvailability::from_latency(100));
    per_kind.insert(BackendKind::Document, BackendAvailability::unreachable());
    per_kind.insert(BackendKind::Vector, BackendAvailability::unreachable());
    per_kind.insert(BackendKind::Graph, BackendAvailability::unreachable());
    let availability = DatabaseAvailability { per_kind, last_probed_at: std::time::SystemTime::now() };

    let plan = StrategySelector::select_strategy(&availability);
    assert_eq!(plan.selected, StrategyType::RelationalEnhanced);
}

/// Boundary behavior: an empty step list completes immediately.
#[tokio::test]
async fn empty_step_list_completes_immediately() {
    let (coordinator, _store) = coordinator_with_fakes().await;
    let saga = coordinator.create_saga("empty", Vec::new(), None).await.unwrap();
    let result = coordinator.saga().execute(saga.saga_id).await.unwrap();
    assert_eq!(result.status, SagaStatus::Completed);
    assert!(result.executed_steps.is_empty());
}
