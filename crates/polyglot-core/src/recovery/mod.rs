//! Recovery Worker: periodically scans for non-terminal sagas and resumes
//! them, with bounded per-saga retry, using an `AtomicBool` running-flag and
//! a `tokio::spawn` poll loop so the worker can be started and stopped
//! cleanly around any [`SagaCoordinator`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use polyglot_error::Result;
use uuid::Uuid;

use crate::saga::{SagaCoordinator, SagaExecutionResult};

/// Outcome of one full scan-and-resume pass, returned by [`RecoveryWorker::run_once`].
#[derive(Debug, Clone, Default)]
pub struct RecoveryPassSummary {
    pub scanned: usize,
    pub resumed: Vec<Uuid>,
    pub failed: Vec<(Uuid, String)>,
}

/// Drives [`SagaCoordinator::resume_saga`] over every non-terminal saga on a
/// fixed interval, so a saga left mid-flight by a crashed process eventually
/// completes or compensates without manual intervention.
pub struct RecoveryWorker {
    coordinator: Arc<SagaCoordinator>,
    running: AtomicBool,
    max_retries_per_saga: u32,
}

impl RecoveryWorker {
    #[must_use]
    pub fn new(coordinator: Arc<SagaCoordinator>, max_retries_per_saga: u32) -> Self {
        Self { coordinator, running: AtomicBool::new(false), max_retries_per_saga }
    }

    /// Scan once: list every non-terminal saga and attempt to resume each,
    /// retrying transient (retriable) failures up to `max_retries_per_saga`
    /// times with exponential backoff.
    ///
    /// # Errors
    ///
    /// Only the saga listing itself can fail the whole pass; a single
    /// saga's resume failure is recorded in the summary and does not abort
    /// the scan.
    pub async fn run_once(&self, store: &dyn crate::saga::SagaStore) -> Result<RecoveryPassSummary> {
        let saga_ids = store.non_terminal_saga_ids().await?;
        let mut summary = RecoveryPassSummary { scanned: saga_ids.len(), ..Default::default() };

        for saga_id in saga_ids {
            match self.resume_with_retry(saga_id).await {
                Ok(result) => {
                    tracing::info!(%saga_id, status = %result.status, "recovery worker resumed saga");
                    summary.resumed.push(saga_id);
                },
                Err(err) => {
                    tracing::error!(%saga_id, error = %err, "recovery worker gave up resuming saga");
                    summary.failed.push((saga_id, err.to_string()));
                },
            }
        }
        Ok(summary)
    }

    async fn resume_with_retry(&self, saga_id: Uuid) -> Result<SagaExecutionResult> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.coordinator.resume_saga(saga_id).await {
                Ok(result) => return Ok(result),
                Err(err) if err.is_retriable() && attempt < self.max_retries_per_saga => {
                    let backoff = Duration::from_secs_f64(0.1 * 2f64.powi(attempt as i32 - 1));
                    tokio::time::sleep(backoff).await;
                },
                Err(err) => return Err(err),
            }
        }
    }

    /// Start a background task that calls [`Self::run_once`] every
    /// `interval` until [`Self::stop`] is called. Only one background loop
    /// runs at a time per worker.
    pub fn spawn(self: Arc<Self>, store: Arc<dyn crate::saga::SagaStore>, interval: Duration) -> tokio::task::JoinHandle<()> {
        self.running.store(true, Ordering::SeqCst);
        let worker = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            while worker.running.load(Ordering::SeqCst) {
                ticker.tick().await;
                if let Err(err) = worker.run_once(store.as_ref()).await {
                    tracing::error!(error = %err, "recovery worker scan failed");
                }
            }
        })
    }

    /// Signal a running background loop to stop after its current tick.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::TracingAuditBackend;
    use crate::backend::{AdapterHandle, BackendAdapter, BackendKind, BackendStats, RelationalAdapter};
    use crate::backend::types::CrudResult;
    use crate::crud::CrudFacade;
    use crate::governance::GovernanceEngine;
    use crate::manager::{BackendManager, FailurePolicy};
    use crate::saga::{CompensationRegistry, InMemorySagaStore, InProcessMutexLock, SagaCoordinatorConfig, SagaStep};
    use async_trait::async_trait;
    use serde_json::{json, Value as JsonValue};
    use std::collections::HashMap;

    struct AlwaysOkRelational;

    #[async_trait]
    impl BackendAdapter for AlwaysOkRelational {
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
    impl RelationalAdapter for AlwaysOkRelational {
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

    #[tokio::test]
    async fn run_once_resumes_every_non_terminal_saga() {
        let manager = Arc::new(BackendManager::new(FailurePolicy::Lenient));
        manager.register(BackendKind::Relational, Box::new(|| AdapterHandle::Relational(Arc::new(AlwaysOkRelational))));
        manager.start_all_backends(None, Duration::from_secs(1)).await;
        let governance = Arc::new(GovernanceEngine::new(HashMap::new(), true));
        let facade = Arc::new(CrudFacade::new(governance, manager.clone(), Arc::new(TracingAuditBackend)));
        let store = Arc::new(InMemorySagaStore::new());
        let coordinator = Arc::new(SagaCoordinator::new(
            facade,
            manager,
            store.clone(),
            Arc::new(InProcessMutexLock::new()),
            CompensationRegistry::with_defaults(),
            SagaCoordinatorConfig::default(),
        ));

        let step = SagaStep {
            step_id: "s1".to_string(),
            backend: BackendKind::Relational,
            operation: "insert".to_string(),
            payload: json!({ "table": "cases", "record": { "id": "c1" } }),
            compensation_name: Some("relational_delete".to_string()),
            idempotency_key: Some("key1".to_string()),
        };
        let saga = coordinator.create_saga("recoverable", vec![step], None).await.unwrap();

        let worker = RecoveryWorker::new(coordinator, 3);
        let summary = worker.run_once(store.as_ref()).await.unwrap();

        assert_eq!(summary.scanned, 1);
        assert_eq!(summary.resumed, vec![saga.saga_id]);
        assert!(summary.failed.is_empty());
    }

    #[tokio::test]
    async fn run_once_is_a_no_op_when_nothing_is_pending() {
        let manager = Arc::new(BackendManager::new(FailurePolicy::Lenient));
        let governance = Arc::new(GovernanceEngine::new(HashMap::new(), true));
        let facade = Arc::new(CrudFacade::new(governance, manager.clone(), Arc::new(TracingAuditBackend)));
        let store = Arc::new(InMemorySagaStore::new());
        let coordinator = Arc::new(SagaCoordinator::new(
            facade,
            manager,
            store.clone(),
            Arc::new(InProcessMutexLock::new()),
            CompensationRegistry::with_defaults(),
            SagaCoordinatorConfig::default(),
        ));
        let worker = RecoveryWorker::new(coordinator, 3);
        let summary = worker.run_once(store.as_ref()).await.unwrap();
        assert_eq!(summary.scanned, 0);
    }
}
