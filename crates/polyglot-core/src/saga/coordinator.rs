//! The SAGA Orchestrator itself: creates durable saga records, drives
//! forward execution step-by-step under an advisory lock, and triggers
//! reverse-order compensation on failure. Each step follows the same
//! acquire-lock → check-idempotency → run-step → on-failure-compensate
//! shape regardless of which backend kind it targets.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use polyglot_error::{PersistenceError, Result, SagaError};
use serde_json::json;
use uuid::Uuid;

use crate::audit::AuditEntry;
use crate::crud::CrudFacade;
use crate::manager::BackendManager;

use super::compensation::{CompensationContext, CompensationRegistry};
use super::lock::AdvisoryLock;
use super::step_op::operation_from_step;
use super::store::SagaStore;
use super::types::{EventStatus, Saga, SagaEvent, SagaExecutionResult, SagaStatus, SagaStep};

/// Tunables for retry/backoff/timeout behavior, split out from
/// [`SagaCoordinator`] so callers can override them per deployment without
/// touching its wiring.
#[derive(Debug, Clone, Copy)]
pub struct SagaCoordinatorConfig {
    /// Max attempts per forward step before it's recorded `FAIL` and
    /// compensation begins (default base delay `0.1s`).
    pub max_step_attempts: u32,
    /// Per-step execution timeout, applied around the CRUD Façade call.
    pub step_timeout: Duration,
    /// Max attempts to acquire the advisory lock before failing with
    /// `LockContention` (default: 3 attempts totalling ~30s).
    pub max_lock_attempts: u32,
    /// Base backoff for lock retries; doubled per attempt.
    pub lock_retry_base_delay: Duration,
    /// Max attempts per compensation handler (default: 3 attempts).
    pub max_compensation_attempts: u32,
    /// Overall soft deadline for a saga's forward execution (default 300s).
    pub saga_deadline: Duration,
}

impl Default for SagaCoordinatorConfig {
    fn default() -> Self {
        Self {
            max_step_attempts: 3,
            step_timeout: Duration::from_secs(30),
            max_lock_attempts: 3,
            lock_retry_base_delay: Duration::from_secs(10),
            max_compensation_attempts: 3,
            saga_deadline: Duration::from_secs(300),
        }
    }
}

fn step_backoff(attempt: u32) -> Duration {
    Duration::from_secs_f64(0.1 * 2f64.powi(attempt as i32 - 1))
}

/// Durable, resumable execution of multi-backend sagas with compensating
/// rollback on failure.
pub struct SagaCoordinator {
    facade: Arc<CrudFacade>,
    manager: Arc<BackendManager>,
    store: Arc<dyn SagaStore>,
    lock: Arc<dyn AdvisoryLock>,
    compensation: CompensationRegistry,
    config: SagaCoordinatorConfig,
}

impl SagaCoordinator {
    #[must_use]
    pub fn new(
        facade: Arc<CrudFacade>,
        manager: Arc<BackendManager>,
        store: Arc<dyn SagaStore>,
        lock: Arc<dyn AdvisoryLock>,
        compensation: CompensationRegistry,
        config: SagaCoordinatorConfig,
    ) -> Self {
        Self { facade, manager, store, lock, compensation, config }
    }

    /// Persist a new saga in `Created` status. Does not start execution —
    /// call [`Self::execute`] with the returned `saga_id`.
    ///
    /// # Errors
    ///
    /// Propagates any [`SagaStore`] failure.
    pub async fn create_saga(&self, name: impl Into<String>, steps: Vec<SagaStep>, trace_id: Option<String>) -> Result<Saga> {
        self.store.ensure_schema().await?;
        let now = Utc::now();
        let saga = Saga {
            saga_id: Uuid::new_v4(),
            name: name.into(),
            trace_id,
            status: SagaStatus::Created,
            steps,
            current_step: 0,
            created_at: now,
            updated_at: now,
        };
        self.store.save_saga(&saga).await?;
        Ok(saga)
    }

    /// Run a saga to completion or compensated failure, under the saga's
    /// advisory lock for the whole call.
    ///
    /// # Errors
    ///
    /// Returns `Err` only for infrastructure failures that prevented the
    /// saga from running at all (lock contention, store unavailability, the
    /// saga id not existing). A business-level step or compensation failure
    /// is reported inside the returned [`SagaExecutionResult`], never as an
    /// `Err` — matching the CRUD Façade's "adapters never raise for
    /// business-level failures" convention.
    pub async fn execute(&self, saga_id: Uuid) -> Result<SagaExecutionResult> {
        self.lock.acquire(saga_id, self.config.max_lock_attempts, self.config.lock_retry_base_delay).await?;
        let result = self.execute_locked(saga_id).await;
        if let Err(err) = self.lock.release(saga_id).await {
            tracing::warn!(%saga_id, error = %err, "failed to release saga lock");
        }
        result
    }

    /// Resume a saga left in a non-terminal state, e.g. after a process
    /// crash between two steps. Identical to [`Self::execute`]: already
    /// `SUCCESS` steps are skipped via their idempotency key, so re-entering
    /// from the beginning is always safe against a crash at any point.
    ///
    /// # Errors
    ///
    /// See [`Self::execute`].
    pub async fn resume_saga(&self, saga_id: Uuid) -> Result<SagaExecutionResult> {
        self.execute(saga_id).await
    }

    /// Compensate a saga outside the normal forward-failure path, e.g. an
    /// operator-triggered rollback of a completed saga.
    ///
    /// # Errors
    ///
    /// See [`Self::execute`].
    pub async fn compensate_saga(&self, saga_id: Uuid) -> Result<SagaExecutionResult> {
        self.lock.acquire(saga_id, self.config.max_lock_attempts, self.config.lock_retry_base_delay).await?;
        let result = self.compensate_saga_locked(saga_id).await;
        if let Err(err) = self.lock.release(saga_id).await {
            tracing::warn!(%saga_id, error = %err, "failed to release saga lock");
        }
        result
    }

    async fn compensate_saga_locked(&self, saga_id: Uuid) -> Result<SagaExecutionResult> {
        let saga = self.store.load_saga(saga_id).await?.ok_or(SagaError::NotFound { saga_id })?;
        self.store.update_saga_status(saga_id, SagaStatus::Compensating).await?;
        let (status, compensation_errors) = self.compensate_locked(&saga).await;
        self.store.update_saga_status(saga_id, status).await?;
        Ok(SagaExecutionResult { saga_id, status, executed_steps: Vec::new(), errors: Vec::new(), compensation_errors })
    }

    async fn execute_locked(&self, saga_id: Uuid) -> Result<SagaExecutionResult> {
        let saga = self.store.load_saga(saga_id).await?.ok_or(SagaError::NotFound { saga_id })?;
        if saga.status.is_terminal() {
            return Ok(SagaExecutionResult {
                saga_id,
                status: saga.status,
                executed_steps: Vec::new(),
                errors: Vec::new(),
                compensation_errors: Vec::new(),
            });
        }

        self.store.update_saga_status(saga_id, SagaStatus::Running).await?;
        let deadline = saga.created_at + chrono::Duration::from_std(self.config.saga_deadline).unwrap_or(chrono::Duration::zero());

        let mut executed_steps = Vec::new();
        for step in &saga.steps {
            if Utc::now() > deadline {
                let message = format!("saga exceeded its {}s deadline", self.config.saga_deadline.as_secs());
                self.write_audit(&saga, None, "timed_out", json!({ "executed_steps": executed_steps })).await;
                return self
                    .fail_and_compensate(&saga, executed_steps, SagaError::Timeout { saga_id, deadline_secs: self.config.saga_deadline.as_secs() }.into(), message)
                    .await;
            }

            if let Some(key) = &step.idempotency_key {
                if self.store.has_success_event(saga_id, &step.step_id, key).await? {
                    self.append_event(&saga, step, EventStatus::Skipped, None, None).await?;
                    executed_steps.push(step.step_id.clone());
                    continue;
                }
            }

            match self.execute_step_with_retry(&saga, step).await {
                Ok(()) => executed_steps.push(step.step_id.clone()),
                Err(err) => {
                    let message = err.to_string();
                    return self.fail_and_compensate(&saga, executed_steps, err, message).await;
                },
            }
        }

        self.store.update_saga_status(saga_id, SagaStatus::Completed).await?;
        self.write_audit(&saga, None, "completed", json!({ "executed_steps": executed_steps })).await;
        Ok(SagaExecutionResult { saga_id, status: SagaStatus::Completed, executed_steps, errors: Vec::new(), compensation_errors: Vec::new() })
    }

    async fn fail_and_compensate(
        &self,
        saga: &Saga,
        executed_steps: Vec<String>,
        err: PersistenceError,
        message: String,
    ) -> Result<SagaExecutionResult> {
        self.store.update_saga_status(saga.saga_id, SagaStatus::Compensating).await?;
        let (status, compensation_errors) = self.compensate_locked(saga).await;
        self.store.update_saga_status(saga.saga_id, status).await?;
        tracing::warn!(saga_id = %saga.saga_id, error = %err, "saga step failed, compensation ran");
        Ok(SagaExecutionResult { saga_id: saga.saga_id, status, executed_steps, errors: vec![message], compensation_errors })
    }

    async fn execute_step_with_retry(&self, saga: &Saga, step: &SagaStep) -> Result<()> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let started = Instant::now();
            let operation = operation_from_step(step)?;
            let outcome = tokio::time::timeout(self.config.step_timeout, self.facade.execute(operation)).await;
            let duration_ms = started.elapsed().as_millis() as u64;

            let retry_message = match outcome {
                Ok(Ok(result)) if result.success => {
                    self.append_event(saga, step, EventStatus::Success, Some(duration_ms), None).await?;
                    self.write_audit(saga, Some(&step.step_id), "step_succeeded", json!({ "attempt": attempt })).await;
                    return Ok(());
                },
                Ok(Ok(result)) => result.error.unwrap_or_else(|| "adapter reported failure".to_string()),
                Ok(Err(err)) => err.to_string(),
                Err(_) => "step timed out".to_string(),
            };

            if attempt >= self.config.max_step_attempts {
                self.append_event(saga, step, EventStatus::Fail, Some(duration_ms), Some(retry_message.clone())).await?;
                return Err(SagaError::StepFatal { saga_id: saga.saga_id, step_name: step.step_id.clone(), message: retry_message }.into());
            }
            tokio::time::sleep(step_backoff(attempt)).await;
        }
    }

    async fn compensate_locked(&self, saga: &Saga) -> (SagaStatus, Vec<String>) {
        let events = match self.store.load_events(saga.saga_id).await {
            Ok(events) => events,
            Err(err) => return (SagaStatus::CompensationFailed, vec![err.to_string()]),
        };
        let ctx = self.build_compensation_context();
        let mut compensation_errors = Vec::new();
        let mut all_ok = true;

        for step in success_steps_reverse_order(saga, &events) {
            let Some(name) = &step.compensation_name else { continue };
            let handler = match self.compensation.get(name) {
                Ok(handler) => handler,
                Err(err) => {
                    all_ok = false;
                    compensation_errors.push(format!("{}: {err}", step.step_id));
                    continue;
                },
            };

            let mut last_error = None;
            let mut succeeded = false;
            for attempt in 1..=self.config.max_compensation_attempts {
                match handler.compensate(&ctx, &step.payload).await {
                    Ok(true) => {
                        succeeded = true;
                        break;
                    },
                    Ok(false) => last_error = Some("compensation declined to act".to_string()),
                    Err(err) => last_error = Some(err.to_string()),
                }
                if attempt < self.config.max_compensation_attempts {
                    tokio::time::sleep(step_backoff(attempt)).await;
                }
            }

            if succeeded {
                if let Err(err) = self.append_event(saga, step, EventStatus::Compensated, None, None).await {
                    tracing::error!(saga_id = %saga.saga_id, error = %err, "failed to record compensation event");
                }
            } else {
                all_ok = false;
                compensation_errors.push(format!("{}: {}", step.step_id, last_error.unwrap_or_default()));
            }
        }

        let status = if all_ok { SagaStatus::Compensated } else { SagaStatus::CompensationFailed };
        self.write_audit(saga, None, status.as_str(), json!({ "compensation_errors": compensation_errors })).await;
        (status, compensation_errors)
    }

    fn build_compensation_context(&self) -> CompensationContext {
        CompensationContext {
            relational_backend: self.manager.get_relational_backend().ok().flatten(),
            graph_backend: self.manager.get_graph_backend().ok().flatten(),
            vector_backend: self.manager.get_vector_backend().ok().flatten(),
            file_backend: self.manager.get_file_backend().ok().flatten(),
        }
    }

    async fn append_event(
        &self,
        saga: &Saga,
        step: &SagaStep,
        status: EventStatus,
        duration_ms: Option<u64>,
        error: Option<String>,
    ) -> Result<()> {
        let event = SagaEvent {
            event_id: Uuid::new_v4(),
            saga_id: saga.saga_id,
            trace_id: saga.trace_id.clone(),
            step_name: step.step_id.clone(),
            event_type: "step".to_string(),
            status,
            duration_ms,
            payload_json: step.payload.clone(),
            error,
            idempotency_key: step.idempotency_key.clone(),
            created_at: Utc::now(),
        };
        self.store.append_event(&event).await
    }

    async fn write_audit(&self, saga: &Saga, step_name: Option<&str>, status: &str, details: serde_json::Value) {
        let entry = AuditEntry {
            saga_id: Some(saga.saga_id),
            saga_name: Some(saga.name.clone()),
            trace_id: saga.trace_id.clone(),
            step_name: step_name.map(str::to_string),
            ..AuditEntry::new("saga", status, details)
        };
        if let Err(err) = self.store.write_audit(&entry).await {
            tracing::error!(saga_id = %saga.saga_id, error = %err, "failed to write saga audit entry");
        }
    }
}

/// Steps with a `SUCCESS` event not already marked `COMPENSATED`, newest
/// first — the reverse order compensations must run in.
fn success_steps_reverse_order<'a>(saga: &'a Saga, events: &[SagaEvent]) -> Vec<&'a SagaStep> {
    let compensated: HashSet<&str> = events.iter().filter(|e| e.status == EventStatus::Compensated).map(|e| e.step_name.as_str()).collect();
    let mut successes: Vec<&SagaEvent> = events
        .iter()
        .filter(|e| e.event_type == "step" && e.status == EventStatus::Success && !compensated.contains(e.step_name.as_str()))
        .collect();
    successes.sort_by_key(|e| e.created_at);
    successes.reverse();
    successes.into_iter().filter_map(|e| saga.steps.iter().find(|s| s.step_id == e.step_name)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::TracingAuditBackend;
    use crate::backend::types::CrudResult;
    use crate::backend::{AdapterHandle, BackendAdapter, BackendKind, BackendStats, RelationalAdapter};
    use crate::governance::GovernanceEngine;
    use crate::manager::FailurePolicy;
    use crate::saga::lock::InProcessMutexLock;
    use crate::saga::store::InMemorySagaStore;
    use async_trait::async_trait;
    use serde_json::{json, Value as JsonValue};
    use std::collections::HashMap;

    struct RecordingRelational {
        inserted: parking_lot::Mutex<Vec<JsonValue>>,
        deleted: parking_lot::Mutex<Vec<JsonValue>>,
        fail_inserts_for: Option<String>,
    }

    #[async_trait]
    impl BackendAdapter for RecordingRelational {
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
    impl RelationalAdapter for RecordingRelational {
        async fn create_table(&self, _name: &str, _schema: &JsonValue) -> Result<CrudResult> {
            Ok(CrudResult::ok(JsonValue::Null))
        }
        async fn insert(&self, table: &str, record: &JsonValue) -> Result<CrudResult> {
            if self.fail_inserts_for.as_deref() == Some(table) {
                return Ok(CrudResult::fail("simulated insert failure"));
            }
            self.inserted.lock().push(record.clone());
            Ok(CrudResult::ok(record.clone()))
        }
        async fn update(&self, _table: &str, _id: &str, fields: &JsonValue) -> Result<CrudResult> {
            Ok(CrudResult::ok(fields.clone()))
        }
        async fn select(&self, _table: &str, _filter: &JsonValue, _order: Option<&str>, _limit: Option<u32>) -> Result<CrudResult> {
            Ok(CrudResult::ok(json!([])))
        }
        async fn delete(&self, table: &str, filter: &JsonValue) -> Result<CrudResult> {
            self.deleted.lock().push(json!({ "table": table, "filter": filter }));
            Ok(CrudResult::ok(json!({ "deleted": 1 })))
        }
        async fn execute_query(&self, _sql: &str, _params: &[JsonValue]) -> Result<CrudResult> {
            Ok(CrudResult::ok(JsonValue::Null))
        }
    }

    fn coordinator_with(adapter: Arc<RecordingRelational>) -> (SagaCoordinator, Arc<InMemorySagaStore>) {
        let manager = Arc::new(BackendManager::new(FailurePolicy::Lenient));
        manager.register(BackendKind::Relational, {
            let adapter = adapter.clone();
            Box::new(move || AdapterHandle::Relational(adapter.clone()))
        });
        let governance = Arc::new(GovernanceEngine::new(HashMap::new(), true));
        let facade = Arc::new(CrudFacade::new(governance, manager.clone(), Arc::new(TracingAuditBackend)));
        let store = Arc::new(InMemorySagaStore::new());
        let lock = Arc::new(InProcessMutexLock::new());
        let coordinator = SagaCoordinator::new(
            facade,
            manager.clone(),
            store.clone(),
            lock,
            CompensationRegistry::with_defaults(),
            SagaCoordinatorConfig::default(),
        );
        (coordinator, store)
    }

    fn insert_step(id: &str, table: &str, record_id: &str, idempotency_key: Option<&str>) -> SagaStep {
        SagaStep {
            step_id: id.to_string(),
            backend: BackendKind::Relational,
            operation: "insert".to_string(),
            payload: json!({ "table": table, "record": { "id": record_id } }),
            compensation_name: Some("relational_delete".to_string()),
            idempotency_key: idempotency_key.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn successful_saga_executes_every_step() {
        let adapter = Arc::new(RecordingRelational { inserted: parking_lot::Mutex::new(Vec::new()), deleted: parking_lot::Mutex::new(Vec::new()), fail_inserts_for: None });
        let manager = Arc::new(BackendManager::new(FailurePolicy::Lenient));
        manager.register(BackendKind::Relational, {
            let adapter = adapter.clone();
            Box::new(move || AdapterHandle::Relational(adapter.clone()))
        });
        manager.start_all_backends(None, Duration::from_secs(1)).await;
        let governance = Arc::new(GovernanceEngine::new(HashMap::new(), true));
        let facade = Arc::new(CrudFacade::new(governance, manager.clone(), Arc::new(TracingAuditBackend)));
        let store = Arc::new(InMemorySagaStore::new());
        let coordinator = SagaCoordinator::new(
            facade,
            manager,
            store.clone(),
            Arc::new(InProcessMutexLock::new()),
            CompensationRegistry::with_defaults(),
            SagaCoordinatorConfig::default(),
        );

        let steps = vec![insert_step("s1", "cases", "case-1", Some("key1")), insert_step("s2", "documents", "doc-1", Some("key2"))];
        let saga = coordinator.create_saga("open-case", steps, None).await.unwrap();
        let result = coordinator.execute(saga.saga_id).await.unwrap();

        assert_eq!(result.status, SagaStatus::Completed);
        assert_eq!(result.executed_steps, vec!["s1".to_string(), "s2".to_string()]);
        assert_eq!(adapter.inserted.lock().len(), 2);
    }

    #[tokio::test]
    async fn every_successful_step_gets_an_audit_log_row() {
        let adapter = Arc::new(RecordingRelational { inserted: parking_lot::Mutex::new(Vec::new()), deleted: parking_lot::Mutex::new(Vec::new()), fail_inserts_for: None });
        let (coordinator, store) = coordinator_with(adapter.clone());
        coordinator.facade_manager_start().await;

        let steps = vec![insert_step("s1", "cases", "case-1", Some("key1")), insert_step("s2", "documents", "doc-1", Some("key2"))];
        let saga = coordinator.create_saga("audited", steps, None).await.unwrap();
        let result = coordinator.execute(saga.saga_id).await.unwrap();
        assert_eq!(result.status, SagaStatus::Completed);

        let step_audit_entries: Vec<_> = store
            .audit_entries()
            .into_iter()
            .filter(|e| e.status == "step_succeeded")
            .collect();
        assert_eq!(step_audit_entries.len(), 2);
        assert_eq!(step_audit_entries[0].step_name.as_deref(), Some("s1"));
        assert_eq!(step_audit_entries[1].step_name.as_deref(), Some("s2"));
    }

    #[tokio::test]
    async fn resume_after_crash_skips_already_succeeded_step() {
        let adapter = Arc::new(RecordingRelational { inserted: parking_lot::Mutex::new(Vec::new()), deleted: parking_lot::Mutex::new(Vec::new()), fail_inserts_for: None });
        let (coordinator, store) = coordinator_with(adapter.clone());
        coordinator.facade_manager_start().await;

        let steps = vec![insert_step("s1", "cases", "case-1", Some("key1")), insert_step("s2", "documents", "doc-1", Some("key2"))];
        let saga = coordinator.create_saga("crash-resume", steps, None).await.unwrap();

        // Simulate a crash right after step s1 committed: its SUCCESS event
        // is durable, but the saga status never advanced past `running`.
        store.update_saga_status(saga.saga_id, SagaStatus::Running).await.unwrap();
        store
            .append_event(&SagaEvent {
                event_id: Uuid::new_v4(),
                saga_id: saga.saga_id,
                trace_id: None,
                step_name: "s1".to_string(),
                event_type: "step".to_string(),
                status: EventStatus::Success,
                duration_ms: Some(5),
                payload_json: json!({}),
                error: None,
                idempotency_key: Some("key1".to_string()),
                created_at: Utc::now(),
            })
            .await
            .unwrap();

        let result = coordinator.resume_saga(saga.saga_id).await.unwrap();

        assert_eq!(result.status, SagaStatus::Completed);
        assert_eq!(result.executed_steps, vec!["s1".to_string(), "s2".to_string()]);
        // s1 was never actually re-run against the adapter, only s2 was.
        assert_eq!(adapter.inserted.lock().len(), 1);
        assert_eq!(adapter.inserted.lock()[0]["id"], json!("doc-1"));
    }

    #[tokio::test]
    async fn failed_step_triggers_compensation_of_prior_steps() {
        let adapter = Arc::new(RecordingRelational {
            inserted: parking_lot::Mutex::new(Vec::new()),
            deleted: parking_lot::Mutex::new(Vec::new()),
            fail_inserts_for: Some("documents".to_string()),
        });
        let (coordinator, _store) = coordinator_with(adapter.clone());
        coordinator.facade_manager_start().await;

        let mut config = SagaCoordinatorConfig::default();
        config.max_step_attempts = 1;
        let coordinator = SagaCoordinator { config, ..coordinator };

        let steps = vec![insert_step("s1", "cases", "case-1", Some("key1")), insert_step("s2", "documents", "doc-1", Some("key2"))];
        let saga = coordinator.create_saga("will-fail", steps, None).await.unwrap();
        let result = coordinator.execute(saga.saga_id).await.unwrap();

        assert_eq!(result.status, SagaStatus::Compensated);
        assert_eq!(result.executed_steps, vec!["s1".to_string()]);
        assert_eq!(adapter.deleted.lock().len(), 1);
        assert_eq!(adapter.deleted.lock()[0]["filter"]["id"], json!("case-1"));
    }

    impl SagaCoordinator {
        async fn facade_manager_start(&self) {
            self.manager.start_all_backends(None, Duration::from_secs(1)).await;
        }
    }
}
