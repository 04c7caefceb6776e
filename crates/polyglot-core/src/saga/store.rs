//! Durable and in-memory implementations of [`SagaStore`].
//!
//! `PostgresSagaStore` owns a `deadpool_postgres::Pool` and lazily runs a
//! `CREATE TABLE IF NOT EXISTS` migration against the `sagas` /
//! `saga_events` / `audit_log` schema on first use, built directly from an
//! already-configured pool so construction can never silently ignore a
//! misconfigured connection string.

use std::sync::Arc;

use async_trait::async_trait;
use polyglot_error::{PersistenceError, Result, SagaError};
use tokio::sync::OnceCell;
use uuid::Uuid;

use crate::audit::AuditEntry;

use super::types::{EventStatus, Saga, SagaEvent, SagaStatus};

/// Persistence for saga records, their event log, and the audit trail,
/// backed by a three-table schema (`sagas`, `saga_events`, `audit_log`).
#[async_trait]
pub trait SagaStore: Send + Sync {
    /// Create missing tables/indices. Idempotent; safe to call on every
    /// coordinator construction.
    async fn ensure_schema(&self) -> Result<()>;

    async fn save_saga(&self, saga: &Saga) -> Result<()>;
    async fn load_saga(&self, saga_id: Uuid) -> Result<Option<Saga>>;
    async fn update_saga_status(&self, saga_id: Uuid, status: SagaStatus) -> Result<()>;

    async fn append_event(&self, event: &SagaEvent) -> Result<()>;
    async fn load_events(&self, saga_id: Uuid) -> Result<Vec<SagaEvent>>;

    /// `true` iff an event for `(saga_id, step_name, idempotency_key)`
    /// already has `status = SUCCESS`. Backed by a unique partial index on
    /// that triple — never a payload scan.
    async fn has_success_event(&self, saga_id: Uuid, step_name: &str, idempotency_key: &str) -> Result<bool>;

    async fn write_audit(&self, entry: &AuditEntry) -> Result<()>;

    /// Every saga not yet in a terminal status, for the recovery worker.
    async fn non_terminal_saga_ids(&self) -> Result<Vec<Uuid>>;
}

/// An in-memory [`SagaStore`], used by tests and by callers that don't need
/// cross-process durability.
#[derive(Default)]
pub struct InMemorySagaStore {
    sagas: parking_lot::Mutex<std::collections::HashMap<Uuid, Saga>>,
    events: parking_lot::Mutex<std::collections::HashMap<Uuid, Vec<SagaEvent>>>,
    audit: parking_lot::Mutex<Vec<AuditEntry>>,
}

impl InMemorySagaStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every audit entry written so far, for assertions in tests.
    #[must_use]
    pub fn audit_entries(&self) -> Vec<AuditEntry> {
        self.audit.lock().clone()
    }
}

#[async_trait]
impl SagaStore for InMemorySagaStore {
    async fn ensure_schema(&self) -> Result<()> {
        Ok(())
    }

    async fn save_saga(&self, saga: &Saga) -> Result<()> {
        self.sagas.lock().insert(saga.saga_id, saga.clone());
        Ok(())
    }

    async fn load_saga(&self, saga_id: Uuid) -> Result<Option<Saga>> {
        Ok(self.sagas.lock().get(&saga_id).cloned())
    }

    async fn update_saga_status(&self, saga_id: Uuid, status: SagaStatus) -> Result<()> {
        if let Some(saga) = self.sagas.lock().get_mut(&saga_id) {
            saga.status = status;
            saga.updated_at = chrono::Utc::now();
        }
        Ok(())
    }

    async fn append_event(&self, event: &SagaEvent) -> Result<()> {
        self.events.lock().entry(event.saga_id).or_default().push(event.clone());
        Ok(())
    }

    async fn load_events(&self, saga_id: Uuid) -> Result<Vec<SagaEvent>> {
        Ok(self.events.lock().get(&saga_id).cloned().unwrap_or_default())
    }

    async fn has_success_event(&self, saga_id: Uuid, step_name: &str, idempotency_key: &str) -> Result<bool> {
        Ok(self.events.lock().get(&saga_id).is_some_and(|events| {
            events.iter().any(|e| {
                e.step_name == step_name && e.idempotency_key.as_deref() == Some(idempotency_key) && e.status == EventStatus::Success
            })
        }))
    }

    async fn write_audit(&self, entry: &AuditEntry) -> Result<()> {
        self.audit.lock().push(entry.clone());
        Ok(())
    }

    async fn non_terminal_saga_ids(&self) -> Result<Vec<Uuid>> {
        Ok(self.sagas.lock().values().filter(|s| !s.status.is_terminal()).map(|s| s.saga_id).collect())
    }
}

/// A `deadpool-postgres`-backed [`SagaStore`], the durable store a
/// production deployment configures for `[relational]`.
pub struct PostgresSagaStore {
    pool: deadpool_postgres::Pool,
    schema_ready: OnceCell<()>,
}

impl PostgresSagaStore {
    #[must_use]
    pub fn new(pool: deadpool_postgres::Pool) -> Self {
        Self { pool, schema_ready: OnceCell::new() }
    }

    async fn client(&self) -> Result<deadpool_postgres::Object> {
        self.schema_ready.get_or_try_init(|| self.create_schema()).await?;
        self.pool.get().await.map_err(|e| PersistenceError::from(SagaError::Store(e.to_string())))
    }

    async fn create_schema(&self) -> Result<()> {
        let client = self.pool.get().await.map_err(|e| PersistenceError::from(SagaError::Store(e.to_string())))?;
        client
            .batch_execute(
                "
                CREATE TABLE IF NOT EXISTS sagas (
                    saga_id TEXT PRIMARY KEY,
                    name TEXT NOT NULL,
                    trace_id TEXT,
                    status TEXT NOT NULL,
                    context_json JSONB NOT NULL,
                    current_step INTEGER NOT NULL DEFAULT 0,
                    created_at TIMESTAMPTZ NOT NULL,
                    updated_at TIMESTAMPTZ NOT NULL
                );
                CREATE TABLE IF NOT EXISTS saga_events (
                    event_id TEXT PRIMARY KEY,
                    saga_id TEXT NOT NULL REFERENCES sagas(saga_id),
                    trace_id TEXT,
                    step_name TEXT NOT NULL,
                    event_type TEXT NOT NULL,
                    status TEXT NOT NULL,
                    duration_ms BIGINT,
                    payload_json JSONB NOT NULL,
                    error TEXT,
                    idempotency_key TEXT,
                    created_at TIMESTAMPTZ NOT NULL
                );
                CREATE UNIQUE INDEX IF NOT EXISTS idx_saga_events_idempotency
                    ON saga_events (saga_id, step_name, idempotency_key)
                    WHERE status = 'SUCCESS';
                CREATE INDEX IF NOT EXISTS idx_saga_events_saga
                    ON saga_events (saga_id, created_at);
                CREATE TABLE IF NOT EXISTS audit_log (
                    audit_id TEXT PRIMARY KEY,
                    saga_id TEXT,
                    saga_name TEXT,
                    trace_id TEXT,
                    case_id TEXT,
                    document_id TEXT,
                    step_name TEXT,
                    event_type TEXT NOT NULL,
                    status TEXT NOT NULL,
                    duration_ms BIGINT,
                    details_json JSONB NOT NULL,
                    actor TEXT,
                    created_at TIMESTAMPTZ NOT NULL
                );
                ",
            )
            .await
            .map_err(|e| PersistenceError::from(SagaError::Store(e.to_string())))
    }
}

#[async_trait]
impl SagaStore for PostgresSagaStore {
    async fn ensure_schema(&self) -> Result<()> {
        self.schema_ready.get_or_try_init(|| self.create_schema()).await?;
        Ok(())
    }

    async fn save_saga(&self, saga: &Saga) -> Result<()> {
        let client = self.client().await?;
        let context_json = serde_json::to_value(&saga.steps).map_err(|e| SagaError::Store(e.to_string()))?;
        client
            .execute(
                "INSERT INTO sagas (saga_id, name, trace_id, status, context_json, current_step, created_at, updated_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                 ON CONFLICT (saga_id) DO UPDATE SET
                    status = EXCLUDED.status, current_step = EXCLUDED.current_step, updated_at = EXCLUDED.updated_at",
                &[
                    &saga.saga_id.to_string(),
                    &saga.name,
                    &saga.trace_id,
                    &saga.status.as_str(),
                    &context_json,
                    &(saga.current_step as i32),
                    &saga.created_at,
                    &saga.updated_at,
                ],
            )
            .await
            .map_err(|e| SagaError::Store(e.to_string()))?;
        Ok(())
    }

    async fn load_saga(&self, saga_id: Uuid) -> Result<Option<Saga>> {
        let client = self.client().await?;
        let row = client
            .query_opt(
                "SELECT saga_id, name, trace_id, status, context_json, current_step, created_at, updated_at
                 FROM sagas WHERE saga_id = $1",
                &[&saga_id.to_string()],
            )
            .await
            .map_err(|e| SagaError::Store(e.to_string()))?;
        let Some(row) = row else { return Ok(None) };
        let status_str: String = row.get("status");
        let context_json: serde_json::Value = row.get("context_json");
        Ok(Some(Saga {
            saga_id,
            name: row.get("name"),
            trace_id: row.get("trace_id"),
            status: SagaStatus::from_str(&status_str)
                .ok_or_else(|| PersistenceError::internal(format!("unknown saga status '{status_str}'")))?,
            steps: serde_json::from_value(context_json).map_err(|e| SagaError::Store(e.to_string()))?,
            current_step: row.get::<_, i32>("current_step") as usize,
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        }))
    }

    async fn update_saga_status(&self, saga_id: Uuid, status: SagaStatus) -> Result<()> {
        let client = self.client().await?;
        client
            .execute(
                "UPDATE sagas SET status = $1, updated_at = now() WHERE saga_id = $2",
                &[&status.as_str(), &saga_id.to_string()],
            )
            .await
            .map_err(|e| SagaError::Store(e.to_string()))?;
        Ok(())
    }

    async fn append_event(&self, event: &SagaEvent) -> Result<()> {
        let client = self.client().await?;
        client
            .execute(
                "INSERT INTO saga_events
                    (event_id, saga_id, trace_id, step_name, event_type, status, duration_ms, payload_json, error, idempotency_key, created_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
                &[
                    &event.event_id.to_string(),
                    &event.saga_id.to_string(),
                    &event.trace_id,
                    &event.step_name,
                    &event.event_type,
                    &event.status.as_str(),
                    &event.duration_ms.map(|v| v as i64),
                    &event.payload_json,
                    &event.error,
                    &event.idempotency_key,
                    &event.created_at,
                ],
            )
            .await
            .map_err(|e| SagaError::Store(e.to_string()))?;
        Ok(())
    }

    async fn load_events(&self, saga_id: Uuid) -> Result<Vec<SagaEvent>> {
        let client = self.client().await?;
        let rows = client
            .query(
                "SELECT event_id, saga_id, trace_id, step_name, event_type, status, duration_ms, payload_json, error, idempotency_key, created_at
                 FROM saga_events WHERE saga_id = $1 ORDER BY created_at ASC",
                &[&saga_id.to_string()],
            )
            .await
            .map_err(|e| SagaError::Store(e.to_string()))?;
        rows.into_iter()
            .map(|row| {
                let status_str: String = row.get("status");
                Ok(SagaEvent {
                    event_id: row.get::<_, String>("event_id").parse().map_err(|_| SagaError::Store("bad event_id".to_string()))?,
                    saga_id,
                    trace_id: row.get("trace_id"),
                    step_name: row.get("step_name"),
                    event_type: row.get("event_type"),
                    status: EventStatus::from_str(&status_str)
                        .ok_or_else(|| SagaError::Store(format!("unknown event status '{status_str}'")))?,
                    duration_ms: row.get::<_, Option<i64>>("duration_ms").map(|v| v as u64),
                    payload_json: row.get("payload_json"),
                    error: row.get("error"),
                    idempotency_key: row.get("idempotency_key"),
                    created_at: row.get("created_at"),
                })
            })
            .collect::<std::result::Result<Vec<_>, SagaError>>()
            .map_err(Into::into)
    }

    async fn has_success_event(&self, saga_id: Uuid, step_name: &str, idempotency_key: &str) -> Result<bool> {
        let client = self.client().await?;
        let row = client
            .query_opt(
                "SELECT 1 FROM saga_events WHERE saga_id = $1 AND step_name = $2 AND idempotency_key = $3 AND status = 'SUCCESS'",
                &[&saga_id.to_string(), &step_name, &idempotency_key],
            )
            .await
            .map_err(|e| SagaError::Store(e.to_string()))?;
        Ok(row.is_some())
    }

    async fn write_audit(&self, entry: &AuditEntry) -> Result<()> {
        let client = self.client().await?;
        client
            .execute(
                "INSERT INTO audit_log
                    (audit_id, saga_id, saga_name, trace_id, case_id, document_id, step_name, event_type, status, duration_ms, details_json, actor, created_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
                &[
                    &entry.audit_id.to_string(),
                    &entry.saga_id.map(|id| id.to_string()),
                    &entry.saga_name,
                    &entry.trace_id,
                    &entry.case_id,
                    &entry.document_id,
                    &entry.step_name,
                    &entry.event_type,
                    &entry.status,
                    &entry.duration_ms.map(|v| v as i64),
                    &entry.details_json,
                    &entry.actor,
                    &entry.created_at,
                ],
            )
            .await
            .map_err(|e| SagaError::Store(e.to_string()))?;
        Ok(())
    }

    async fn non_terminal_saga_ids(&self) -> Result<Vec<Uuid>> {
        let client = self.client().await?;
        let rows = client
            .query(
                "SELECT saga_id FROM sagas WHERE status NOT IN ('completed', 'compensated', 'aborted', 'compensation_failed')",
                &[],
            )
            .await
            .map_err(|e| SagaError::Store(e.to_string()))?;
        rows.into_iter()
            .map(|row| row.get::<_, String>("saga_id").parse::<Uuid>().map_err(|e| SagaError::Store(e.to_string())))
            .collect::<std::result::Result<Vec<_>, SagaError>>()
            .map_err(Into::into)
    }
}
