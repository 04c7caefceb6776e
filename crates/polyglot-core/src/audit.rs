//! The audit write path used by the CRUD façade and the SAGA orchestrator.
//! Kept as an isolated, best-effort write channel: a failure here is logged,
//! never propagated into the caller's result, so an audit backend outage
//! never takes down an otherwise-successful operation. A write failure
//! still surfaces as a `tracing::error!` event rather than being silently
//! swallowed.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// One row written to the `audit_log` table on every terminal step or
/// façade-operation event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub audit_id: Uuid,
    pub saga_id: Option<Uuid>,
    pub saga_name: Option<String>,
    pub trace_id: Option<String>,
    pub case_id: Option<String>,
    pub document_id: Option<String>,
    pub step_name: Option<String>,
    pub event_type: String,
    pub status: String,
    pub duration_ms: Option<u64>,
    pub details_json: JsonValue,
    pub actor: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl AuditEntry {
    /// Build an entry stamped `created_at = Utc::now()`, filling
    /// everything else from the caller.
    #[must_use]
    pub fn new(event_type: impl Into<String>, status: impl Into<String>, details_json: JsonValue) -> Self {
        Self {
            audit_id: Uuid::new_v4(),
            saga_id: None,
            saga_name: None,
            trace_id: None,
            case_id: None,
            document_id: None,
            step_name: None,
            event_type: event_type.into(),
            status: status.into(),
            duration_ms: None,
            details_json,
            actor: None,
            created_at: Utc::now(),
        }
    }
}

/// Isolated write path for [`AuditEntry`] rows. The CRUD façade is the only
/// place in the core that writes through this trait.
#[async_trait]
pub trait AuditBackend: Send + Sync {
    async fn write(&self, entry: AuditEntry);
}

/// An [`AuditBackend`] that only logs via `tracing`, for callers that don't
/// wire in a persistent audit sink.
pub struct TracingAuditBackend;

#[async_trait]
impl AuditBackend for TracingAuditBackend {
    async fn write(&self, entry: AuditEntry) {
        tracing::info!(
            audit_id = %entry.audit_id,
            saga_id = ?entry.saga_id,
            step_name = ?entry.step_name,
            event_type = %entry.event_type,
            status = %entry.status,
            "audit"
        );
    }
}

/// A `deadpool-postgres`-backed [`AuditBackend`] that persists every entry
/// into the same `audit_log` table [`crate::saga::store::PostgresSagaStore`]
/// migrates, so a deployment can point the CRUD façade's audit sink at the
/// same database without a second schema to manage. A write failure here is
/// still never propagated to the façade's caller; only logged.
pub struct PostgresAuditBackend {
    pool: deadpool_postgres::Pool,
}

impl PostgresAuditBackend {
    /// Connect and ensure `audit_log` exists before returning.
    ///
    /// # Errors
    ///
    /// Returns an error if a connection can't be obtained or table creation
    /// fails.
    pub async fn new(pool: deadpool_postgres::Pool) -> polyglot_error::Result<Self> {
        Self::ensure_table_exists(&pool).await?;
        Ok(Self { pool })
    }

    async fn ensure_table_exists(pool: &deadpool_postgres::Pool) -> polyglot_error::Result<()> {
        let client = pool
            .get()
            .await
            .map_err(|e| polyglot_error::SagaError::Store(format!("failed to get connection: {e}")))?;
        client
            .batch_execute(
                "CREATE TABLE IF NOT EXISTS audit_log (
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
                CREATE INDEX IF NOT EXISTS idx_audit_log_saga_id ON audit_log (saga_id);
                CREATE INDEX IF NOT EXISTS idx_audit_log_created_at ON audit_log (created_at DESC);",
            )
            .await
            .map_err(|e| polyglot_error::SagaError::Store(format!("failed to create audit_log table: {e}")))?;
        Ok(())
    }
}

#[async_trait]
impl AuditBackend for PostgresAuditBackend {
    async fn write(&self, entry: AuditEntry) {
        let result: polyglot_error::Result<()> = async {
            let client = self
                .pool
                .get()
                .await
                .map_err(|e| polyglot_error::SagaError::Store(format!("failed to get connection: {e}")))?;
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
                .map_err(|e| polyglot_error::SagaError::Store(format!("failed to insert audit entry: {e}")))?;
            Ok(())
        }
        .await;

        if let Err(err) = result {
            tracing::error!(audit_id = %entry.audit_id, error = %err, "failed to persist audit entry to postgres");
        }
    }
}
