//! CRUD Façade.
//!
//! The single entry point the rest of the system uses to talk to a backend:
//! every call runs governance, looks up the adapter through the manager,
//! dispatches to the kind-specific method, and writes exactly one
//! [`AuditEntry`] plus one `tracing` metrics event, regardless of outcome. A
//! `case_id`, when present in the payload, is pulled out up front for trace
//! correlation without being validated itself.

mod operation;

pub use operation::{CrudOperation, DocumentOp, FileOp, GraphOp, RelationalOp, VectorOp};

use std::sync::Arc;
use std::time::Instant;

use polyglot_error::{BackendError, GovernanceError, PersistenceError, Result};
use serde_json::Value as JsonValue;

use crate::audit::{AuditBackend, AuditEntry};
use crate::backend::{BackendKind, CrudResult};
use crate::governance::GovernanceEngine;
use crate::manager::BackendManager;

/// Per-call metrics emitted as a single `tracing` event.
#[derive(Debug, Clone)]
struct CrudMetrics {
    operation: String,
    outcome: &'static str,
    duration_ms: u128,
    governance_blocked: bool,
    chunk_count: Option<usize>,
}

impl CrudMetrics {
    fn emit(&self) {
        tracing::info!(
            operation = %self.operation,
            outcome = %self.outcome,
            duration_ms = self.duration_ms,
            governance_blocked = self.governance_blocked,
            chunk_count = ?self.chunk_count,
            "crud_operation"
        );
    }
}

/// Case-insensitive search for a `case_id` key anywhere in `payload`'s top
/// level. Extracted for trace correlation only — never validated.
fn extract_case_id(payload: &JsonValue) -> Option<String> {
    let JsonValue::Object(map) = payload else {
        return None;
    };
    map.iter().find(|(k, _)| k.eq_ignore_ascii_case("case_id")).and_then(|(_, v)| v.as_str()).map(str::to_string)
}

/// The single façade through which every kind-specific adapter operation is
/// invoked.
pub struct CrudFacade {
    governance: Arc<GovernanceEngine>,
    manager: Arc<BackendManager>,
    audit: Arc<dyn AuditBackend>,
}

impl CrudFacade {
    #[must_use]
    pub fn new(governance: Arc<GovernanceEngine>, manager: Arc<BackendManager>, audit: Arc<dyn AuditBackend>) -> Self {
        Self { governance, manager, audit }
    }

    /// Run the full five-step pipeline for one operation: governance
    /// allow-list check, payload validation, adapter lookup, dispatch, and
    /// audit/metrics recording.
    ///
    /// # Errors
    ///
    /// Returns `GovernanceError::OperationNotAllowed` or
    /// `GovernanceError::PayloadRejected` if governance rejects the call
    /// before it reaches an adapter, or propagates a
    /// `BackendError::Unavailable` when the manager is running in strict
    /// mode and the target backend isn't healthy. A governed but reachable
    /// operation that fails inside the adapter itself does *not* error —
    /// it returns `Ok(CrudResult::fail(..))`: adapters never raise for
    /// business-level failures, only for transport/connection errors.
    pub async fn execute(&self, operation: CrudOperation) -> Result<CrudResult> {
        let kind = operation.kind();
        let gov_op = operation.governance_operation();
        let label = operation.label();
        let case_id = extract_case_id(&operation.governance_payload());
        let chunk_count = operation.chunk_count();
        let started = Instant::now();

        if let Err(err) = self.governance.ensure_operation_allowed(kind, gov_op) {
            self.record(&label, case_id.as_deref(), started, true, Err(&err)).await;
            return Err(err.into());
        }

        let payload = operation.governance_payload();
        if let Err(err) = self.governance.enforce_payload(kind, gov_op, &payload) {
            self.record(&label, case_id.as_deref(), started, true, Err(&err)).await;
            return Err(err.into());
        }

        let outcome = self.dispatch(operation).await;
        let metrics_outcome = match &outcome {
            Ok(Ok(result)) if result.success => "success",
            Ok(Ok(_)) => "adapter_failure",
            Ok(Err(_)) => "backend_unavailable",
            Err(_) => "backend_error",
        };
        let entry = AuditEntry {
            case_id: case_id.clone(),
            ..AuditEntry::new(label.clone(), metrics_outcome, audit_details(&outcome))
        };
        self.audit.write(entry).await;
        CrudMetrics {
            operation: label,
            outcome: metrics_outcome,
            duration_ms: started.elapsed().as_millis(),
            governance_blocked: false,
            chunk_count,
        }
        .emit();

        match outcome {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(err)) => Ok(CrudResult::fail(err)),
            Err(err) => Err(err),
        }
    }

    async fn record(
        &self,
        label: &str,
        case_id: Option<&str>,
        started: Instant,
        governance_blocked: bool,
        result: std::result::Result<(), &GovernanceError>,
    ) {
        let status = if result.is_err() { "governance_blocked" } else { "ok" };
        let details = result.err().map_or(JsonValue::Null, |err| JsonValue::String(err.to_string()));
        let entry = AuditEntry {
            case_id: case_id.map(str::to_string),
            ..AuditEntry::new(label.to_string(), status, details)
        };
        self.audit.write(entry).await;
        CrudMetrics {
            operation: label.to_string(),
            outcome: status,
            duration_ms: started.elapsed().as_millis(),
            governance_blocked,
            chunk_count: None,
        }
        .emit();
    }

    /// Dispatch to the kind-specific adapter method. The outer `Result`
    /// carries manager-level failures (strict-mode unavailability); the
    /// inner carries a `backend_unavailable` string when the manager is
    /// lenient and simply has no healthy adapter for this kind.
    async fn dispatch(&self, operation: CrudOperation) -> Result<std::result::Result<CrudResult, String>> {
        match operation {
            CrudOperation::Relational(op) => {
                let Some(adapter) = self.manager.get_relational_backend()? else {
                    return Ok(Err(unavailable(BackendKind::Relational)));
                };
                Ok(Ok(match op {
                    RelationalOp::CreateTable { name, schema } => adapter.create_table(&name, &schema).await?,
                    RelationalOp::Insert { table, record } => adapter.insert(&table, &record).await?,
                    RelationalOp::Update { table, id, fields } => adapter.update(&table, &id, &fields).await?,
                    RelationalOp::Select { table, filter, order, limit } => {
                        adapter.select(&table, &filter, order.as_deref(), limit).await?
                    },
                    RelationalOp::Delete { table, filter } => adapter.delete(&table, &filter).await?,
                    RelationalOp::ExecuteQuery { sql, params } => adapter.execute_query(&sql, &params).await?,
                }))
            },
            CrudOperation::Document(op) => {
                let Some(adapter) = self.manager.get_document_backend()? else {
                    return Ok(Err(unavailable(BackendKind::Document)));
                };
                Ok(Ok(match op {
                    DocumentOp::Create { doc, id } => adapter.create_document(&doc, id.as_deref()).await?,
                    DocumentOp::Get { id } => adapter.get_document(&id).await?,
                    DocumentOp::Update { id, changes } => adapter.update_document(&id, &changes).await?,
                    DocumentOp::Delete { id } => adapter.delete_document(&id).await?,
                }))
            },
            CrudOperation::Vector(op) => {
                let Some(adapter) = self.manager.get_vector_backend()? else {
                    return Ok(Err(unavailable(BackendKind::Vector)));
                };
                Ok(Ok(match op {
                    VectorOp::CreateCollection { name } => adapter.create_collection(&name).await?,
                    VectorOp::Add { collection, ids, vectors, metadatas, docs } => {
                        adapter.add(&collection, &ids, &vectors, &metadatas, &docs).await?
                    },
                    VectorOp::Search { collection, vector, top_k } => adapter.search(&collection, &vector, top_k).await?,
                    VectorOp::Delete { collection, ids_or_filter } => adapter.delete(&collection, &ids_or_filter).await?,
                }))
            },
            CrudOperation::Graph(op) => {
                let Some(adapter) = self.manager.get_graph_backend()? else {
                    return Ok(Err(unavailable(BackendKind::Graph)));
                };
                Ok(Ok(match op {
                    GraphOp::MergeNode { label, match_props, set_props } => {
                        adapter.merge_node(&label, &match_props, set_props.as_ref()).await?
                    },
                    GraphOp::CreateEdge { from_id, to_id, edge_type, props } => {
                        adapter.create_edge(&from_id, &to_id, &edge_type, &props).await?
                    },
                    GraphOp::DeleteNode { id } => adapter.delete_node(&id).await?,
                    GraphOp::ExecuteQuery { cypher_like, params } => adapter.execute_query(&cypher_like, &params).await?,
                }))
            },
            CrudOperation::File(op) => {
                let Some(adapter) = self.manager.get_file_backend()? else {
                    return Ok(Err(unavailable(BackendKind::File)));
                };
                Ok(Ok(match op {
                    FileOp::StoreAsset { data, metadata } => adapter.store_asset(&data, &metadata).await?,
                    FileOp::DeleteAsset { asset_id } => adapter.delete_asset(&asset_id).await?,
                    FileOp::GetAsset { asset_id } => adapter.get_asset(&asset_id).await?,
                }))
            },
        }
    }
}

fn unavailable(kind: BackendKind) -> String {
    PersistenceError::from(BackendError::Unavailable { kind: kind.to_string() }).to_string()
}

fn audit_details(outcome: &Result<std::result::Result<CrudResult, String>>) -> JsonValue {
    match outcome {
        Ok(Ok(result)) => serde_json::json!({ "success": result.success, "error": result.error }),
        Ok(Err(message)) => serde_json::json!({ "success": false, "error": message }),
        Err(err) => serde_json::json!({ "success": false, "error": err.to_string() }),
    }
}
