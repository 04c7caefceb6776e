//! Named compensation handlers and the plug-in registry that resolves them.
//! Compensations are looked up by name through the registry rather than
//! dispatched through a hardcoded match on backend kind, so new rollback
//! behaviors can be registered without touching the saga coordinator.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use polyglot_error::{PersistenceError, Result, SagaError};
use serde_json::Value as JsonValue;

use crate::backend::{FileAdapter, GraphAdapter, RelationalAdapter, VectorAdapter};

/// The backends a compensation handler may need, assembled once per saga
/// execution. Only the kinds actually used by the saga's steps are
/// populated; a handler whose backend is absent fails with
/// `backend_unavailable` rather than panicking.
#[derive(Clone, Default)]
pub struct CompensationContext {
    pub relational_backend: Option<Arc<dyn RelationalAdapter>>,
    pub graph_backend: Option<Arc<dyn GraphAdapter>>,
    pub vector_backend: Option<Arc<dyn VectorAdapter>>,
    pub file_backend: Option<Arc<dyn FileAdapter>>,
}

/// One named, reusable undo action. `payload` is the *original forward
/// step's* payload — a compensation re-derives what to undo from it (e.g.
/// the inserted record's id), it does not receive the forward step's result.
///
/// Returns `Ok(true)` on a completed rollback, `Ok(false)` when the
/// compensation deliberately declines to act (e.g. nothing to roll back),
/// and `Err` on a failure worth retrying.
#[async_trait]
pub trait CompensationHandler: Send + Sync {
    async fn compensate(&self, ctx: &CompensationContext, payload: &JsonValue) -> Result<bool>;
}

fn require_str<'a>(payload: &'a JsonValue, field: &str) -> Result<&'a str> {
    payload
        .get(field)
        .and_then(JsonValue::as_str)
        .ok_or_else(|| PersistenceError::internal(format!("compensation payload missing '{field}'")))
}

/// Deletes the relational row a forward `insert` created, keyed by
/// `record.id`.
pub struct RelationalDeleteHandler;

#[async_trait]
impl CompensationHandler for RelationalDeleteHandler {
    async fn compensate(&self, ctx: &CompensationContext, payload: &JsonValue) -> Result<bool> {
        let Some(backend) = &ctx.relational_backend else {
            return Err(SagaError::Store("relational backend unavailable for compensation".into()).into());
        };
        let table = require_str(payload, "table")?;
        let id = payload
            .get("record")
            .and_then(|r| r.get("id"))
            .and_then(JsonValue::as_str)
            .ok_or_else(|| PersistenceError::internal("compensation payload missing record.id"))?;
        let filter = serde_json::json!({ "id": id });
        let result = backend.delete(table, &filter).await?;
        Ok(result.success)
    }
}

/// Deletes the graph node a forward `merge_node` created or touched, keyed
/// by `match_props.id`.
pub struct GraphDeleteNodeHandler;

#[async_trait]
impl CompensationHandler for GraphDeleteNodeHandler {
    async fn compensate(&self, ctx: &CompensationContext, payload: &JsonValue) -> Result<bool> {
        let Some(backend) = &ctx.graph_backend else {
            return Err(SagaError::Store("graph backend unavailable for compensation".into()).into());
        };
        let id = payload
            .get("match_props")
            .and_then(|m| m.get("id"))
            .and_then(JsonValue::as_str)
            .ok_or_else(|| PersistenceError::internal("compensation payload missing match_props.id"))?;
        let result = backend.delete_node(id).await?;
        Ok(result.success)
    }
}

/// Deletes the vector chunks a forward `add` created, keyed by `ids`.
pub struct VectorDeleteChunksHandler;

#[async_trait]
impl CompensationHandler for VectorDeleteChunksHandler {
    async fn compensate(&self, ctx: &CompensationContext, payload: &JsonValue) -> Result<bool> {
        let Some(backend) = &ctx.vector_backend else {
            return Err(SagaError::Store("vector backend unavailable for compensation".into()).into());
        };
        let collection = require_str(payload, "collection")?;
        let ids = payload
            .get("ids")
            .cloned()
            .ok_or_else(|| PersistenceError::internal("compensation payload missing ids"))?;
        let result = backend.delete(collection, &ids).await?;
        Ok(result.success)
    }
}

/// Deletes the stored asset a forward `store_asset` created, keyed by the
/// asset id recorded in the payload under `asset_id`.
pub struct FileDeleteAssetHandler;

#[async_trait]
impl CompensationHandler for FileDeleteAssetHandler {
    async fn compensate(&self, ctx: &CompensationContext, payload: &JsonValue) -> Result<bool> {
        let Some(backend) = &ctx.file_backend else {
            return Err(SagaError::Store("file backend unavailable for compensation".into()).into());
        };
        let asset_id = require_str(payload, "asset_id")?;
        let result = backend.delete_asset(asset_id).await?;
        Ok(result.success)
    }
}

type HandlerMap = DashMap<String, Arc<dyn CompensationHandler>>;

/// Resolves a `SagaStep::compensation_name` to a concrete handler. Callers
/// may register additional handlers beyond the defaults for
/// application-specific rollback actions.
#[derive(Clone)]
pub struct CompensationRegistry {
    handlers: Arc<HandlerMap>,
}

impl CompensationRegistry {
    /// An empty registry with no handlers registered.
    #[must_use]
    pub fn new() -> Self {
        Self { handlers: Arc::new(DashMap::new()) }
    }

    /// A registry pre-populated with the four built-in handlers.
    #[must_use]
    pub fn with_defaults() -> Self {
        let registry = Self::new();
        registry.register("relational_delete", Arc::new(RelationalDeleteHandler));
        registry.register("graph_delete_node", Arc::new(GraphDeleteNodeHandler));
        registry.register("vector_delete_chunks", Arc::new(VectorDeleteChunksHandler));
        registry.register("file_delete_asset", Arc::new(FileDeleteAssetHandler));
        registry
    }

    pub fn register(&self, name: impl Into<String>, handler: Arc<dyn CompensationHandler>) {
        self.handlers.insert(name.into(), handler);
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn CompensationHandler>> {
        self.handlers
            .get(name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| SagaError::UnknownCompensationHandler { name: name.to_string() }.into())
    }
}

impl Default for CompensationRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::types::CrudResult;
    use crate::backend::{BackendAdapter, BackendKind, BackendStats};
    use serde_json::json;

    struct FakeRelational {
        deleted: parking_lot::Mutex<Vec<(String, JsonValue)>>,
    }

    #[async_trait]
    impl BackendAdapter for FakeRelational {
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
    impl RelationalAdapter for FakeRelational {
        async fn create_table(&self, _name: &str, _schema: &JsonValue) -> Result<CrudResult> {
            Ok(CrudResult::ok(json!(null)))
        }
        async fn insert(&self, _table: &str, _record: &JsonValue) -> Result<CrudResult> {
            Ok(CrudResult::ok(json!(null)))
        }
        async fn update(&self, _table: &str, _id: &str, _fields: &JsonValue) -> Result<CrudResult> {
            Ok(CrudResult::ok(json!(null)))
        }
        async fn select(&self, _table: &str, _filter: &JsonValue, _order: Option<&str>, _limit: Option<u32>) -> Result<CrudResult> {
            Ok(CrudResult::ok(json!(null)))
        }
        async fn delete(&self, table: &str, filter: &JsonValue) -> Result<CrudResult> {
            self.deleted.lock().push((table.to_string(), filter.clone()));
            Ok(CrudResult::ok(json!({ "deleted": 1 })))
        }
        async fn execute_query(&self, _sql: &str, _params: &[JsonValue]) -> Result<CrudResult> {
            Ok(CrudResult::ok(json!(null)))
        }
    }

    #[tokio::test]
    async fn relational_delete_handler_uses_record_id() {
        let backend = Arc::new(FakeRelational { deleted: parking_lot::Mutex::new(Vec::new()) });
        let ctx = CompensationContext { relational_backend: Some(backend.clone()), ..Default::default() };
        let handler = RelationalDeleteHandler;
        let payload = json!({ "table": "documents", "record": { "id": "doc-1" } });
        let ok = handler.compensate(&ctx, &payload).await.unwrap();
        assert!(ok);
        assert_eq!(backend.deleted.lock()[0], ("documents".to_string(), json!({ "id": "doc-1" })));
    }

    #[tokio::test]
    async fn missing_backend_fails_loudly() {
        let ctx = CompensationContext::default();
        let handler = RelationalDeleteHandler;
        let payload = json!({ "table": "documents", "record": { "id": "doc-1" } });
        assert!(handler.compensate(&ctx, &payload).await.is_err());
    }

    #[test]
    fn unknown_handler_name_is_reported() {
        let registry = CompensationRegistry::with_defaults();
        assert!(registry.get("does_not_exist").is_err());
        assert!(registry.get("relational_delete").is_ok());
    }
}
