//! The Backend Adapter Contract trait and its five kind-specific extensions.

use async_trait::async_trait;
use polyglot_error::Result;
use serde_json::Value as JsonValue;

use super::types::{BackendKind, BackendStats, CrudResult};

/// Kind-independent operations every adapter implements, regardless of the
/// concrete store behind it.
///
/// # Errors
///
/// `connect`/`disconnect` return `Err` only for contract violations or
/// unrecoverable setup failures; routine operational failures are reported
/// through [`CrudResult`] at the kind-specific methods below, never here.
#[async_trait]
pub trait BackendAdapter: Send + Sync {
    /// Establish the underlying connection(s). Leaves the adapter in a
    /// *connected* state on success. Transient failures are retriable by the
    /// caller (the [`crate::manager::BackendManager`] owns retry policy);
    /// authentication/configuration failures are permanent.
    async fn connect(&self) -> Result<()>;

    /// Release all resources. Idempotent: calling `disconnect` on an
    /// already-disconnected adapter is a no-op, never an error.
    async fn disconnect(&self) -> Result<()>;

    /// Cheap, synchronous-feeling liveness check — no network round-trip on
    /// the hot path. Never raises.
    fn is_available(&self) -> bool;

    /// The backend kind this adapter implements.
    fn kind(&self) -> BackendKind;

    /// Optional operational counters. Never raises.
    fn get_stats(&self) -> BackendStats {
        BackendStats::default()
    }
}

/// Relational-store specific operations.
#[async_trait]
pub trait RelationalAdapter: BackendAdapter {
    async fn create_table(&self, name: &str, schema: &JsonValue) -> Result<CrudResult>;
    async fn insert(&self, table: &str, record: &JsonValue) -> Result<CrudResult>;
    async fn update(&self, table: &str, id: &str, fields: &JsonValue) -> Result<CrudResult>;
    async fn select(
        &self,
        table: &str,
        filter: &JsonValue,
        order: Option<&str>,
        limit: Option<u32>,
    ) -> Result<CrudResult>;
    async fn delete(&self, table: &str, filter: &JsonValue) -> Result<CrudResult>;
    async fn execute_query(&self, sql: &str, params: &[JsonValue]) -> Result<CrudResult>;
}

/// Document-store specific operations.
#[async_trait]
pub trait DocumentAdapter: BackendAdapter {
    async fn create_document(&self, doc: &JsonValue, id: Option<&str>) -> Result<CrudResult>;
    async fn get_document(&self, id: &str) -> Result<CrudResult>;
    async fn update_document(&self, id: &str, changes: &JsonValue) -> Result<CrudResult>;
    async fn delete_document(&self, id: &str) -> Result<CrudResult>;
}

/// Vector-store specific operations.
#[async_trait]
pub trait VectorAdapter: BackendAdapter {
    async fn create_collection(&self, name: &str) -> Result<CrudResult>;
    async fn add(
        &self,
        collection: &str,
        ids: &[String],
        vectors: &[Vec<f32>],
        metadatas: &[JsonValue],
        docs: &[String],
    ) -> Result<CrudResult>;
    async fn search(&self, collection: &str, vector: &[f32], top_k: u32) -> Result<CrudResult>;
    async fn delete(&self, collection: &str, ids_or_filter: &JsonValue) -> Result<CrudResult>;
}

/// Graph-store specific operations.
#[async_trait]
pub trait GraphAdapter: BackendAdapter {
    async fn merge_node(
        &self,
        label: &str,
        match_props: &JsonValue,
        set_props: Option<&JsonValue>,
    ) -> Result<CrudResult>;
    async fn create_edge(
        &self,
        from_id: &str,
        to_id: &str,
        edge_type: &str,
        props: &JsonValue,
    ) -> Result<CrudResult>;
    async fn delete_node(&self, id: &str) -> Result<CrudResult>;
    async fn execute_query(&self, cypher_like: &str, params: &JsonValue) -> Result<CrudResult>;
}

/// File/blob-store specific operations.
#[async_trait]
pub trait FileAdapter: BackendAdapter {
    async fn store_asset(&self, data: &[u8], metadata: &JsonValue) -> Result<CrudResult>;
    async fn delete_asset(&self, asset_id: &str) -> Result<CrudResult>;
    async fn get_asset(&self, asset_id: &str) -> Result<CrudResult>;
}
