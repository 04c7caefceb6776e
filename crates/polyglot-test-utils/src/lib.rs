//! In-memory fake adapters for every [`BackendKind`], so saga, governance
//! and strategy tests never need a live database: one fake per backend
//! contract, plus a convenience registrar that wires a full set of fakes
//! into a [`BackendManager`] in one call.
//!
//! Every fake is intentionally simple — no indexes, no real similarity
//! search, no persistence across restarts — it exists to exercise the
//! control flow around adapters (governance, façade dispatch, saga
//! compensation), not to model a real store's behavior.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use polyglot_core::backend::{
    AdapterHandle, BackendAdapter, BackendKind, BackendStats, CrudResult, DocumentAdapter, FileAdapter, GraphAdapter, RelationalAdapter,
    VectorAdapter,
};
use polyglot_core::manager::BackendManager;
use polyglot_error::Result;
use serde_json::Value as JsonValue;
use uuid::Uuid;

fn record_id(record: &JsonValue) -> Option<String> {
    record.get("id").and_then(id_to_string)
}

fn id_to_string(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::String(s) => Some(s.clone()),
        JsonValue::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn matches_filter(record: &JsonValue, filter: &JsonValue) -> bool {
    match filter {
        JsonValue::Null => true,
        JsonValue::Object(filter_fields) => filter_fields.iter().all(|(key, expected)| record.get(key) == Some(expected)),
        _ => false,
    }
}

/// An in-memory relational store: one `HashMap<id, record>` per table name.
pub struct FakeRelationalAdapter {
    connected: AtomicBool,
    tables: Mutex<HashMap<String, HashMap<String, JsonValue>>>,
}

impl Default for FakeRelationalAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeRelationalAdapter {
    #[must_use]
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(false),
            tables: Mutex::new(HashMap::new()),
        }
    }

    /// Snapshot of every row currently stored in `table`, for test
    /// assertions.
    #[must_use]
    pub fn rows(&self, table: &str) -> Vec<JsonValue> {
        self.tables.lock().get(table).map(|rows| rows.values().cloned().collect()).unwrap_or_default()
    }
}

#[async_trait]
impl BackendAdapter for FakeRelationalAdapter {
    async fn connect(&self) -> Result<()> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_available(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Relational
    }

    fn get_stats(&self) -> BackendStats {
        BackendStats::default()
    }
}

#[async_trait]
impl RelationalAdapter for FakeRelationalAdapter {
    async fn create_table(&self, name: &str, _schema: &JsonValue) -> Result<CrudResult> {
        self.tables.lock().entry(name.to_string()).or_default();
        Ok(CrudResult::ok(JsonValue::Null))
    }

    async fn insert(&self, table: &str, record: &JsonValue) -> Result<CrudResult> {
        let id = record_id(record).unwrap_or_else(|| Uuid::new_v4().to_string());
        let mut stored = record.clone();
        if let JsonValue::Object(fields) = &mut stored {
            fields.entry("id").or_insert_with(|| JsonValue::String(id.clone()));
        }
        self.tables.lock().entry(table.to_string()).or_default().insert(id, stored.clone());
        Ok(CrudResult::ok(stored))
    }

    async fn update(&self, table: &str, id: &str, fields: &JsonValue) -> Result<CrudResult> {
        let mut tables = self.tables.lock();
        let Some(row) = tables.entry(table.to_string()).or_default().get_mut(id) else {
            return Ok(CrudResult::fail(format!("no row '{id}' in table '{table}'")));
        };
        if let (JsonValue::Object(row_fields), JsonValue::Object(patch_fields)) = (&mut *row, fields) {
            for (key, value) in patch_fields {
                row_fields.insert(key.clone(), value.clone());
            }
        }
        Ok(CrudResult::ok(row.clone()))
    }

    async fn select(&self, table: &str, filter: &JsonValue, _order: Option<&str>, limit: Option<u32>) -> Result<CrudResult> {
        let tables = self.tables.lock();
        let mut rows: Vec<JsonValue> = tables
            .get(table)
            .map(|rows| rows.values().filter(|row| matches_filter(row, filter)).cloned().collect())
            .unwrap_or_default();
        if let Some(limit) = limit {
            rows.truncate(limit as usize);
        }
        Ok(CrudResult::ok(JsonValue::Array(rows)))
    }

    async fn delete(&self, table: &str, filter: &JsonValue) -> Result<CrudResult> {
        let mut tables = self.tables.lock();
        let Some(rows) = tables.get_mut(table) else {
            return Ok(CrudResult::ok(JsonValue::Number(0.into())));
        };
        let before = rows.len();
        rows.retain(|_, row| !matches_filter(row, filter));
        Ok(CrudResult::ok(JsonValue::Number((before - rows.len()).into())))
    }

    async fn execute_query(&self, _sql: &str, _params: &[JsonValue]) -> Result<CrudResult> {
        Ok(CrudResult::ok(JsonValue::Null))
    }
}

/// An in-memory document store keyed by document id.
pub struct FakeDocumentAdapter {
    connected: AtomicBool,
    docs: Mutex<HashMap<String, JsonValue>>,
}

impl Default for FakeDocumentAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeDocumentAdapter {
    #[must_use]
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(false),
            docs: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<JsonValue> {
        self.docs.lock().get(id).cloned()
    }
}

#[async_trait]
impl BackendAdapter for FakeDocumentAdapter {
    async fn connect(&self) -> Result<()> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_available(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Document
    }

    fn get_stats(&self) -> BackendStats {
        BackendStats::default()
    }
}

#[async_trait]
impl DocumentAdapter for FakeDocumentAdapter {
    async fn create_document(&self, doc: &JsonValue, id: Option<&str>) -> Result<CrudResult> {
        let id = id.map(str::to_string).or_else(|| record_id(doc)).unwrap_or_else(|| Uuid::new_v4().to_string());
        let mut stored = doc.clone();
        if let JsonValue::Object(fields) = &mut stored {
            fields.insert("id".to_string(), JsonValue::String(id.clone()));
        }
        self.docs.lock().insert(id, stored.clone());
        Ok(CrudResult::ok(stored))
    }

    async fn get_document(&self, id: &str) -> Result<CrudResult> {
        match self.docs.lock().get(id) {
            Some(doc) => Ok(CrudResult::ok(doc.clone())),
            None => Ok(CrudResult::fail(format!("no document '{id}'"))),
        }
    }

    async fn update_document(&self, id: &str, changes: &JsonValue) -> Result<CrudResult> {
        let mut docs = self.docs.lock();
        let Some(doc) = docs.get_mut(id) else {
            return Ok(CrudResult::fail(format!("no document '{id}'")));
        };
        if let (JsonValue::Object(doc_fields), JsonValue::Object(patch_fields)) = (&mut *doc, changes) {
            for (key, value) in patch_fields {
                doc_fields.insert(key.clone(), value.clone());
            }
        }
        Ok(CrudResult::ok(doc.clone()))
    }

    async fn delete_document(&self, id: &str) -> Result<CrudResult> {
        match self.docs.lock().remove(id) {
            Some(doc) => Ok(CrudResult::ok(doc)),
            None => Ok(CrudResult::ok(JsonValue::Null)),
        }
    }
}

fn l2_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y).powi(2)).sum::<f32>().sqrt()
}

struct VectorRow {
    vector: Vec<f32>,
    metadata: JsonValue,
    doc: String,
}

/// An in-memory vector store with brute-force nearest-neighbor search —
/// adequate for a handful of test fixtures, not a real ANN index.
pub struct FakeVectorAdapter {
    connected: AtomicBool,
    collections: Mutex<HashMap<String, HashMap<String, VectorRow>>>,
}

impl Default for FakeVectorAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeVectorAdapter {
    #[must_use]
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(false),
            collections: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn chunk_count(&self, collection: &str) -> usize {
        self.collections.lock().get(collection).map_or(0, HashMap::len)
    }
}

#[async_trait]
impl BackendAdapter for FakeVectorAdapter {
    async fn connect(&self) -> Result<()> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_available(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Vector
    }

    fn get_stats(&self) -> BackendStats {
        BackendStats::default()
    }
}

#[async_trait]
impl VectorAdapter for FakeVectorAdapter {
    async fn create_collection(&self, name: &str) -> Result<CrudResult> {
        self.collections.lock().entry(name.to_string()).or_default();
        Ok(CrudResult::ok(JsonValue::Null))
    }

    async fn add(&self, collection: &str, ids: &[String], vectors: &[Vec<f32>], metadatas: &[JsonValue], docs: &[String]) -> Result<CrudResult> {
        let mut collections = self.collections.lock();
        let rows = collections.entry(collection.to_string()).or_default();
        for (i, id) in ids.iter().enumerate() {
            rows.insert(
                id.clone(),
                VectorRow {
                    vector: vectors.get(i).cloned().unwrap_or_default(),
                    metadata: metadatas.get(i).cloned().unwrap_or(JsonValue::Null),
                    doc: docs.get(i).cloned().unwrap_or_default(),
                },
            );
        }
        Ok(CrudResult::ok(JsonValue::Number(ids.len().into())))
    }

    async fn search(&self, collection: &str, vector: &[f32], top_k: u32) -> Result<CrudResult> {
        let collections = self.collections.lock();
        let Some(rows) = collections.get(collection) else {
            return Ok(CrudResult::ok(JsonValue::Array(Vec::new())));
        };
        let mut scored: Vec<(f32, &String, &VectorRow)> =
            rows.iter().map(|(id, row)| (l2_distance(vector, &row.vector), id, row)).collect();
        scored.sort_by(|a, b| a.0.total_cmp(&b.0));
        scored.truncate(top_k as usize);
        let hits = scored
            .into_iter()
            .map(|(distance, id, row)| {
                serde_json::json!({
                    "id": id,
                    "distance": distance,
                    "metadata": row.metadata,
                    "document": row.doc,
                })
            })
            .collect();
        Ok(CrudResult::ok(JsonValue::Array(hits)))
    }

    async fn delete(&self, collection: &str, ids_or_filter: &JsonValue) -> Result<CrudResult> {
        let mut collections = self.collections.lock();
        let Some(rows) = collections.get_mut(collection) else {
            return Ok(CrudResult::ok(JsonValue::Number(0.into())));
        };
        let before = rows.len();
        if let Some(ids) = ids_or_filter.as_array() {
            let ids: Vec<String> = ids.iter().filter_map(|v| v.as_str().map(str::to_string)).collect();
            rows.retain(|id, _| !ids.contains(id));
        } else {
            rows.clear();
        }
        Ok(CrudResult::ok(JsonValue::Number((before - rows.len()).into())))
    }
}

struct GraphEdge {
    from_id: String,
    to_id: String,
    edge_type: String,
    props: JsonValue,
}

/// An in-memory graph store: a node map plus a flat edge list.
pub struct FakeGraphAdapter {
    connected: AtomicBool,
    nodes: Mutex<HashMap<String, JsonValue>>,
    edges: Mutex<Vec<GraphEdge>>,
}

impl Default for FakeGraphAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeGraphAdapter {
    #[must_use]
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(false),
            nodes: Mutex::new(HashMap::new()),
            edges: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn node(&self, id: &str) -> Option<JsonValue> {
        self.nodes.lock().get(id).cloned()
    }

    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.edges.lock().len()
    }
}

#[async_trait]
impl BackendAdapter for FakeGraphAdapter {
    async fn connect(&self) -> Result<()> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_available(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Graph
    }

    fn get_stats(&self) -> BackendStats {
        BackendStats::default()
    }
}

#[async_trait]
impl GraphAdapter for FakeGraphAdapter {
    async fn merge_node(&self, label: &str, match_props: &JsonValue, set_props: Option<&JsonValue>) -> Result<CrudResult> {
        let id = record_id(match_props).unwrap_or_else(|| Uuid::new_v4().to_string());
        let mut nodes = self.nodes.lock();
        let node = nodes.entry(id.clone()).or_insert_with(|| {
            serde_json::json!({ "id": id, "label": label })
        });
        if let (JsonValue::Object(node_fields), Some(JsonValue::Object(set_fields))) = (&mut *node, set_props) {
            for (key, value) in set_fields {
                node_fields.insert(key.clone(), value.clone());
            }
        }
        Ok(CrudResult::ok(node.clone()))
    }

    async fn create_edge(&self, from_id: &str, to_id: &str, edge_type: &str, props: &JsonValue) -> Result<CrudResult> {
        self.edges.lock().push(GraphEdge {
            from_id: from_id.to_string(),
            to_id: to_id.to_string(),
            edge_type: edge_type.to_string(),
            props: props.clone(),
        });
        Ok(CrudResult::ok(JsonValue::Null))
    }

    async fn delete_node(&self, id: &str) -> Result<CrudResult> {
        let removed = self.nodes.lock().remove(id);
        self.edges.lock().retain(|edge| edge.from_id != id && edge.to_id != id);
        match removed {
            Some(node) => Ok(CrudResult::ok(node)),
            None => Ok(CrudResult::ok(JsonValue::Null)),
        }
    }

    async fn execute_query(&self, _cypher_like: &str, _params: &JsonValue) -> Result<CrudResult> {
        Ok(CrudResult::ok(JsonValue::Array(Vec::new())))
    }
}

/// An in-memory file/blob store keyed by asset id.
pub struct FakeFileAdapter {
    connected: AtomicBool,
    assets: Mutex<HashMap<String, (Vec<u8>, JsonValue)>>,
}

impl Default for FakeFileAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeFileAdapter {
    #[must_use]
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(false),
            assets: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn contains(&self, asset_id: &str) -> bool {
        self.assets.lock().contains_key(asset_id)
    }
}

#[async_trait]
impl BackendAdapter for FakeFileAdapter {
    async fn connect(&self) -> Result<()> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_available(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn kind(&self) -> BackendKind {
        BackendKind::File
    }

    fn get_stats(&self) -> BackendStats {
        BackendStats::default()
    }
}

#[async_trait]
impl FileAdapter for FakeFileAdapter {
    async fn store_asset(&self, data: &[u8], metadata: &JsonValue) -> Result<CrudResult> {
        let asset_id = Uuid::new_v4().to_string();
        self.assets.lock().insert(asset_id.clone(), (data.to_vec(), metadata.clone()));
        Ok(CrudResult::ok(serde_json::json!({ "asset_id": asset_id, "size": data.len() })))
    }

    async fn delete_asset(&self, asset_id: &str) -> Result<CrudResult> {
        match self.assets.lock().remove(asset_id) {
            Some(_) => Ok(CrudResult::ok(JsonValue::Null)),
            None => Ok(CrudResult::ok(JsonValue::Null)),
        }
    }

    async fn get_asset(&self, asset_id: &str) -> Result<CrudResult> {
        match self.assets.lock().get(asset_id) {
            Some((data, metadata)) => Ok(CrudResult::ok(serde_json::json!({
                "asset_id": asset_id,
                "size": data.len(),
                "metadata": metadata,
            }))),
            None => Ok(CrudResult::fail(format!("no asset '{asset_id}'"))),
        }
    }
}

/// A bare key-value fake carrying only the kind-independent contract, since
/// the data model gives `KeyValue` no CRUD vocabulary of its own.
pub struct FakeKeyValueAdapter {
    connected: AtomicBool,
}

impl Default for FakeKeyValueAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeKeyValueAdapter {
    #[must_use]
    pub fn new() -> Self {
        Self { connected: AtomicBool::new(false) }
    }
}

#[async_trait]
impl BackendAdapter for FakeKeyValueAdapter {
    async fn connect(&self) -> Result<()> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_available(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn kind(&self) -> BackendKind {
        BackendKind::KeyValue
    }

    fn get_stats(&self) -> BackendStats {
        BackendStats::default()
    }
}

/// Register one fresh fake of every kind onto `manager`, for integration
/// tests that want a fully-wired manager without a live database. Returns
/// the concrete fakes so the test can assert against their stored state
/// after exercising the manager/façade/saga layers.
pub struct FakeBackendSet {
    pub relational: Arc<FakeRelationalAdapter>,
    pub document: Arc<FakeDocumentAdapter>,
    pub vector: Arc<FakeVectorAdapter>,
    pub graph: Arc<FakeGraphAdapter>,
    pub file: Arc<FakeFileAdapter>,
    pub key_value: Arc<FakeKeyValueAdapter>,
}

/// Build a full set of fakes and register one factory per kind onto
/// `manager`. Call [`BackendManager::start_all_backends`] afterward to bring
/// them online.
#[must_use]
pub fn register_all_fakes(manager: &BackendManager) -> FakeBackendSet {
    let relational = Arc::new(FakeRelationalAdapter::new());
    let document = Arc::new(FakeDocumentAdapter::new());
    let vector = Arc::new(FakeVectorAdapter::new());
    let graph = Arc::new(FakeGraphAdapter::new());
    let file = Arc::new(FakeFileAdapter::new());
    let key_value = Arc::new(FakeKeyValueAdapter::new());

    {
        let relational = relational.clone();
        manager.register(BackendKind::Relational, Box::new(move || AdapterHandle::Relational(relational.clone())));
    }
    {
        let document = document.clone();
        manager.register(BackendKind::Document, Box::new(move || AdapterHandle::Document(document.clone())));
    }
    {
        let vector = vector.clone();
        manager.register(BackendKind::Vector, Box::new(move || AdapterHandle::Vector(vector.clone())));
    }
    {
        let graph = graph.clone();
        manager.register(BackendKind::Graph, Box::new(move || AdapterHandle::Graph(graph.clone())));
    }
    {
        let file = file.clone();
        manager.register(BackendKind::File, Box::new(move || AdapterHandle::File(file.clone())));
    }
    {
        let key_value = key_value.clone();
        manager.register(BackendKind::KeyValue, Box::new(move || AdapterHandle::KeyValue(key_value.clone())));
    }

    FakeBackendSet { relational, document, vector, graph, file, key_value }
}
