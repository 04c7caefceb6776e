//! The operation vocabulary the CRUD façade dispatches, one variant per
//! kind-specific adapter method in `backend::traits`. Each operation knows
//! its own governance `Operation` mapping and which part of its payload is
//! subject to field/type governance — the façade itself stays generic over
//! all five.

use serde_json::{json, Value as JsonValue};

use crate::backend::BackendKind;
use crate::governance::Operation as GovernanceOp;

#[derive(Debug, Clone)]
pub enum RelationalOp {
    CreateTable { name: String, schema: JsonValue },
    Insert { table: String, record: JsonValue },
    Update { table: String, id: String, fields: JsonValue },
    Select { table: String, filter: JsonValue, order: Option<String>, limit: Option<u32> },
    Delete { table: String, filter: JsonValue },
    ExecuteQuery { sql: String, params: Vec<JsonValue> },
}

#[derive(Debug, Clone)]
pub enum DocumentOp {
    Create { doc: JsonValue, id: Option<String> },
    Get { id: String },
    Update { id: String, changes: JsonValue },
    Delete { id: String },
}

#[derive(Debug, Clone)]
pub enum VectorOp {
    CreateCollection { name: String },
    Add {
        collection: String,
        ids: Vec<String>,
        vectors: Vec<Vec<f32>>,
        metadatas: Vec<JsonValue>,
        docs: Vec<String>,
    },
    Search { collection: String, vector: Vec<f32>, top_k: u32 },
    Delete { collection: String, ids_or_filter: JsonValue },
}

#[derive(Debug, Clone)]
pub enum GraphOp {
    MergeNode { label: String, match_props: JsonValue, set_props: Option<JsonValue> },
    CreateEdge { from_id: String, to_id: String, edge_type: String, props: JsonValue },
    DeleteNode { id: String },
    ExecuteQuery { cypher_like: String, params: JsonValue },
}

#[derive(Debug, Clone)]
pub enum FileOp {
    StoreAsset { data: Vec<u8>, metadata: JsonValue },
    DeleteAsset { asset_id: String },
    GetAsset { asset_id: String },
}

/// A single dispatch-ready operation, carrying everything the chosen
/// adapter method needs.
#[derive(Debug, Clone)]
pub enum CrudOperation {
    Relational(RelationalOp),
    Document(DocumentOp),
    Vector(VectorOp),
    Graph(GraphOp),
    File(FileOp),
}

impl CrudOperation {
    #[must_use]
    pub const fn kind(&self) -> BackendKind {
        match self {
            Self::Relational(_) => BackendKind::Relational,
            Self::Document(_) => BackendKind::Document,
            Self::Vector(_) => BackendKind::Vector,
            Self::Graph(_) => BackendKind::Graph,
            Self::File(_) => BackendKind::File,
        }
    }

    /// A short name used for metrics and audit trace labelling, e.g.
    /// `"relational.insert"`.
    #[must_use]
    pub fn label(&self) -> String {
        let op = match self {
            Self::Relational(op) => match op {
                RelationalOp::CreateTable { .. } => "create_table",
                RelationalOp::Insert { .. } => "insert",
                RelationalOp::Update { .. } => "update",
                RelationalOp::Select { .. } => "select",
                RelationalOp::Delete { .. } => "delete",
                RelationalOp::ExecuteQuery { .. } => "execute_query",
            },
            Self::Document(op) => match op {
                DocumentOp::Create { .. } => "create_document",
                DocumentOp::Get { .. } => "get_document",
                DocumentOp::Update { .. } => "update_document",
                DocumentOp::Delete { .. } => "delete_document",
            },
            Self::Vector(op) => match op {
                VectorOp::CreateCollection { .. } => "create_collection",
                VectorOp::Add { .. } => "add",
                VectorOp::Search { .. } => "search",
                VectorOp::Delete { .. } => "delete",
            },
            Self::Graph(op) => match op {
                GraphOp::MergeNode { .. } => "merge_node",
                GraphOp::CreateEdge { .. } => "create_edge",
                GraphOp::DeleteNode { .. } => "delete_node",
                GraphOp::ExecuteQuery { .. } => "execute_query",
            },
            Self::File(op) => match op {
                FileOp::StoreAsset { .. } => "store_asset",
                FileOp::DeleteAsset { .. } => "delete_asset",
                FileOp::GetAsset { .. } => "get_asset",
            },
        };
        format!("{}.{op}", self.kind())
    }

    /// The CRUD-shaped governance operation this dispatch maps onto.
    #[must_use]
    pub const fn governance_operation(&self) -> GovernanceOp {
        match self {
            Self::Relational(op) => match op {
                RelationalOp::CreateTable { .. } | RelationalOp::Insert { .. } => GovernanceOp::Create,
                RelationalOp::Update { .. } => GovernanceOp::Update,
                RelationalOp::Select { .. } | RelationalOp::ExecuteQuery { .. } => GovernanceOp::Read,
                RelationalOp::Delete { .. } => GovernanceOp::Delete,
            },
            Self::Document(op) => match op {
                DocumentOp::Create { .. } => GovernanceOp::Create,
                DocumentOp::Get { .. } => GovernanceOp::Read,
                DocumentOp::Update { .. } => GovernanceOp::Update,
                DocumentOp::Delete { .. } => GovernanceOp::Delete,
            },
            Self::Vector(op) => match op {
                VectorOp::CreateCollection { .. } | VectorOp::Add { .. } => GovernanceOp::Create,
                VectorOp::Search { .. } => GovernanceOp::Read,
                VectorOp::Delete { .. } => GovernanceOp::Delete,
            },
            Self::Graph(op) => match op {
                GraphOp::MergeNode { .. } | GraphOp::CreateEdge { .. } => GovernanceOp::Create,
                GraphOp::ExecuteQuery { .. } => GovernanceOp::Read,
                GraphOp::DeleteNode { .. } => GovernanceOp::Delete,
            },
            Self::File(op) => match op {
                FileOp::StoreAsset { .. } => GovernanceOp::Create,
                FileOp::GetAsset { .. } => GovernanceOp::Read,
                FileOp::DeleteAsset { .. } => GovernanceOp::Delete,
            },
        }
    }

    /// The slice of the operation's arguments that governance walks for
    /// forbidden fields/types. Identifier-only operations (get/delete by
    /// id) carry no governed payload.
    #[must_use]
    pub fn governance_payload(&self) -> JsonValue {
        match self {
            Self::Relational(op) => match op {
                RelationalOp::CreateTable { schema, .. } => schema.clone(),
                RelationalOp::Insert { record, .. } => record.clone(),
                RelationalOp::Update { fields, .. } => fields.clone(),
                RelationalOp::Select { filter, .. } | RelationalOp::Delete { filter, .. } => filter.clone(),
                RelationalOp::ExecuteQuery { params, .. } => JsonValue::Array(params.clone()),
            },
            Self::Document(op) => match op {
                DocumentOp::Create { doc, .. } => doc.clone(),
                DocumentOp::Update { changes, .. } => changes.clone(),
                DocumentOp::Get { .. } | DocumentOp::Delete { .. } => JsonValue::Null,
            },
            Self::Vector(op) => match op {
                VectorOp::Add { metadatas, docs, .. } => json!({ "metadatas": metadatas, "docs": docs }),
                VectorOp::Delete { ids_or_filter, .. } => ids_or_filter.clone(),
                VectorOp::CreateCollection { .. } | VectorOp::Search { .. } => JsonValue::Null,
            },
            Self::Graph(op) => match op {
                GraphOp::MergeNode { match_props, set_props, .. } => {
                    json!({ "match": match_props, "set": set_props })
                },
                GraphOp::CreateEdge { props, .. } => props.clone(),
                GraphOp::ExecuteQuery { params, .. } => params.clone(),
                GraphOp::DeleteNode { .. } => JsonValue::Null,
            },
            Self::File(op) => match op {
                FileOp::StoreAsset { metadata, .. } => metadata.clone(),
                FileOp::DeleteAsset { .. } | FileOp::GetAsset { .. } => JsonValue::Null,
            },
        }
    }

    /// Item count reported as `chunk_count` in façade metrics, for
    /// operations that act on more than one logical item at once.
    #[must_use]
    pub fn chunk_count(&self) -> Option<usize> {
        match self {
            Self::Vector(VectorOp::Add { ids, .. }) => Some(ids.len()),
            _ => None,
        }
    }
}
