//! Translates a persisted [`SagaStep`] back into a dispatch-ready
//! [`CrudOperation`]. This is the one place a saga's JSON payload shape is
//! tied to the façade's typed operation vocabulary.

use polyglot_error::{PersistenceError, Result};
use serde_json::Value as JsonValue;

use crate::backend::BackendKind;
use crate::crud::{CrudOperation, DocumentOp, FileOp, GraphOp, RelationalOp, VectorOp};

use super::types::SagaStep;

fn missing(step_id: &str, field: &str) -> PersistenceError {
    PersistenceError::internal(format!("saga step '{step_id}' missing required field '{field}'"))
}

fn field<'a>(payload: &'a JsonValue, step_id: &str, name: &str) -> Result<&'a JsonValue> {
    payload.get(name).ok_or_else(|| missing(step_id, name))
}

fn require_str(payload: &JsonValue, step_id: &str, name: &str) -> Result<String> {
    Ok(field(payload, step_id, name)?
        .as_str()
        .ok_or_else(|| missing(step_id, name))?
        .to_string())
}

fn optional_str(payload: &JsonValue, name: &str) -> Option<String> {
    payload.get(name).and_then(JsonValue::as_str).map(str::to_string)
}

fn string_list(payload: &JsonValue, step_id: &str, name: &str) -> Result<Vec<String>> {
    field(payload, step_id, name)?
        .as_array()
        .ok_or_else(|| missing(step_id, name))?
        .iter()
        .map(|v| v.as_str().map(str::to_string).ok_or_else(|| missing(step_id, name)))
        .collect()
}

fn json_list(payload: &JsonValue, step_id: &str, name: &str) -> Result<Vec<JsonValue>> {
    Ok(field(payload, step_id, name)?.as_array().ok_or_else(|| missing(step_id, name))?.clone())
}

fn f32_vec(value: &JsonValue, step_id: &str, name: &str) -> Result<Vec<f32>> {
    value
        .as_array()
        .ok_or_else(|| missing(step_id, name))?
        .iter()
        .map(|v| v.as_f64().map(|f| f as f32).ok_or_else(|| missing(step_id, name)))
        .collect()
}

fn f32_matrix(payload: &JsonValue, step_id: &str, name: &str) -> Result<Vec<Vec<f32>>> {
    field(payload, step_id, name)?
        .as_array()
        .ok_or_else(|| missing(step_id, name))?
        .iter()
        .map(|row| f32_vec(row, step_id, name))
        .collect()
}

/// Build the concrete operation a saga step dispatches, from its persisted
/// `backend` kind, `operation` name and JSON `payload`.
///
/// # Errors
///
/// Returns an internal error if `operation` is not recognized for `backend`
/// or the payload is missing a field the named operation requires.
pub fn operation_from_step(step: &SagaStep) -> Result<CrudOperation> {
    let payload = &step.payload;
    let step_id = step.step_id.as_str();
    Ok(match step.backend {
        BackendKind::Relational => CrudOperation::Relational(match step.operation.as_str() {
            "create_table" => RelationalOp::CreateTable {
                name: require_str(payload, step_id, "name")?,
                schema: field(payload, step_id, "schema")?.clone(),
            },
            "insert" => RelationalOp::Insert {
                table: require_str(payload, step_id, "table")?,
                record: field(payload, step_id, "record")?.clone(),
            },
            "update" => RelationalOp::Update {
                table: require_str(payload, step_id, "table")?,
                id: require_str(payload, step_id, "id")?,
                fields: field(payload, step_id, "fields")?.clone(),
            },
            "select" => RelationalOp::Select {
                table: require_str(payload, step_id, "table")?,
                filter: payload.get("filter").cloned().unwrap_or(JsonValue::Null),
                order: optional_str(payload, "order"),
                limit: payload.get("limit").and_then(JsonValue::as_u64).map(|v| v as u32),
            },
            "delete" => RelationalOp::Delete {
                table: require_str(payload, step_id, "table")?,
                filter: field(payload, step_id, "filter")?.clone(),
            },
            "execute_query" => RelationalOp::ExecuteQuery {
                sql: require_str(payload, step_id, "sql")?,
                params: json_list(payload, step_id, "params").unwrap_or_default(),
            },
            other => return Err(unknown_operation(step_id, other)),
        }),
        BackendKind::Document => CrudOperation::Document(match step.operation.as_str() {
            "create_document" => DocumentOp::Create {
                doc: field(payload, step_id, "doc")?.clone(),
                id: optional_str(payload, "id"),
            },
            "get_document" => DocumentOp::Get { id: require_str(payload, step_id, "id")? },
            "update_document" => DocumentOp::Update {
                id: require_str(payload, step_id, "id")?,
                changes: field(payload, step_id, "changes")?.clone(),
            },
            "delete_document" => DocumentOp::Delete { id: require_str(payload, step_id, "id")? },
            other => return Err(unknown_operation(step_id, other)),
        }),
        BackendKind::Vector => CrudOperation::Vector(match step.operation.as_str() {
            "create_collection" => VectorOp::CreateCollection { name: require_str(payload, step_id, "name")? },
            "add" => VectorOp::Add {
                collection: require_str(payload, step_id, "collection")?,
                ids: string_list(payload, step_id, "ids")?,
                vectors: f32_matrix(payload, step_id, "vectors")?,
                metadatas: json_list(payload, step_id, "metadatas").unwrap_or_default(),
                docs: string_list(payload, step_id, "docs").unwrap_or_default(),
            },
            "search" => VectorOp::Search {
                collection: require_str(payload, step_id, "collection")?,
                vector: f32_vec(field(payload, step_id, "vector")?, step_id, "vector")?,
                top_k: field(payload, step_id, "top_k")?.as_u64().ok_or_else(|| missing(step_id, "top_k"))? as u32,
            },
            "delete" => VectorOp::Delete {
                collection: require_str(payload, step_id, "collection")?,
                ids_or_filter: field(payload, step_id, "ids_or_filter")?.clone(),
            },
            other => return Err(unknown_operation(step_id, other)),
        }),
        BackendKind::Graph => CrudOperation::Graph(match step.operation.as_str() {
            "merge_node" => GraphOp::MergeNode {
                label: require_str(payload, step_id, "label")?,
                match_props: field(payload, step_id, "match_props")?.clone(),
                set_props: payload.get("set_props").cloned(),
            },
            "create_edge" => GraphOp::CreateEdge {
                from_id: require_str(payload, step_id, "from_id")?,
                to_id: require_str(payload, step_id, "to_id")?,
                edge_type: require_str(payload, step_id, "edge_type")?,
                props: payload.get("props").cloned().unwrap_or(JsonValue::Null),
            },
            "delete_node" => GraphOp::DeleteNode { id: require_str(payload, step_id, "id")? },
            "execute_query" => GraphOp::ExecuteQuery {
                cypher_like: require_str(payload, step_id, "cypher_like")?,
                params: payload.get("params").cloned().unwrap_or(JsonValue::Null),
            },
            other => return Err(unknown_operation(step_id, other)),
        }),
        BackendKind::File => CrudOperation::File(match step.operation.as_str() {
            "store_asset" => FileOp::StoreAsset {
                data: field(payload, step_id, "data")?
                    .as_array()
                    .ok_or_else(|| missing(step_id, "data"))?
                    .iter()
                    .map(|v| v.as_u64().map(|n| n as u8).ok_or_else(|| missing(step_id, "data")))
                    .collect::<Result<Vec<u8>>>()?,
                metadata: payload.get("metadata").cloned().unwrap_or(JsonValue::Null),
            },
            "delete_asset" => FileOp::DeleteAsset { asset_id: require_str(payload, step_id, "asset_id")? },
            "get_asset" => FileOp::GetAsset { asset_id: require_str(payload, step_id, "asset_id")? },
            other => return Err(unknown_operation(step_id, other)),
        }),
        BackendKind::KeyValue => {
            return Err(PersistenceError::internal(format!(
                "saga step '{step_id}' targets key_value, which has no CRUD operation vocabulary"
            )));
        },
    })
}

fn unknown_operation(step_id: &str, operation: &str) -> PersistenceError {
    PersistenceError::internal(format!("saga step '{step_id}' names unknown operation '{operation}'"))
}
