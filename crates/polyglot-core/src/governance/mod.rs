//! Governance Engine.
//!
//! A declarative, per-backend allow-list of operations and forbid-list of
//! field names / value types, enforced **before** an operation reaches an
//! adapter.

use std::collections::{HashMap, HashSet};

use polyglot_error::{GovernanceError, GovernanceViolation};
use serde_json::Value as JsonValue;

use crate::backend::BackendKind;

/// The four CRUD-shaped operations governance reasons about. Adapters may
/// expose richer kind-specific operations, but every one of them maps onto
/// exactly one of these for governance purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Create,
    Read,
    Update,
    Delete,
}

impl Operation {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Read => "read",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Value-type tags used in `forbidden_value_types`. `serde_json::Value` has
/// no distinct byte-string variant, so binary payloads are represented as
/// base64 strings under a forbidden field name (`binary_content`, `blob`,
/// ...); `Binary` exists here for adapters that tag a JSON value explicitly
/// (e.g. `{"__binary__": true, "data": "..."}`) rather than relying solely on
/// field-name matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueTypeTag {
    Null,
    Bool,
    Number,
    String,
    Array,
    Object,
    Binary,
}

impl ValueTypeTag {
    fn of(value: &JsonValue) -> Self {
        match value {
            JsonValue::Null => Self::Null,
            JsonValue::Bool(_) => Self::Bool,
            JsonValue::Number(_) => Self::Number,
            JsonValue::String(_) => Self::String,
            JsonValue::Array(_) => Self::Array,
            JsonValue::Object(map) => {
                if map.get("__binary__").and_then(JsonValue::as_bool) == Some(true) {
                    Self::Binary
                } else {
                    Self::Object
                }
            },
        }
    }
}

/// Per-backend governance policy: which operations are permitted, and which
/// field names / value types are forbidden in payloads sent to this backend.
#[derive(Debug, Clone, Default)]
pub struct GovernancePolicy {
    pub allowed_operations: HashSet<Operation>,
    pub forbidden_fields: HashSet<String>,
    pub forbidden_value_types: HashSet<ValueTypeTag>,
}

impl GovernancePolicy {
    fn allow_all_crud() -> Self {
        Self {
            allowed_operations: [Operation::Create, Operation::Read, Operation::Update, Operation::Delete]
                .into_iter()
                .collect(),
            forbidden_fields: HashSet::new(),
            forbidden_value_types: HashSet::new(),
        }
    }
}

/// Declarative governance rules applied before every adapter dispatch.
///
/// Construction merges caller-supplied overrides onto
/// [`GovernanceEngine::default_policies`]: an override's `allowed_operations`
/// replaces the default set wholesale, while
/// `forbidden_fields`/`forbidden_value_types` extend it.
pub struct GovernanceEngine {
    policies: HashMap<BackendKind, GovernancePolicy>,
    strict: bool,
}

impl GovernanceEngine {
    /// Build the engine from the built-in default policies plus optional
    /// per-backend overrides.
    #[must_use]
    pub fn new(overrides: HashMap<BackendKind, GovernancePolicy>, strict: bool) -> Self {
        let mut policies = Self::default_policies();
        for (kind, override_policy) in overrides {
            let merged = policies.entry(kind).or_insert_with(GovernancePolicy::allow_all_crud);
            if !override_policy.allowed_operations.is_empty() {
                merged.allowed_operations = override_policy.allowed_operations;
            }
            merged.forbidden_fields.extend(override_policy.forbidden_fields);
            merged
                .forbidden_value_types
                .extend(override_policy.forbidden_value_types);
        }
        Self { policies, strict }
    }

    /// The built-in policy table: the graph and relational backends forbid
    /// opaque binary/raw-content fields; vector and file backends carry no
    /// payload rules (their payloads are not governed, only their operation
    /// set is).
    #[must_use]
    pub fn default_policies() -> HashMap<BackendKind, GovernancePolicy> {
        let mut policies = HashMap::new();

        policies.insert(BackendKind::Vector, GovernancePolicy::allow_all_crud());
        policies.insert(BackendKind::File, GovernancePolicy::allow_all_crud());
        policies.insert(BackendKind::KeyValue, GovernancePolicy::allow_all_crud());

        let mut graph = GovernancePolicy::allow_all_crud();
        graph.forbidden_fields = [
            "content",
            "fulltext",
            "raw_content",
            "binary_content",
            "file_content",
            "chunks",
        ]
        .into_iter()
        .map(str::to_string)
        .collect();
        graph.forbidden_value_types = [ValueTypeTag::Binary].into_iter().collect();
        policies.insert(BackendKind::Graph, graph);

        let mut relational = GovernancePolicy::allow_all_crud();
        relational.forbidden_fields = ["binary_content", "file_bytes", "raw_content", "blob", "binary"]
            .into_iter()
            .map(str::to_string)
            .collect();
        relational.forbidden_value_types = [ValueTypeTag::Binary].into_iter().collect();
        policies.insert(BackendKind::Relational, relational);

        let mut document = GovernancePolicy::allow_all_crud();
        document.forbidden_fields = ["raw_content", "binary_content"].into_iter().map(str::to_string).collect();
        document.forbidden_value_types = [ValueTypeTag::Binary].into_iter().collect();
        policies.insert(BackendKind::Document, document);

        policies
    }

    /// Rejects with [`GovernanceError::OperationNotAllowed`] if `operation`
    /// is not in `backend`'s allow-list. A backend with no configured policy
    /// permits everything: unknown backend means no policy means allow.
    ///
    /// # Errors
    ///
    /// Returns `GovernanceError::OperationNotAllowed` when the operation is
    /// disallowed for `backend`.
    pub fn ensure_operation_allowed(&self, backend: BackendKind, operation: Operation) -> Result<(), GovernanceError> {
        let Some(policy) = self.policies.get(&backend) else {
            return Ok(());
        };
        if policy.allowed_operations.contains(&operation) {
            Ok(())
        } else {
            Err(GovernanceError::OperationNotAllowed {
                backend: backend.to_string(),
                operation: operation.to_string(),
            })
        }
    }

    /// Walks `payload` depth-first and collects every violation of
    /// `backend`'s forbidden-field and forbidden-type rules. Always returns
    /// the complete violation set — never short-circuits on the first hit —
    /// so a lenient caller sees everything wrong with one payload in one
    /// pass.
    #[must_use]
    pub fn validate_payload(&self, backend: BackendKind, operation: Operation, payload: &JsonValue) -> Vec<GovernanceViolation> {
        let Some(policy) = self.policies.get(&backend) else {
            return Vec::new();
        };
        if policy.forbidden_fields.is_empty() && policy.forbidden_value_types.is_empty() {
            return Vec::new();
        }

        let mut violations = Vec::new();
        walk_payload(payload, None, &mut |field_path, value| {
            let field_key = field_path.rsplit(['.', ']']).next().unwrap_or(field_path).trim_start_matches('[').to_lowercase();
            if policy.forbidden_fields.contains(&field_key) {
                violations.push(GovernanceViolation {
                    backend: backend.to_string(),
                    operation: operation.to_string(),
                    field_path: Some(field_path.to_string()),
                    message: format!("field '{field_path}' is not allowed for backend '{backend}'"),
                });
            }
            let type_tag = ValueTypeTag::of(value);
            if policy.forbidden_value_types.contains(&type_tag) {
                violations.push(GovernanceViolation {
                    backend: backend.to_string(),
                    operation: operation.to_string(),
                    field_path: Some(field_path.to_string()),
                    message: format!("value type in field '{field_path}' is forbidden for backend '{backend}'"),
                });
            }
        });
        violations
    }

    /// [`Self::validate_payload`] followed by an error if any violation was
    /// found. In strict mode (the default) this is what the CRUD façade
    /// calls; in lenient mode callers use `validate_payload` directly and
    /// decide for themselves.
    ///
    /// # Errors
    ///
    /// Returns `GovernanceError::PayloadRejected` carrying every violation
    /// found.
    pub fn enforce_payload(&self, backend: BackendKind, operation: Operation, payload: &JsonValue) -> Result<(), GovernanceError> {
        let violations = self.validate_payload(backend, operation, payload);
        if violations.is_empty() {
            Ok(())
        } else {
            Err(GovernanceError::payload_rejected(violations))
        }
    }

    /// Whether this engine was constructed in strict mode (raise on
    /// violation) vs. lenient mode (return the violation list to the
    /// caller).
    #[must_use]
    pub const fn is_strict(&self) -> bool {
        self.strict
    }
}

/// Depth-first walk over a JSON payload tree, yielding `(field_path, value)`
/// for every node, not just leaves — both a container and its children are
/// checked against the forbidden-field/forbidden-type rules.
fn walk_payload(value: &JsonValue, prefix: Option<&str>, visit: &mut impl FnMut(&str, &JsonValue)) {
    match value {
        JsonValue::Object(map) => {
            for (key, child) in map {
                let path = match prefix {
                    Some(p) => format!("{p}.{key}"),
                    None => key.clone(),
                };
                visit(&path, child);
                walk_payload(child, Some(&path), visit);
            }
        },
        JsonValue::Array(items) => {
            for (index, child) in items.iter().enumerate() {
                let path = match prefix {
                    Some(p) => format!("{p}[{index}]"),
                    None => format!("[{index}]"),
                };
                visit(&path, child);
                walk_payload(child, Some(&path), visit);
            }
        },
        _ => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn graph_rejects_content_field() {
        let engine = GovernanceEngine::new(HashMap::new(), true);
        let payload = json!({"label": "Person", "content": "opaque text"});
        let violations = engine.validate_payload(BackendKind::Graph, Operation::Create, &payload);
        assert_eq!(violations.len(), 1);
        assert!(violations[0].message.contains("content"));
        assert!(violations[0].message.contains("graph"));
    }

    #[test]
    fn relational_rejects_binary_content_nested() {
        let engine = GovernanceEngine::new(HashMap::new(), true);
        let payload = json!({"record": {"id": "d1", "binary_content": "base64=="}});
        let violations = engine.validate_payload(BackendKind::Relational, Operation::Create, &payload);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].field_path.as_deref(), Some("record.binary_content"));
    }

    #[test]
    fn vector_has_no_payload_rules() {
        let engine = GovernanceEngine::new(HashMap::new(), true);
        let payload = json!({"content": "anything goes"});
        let violations = engine.validate_payload(BackendKind::Vector, Operation::Create, &payload);
        assert!(violations.is_empty());
    }

    #[test]
    fn disallowed_operation_is_rejected() {
        let mut overrides = HashMap::new();
        let mut read_only = GovernancePolicy::allow_all_crud();
        read_only.allowed_operations = [Operation::Read].into_iter().collect();
        overrides.insert(BackendKind::Vector, read_only);
        let engine = GovernanceEngine::new(overrides, true);

        let err = engine.ensure_operation_allowed(BackendKind::Vector, Operation::Delete);
        assert!(err.is_err());
    }

    #[test]
    fn validate_payload_is_idempotent() {
        let engine = GovernanceEngine::new(HashMap::new(), true);
        let payload = json!({"content": "x", "nested": {"chunks": [1, 2]}});
        let first = engine.validate_payload(BackendKind::Graph, Operation::Create, &payload);
        let second = engine.validate_payload(BackendKind::Graph, Operation::Create, &payload);
        assert_eq!(first.len(), second.len());
        assert_eq!(
            first.iter().map(|v| v.field_path.clone()).collect::<Vec<_>>(),
            second.iter().map(|v| v.field_path.clone()).collect::<Vec<_>>()
        );
    }

    fn arb_json() -> impl proptest::strategy::Strategy<Value = JsonValue> {
        use proptest::prelude::*;
        let leaf = prop_oneof![
            Just(JsonValue::Null),
            any::<bool>().prop_map(JsonValue::Bool),
            any::<i32>().prop_map(|n| json!(n)),
            "[a-z_]{1,8}".prop_map(JsonValue::String),
        ];
        leaf.prop_recursive(4, 64, 8, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(JsonValue::Array),
                prop::collection::hash_map(
                    prop_oneof![
                        Just("content".to_string()),
                        Just("raw_content".to_string()),
                        Just("binary_content".to_string()),
                        "[a-z_]{1,8}".prop_map(ToString::to_string),
                    ],
                    inner,
                    0..4,
                )
                .prop_map(|m| JsonValue::Object(m.into_iter().collect())),
            ]
        })
    }

    proptest::proptest! {
        /// `validate_payload` returns the identical violation set on repeated
        /// calls, for arbitrary payload shapes, not just the hand-picked
        /// fixture above.
        #[test]
        fn validate_payload_is_idempotent_over_arbitrary_payloads(payload in arb_json()) {
            let engine = GovernanceEngine::new(HashMap::new(), true);
            let first = engine.validate_payload(BackendKind::Graph, Operation::Create, &payload);
            let second = engine.validate_payload(BackendKind::Graph, Operation::Create, &payload);
            let paths = |vs: &[GovernanceViolation]| vs.iter().map(|v| v.field_path.clone()).collect::<Vec<_>>();
            proptest::prop_assert_eq!(paths(&first), paths(&second));
        }
    }
}
