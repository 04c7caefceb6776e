//! Configuration.
//!
//! TOML-backed configuration for the coordinator: `#[serde(default)]`
//! structs with a `Default` impl per section. `${VAR}`-style placeholders
//! in string fields (primarily `credentials_ref`) are expanded against the
//! process environment at load time, never persisted back to disk.

use std::collections::HashMap;
use std::path::Path;

use polyglot_error::{ConfigError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::backend::BackendKind;

/// Per-backend settings shared by all six kinds. Unknown/extra TOML keys are
/// collected into `settings` and forwarded to the adapter verbatim — the
/// core never inspects or validates backend-specific settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub enabled: bool,
    pub backend: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub database: Option<String>,
    pub path: Option<String>,
    pub credentials_ref: Option<String>,
    pub min_connections: Option<u32>,
    pub max_connections: Option<u32>,
    #[serde(flatten)]
    pub settings: HashMap<String, toml::Value>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            backend: None,
            host: None,
            port: None,
            user: None,
            password: None,
            database: None,
            path: None,
            credentials_ref: None,
            min_connections: None,
            max_connections: None,
            settings: HashMap::new(),
        }
    }
}

impl BackendConfig {
    /// Convert `settings` into the opaque `serde_json::Value` map
    /// [`crate::backend::BackendDescriptor`] forwards to adapters.
    #[must_use]
    pub fn settings_as_json(&self) -> HashMap<String, JsonValue> {
        self.settings
            .iter()
            .filter_map(|(k, v)| serde_json::to_value(v).ok().map(|v| (k.clone(), v)))
            .collect()
    }

    /// Resolve `credentials_ref` by expanding any `${VAR}` placeholder
    /// against the process environment.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingEnvVar` if the reference names an
    /// environment variable that isn't set.
    pub fn resolve_credentials(&self) -> Result<Option<String>> {
        self.credentials_ref.as_deref().map(expand_env_placeholder).transpose().map_err(Into::into)
    }
}

/// Expand a single `${VAR}` placeholder. A value with no placeholder is
/// returned unchanged; a value that is *only* `${VAR}` is replaced with the
/// variable's content.
fn expand_env_placeholder(value: &str) -> std::result::Result<String, ConfigError> {
    if let Some(inner) = value.strip_prefix("${").and_then(|s| s.strip_suffix('}')) {
        std::env::var(inner).map_err(|_| ConfigError::MissingEnvVar { name: inner.to_string() })
    } else {
        Ok(value.to_string())
    }
}

/// Governance section: strict/lenient default and raw policy overrides
/// (parsed further by [`crate::governance::GovernanceEngine`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GovernanceConfig {
    pub strict: bool,
    pub policies: HashMap<String, JsonValue>,
}

impl Default for GovernanceConfig {
    fn default() -> Self {
        Self {
            strict: true,
            policies: HashMap::new(),
        }
    }
}

/// Top-level coordinator configuration: one section per backend, plus
/// governance, discovery, and startup settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    pub relational: BackendConfig,
    pub document: BackendConfig,
    pub vector: BackendConfig,
    pub graph: BackendConfig,
    pub file: BackendConfig,
    pub key_value: BackendConfig,
    pub governance: GovernanceConfig,
    pub autostart: bool,
    pub discovery_cache_ttl_secs: u64,
    /// Per-backend timeout applied by `start_all_backends`, in seconds.
    pub start_timeout_secs: u64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            relational: BackendConfig::default(),
            document: BackendConfig::default(),
            vector: BackendConfig::default(),
            graph: BackendConfig::default(),
            file: BackendConfig::default(),
            key_value: BackendConfig::default(),
            governance: GovernanceConfig::default(),
            autostart: false,
            discovery_cache_ttl_secs: 300,
            start_timeout_secs: 10,
        }
    }
}

impl CoordinatorConfig {
    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ParseError` on malformed TOML.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|source| ConfigError::ParseError { source }.into())
    }

    /// Load and parse configuration from a file on disk.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::NotFound`, `ConfigError::ReadError`, or
    /// `ConfigError::ParseError`.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::NotFound { path: path.to_path_buf() }.into());
        }
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadError {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    /// Borrow the [`BackendConfig`] for a given kind.
    #[must_use]
    pub fn backend_config(&self, kind: BackendKind) -> &BackendConfig {
        match kind {
            BackendKind::Relational => &self.relational,
            BackendKind::Document => &self.document,
            BackendKind::Vector => &self.vector,
            BackendKind::Graph => &self.graph,
            BackendKind::File => &self.file,
            BackendKind::KeyValue => &self.key_value,
        }
    }

    /// Every kind configured with `enabled = true`.
    #[must_use]
    pub fn enabled_kinds(&self) -> Vec<BackendKind> {
        BackendKind::ALL.into_iter().filter(|k| self.backend_config(*k).enabled).collect()
    }
}
