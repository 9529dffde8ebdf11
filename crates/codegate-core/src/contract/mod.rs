//! Contract model.
//!
//! A [`Contract`] is the validated, immutable form of a contract document. It
//! is only ever produced by [`Contract::from_value`] (or the file loader built
//! on top of it), so every instance has passed validation.

mod loader;
mod schema;
mod validate;

pub use loader::load_contract;
pub use schema::{check_fields, FieldKind, FieldSpec, RuleSchema};
pub use validate::check_scratch_path as validate_scratch_path;

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

/// In-container mount point of the project under evaluation.
pub const WORKSPACE_MOUNT: &str = "/workspace";

/// Base image and dependency set for containerized rules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnvironmentSpec {
    pub runtime_image: String,
    pub network_access: bool,
    pub system_dependencies: Vec<String>,
    pub python_dependencies: Vec<String>,
    pub allowed_writing_paths: Vec<String>,
}

/// The artifact under evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProjectSpec {
    /// Host path, already resolved against the contract file's directory.
    pub path: PathBuf,
    pub entry_point: Option<String>,
    pub python_dependencies: Vec<String>,
}

/// Per-rule configuration: the `enabled` switch plus rule-specific fields.
///
/// Fields are kept untyped here; each rule deserializes them into its own
/// typed config once the registry has checked them.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleConfig {
    pub enabled: bool,
    pub fields: Map<String, Value>,
}

impl RuleConfig {
    pub fn enabled() -> Self {
        Self {
            enabled: true,
            fields: Map::new(),
        }
    }

    pub fn disabled() -> Self {
        Self {
            enabled: false,
            fields: Map::new(),
        }
    }

    pub fn with_field(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }

    /// The rule-specific fields as a JSON object, ready for `serde_json::from_value`.
    pub fn fields_value(&self) -> Value {
        Value::Object(self.fields.clone())
    }
}

/// A validated contract.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Contract {
    pub environment: EnvironmentSpec,
    pub project: ProjectSpec,
    /// Declaration order is preserved.
    pub rules: IndexMap<String, RuleConfig>,
}

impl Contract {
    /// Validate a parsed contract document.
    ///
    /// `base_dir` is the directory relative paths (`project.path`) resolve
    /// against; `None` leaves them as written.
    pub fn from_value(
        document: &Value,
        schema: &dyn RuleSchema,
        base_dir: Option<&Path>,
    ) -> Result<Self, crate::ValidationError> {
        validate::validate_document(document, schema, base_dir)
    }

    /// Enabled rules in declaration order.
    pub fn enabled_rules(&self) -> impl Iterator<Item = (&str, &RuleConfig)> {
        self.rules
            .iter()
            .filter(|(_, cfg)| cfg.enabled)
            .map(|(name, cfg)| (name.as_str(), cfg))
    }

    pub fn enabled_rule_count(&self) -> usize {
        self.rules.values().filter(|cfg| cfg.enabled).count()
    }

    /// Environment and project python specifiers, first occurrence wins.
    pub fn python_dependencies(&self) -> Vec<String> {
        let mut merged: Vec<String> = Vec::new();
        for spec in self
            .environment
            .python_dependencies
            .iter()
            .chain(self.project.python_dependencies.iter())
        {
            if !merged.contains(spec) {
                merged.push(spec.clone());
            }
        }
        merged
    }
}
