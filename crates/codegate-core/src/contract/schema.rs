use serde_json::{Map, Value};

use super::RuleConfig;
use crate::error::FieldError;

/// Expected type of a rule-specific field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Bool,
    /// Whole number of seconds, strictly positive.
    Seconds,
    /// Number in `0..=100`.
    Percentage,
    String,
    StringList,
    /// One of a fixed set of lowercase strings.
    Choice(&'static [&'static str]),
}

impl FieldKind {
    fn check(&self, value: &Value) -> Result<(), String> {
        match self {
            FieldKind::Bool if value.is_boolean() => Ok(()),
            FieldKind::Bool => Err("must be a boolean".to_string()),
            FieldKind::Seconds => match value.as_u64() {
                Some(n) if n > 0 => Ok(()),
                _ => Err("must be a positive integer (seconds)".to_string()),
            },
            FieldKind::Percentage => match value.as_f64() {
                Some(n) if (0.0..=100.0).contains(&n) => Ok(()),
                _ => Err("must be a number between 0 and 100".to_string()),
            },
            FieldKind::String if value.is_string() => Ok(()),
            FieldKind::String => Err("must be a string".to_string()),
            FieldKind::StringList => match value.as_array() {
                Some(items) if items.iter().all(Value::is_string) => Ok(()),
                _ => Err("must be a list of strings".to_string()),
            },
            FieldKind::Choice(options) => match value.as_str() {
                Some(s) if options.contains(&s.to_ascii_lowercase().as_str()) => Ok(()),
                _ => Err(format!("must be one of: {}", options.join(", "))),
            },
        }
    }
}

/// A field a rule accepts in its config block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
}

impl FieldSpec {
    pub const fn new(name: &'static str, kind: FieldKind) -> Self {
        Self { name, kind }
    }
}

/// Knows which rules exist and what their configs look like.
///
/// Implemented by the rule registry; contract validation only sees this seam.
pub trait RuleSchema {
    /// Names of every registered rule, for error messages.
    fn known_rules(&self) -> Vec<String>;

    /// Check one rule's config. `None` means the rule is not registered;
    /// otherwise every problem found, with paths relative to the rule block.
    fn check_rule(&self, name: &str, config: &RuleConfig) -> Option<Vec<FieldError>>;
}

/// Type-check `fields` against `specs`, rejecting unknown keys.
///
/// Returned paths are bare field names.
pub fn check_fields(fields: &Map<String, Value>, specs: &[FieldSpec]) -> Vec<FieldError> {
    let mut errors = Vec::new();
    for (key, value) in fields {
        match specs.iter().find(|spec| spec.name == key) {
            Some(spec) => {
                if let Err(message) = spec.kind.check(value) {
                    errors.push(FieldError::new(key.as_str(), message));
                }
            }
            None => {
                let mut accepted: Vec<&str> = specs.iter().map(|s| s.name).collect();
                accepted.push("enabled");
                errors.push(FieldError::new(
                    key.as_str(),
                    format!("unknown field (accepted: {})", accepted.join(", ")),
                ));
            }
        }
    }
    errors
}
