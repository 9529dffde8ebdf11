use indexmap::IndexMap;
use serde_json::{Map, Value};
use std::path::{Component, Path, PathBuf};

use super::{Contract, EnvironmentSpec, ProjectSpec, RuleConfig, RuleSchema, WORKSPACE_MOUNT};
use crate::error::{FieldError, ValidationError};

const TOP_LEVEL_KEYS: &[&str] = &["Environment", "project", "rules"];
const ENVIRONMENT_KEYS: &[&str] = &[
    "runtime_image",
    "network_access",
    "system_dependencies",
    "python_dependencies",
    "allowed_writing_paths",
    "file_system_access",
];
const PROJECT_KEYS: &[&str] = &["path", "entry_point", "python_dependencies"];

/// Check that `path` is acceptable as an in-container scratch mount.
///
/// Scratch paths are absolute, are not `/`, and never overlap the project
/// mount.
pub fn check_scratch_path(path: &str) -> Result<(), String> {
    let p = Path::new(path);
    if !p.is_absolute() {
        return Err(format!("'{path}' must be an absolute in-container path"));
    }
    if p.components().any(|c| matches!(c, Component::ParentDir)) {
        return Err(format!("'{path}' must not contain '..'"));
    }
    if p.parent().is_none() {
        return Err("the container root cannot be writable".to_string());
    }
    if p.starts_with(WORKSPACE_MOUNT) {
        return Err(format!(
            "'{path}' lies inside the read-only project mount {WORKSPACE_MOUNT}"
        ));
    }
    Ok(())
}

/// Accumulates errors while walking the document.
#[derive(Default)]
struct Checker {
    errors: Vec<FieldError>,
}

impl Checker {
    fn push(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.errors.push(FieldError::new(path, message));
    }

    fn section<'a>(&mut self, doc: &'a Map<String, Value>, key: &str) -> Option<&'a Map<String, Value>> {
        match doc.get(key) {
            None => {
                self.push(key, "section is required");
                None
            }
            Some(Value::Object(map)) => Some(map),
            Some(_) => {
                self.push(key, "must be a mapping");
                None
            }
        }
    }

    fn unknown_keys(&mut self, prefix: &str, map: &Map<String, Value>, allowed: &[&str]) {
        for key in map.keys() {
            if !allowed.contains(&key.as_str()) {
                self.push(join(prefix, key), "unknown field");
            }
        }
    }

    fn bool_or(&mut self, prefix: &str, map: &Map<String, Value>, key: &str, default: bool) -> bool {
        match map.get(key) {
            None | Some(Value::Null) => default,
            Some(Value::Bool(b)) => *b,
            Some(_) => {
                self.push(join(prefix, key), "must be a boolean");
                default
            }
        }
    }

    fn string_list(&mut self, prefix: &str, map: &Map<String, Value>, key: &str) -> Vec<String> {
        match map.get(key) {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => {
                let mut out = Vec::with_capacity(items.len());
                for (i, item) in items.iter().enumerate() {
                    match item.as_str() {
                        Some(s) if !s.trim().is_empty() => out.push(s.trim().to_string()),
                        _ => self.push(
                            format!("{}[{i}]", join(prefix, key)),
                            "must be a non-empty string",
                        ),
                    }
                }
                out
            }
            Some(_) => {
                self.push(join(prefix, key), "must be a list of strings");
                Vec::new()
            }
        }
    }

    fn optional_string(&mut self, prefix: &str, map: &Map<String, Value>, key: &str) -> Option<String> {
        match map.get(key) {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Some(_) => {
                self.push(join(prefix, key), "must be a non-empty string");
                None
            }
        }
    }

    fn required_string(&mut self, prefix: &str, map: &Map<String, Value>, key: &str) -> Option<String> {
        if map.get(key).map_or(true, Value::is_null) {
            self.push(join(prefix, key), "is required");
            return None;
        }
        self.optional_string(prefix, map, key)
    }
}

fn join(prefix: &str, key: &str) -> String {
    format!("{prefix}.{key}")
}

pub(super) fn validate_document(
    document: &Value,
    schema: &dyn RuleSchema,
    base_dir: Option<&Path>,
) -> Result<Contract, ValidationError> {
    let Some(doc) = document.as_object() else {
        return Err(ValidationError::new(vec![FieldError::new(
            "<root>",
            "contract must be a mapping with Environment, project and rules sections",
        )]));
    };

    let mut checker = Checker::default();
    for key in doc.keys() {
        if !TOP_LEVEL_KEYS.contains(&key.as_str()) {
            checker.push(key.as_str(), "unknown section");
        }
    }

    let environment = checker
        .section(doc, "Environment")
        .map(|env| validate_environment(&mut checker, env));
    let project = checker
        .section(doc, "project")
        .map(|project| validate_project(&mut checker, project, base_dir));
    let rules = match doc.get("rules") {
        None => {
            checker.push("rules", "section is required");
            None
        }
        Some(Value::Null) => Some(IndexMap::new()),
        Some(Value::Object(map)) => Some(validate_rules(&mut checker, map, schema)),
        Some(_) => {
            checker.push("rules", "must be a mapping of rule name to config");
            None
        }
    };

    match (environment, project, rules) {
        (Some(environment), Some(project), Some(rules)) if checker.errors.is_empty() => Ok(Contract {
            environment,
            project,
            rules,
        }),
        _ => Err(ValidationError::new(checker.errors)),
    }
}

fn validate_environment(checker: &mut Checker, env: &Map<String, Value>) -> EnvironmentSpec {
    const P: &str = "Environment";
    checker.unknown_keys(P, env, ENVIRONMENT_KEYS);
    let runtime_image = checker.required_string(P, env, "runtime_image").unwrap_or_default();
    let network_access = checker.bool_or(P, env, "network_access", false);
    // Accepted for compatibility; the project mount is always read-only.
    checker.bool_or(P, env, "file_system_access", false);
    let system_dependencies = checker.string_list(P, env, "system_dependencies");
    let python_dependencies = checker.string_list(P, env, "python_dependencies");
    let allowed_writing_paths = checker.string_list(P, env, "allowed_writing_paths");
    for (i, path) in allowed_writing_paths.iter().enumerate() {
        if let Err(message) = check_scratch_path(path) {
            checker.push(format!("{P}.allowed_writing_paths[{i}]"), message);
        }
    }
    EnvironmentSpec {
        runtime_image,
        network_access,
        system_dependencies,
        python_dependencies,
        allowed_writing_paths,
    }
}

fn validate_project(
    checker: &mut Checker,
    project: &Map<String, Value>,
    base_dir: Option<&Path>,
) -> ProjectSpec {
    const P: &str = "project";
    checker.unknown_keys(P, project, PROJECT_KEYS);

    let path = match checker.required_string(P, project, "path") {
        Some(raw) => {
            let raw = PathBuf::from(raw);
            let resolved = match base_dir {
                Some(base) if raw.is_relative() => base.join(&raw),
                _ => raw,
            };
            if resolved.is_dir() {
                std::fs::canonicalize(&resolved).unwrap_or(resolved)
            } else {
                checker.push(
                    "project.path",
                    format!("project directory does not exist: {}", resolved.display()),
                );
                resolved
            }
        }
        None => PathBuf::new(),
    };

    let entry_point = checker.optional_string(P, project, "entry_point");
    if let Some(entry) = &entry_point {
        if Path::new(entry).is_absolute() {
            checker.push("project.entry_point", "must be relative to the project root");
        }
    }
    let python_dependencies = checker.string_list(P, project, "python_dependencies");

    ProjectSpec {
        path,
        entry_point,
        python_dependencies,
    }
}

fn validate_rules(
    checker: &mut Checker,
    rules: &Map<String, Value>,
    schema: &dyn RuleSchema,
) -> IndexMap<String, RuleConfig> {
    let mut out = IndexMap::new();
    for (name, raw) in rules {
        let prefix = format!("rules.{name}");
        let mut fields = match raw {
            Value::Null => Map::new(),
            Value::Object(map) => map.clone(),
            _ => {
                checker.push(prefix, "rule config must be a mapping");
                continue;
            }
        };
        let enabled = match fields.remove("enabled") {
            None | Some(Value::Null) => true,
            Some(Value::Bool(b)) => b,
            Some(_) => {
                checker.push(join(&prefix, "enabled"), "must be a boolean");
                true
            }
        };
        let config = RuleConfig { enabled, fields };

        match schema.check_rule(name, &config) {
            None => {
                checker.push(
                    prefix,
                    format!("unknown rule (known rules: {})", schema.known_rules().join(", ")),
                );
            }
            Some(errors) => {
                for err in errors {
                    checker.push(join(&prefix, &err.path), err.message);
                }
            }
        }
        out.insert(name.clone(), config);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scratch_path_rules() {
        assert!(check_scratch_path("/tmp/cache").is_ok());
        assert!(check_scratch_path("/var/scratch").is_ok());
        assert!(check_scratch_path("tmp").is_err());
        assert!(check_scratch_path("/").is_err());
        assert!(check_scratch_path("/workspace").is_err());
        assert!(check_scratch_path("/workspace/out").is_err());
        assert!(check_scratch_path("/tmp/../workspace").is_err());
        // Only a path-component prefix counts.
        assert!(check_scratch_path("/workspace-scratch").is_ok());
    }
}
