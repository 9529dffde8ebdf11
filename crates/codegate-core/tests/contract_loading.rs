//! Loading contracts from YAML files.

use codegate_core::{
    check_fields, load_contract, ContractError, FieldError, FieldKind, FieldSpec, RuleConfig,
    RuleSchema,
};
use std::path::Path;
use tempfile::TempDir;

/// Two rules, enough to exercise per-rule field checks.
struct TestSchema;

const UNIT_TESTS: &[FieldSpec] = &[
    FieldSpec::new("test_directory", FieldKind::String),
    FieldSpec::new("coverage_threshold", FieldKind::Percentage),
    FieldSpec::new("timeout", FieldKind::Seconds),
];
const POLICY: &[FieldSpec] = &[
    FieldSpec::new("forbidden_modules", FieldKind::StringList),
    FieldSpec::new("allow_dynamic_imports", FieldKind::Bool),
];

impl RuleSchema for TestSchema {
    fn known_rules(&self) -> Vec<String> {
        vec!["unit_tests".to_string(), "policy".to_string()]
    }

    fn check_rule(&self, name: &str, config: &RuleConfig) -> Option<Vec<FieldError>> {
        match name {
            "unit_tests" => Some(check_fields(&config.fields, UNIT_TESTS)),
            "policy" => Some(check_fields(&config.fields, POLICY)),
            _ => None,
        }
    }
}

fn workspace() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("app/tests")).unwrap();
    dir
}

fn write(dir: &Path, name: &str, body: &str) -> std::path::PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, body).unwrap();
    path
}

#[test]
fn test_valid_contract_loads_with_defaults() {
    let dir = workspace();
    let path = write(
        dir.path(),
        "contract.yaml",
        r#"
Environment:
  runtime_image: python:3.12-slim
  python_dependencies: ["pytest==8.0.0", "pytest-cov"]
project:
  path: ./app
  entry_point: main.py
rules:
  unit_tests:
    coverage_threshold: 80
  policy:
    enabled: false
    forbidden_modules: [os]
"#,
    );

    let contract = load_contract(&path, &TestSchema).unwrap();
    assert_eq!(contract.environment.runtime_image, "python:3.12-slim");
    assert!(!contract.environment.network_access);
    assert!(contract.environment.allowed_writing_paths.is_empty());
    assert_eq!(
        contract.project.path,
        std::fs::canonicalize(dir.path().join("app")).unwrap()
    );
    assert_eq!(contract.project.entry_point.as_deref(), Some("main.py"));

    let names: Vec<&str> = contract.rules.keys().map(String::as_str).collect();
    assert_eq!(names, vec!["unit_tests", "policy"]);
    assert!(contract.rules["unit_tests"].enabled);
    assert!(!contract.rules["policy"].enabled);
    assert_eq!(contract.enabled_rule_count(), 1);
}

#[test]
fn test_every_error_is_reported_at_once() {
    let dir = workspace();
    let path = write(
        dir.path(),
        "contract.yaml",
        r#"
Environment:
  network_access: "yes"
  allowed_writing_paths: ["/workspace/out", "relative"]
project:
  path: ./missing
rules:
  unit_tests:
    coverage_threshold: "high"
    timeout: -5
  lint:
    enabled: true
  policy:
    enabled: maybe
"#,
    );

    let err = match load_contract(&path, &TestSchema) {
        Err(ContractError::Invalid(err)) => err,
        other => panic!("expected validation error, got {other:?}"),
    };
    for expected in [
        "Environment.runtime_image",
        "Environment.network_access",
        "Environment.allowed_writing_paths[0]",
        "Environment.allowed_writing_paths[1]",
        "project.path",
        "rules.unit_tests.coverage_threshold",
        "rules.unit_tests.timeout",
        "rules.lint",
        "rules.policy.enabled",
    ] {
        assert!(err.has_path(expected), "missing {expected} in {err}");
    }
    assert_eq!(err.len(), 9);
}

#[test]
fn test_missing_sections_and_unknown_keys() {
    let dir = workspace();
    let path = write(
        dir.path(),
        "contract.yaml",
        r#"
Environment:
  runtime_image: python:3.12
  colour: blue
extras: true
"#,
    );
    let err = match load_contract(&path, &TestSchema) {
        Err(ContractError::Invalid(err)) => err,
        other => panic!("expected validation error, got {other:?}"),
    };
    assert!(err.has_path("extras"));
    assert!(err.has_path("Environment.colour"));
    assert!(err.has_path("project"));
    assert!(err.has_path("rules"));
}

#[test]
fn test_empty_rules_are_allowed() {
    let dir = workspace();
    let path = write(
        dir.path(),
        "contract.yaml",
        "Environment:\n  runtime_image: python:3.12\nproject:\n  path: app\nrules: {}\n",
    );
    let contract = load_contract(&path, &TestSchema).unwrap();
    assert!(contract.rules.is_empty());
}

#[test]
fn test_file_errors() {
    let dir = workspace();
    assert!(matches!(
        load_contract(&dir.path().join("nope.yaml"), &TestSchema),
        Err(ContractError::NotFound(_))
    ));

    let empty = write(dir.path(), "empty.yaml", "   \n");
    assert!(matches!(
        load_contract(&empty, &TestSchema),
        Err(ContractError::Empty)
    ));

    let broken = write(dir.path(), "broken.yaml", "Environment: [unclosed\n");
    assert!(matches!(
        load_contract(&broken, &TestSchema),
        Err(ContractError::Yaml(_))
    ));
}
