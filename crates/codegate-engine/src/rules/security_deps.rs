//! `security_deps`: no installed dependency has a known advisory.
//!
//! pip-audit is preferred; safety is the fallback. Both query an online
//! advisory database, so the rule is skipped when the contract disables
//! networking.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

use codegate_core::{Evidence, EvidenceMarker, FieldKind, FieldSpec, Finding, RuleConfig, Verdict};

use super::output::{json_payload, missing_executable, missing_python_module, with_raw_output};
use super::{parse_config, Rule, RuleExecutionError};
use crate::context::ExecutionContext;
use crate::executor::ExecOutput;

pub const FIELDS: &[FieldSpec] = &[FieldSpec::new("timeout", FieldKind::Seconds)];

const DESCRIPTION_LIMIT: usize = 200;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SecurityDepsConfig {
    pub timeout: u64,
}

impl Default for SecurityDepsConfig {
    fn default() -> Self {
        Self { timeout: 180 }
    }
}

#[derive(Debug)]
pub struct SecurityDepsRule {
    timeout: Duration,
}

impl SecurityDepsRule {
    pub fn from_config(config: &RuleConfig) -> Result<Self, RuleExecutionError> {
        let config: SecurityDepsConfig = parse_config(config)?;
        Ok(Self {
            timeout: Duration::from_secs(config.timeout),
        })
    }
}

/// A vulnerable package as reported by either scanner.
#[derive(Debug, Clone, PartialEq)]
pub struct Vulnerability {
    pub package: String,
    pub version: String,
    pub id: String,
    pub fix_versions: Vec<String>,
    pub description: String,
}

impl Vulnerability {
    fn to_finding(&self) -> Finding {
        let mut message = truncate(&self.description, DESCRIPTION_LIMIT);
        if !self.fix_versions.is_empty() {
            message = format!("{message} (fixed in {})", self.fix_versions.join(", "));
        }
        Finding::new("vulnerable_dependency")
            .symbol(format!("{}=={}", self.package, self.version))
            .excerpt(self.id.as_str())
            .message(message.trim())
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

fn text(value: &Value, key: &str) -> String {
    value.get(key).and_then(Value::as_str).unwrap_or_default().to_string()
}

/// pip-audit `-f json`: `{"dependencies": [...]}` or, on older releases, a bare list.
pub fn parse_pip_audit(stdout: &str) -> Result<Vec<Vulnerability>, String> {
    let report = json_payload(stdout)?;
    let dependencies = match &report {
        Value::Array(deps) => deps,
        Value::Object(_) => report
            .get("dependencies")
            .and_then(Value::as_array)
            .ok_or("report has no 'dependencies' array")?,
        _ => return Err("unexpected JSON document".to_string()),
    };

    let mut found = Vec::new();
    for dep in dependencies {
        let Some(vulns) = dep.get("vulns").and_then(Value::as_array) else {
            continue;
        };
        for vuln in vulns {
            found.push(Vulnerability {
                package: text(dep, "name"),
                version: text(dep, "version"),
                id: text(vuln, "id"),
                fix_versions: vuln
                    .get("fix_versions")
                    .and_then(Value::as_array)
                    .map(|v| v.iter().filter_map(Value::as_str).map(str::to_string).collect())
                    .unwrap_or_default(),
                description: text(vuln, "description"),
            });
        }
    }
    Ok(found)
}

/// safety `check --json`: the legacy list of
/// `[package, affected, installed, advisory, id]` rows, or the newer object
/// with a `vulnerabilities` array.
pub fn parse_safety(stdout: &str) -> Result<Vec<Vulnerability>, String> {
    let report = json_payload(stdout)?;
    match &report {
        Value::Array(rows) => rows
            .iter()
            .map(|row| {
                let cell = |i: usize| row.get(i).and_then(Value::as_str).unwrap_or_default().to_string();
                if !row.is_array() {
                    return Err("legacy report row is not a list".to_string());
                }
                Ok(Vulnerability {
                    package: cell(0),
                    version: cell(2),
                    id: cell(4),
                    fix_versions: Vec::new(),
                    description: cell(3),
                })
            })
            .collect(),
        Value::Object(_) => {
            let vulns = report
                .get("vulnerabilities")
                .and_then(Value::as_array)
                .ok_or("report has no 'vulnerabilities' array")?;
            Ok(vulns
                .iter()
                .map(|v| Vulnerability {
                    package: text(v, "package_name"),
                    version: text(v, "analyzed_version"),
                    id: text(v, "vulnerability_id"),
                    fix_versions: v
                        .get("fixed_versions")
                        .and_then(Value::as_array)
                        .map(|f| f.iter().filter_map(Value::as_str).map(str::to_string).collect())
                        .unwrap_or_default(),
                    description: text(v, "advisory"),
                })
                .collect())
        }
        _ => Err("unexpected JSON document".to_string()),
    }
}

enum Scan {
    Completed {
        scanner: &'static str,
        vulnerabilities: Vec<Vulnerability>,
        output: ExecOutput,
    },
    Unavailable,
}

impl SecurityDepsRule {
    async fn scan(
        &self,
        ctx: &ExecutionContext,
        scanner: &'static str,
        module: &str,
        command: &[&str],
        parse: fn(&str) -> Result<Vec<Vulnerability>, String>,
    ) -> Result<Scan, RuleExecutionError> {
        let output = ctx.run_in_container(command, &[], self.timeout).await?;
        if missing_executable(&output) {
            return Err(RuleExecutionError::ToolUnavailable {
                tool: "python".to_string(),
            });
        }
        if missing_python_module(&output, module) {
            return Ok(Scan::Unavailable);
        }
        let vulnerabilities = parse(&output.stdout).map_err(|reason| RuleExecutionError::MalformedOutput {
            tool: scanner.to_string(),
            reason,
            output: output.combined(),
        })?;
        Ok(Scan::Completed {
            scanner,
            vulnerabilities,
            output,
        })
    }
}

#[async_trait]
impl Rule for SecurityDepsRule {
    async fn execute(&self, ctx: &ExecutionContext) -> Result<Verdict, RuleExecutionError> {
        if !ctx.network_access {
            return Ok(Verdict::skipped(
                "Dependency scanning needs network access to fetch advisories",
            )
            .with_evidence(Evidence::marked(EvidenceMarker::NetworkDisabled)));
        }

        let mut scan = self
            .scan(
                ctx,
                "pip-audit",
                "pip_audit",
                &["python", "-m", "pip_audit", "-f", "json", "--progress-spinner", "off"],
                parse_pip_audit,
            )
            .await?;
        if matches!(scan, Scan::Unavailable) {
            scan = self
                .scan(
                    ctx,
                    "safety",
                    "safety",
                    &["python", "-m", "safety", "check", "--json"],
                    parse_safety,
                )
                .await?;
        }
        let Scan::Completed {
            scanner,
            vulnerabilities,
            output,
        } = scan
        else {
            return Err(RuleExecutionError::ToolUnavailable {
                tool: "pip-audit or safety".to_string(),
            });
        };

        let packages: Vec<Value> = vulnerabilities
            .iter()
            .map(|v| json!({ "name": v.package, "version": v.version, "id": v.id }))
            .collect();
        let mut evidence = Evidence::new()
            .with_detail("scanner", scanner)
            .with_detail("dependencies_declared", ctx.python_dependencies.len())
            .with_detail("vulnerabilities_found", vulnerabilities.len())
            .with_detail("vulnerable_packages", packages)
            .with_findings(vulnerabilities.iter().map(Vulnerability::to_finding).collect());
        if ctx.verbose {
            evidence = with_raw_output(evidence, &output, true);
        }

        let verdict = if vulnerabilities.is_empty() {
            Verdict::pass(format!("No vulnerable dependencies found ({scanner})"))
        } else {
            Verdict::fail(format!(
                "Found {} known vulnerabilit{} in installed dependencies",
                vulnerabilities.len(),
                if vulnerabilities.len() == 1 { "y" } else { "ies" }
            ))
        };
        Ok(verdict.with_evidence(evidence))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pip_audit_object() {
        let stdout = r#"{"dependencies": [
            {"name": "requests", "version": "2.19.0", "vulns": [
                {"id": "PYSEC-2018-28", "fix_versions": ["2.20.0"], "aliases": [], "description": "Credentials leak on redirect"}
            ]},
            {"name": "flask", "version": "3.0.0", "vulns": []},
            {"name": "local-pkg", "skip_reason": "not on PyPI"}
        ], "fixes": []}"#;
        let vulns = parse_pip_audit(stdout).unwrap();
        assert_eq!(vulns.len(), 1);
        assert_eq!(vulns[0].package, "requests");
        assert_eq!(vulns[0].fix_versions, vec!["2.20.0"]);

        let finding = vulns[0].to_finding();
        assert_eq!(finding.symbol.as_deref(), Some("requests==2.19.0"));
        assert!(finding.message.unwrap().contains("fixed in 2.20.0"));
    }

    #[test]
    fn test_parse_pip_audit_legacy_list() {
        let stdout = r#"[{"name": "pyyaml", "version": "5.3", "vulns": [{"id": "GHSA-8q59", "fix_versions": [], "description": ""}]}]"#;
        assert_eq!(parse_pip_audit(stdout).unwrap().len(), 1);
        assert_eq!(parse_pip_audit(r#"{"dependencies": []}"#).unwrap(), Vec::new());
    }

    #[test]
    fn test_parse_safety_formats() {
        let legacy = r#"[["django", "<2.2.24", "2.2.0", "Django 2.2.24 fixes a path traversal", "40637"]]"#;
        let vulns = parse_safety(legacy).unwrap();
        assert_eq!(vulns[0].package, "django");
        assert_eq!(vulns[0].version, "2.2.0");
        assert_eq!(vulns[0].id, "40637");

        let modern = r#"{"report_meta": {}, "vulnerabilities": [
            {"package_name": "jinja2", "analyzed_version": "2.10", "vulnerability_id": "39525", "advisory": "Sandbox escape", "fixed_versions": ["2.10.1"]}
        ]}"#;
        let vulns = parse_safety(modern).unwrap();
        assert_eq!(vulns[0].package, "jinja2");
        assert_eq!(vulns[0].fix_versions, vec!["2.10.1"]);
    }

    #[test]
    fn test_parse_rejects_unexpected_shapes() {
        assert!(parse_pip_audit("ERROR: could not resolve").is_err());
        assert!(parse_pip_audit(r#"{"fixes": []}"#).is_err());
        assert!(parse_safety(r#"{"report_meta": {}}"#).is_err());
        assert!(parse_safety(r#"[{"package": "x"}]"#).is_err());
    }

    #[test]
    fn test_description_is_truncated() {
        let vuln = Vulnerability {
            package: "p".to_string(),
            version: "1".to_string(),
            id: "X".to_string(),
            fix_versions: Vec::new(),
            description: "a".repeat(1000),
        };
        assert_eq!(vuln.to_finding().message.unwrap().len(), DESCRIPTION_LIMIT);
    }
}
