//! `security_sast`: bandit finds nothing at or above the severity threshold.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

use codegate_core::{Evidence, FieldKind, FieldSpec, Finding, RuleConfig, Verdict, WORKSPACE_MOUNT};

use super::output::{
    json_payload, missing_executable, missing_python_module, relative_to_workspace, with_raw_output,
};
use super::{parse_config, Rule, RuleExecutionError};
use crate::context::ExecutionContext;

pub const FIELDS: &[FieldSpec] = &[
    FieldSpec::new("timeout", FieldKind::Seconds),
    FieldSpec::new(
        "severity_threshold",
        FieldKind::Choice(&["low", "medium", "high"]),
    ),
];

const BANDIT_EXCLUDES: &str = "/workspace/.venv,/workspace/venv,/workspace/.tox,/workspace/.git";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "low" => Some(Severity::Low),
            "medium" => Some(Severity::Medium),
            "high" => Some(Severity::High),
            _ => None,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "LOW",
            Severity::Medium => "MEDIUM",
            Severity::High => "HIGH",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SecuritySastConfig {
    pub timeout: u64,
    pub severity_threshold: String,
}

impl Default for SecuritySastConfig {
    fn default() -> Self {
        Self {
            timeout: 120,
            severity_threshold: "high".to_string(),
        }
    }
}

#[derive(Debug)]
pub struct SecuritySastRule {
    timeout: Duration,
    threshold: Severity,
}

impl SecuritySastRule {
    pub fn from_config(config: &RuleConfig) -> Result<Self, RuleExecutionError> {
        let config: SecuritySastConfig = parse_config(config)?;
        let threshold = Severity::parse(&config.severity_threshold).ok_or_else(|| {
            RuleExecutionError::InvalidConfig {
                field: "severity_threshold".to_string(),
                reason: format!("unknown severity '{}'", config.severity_threshold),
            }
        })?;
        Ok(Self {
            timeout: Duration::from_secs(config.timeout),
            threshold,
        })
    }
}

/// One bandit result.
#[derive(Debug, Clone, PartialEq)]
pub struct BanditIssue {
    pub severity: Severity,
    pub confidence: String,
    pub test_id: String,
    pub text: String,
    pub file: String,
    pub line: usize,
    pub code: String,
}

/// Parse bandit's JSON report. Leading log noise before the JSON body is tolerated.
pub fn parse_bandit_report(stdout: &str) -> Result<Vec<BanditIssue>, String> {
    let report = json_payload(stdout)?;
    let results = report
        .get("results")
        .and_then(Value::as_array)
        .ok_or("report has no 'results' array")?;

    let field = |issue: &Value, key: &str| issue.get(key).and_then(Value::as_str).unwrap_or_default().to_string();
    let mut issues = Vec::with_capacity(results.len());
    for issue in results {
        // Unknown severities count as low rather than vanishing.
        let severity = Severity::parse(&field(issue, "issue_severity")).unwrap_or(Severity::Low);
        issues.push(BanditIssue {
            severity,
            confidence: field(issue, "issue_confidence"),
            test_id: field(issue, "test_id"),
            text: field(issue, "issue_text"),
            file: relative_to_workspace(&field(issue, "filename")),
            line: issue.get("line_number").and_then(Value::as_u64).unwrap_or(0) as usize,
            code: field(issue, "code"),
        });
    }
    Ok(issues)
}

#[async_trait]
impl Rule for SecuritySastRule {
    async fn execute(&self, ctx: &ExecutionContext) -> Result<Verdict, RuleExecutionError> {
        let output = ctx
            .run_in_container(
                &[
                    "python",
                    "-m",
                    "bandit",
                    "-r",
                    WORKSPACE_MOUNT,
                    "-f",
                    "json",
                    "-q",
                    "-x",
                    BANDIT_EXCLUDES,
                ],
                &[],
                self.timeout,
            )
            .await?;

        if missing_executable(&output) {
            return Err(RuleExecutionError::ToolUnavailable {
                tool: "python".to_string(),
            });
        }
        if missing_python_module(&output, "bandit") {
            return Err(RuleExecutionError::ToolUnavailable {
                tool: "bandit".to_string(),
            });
        }

        let issues = parse_bandit_report(&output.stdout).map_err(|reason| {
            RuleExecutionError::MalformedOutput {
                tool: "bandit".to_string(),
                reason,
                output: output.combined(),
            }
        })?;

        let count = |s: Severity| issues.iter().filter(|i| i.severity == s).count();
        let (high, medium, low) = (count(Severity::High), count(Severity::Medium), count(Severity::Low));
        let blocking = issues.iter().filter(|i| i.severity >= self.threshold).count();

        let findings = issues
            .iter()
            .map(|issue| {
                Finding::new(format!("sast:{}", issue.severity.as_str()))
                    .at(issue.file.as_str(), issue.line)
                    .symbol(issue.test_id.as_str())
                    .excerpt(issue.code.lines().find(|l| !l.trim().is_empty()).unwrap_or_default().trim())
                    .message(format!("{} (confidence {})", issue.text, issue.confidence))
            })
            .collect();
        let mut evidence = Evidence::new()
            .with_detail("scanner", "bandit")
            .with_detail("severity_threshold", self.threshold.as_str())
            .with_detail("high_severity", high)
            .with_detail("medium_severity", medium)
            .with_detail("low_severity", low)
            .with_findings(findings);
        if ctx.verbose {
            evidence = with_raw_output(evidence, &output, true);
        }

        let verdict = if blocking > 0 {
            Verdict::fail(format!(
                "Found {blocking} security issue(s) at or above {} severity",
                self.threshold.as_str()
            ))
        } else if issues.is_empty() {
            Verdict::pass("No security issues found")
        } else {
            Verdict::pass(format!(
                "Passed with {} issue(s) below {} severity",
                issues.len(),
                self.threshold.as_str()
            ))
        };
        Ok(verdict.with_evidence(evidence))
    }
}
