//! Rule and run results.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::time::Duration;

/// Outcome of one rule, and of a whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Outcome {
    Pass,
    Fail,
    Error,
    Skipped,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Pass => "PASS",
            Outcome::Fail => "FAIL",
            Outcome::Error => "ERROR",
            Outcome::Skipped => "SKIPPED",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Distinguishes why a rule ended up ERROR or SKIPPED.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceMarker {
    Timeout,
    ToolUnavailable,
    NetworkDisabled,
    MalformedOutput,
    EnvironmentBuildFailed,
    RuleFault,
}

/// One located observation: a violation, a test failure, an advisory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub category: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub excerpt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Finding {
    pub fn new(category: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            ..Default::default()
        }
    }

    pub fn at(mut self, file: impl Into<String>, line: usize) -> Self {
        self.file = Some(file.into());
        self.line = Some(line);
        self
    }

    pub fn symbol(mut self, symbol: impl Into<String>) -> Self {
        self.symbol = Some(symbol.into());
        self
    }

    pub fn excerpt(mut self, excerpt: impl Into<String>) -> Self {
        self.excerpt = Some(excerpt.into());
        self
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Structured evidence attached to a rule result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub marker: Option<EvidenceMarker>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub findings: Vec<Finding>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub details: Map<String, Value>,
}

impl Evidence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn marked(marker: EvidenceMarker) -> Self {
        Self {
            marker: Some(marker),
            ..Default::default()
        }
    }

    pub fn with_detail(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.details.insert(key.to_string(), value.into());
        self
    }

    pub fn with_findings(mut self, findings: Vec<Finding>) -> Self {
        self.findings = findings;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.marker.is_none() && self.findings.is_empty() && self.details.is_empty()
    }
}

/// What a rule decides about the artifact, before the dispatcher stamps it
/// with a name and duration.
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub outcome: Outcome,
    pub message: String,
    pub evidence: Evidence,
}

impl Verdict {
    fn new(outcome: Outcome, message: impl Into<String>) -> Self {
        Self {
            outcome,
            message: message.into(),
            evidence: Evidence::default(),
        }
    }

    pub fn pass(message: impl Into<String>) -> Self {
        Self::new(Outcome::Pass, message)
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self::new(Outcome::Fail, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(Outcome::Error, message)
    }

    pub fn skipped(message: impl Into<String>) -> Self {
        Self::new(Outcome::Skipped, message)
    }

    pub fn with_evidence(mut self, evidence: Evidence) -> Self {
        self.evidence = evidence;
        self
    }
}

/// Result of one enabled rule in a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleResult {
    pub rule: String,
    pub outcome: Outcome,
    pub message: String,
    #[serde(default)]
    pub evidence: Evidence,
    #[serde(with = "duration_secs")]
    pub duration: Duration,
}

impl RuleResult {
    pub fn from_verdict(rule: impl Into<String>, verdict: Verdict, duration: Duration) -> Self {
        Self {
            rule: rule.into(),
            outcome: verdict.outcome,
            message: verdict.message,
            evidence: verdict.evidence,
            duration,
        }
    }
}

/// Per-outcome counts for a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub errored: usize,
    pub skipped: usize,
    /// `passed / total`, `0.0` when nothing ran.
    pub success_rate: f64,
    #[serde(with = "duration_secs")]
    pub duration: Duration,
}

/// The final verdict of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub summary: Summary,
    pub overall: Outcome,
    pub exit_code: i32,
    #[serde(default)]
    pub warnings: Vec<String>,
    pub results: Vec<RuleResult>,
}

impl EvaluationResult {
    pub fn result(&self, rule: &str) -> Option<&RuleResult> {
        self.results.iter().find(|r| r.rule == rule)
    }
}

/// Durations serialize as fractional seconds, millisecond precision.
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_millis() as f64 / 1000.0)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Ok(Duration::from_secs_f64(secs.max(0.0)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_outcome_serializes_uppercase() {
        assert_eq!(serde_json::to_value(Outcome::Skipped).unwrap(), json!("SKIPPED"));
        assert_eq!(Outcome::Fail.to_string(), "FAIL");
    }

    #[test]
    fn test_rule_result_json_shape() {
        let verdict = Verdict::fail("1 violation").with_evidence(
            Evidence::new().with_findings(vec![Finding::new("forbidden_module")
                .at("app/main.py", 3)
                .symbol("os")
                .excerpt("import os")]),
        );
        let result = RuleResult::from_verdict("policy", verdict, Duration::from_millis(1234));
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["rule"], "policy");
        assert_eq!(value["outcome"], "FAIL");
        assert_eq!(value["duration"], json!(1.234));
        assert_eq!(value["evidence"]["findings"][0]["line"], 3);
        assert!(value["evidence"].get("marker").is_none());
    }

    #[test]
    fn test_marker_serializes_snake_case() {
        let evidence = Evidence::marked(EvidenceMarker::ToolUnavailable).with_detail("tool", "bandit");
        let value = serde_json::to_value(&evidence).unwrap();
        assert_eq!(value["marker"], "tool_unavailable");
        assert_eq!(value["details"]["tool"], "bandit");
    }
}
