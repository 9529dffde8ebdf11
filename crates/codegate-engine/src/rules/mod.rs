//! Verification rules.
//!
//! A rule inspects the project and returns a [`Verdict`]. Rules that need the
//! dependency image are [`Capability::Containerized`]; the rest run on the
//! host against the read-only source tree.

pub mod build_imports;
pub mod output;
pub mod policy;
pub mod registry;
pub mod security_deps;
pub mod security_sast;

pub use registry::RuleRegistry;

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use codegate_core::{Evidence, EvidenceMarker, RuleConfig, Verdict};

use crate::context::ExecutionContext;
use crate::executor::ExecError;

/// Where a rule runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    /// Needs the dependency image and the container executor.
    Containerized,
    /// Reads the source tree on the host; no image required.
    LocalStatic,
}

/// A verification rule, constructed from its validated config.
#[async_trait]
pub trait Rule: Send + Sync {
    async fn execute(&self, ctx: &ExecutionContext) -> Result<Verdict, RuleExecutionError>;
}

/// Faults that keep a rule from reaching a verdict on its own.
///
/// The dispatcher turns these into ERROR results, except
/// [`ToolUnavailable`](Self::ToolUnavailable) which becomes SKIPPED.
#[derive(Debug, thiserror::Error)]
pub enum RuleExecutionError {
    #[error("timed out after {limit_secs}s")]
    Timeout { limit_secs: u64 },

    #[error("{tool} is not available in the dependency image")]
    ToolUnavailable { tool: String },

    #[error("could not interpret {tool} output: {reason}")]
    MalformedOutput {
        tool: String,
        reason: String,
        output: String,
    },

    #[error("no dependency image was prepared for this run")]
    MissingImage,

    #[error("invalid value for '{field}': {reason}")]
    InvalidConfig { field: String, reason: String },

    #[error("rule '{0}' is not registered")]
    UnknownRule(String),

    #[error("container execution failed: {0}")]
    Exec(ExecError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ExecError> for RuleExecutionError {
    fn from(err: ExecError) -> Self {
        match err {
            ExecError::Timeout { limit } => RuleExecutionError::Timeout {
                limit_secs: limit.as_secs(),
            },
            other => RuleExecutionError::Exec(other),
        }
    }
}

impl RuleExecutionError {
    /// Map the fault onto the verdict the run reports for this rule.
    pub fn into_verdict(self, verbose: bool) -> Verdict {
        match self {
            RuleExecutionError::Timeout { limit_secs } => {
                Verdict::error(format!("Rule timed out after {limit_secs}s; container was killed"))
                    .with_evidence(
                        Evidence::marked(EvidenceMarker::Timeout).with_detail("timeout_secs", limit_secs),
                    )
            }
            RuleExecutionError::ToolUnavailable { tool } => {
                Verdict::skipped(format!("{tool} is not installed in the dependency image"))
                    .with_evidence(
                        Evidence::marked(EvidenceMarker::ToolUnavailable).with_detail("tool", tool),
                    )
            }
            RuleExecutionError::MalformedOutput {
                tool,
                reason,
                output,
            } => {
                let raw = if verbose {
                    output
                } else {
                    output::tail(&output, output::TAIL_LINES)
                };
                Verdict::error(format!("Could not interpret {tool} output: {reason}")).with_evidence(
                    Evidence::marked(EvidenceMarker::MalformedOutput)
                        .with_detail("tool", tool)
                        .with_detail("output", raw),
                )
            }
            other => Verdict::error(other.to_string())
                .with_evidence(Evidence::marked(EvidenceMarker::RuleFault)),
        }
    }
}

/// Deserialize a rule's typed config from its (already type-checked) fields.
pub(crate) fn parse_config<T: DeserializeOwned>(config: &RuleConfig) -> Result<T, RuleExecutionError> {
    serde_json::from_value(config.fields_value()).map_err(|e| RuleExecutionError::InvalidConfig {
        field: "config".to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use codegate_core::Outcome;
    use std::time::Duration;

    #[test]
    fn test_exec_timeout_maps_to_rule_timeout() {
        let err = RuleExecutionError::from(ExecError::Timeout {
            limit: Duration::from_secs(7),
        });
        assert!(matches!(err, RuleExecutionError::Timeout { limit_secs: 7 }));

        let verdict = err.into_verdict(false);
        assert_eq!(verdict.outcome, Outcome::Error);
        assert_eq!(verdict.evidence.marker, Some(EvidenceMarker::Timeout));
    }

    #[test]
    fn test_missing_tool_is_skipped() {
        let verdict = RuleExecutionError::ToolUnavailable {
            tool: "bandit".to_string(),
        }
        .into_verdict(false);
        assert_eq!(verdict.outcome, Outcome::Skipped);
        assert_eq!(verdict.evidence.marker, Some(EvidenceMarker::ToolUnavailable));
    }

    #[test]
    fn test_malformed_output_keeps_tail_unless_verbose() {
        let output: String = (0..100).map(|i| format!("line {i}\n")).collect();
        let err = || RuleExecutionError::MalformedOutput {
            tool: "pytest".to_string(),
            reason: "no summary line".to_string(),
            output: output.clone(),
        };
        let short = err().into_verdict(false);
        let full = err().into_verdict(true);
        assert_eq!(short.outcome, Outcome::Error);
        let short_len = short.evidence.details["output"].as_str().unwrap().len();
        let full_len = full.evidence.details["output"].as_str().unwrap().len();
        assert!(short_len < full_len);
    }

    #[test]
    fn test_other_faults_are_errors() {
        let verdict = RuleExecutionError::MissingImage.into_verdict(false);
        assert_eq!(verdict.outcome, Outcome::Error);
        assert_eq!(verdict.evidence.marker, Some(EvidenceMarker::RuleFault));
    }
}
