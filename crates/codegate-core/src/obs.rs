//! Structured lifecycle events for evaluation runs.
//!
//! Every event carries an `event` field so log pipelines can filter on it
//! regardless of output format.

use std::time::Duration;
use tracing::{info, warn};

use crate::result::{EvaluationResult, Outcome};

/// Span wrapping one evaluation run; attach it with `Instrument`.
///
/// ```ignore
/// run(contract).instrument(run_span(&run_id, &project)).await
/// ```
pub fn run_span(run_id: &str, project: &str) -> tracing::Span {
    tracing::info_span!("codegate.run", run_id = %run_id, project = %project)
}

pub fn emit_run_started(run_id: &str, enabled_rules: usize) {
    info!(event = "run.started", run_id = %run_id, enabled_rules = enabled_rules);
}

/// Emit event: dependency image resolved, either reused or freshly built.
pub fn emit_environment_ready(fingerprint: &str, tag: &str, reused: bool) {
    info!(
        event = "environment.ready",
        fingerprint = %fingerprint,
        tag = %tag,
        reused = reused,
    );
}

pub fn emit_environment_failed(error: &dyn std::fmt::Display) {
    tracing::error!(event = "environment.failed", error = %error);
}

pub fn emit_rule_started(rule: &str) {
    info!(event = "rule.started", rule = %rule);
}

pub fn emit_rule_finished(rule: &str, outcome: Outcome, duration: Duration) {
    info!(
        event = "rule.finished",
        rule = %rule,
        outcome = %outcome,
        duration_ms = duration.as_millis() as u64,
    );
}

/// Emit event: a rule was skipped because its tool is missing (warning level).
pub fn emit_rule_skipped_tool(rule: &str, tool: &str) {
    warn!(event = "rule.skipped_tool", rule = %rule, tool = %tool);
}

pub fn emit_run_finished(run_id: &str, result: &EvaluationResult) {
    info!(
        event = "run.finished",
        run_id = %run_id,
        overall = %result.overall,
        passed = result.summary.passed,
        failed = result.summary.failed,
        errored = result.summary.errored,
        skipped = result.summary.skipped,
        duration_ms = result.summary.duration.as_millis() as u64,
    );
}
