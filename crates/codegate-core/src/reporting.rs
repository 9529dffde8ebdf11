use anyhow::{Context, Result};
use std::fmt::Write as _;
use std::path::Path;

use crate::result::{EvaluationResult, Outcome};

/// Serialize the evaluation report as pretty JSON.
pub fn render_report_json(result: &EvaluationResult) -> Result<String> {
    serde_json::to_string_pretty(result).context("serialize evaluation report")
}

/// Write the evaluation report to `path` in pretty JSON format.
pub fn write_report_json(path: &Path, result: &EvaluationResult) -> Result<()> {
    let content = render_report_json(result)?;
    std::fs::write(path, content).with_context(|| format!("write {:?}", path))?;
    Ok(())
}

/// Render the console summary.
///
/// With `verbose`, each result's evidence is appended as indented JSON.
pub fn render_summary_text(result: &EvaluationResult, verbose: bool) -> String {
    let rule = "=".repeat(60);
    let mut out = String::new();
    let _ = writeln!(out, "{rule}\nCODEGATE EVALUATION RESULTS\n{rule}\n");

    for r in &result.results {
        let _ = writeln!(out, "{}: {} ({:.2}s)", r.rule, r.outcome, r.duration.as_secs_f64());
        if r.outcome != Outcome::Pass || verbose {
            let _ = writeln!(out, "  -> {}", r.message);
        }
        if verbose && !r.evidence.is_empty() {
            if let Ok(evidence) = serde_json::to_string_pretty(&r.evidence) {
                for line in evidence.lines() {
                    let _ = writeln!(out, "     {line}");
                }
            }
        }
    }

    for warning in &result.warnings {
        let _ = writeln!(out, "warning: {warning}");
    }

    let s = &result.summary;
    let _ = writeln!(
        out,
        "\n{rule}\n{} passed, {} failed, {} errored, {} skipped ({:.0}% success) in {:.2}s",
        s.passed,
        s.failed,
        s.errored,
        s.skipped,
        s.success_rate * 100.0,
        s.duration.as_secs_f64()
    );
    let _ = writeln!(out, "Overall Status: {}\n{rule}", result.overall);
    out
}
