//! `build_imports`: every source file compiles and the entry point imports.

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use std::sync::LazyLock;
use std::time::Duration;

use codegate_core::{Evidence, FieldKind, FieldSpec, Finding, RuleConfig, Verdict, WORKSPACE_MOUNT};

use super::output::{missing_executable, relative_to_workspace, tail, with_raw_output, TAIL_LINES};
use super::{parse_config, Rule, RuleExecutionError};
use crate::context::ExecutionContext;
use crate::executor::SCRATCH_DIR;

pub const FIELDS: &[FieldSpec] = &[FieldSpec::new("import_timeout", FieldKind::Seconds)];

const IMPORT_SENTINEL: &str = "CODEGATE_IMPORT_OK";
const IMPORT_PROBE: &str =
    "import importlib, sys; importlib.import_module(sys.argv[1]); print('CODEGATE_IMPORT_OK')";
const COMPILE_EXCLUDE: &str = r"(__pycache__|\.pytest_cache|\.venv|venv|\.tox|\.git)";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BuildImportsConfig {
    pub import_timeout: u64,
}

impl Default for BuildImportsConfig {
    fn default() -> Self {
        Self { import_timeout: 120 }
    }
}

#[derive(Debug)]
pub struct BuildImportsRule {
    config: BuildImportsConfig,
}

impl BuildImportsRule {
    pub fn from_config(config: &RuleConfig) -> Result<Self, RuleExecutionError> {
        Ok(Self {
            config: parse_config(config)?,
        })
    }
}

/// `src/app/main.py` → `src.app.main`. `None` if the path is not a module path.
pub fn entry_point_module(entry_point: &str) -> Option<String> {
    let trimmed = entry_point.trim().trim_start_matches("./");
    let without_ext = trimmed.strip_suffix(".py").unwrap_or(trimmed);
    let module = without_ext.replace(['/', '\\'], ".");
    let valid = !module.is_empty()
        && module.split('.').all(|part| {
            let mut chars = part.chars();
            matches!(chars.next(), Some(c) if c == '_' || c.is_alphabetic())
                && chars.all(|c| c == '_' || c.is_alphanumeric())
        });
    valid.then_some(module)
}

static COMPILE_ERROR_LOCATION: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r#"File "([^"]+)", line (\d+)"#).ok());

/// Locations reported by `compileall`, plus the error line that follows each.
fn compile_findings(output: &str) -> Vec<Finding> {
    let Some(location) = COMPILE_ERROR_LOCATION.as_ref() else {
        return Vec::new();
    };
    let lines: Vec<&str> = output.lines().collect();
    let mut findings = Vec::new();
    for (i, line) in lines.iter().enumerate() {
        let Some(caps) = location.captures(line) else {
            continue;
        };
        let line_no = caps[2].parse().unwrap_or(0);
        let message = lines[i + 1..]
            .iter()
            .take_while(|l| !location.is_match(l))
            .find(|l| l.contains("Error:"))
            .map(|l| l.trim().to_string());
        let mut finding = Finding::new("syntax_error").at(relative_to_workspace(&caps[1]), line_no);
        if let Some(message) = message {
            finding = finding.message(message);
        }
        findings.push(finding);
    }
    findings
}

/// Final exception line of a Python traceback.
fn exception_summary(stderr: &str) -> Option<String> {
    stderr
        .lines()
        .rev()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .map(str::to_string)
}

#[async_trait]
impl Rule for BuildImportsRule {
    async fn execute(&self, ctx: &ExecutionContext) -> Result<Verdict, RuleExecutionError> {
        let timeout = Duration::from_secs(self.config.import_timeout);
        let pycache = format!("{SCRATCH_DIR}/codegate-pycache");
        let env = [("PYTHONPYCACHEPREFIX", pycache.as_str())];

        let compile = ctx
            .run_in_container(
                &["python", "-m", "compileall", "-q", "-x", COMPILE_EXCLUDE, WORKSPACE_MOUNT],
                &env,
                timeout,
            )
            .await?;
        if missing_executable(&compile) {
            return Err(RuleExecutionError::ToolUnavailable {
                tool: "python".to_string(),
            });
        }
        if !compile.success() {
            let findings = compile_findings(&compile.combined());
            let message = match findings.len() {
                0 => "Compilation failed".to_string(),
                n => format!("Compilation failed: {n} file(s) with syntax errors"),
            };
            let evidence = Evidence::new()
                .with_detail("phase", "compile")
                .with_findings(findings);
            return Ok(Verdict::fail(message).with_evidence(with_raw_output(evidence, &compile, ctx.verbose)));
        }

        let Some(entry_point) = ctx.entry_point.as_deref() else {
            return Ok(Verdict::pass("All files compile; no entry point declared")
                .with_evidence(Evidence::new().with_detail("phase", "compile")));
        };
        let Some(module) = entry_point_module(entry_point) else {
            return Ok(Verdict::fail(format!(
                "Entry point '{entry_point}' is not an importable module path"
            )));
        };

        let pythonpath = WORKSPACE_MOUNT;
        let import = ctx
            .run_in_container(
                &["python", "-c", IMPORT_PROBE, module.as_str()],
                &[("PYTHONPYCACHEPREFIX", pycache.as_str()), ("PYTHONPATH", pythonpath)],
                timeout,
            )
            .await?;

        let evidence = Evidence::new()
            .with_detail("phase", "import")
            .with_detail("module", module.as_str());
        if import.success() && import.stdout.contains(IMPORT_SENTINEL) {
            return Ok(Verdict::pass(format!(
                "All files compile and entry point '{module}' imports"
            ))
            .with_evidence(evidence));
        }

        let reason = exception_summary(&import.stderr)
            .unwrap_or_else(|| tail(&import.stdout, 1));
        let mut evidence = with_raw_output(evidence, &import, ctx.verbose);
        if !ctx.verbose {
            evidence = evidence.with_detail("traceback", tail(&import.stderr, TAIL_LINES));
        }
        Ok(Verdict::fail(format!("Failed to import '{module}': {reason}")).with_evidence(evidence))
    }
}
