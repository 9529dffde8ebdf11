//! `policy`: forbidden modules, packages and API calls, found by static analysis.
//!
//! Runs on the host against the project tree; no container is involved.

pub mod distributions;
pub mod scanner;

pub use scanner::{PolicyScanner, ScanReport, Violation, ViolationKind};

use async_trait::async_trait;
use serde::Deserialize;

use codegate_core::{Evidence, FieldKind, FieldSpec, Finding, RuleConfig, Verdict};

use super::{parse_config, Rule, RuleExecutionError};
use crate::context::ExecutionContext;

pub const FIELDS: &[FieldSpec] = &[
    FieldSpec::new("forbidden_modules", FieldKind::StringList),
    FieldSpec::new("forbidden_packages", FieldKind::StringList),
    FieldSpec::new("forbidden_apis", FieldKind::StringList),
    FieldSpec::new("allow_dynamic_imports", FieldKind::Bool),
];

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PolicyConfig {
    pub forbidden_modules: Vec<String>,
    pub forbidden_packages: Vec<String>,
    pub forbidden_apis: Vec<String>,
    pub allow_dynamic_imports: bool,
}

#[derive(Debug)]
pub struct PolicyRule {
    config: PolicyConfig,
    scanner: PolicyScanner,
}

impl PolicyRule {
    pub fn new(config: PolicyConfig) -> Self {
        let scanner = PolicyScanner::new(&config);
        Self { config, scanner }
    }

    pub fn from_config(config: &RuleConfig) -> Result<Self, RuleExecutionError> {
        Ok(Self::new(parse_config(config)?))
    }
}

impl Violation {
    pub fn to_finding(&self) -> Finding {
        let mut finding = Finding::new(self.kind.as_str())
            .at(self.file.as_str(), self.line)
            .excerpt(self.excerpt.as_str())
            .message(self.message.as_str());
        if let Some(symbol) = &self.symbol {
            finding = finding.symbol(symbol.as_str());
        }
        finding
    }
}

#[async_trait]
impl Rule for PolicyRule {
    async fn execute(&self, ctx: &ExecutionContext) -> Result<Verdict, RuleExecutionError> {
        let scanner = self.scanner.clone();
        let root = ctx.project_path.clone();
        let report = tokio::task::spawn_blocking(move || scanner.scan_tree(&root))
            .await
            .map_err(|e| std::io::Error::other(format!("policy scan aborted: {e}")))??;

        let evidence = Evidence::new()
            .with_detail("files_checked", report.files_checked)
            .with_detail("forbidden_modules", self.config.forbidden_modules.clone())
            .with_detail("forbidden_packages", self.config.forbidden_packages.clone())
            .with_detail("forbidden_apis", self.config.forbidden_apis.clone())
            .with_detail("allow_dynamic_imports", self.config.allow_dynamic_imports)
            .with_findings(report.violations.iter().map(Violation::to_finding).collect());

        let verdict = if report.violations.is_empty() {
            Verdict::pass(format!(
                "No policy violations found ({} files checked)",
                report.files_checked
            ))
        } else {
            Verdict::fail(format!("Found {} policy violation(s)", report.violations.len()))
        };
        Ok(verdict.with_evidence(evidence))
    }
}
