//! CodeGate core: the contract model and the run verdict.
//!
//! This crate knows nothing about containers or individual rules. It defines
//! what a validated [`Contract`] looks like, what rules report
//! ([`Verdict`], [`RuleResult`]), and how those fold into an
//! [`EvaluationResult`].

pub mod aggregate;
pub mod contract;
pub mod error;
pub mod obs;
pub mod reporting;
pub mod result;
pub mod telemetry;

pub use aggregate::Aggregator;
pub use contract::{
    check_fields, load_contract, Contract, EnvironmentSpec, FieldKind, FieldSpec, ProjectSpec,
    RuleConfig, RuleSchema, validate_scratch_path, WORKSPACE_MOUNT,
};
pub use error::{ContractError, FieldError, Result, ValidationError};
pub use reporting::{render_report_json, render_summary_text, write_report_json};
pub use result::{
    EvaluationResult, Evidence, EvidenceMarker, Finding, Outcome, RuleResult, Summary, Verdict,
};
pub use telemetry::init_tracing;
