//! CodeGate engine: runs a validated contract's rules and aggregates the verdict.
//!
//! - [`executor`]: sandboxed container execution behind [`ContainerExecutor`]
//! - [`rules`]: the [`Rule`] trait, the [`RuleRegistry`] and the built-in rules
//! - [`runner`]: [`EvaluationRunner`], the per-run dispatcher

pub mod config;
pub mod context;
pub mod executor;
pub mod rules;
pub mod runner;

pub use config::{EngineConfig, ResourceLimits};
pub use context::ExecutionContext;
pub use executor::{ContainerExecutor, DockerExecutor, ExecError, ExecOutput, ExecRequest};
pub use rules::policy::{PolicyConfig, PolicyScanner, ScanReport, Violation, ViolationKind};
pub use rules::{Capability, Rule, RuleExecutionError, RuleRegistry};
pub use runner::{EvaluationRunner, ENVIRONMENT_RESULT};
