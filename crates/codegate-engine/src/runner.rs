//! Evaluation runner: one contract in, one [`EvaluationResult`] out.
//!
//! Rules run one at a time in contract order. The dependency image is
//! resolved up front, and only when some enabled rule needs a container; a
//! failure there ends the run with a single `environment` ERROR. Anything a
//! rule does wrong after that (returned error or panic) is confined to its
//! own result.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use tracing::{warn, Instrument};
use uuid::Uuid;

use codegate_core::obs;
use codegate_core::{Aggregator, Contract, EvaluationResult, Evidence, EvidenceMarker, RuleResult, Verdict};
use codegate_env::{DockerImageStore, EnvError, EnvironmentBuilder, EnvironmentInputs, ResolvedImage};

use crate::config::EngineConfig;
use crate::context::ExecutionContext;
use crate::executor::{ContainerExecutor, DockerExecutor};
use crate::rules::{Capability, Rule, RuleExecutionError, RuleRegistry};

/// Name of the synthetic result reported when the dependency image cannot be built.
pub const ENVIRONMENT_RESULT: &str = "environment";

struct PlannedRule {
    name: String,
    rule: Result<Box<dyn Rule>, RuleExecutionError>,
}

pub struct EvaluationRunner {
    registry: Arc<RuleRegistry>,
    executor: Arc<dyn ContainerExecutor>,
    environment: Arc<EnvironmentBuilder>,
    verbose: bool,
}

impl EvaluationRunner {
    pub fn new(
        registry: Arc<RuleRegistry>,
        executor: Arc<dyn ContainerExecutor>,
        environment: Arc<EnvironmentBuilder>,
    ) -> Self {
        Self {
            registry,
            executor,
            environment,
            verbose: false,
        }
    }

    /// Built-in rules, Docker executor and Docker image store.
    pub fn docker(config: &EngineConfig) -> Self {
        let store = DockerImageStore::new(config.docker.clone(), config.build_timeout());
        Self::new(
            Arc::new(RuleRegistry::builtin()),
            Arc::new(DockerExecutor::new(config)),
            Arc::new(EnvironmentBuilder::new(Arc::new(store))),
        )
    }

    /// Keep full raw tool output in evidence.
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn registry(&self) -> &RuleRegistry {
        &self.registry
    }

    /// Evaluate `contract`. Always produces a result; faults become ERROR entries.
    pub async fn run(&self, contract: &Contract) -> EvaluationResult {
        let run_id = Uuid::new_v4().to_string();
        let project = contract.project.path.display().to_string();
        self.evaluate(contract, &run_id)
            .instrument(obs::run_span(&run_id, &project))
            .await
    }

    async fn evaluate(&self, contract: &Contract, run_id: &str) -> EvaluationResult {
        let started = Instant::now();

        // Construct every rule first: whether an image is needed depends on them.
        let mut needs_image = false;
        let plan: Vec<PlannedRule> = contract
            .enabled_rules()
            .map(|(name, config)| {
                needs_image |= self.registry.capability(name) == Some(Capability::Containerized);
                let rule = self.registry.construct(name, config);
                if let Err(err) = &rule {
                    warn!(rule = %name, error = %err, "rule could not be constructed");
                }
                PlannedRule {
                    name: name.to_string(),
                    rule,
                }
            })
            .collect();
        obs::emit_run_started(run_id, plan.len());

        let deps_image = if needs_image {
            match self.prepare_environment(contract).await {
                Ok(image) => Some(image.tag),
                Err(err) => {
                    obs::emit_environment_failed(&err);
                    return self.finish(run_id, vec![environment_failure(&err, started.elapsed())], started);
                }
            }
        } else {
            None
        };

        let ctx = ExecutionContext::new(contract, deps_image, Arc::clone(&self.executor), self.verbose);
        let mut results = Vec::with_capacity(plan.len());
        for planned in plan {
            obs::emit_rule_started(&planned.name);
            let rule_started = Instant::now();
            let verdict = match planned.rule {
                Ok(rule) => self.execute_rule(&planned.name, rule.as_ref(), &ctx).await,
                Err(err) => err.into_verdict(self.verbose),
            };
            let duration = rule_started.elapsed();
            obs::emit_rule_finished(&planned.name, verdict.outcome, duration);
            results.push(RuleResult::from_verdict(planned.name, verdict, duration));
        }

        self.finish(run_id, results, started)
    }

    async fn prepare_environment(&self, contract: &Contract) -> Result<ResolvedImage, EnvError> {
        let inputs = EnvironmentInputs::from_contract(contract)?;
        let image = self.environment.ensure(&inputs).await?;
        obs::emit_environment_ready(image.fingerprint.as_str(), &image.tag, image.reused);
        Ok(image)
    }

    async fn execute_rule(&self, name: &str, rule: &dyn Rule, ctx: &ExecutionContext) -> Verdict {
        match AssertUnwindSafe(rule.execute(ctx)).catch_unwind().await {
            Ok(Ok(verdict)) => verdict,
            Ok(Err(err)) => {
                if let RuleExecutionError::ToolUnavailable { tool } = &err {
                    obs::emit_rule_skipped_tool(name, tool);
                }
                err.into_verdict(self.verbose)
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                warn!(rule = %name, panic = %message, "rule panicked");
                Verdict::error(format!("Rule panicked: {message}"))
                    .with_evidence(Evidence::marked(EvidenceMarker::RuleFault))
            }
        }
    }

    fn finish(&self, run_id: &str, results: Vec<RuleResult>, started: Instant) -> EvaluationResult {
        let result = Aggregator::finalize(results, started.elapsed());
        obs::emit_run_finished(run_id, &result);
        result
    }
}

fn environment_failure(err: &EnvError, duration: Duration) -> RuleResult {
    let verdict = Verdict::error(format!("Dependency environment could not be prepared: {err}"))
        .with_evidence(
            Evidence::marked(EvidenceMarker::EnvironmentBuildFailed).with_detail("error", err.to_string()),
        );
    RuleResult::from_verdict(ENVIRONMENT_RESULT, verdict, duration)
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
        let payload: Box<dyn Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic payload");
    }

    #[test]
    fn test_environment_failure_result() {
        let err = EnvError::BuildFailed {
            tag: "codegate-deps:abc".to_string(),
            reason: "No matching distribution found for nosuchpkg".to_string(),
        };
        let result = environment_failure(&err, Duration::from_millis(5));
        assert_eq!(result.rule, ENVIRONMENT_RESULT);
        assert_eq!(result.outcome, codegate_core::Outcome::Error);
        assert_eq!(result.evidence.marker, Some(EvidenceMarker::EnvironmentBuildFailed));
        assert!(result.message.contains("nosuchpkg"));
    }
}
