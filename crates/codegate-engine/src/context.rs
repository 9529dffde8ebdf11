//! Shared, read-only view of a run handed to every rule.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use codegate_core::Contract;

use crate::executor::{ContainerExecutor, ExecOutput, ExecRequest};
use crate::rules::RuleExecutionError;

/// Built once per run after the environment step; rules only borrow it.
#[derive(Clone)]
pub struct ExecutionContext {
    pub project_path: PathBuf,
    /// Dependency image tag, `None` when no containerized rule is enabled.
    pub deps_image: Option<String>,
    pub network_access: bool,
    pub writable_paths: Vec<String>,
    pub entry_point: Option<String>,
    pub python_dependencies: Vec<String>,
    pub verbose: bool,
    executor: Arc<dyn ContainerExecutor>,
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("project_path", &self.project_path)
            .field("deps_image", &self.deps_image)
            .field("network_access", &self.network_access)
            .field("writable_paths", &self.writable_paths)
            .field("entry_point", &self.entry_point)
            .field("verbose", &self.verbose)
            .finish_non_exhaustive()
    }
}

impl ExecutionContext {
    pub fn new(
        contract: &Contract,
        deps_image: Option<String>,
        executor: Arc<dyn ContainerExecutor>,
        verbose: bool,
    ) -> Self {
        Self {
            project_path: contract.project.path.clone(),
            deps_image,
            network_access: contract.environment.network_access,
            writable_paths: contract.environment.allowed_writing_paths.clone(),
            entry_point: contract.project.entry_point.clone(),
            python_dependencies: contract.python_dependencies(),
            verbose,
            executor,
        }
    }

    pub fn executor(&self) -> &dyn ContainerExecutor {
        self.executor.as_ref()
    }

    /// The dependency image, or an error for a containerized rule that
    /// somehow ran without one.
    pub fn require_image(&self) -> Result<&str, RuleExecutionError> {
        self.deps_image
            .as_deref()
            .ok_or(RuleExecutionError::MissingImage)
    }

    /// Run `command` in the dependency image under this run's isolation policy.
    pub async fn run_in_container(
        &self,
        command: &[&str],
        env: &[(&str, &str)],
        timeout: Duration,
    ) -> Result<ExecOutput, RuleExecutionError> {
        let request = ExecRequest {
            image: self.require_image()?.to_string(),
            command: command.iter().map(|s| s.to_string()).collect(),
            project_path: self.project_path.clone(),
            network_access: self.network_access,
            writable_paths: self.writable_paths.clone(),
            env: env
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            timeout,
        };
        Ok(self.executor.run(&request).await?)
    }
}
