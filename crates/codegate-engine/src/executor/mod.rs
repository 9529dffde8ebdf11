//! Container execution seam.
//!
//! Rules never talk to Docker directly; they hand an [`ExecRequest`] to a
//! [`ContainerExecutor`]. Production uses [`DockerExecutor`], tests a
//! scripted fake.

mod docker;

pub use docker::{docker_run_args, DockerExecutor};

use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;

use codegate_core::validate_scratch_path;

/// Scratch directory present in every container, never shared.
pub const SCRATCH_DIR: &str = "/tmp";

/// One command to run inside the dependency image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecRequest {
    pub image: String,
    pub command: Vec<String>,
    /// Host directory mounted read-only at the workspace mount.
    pub project_path: PathBuf,
    pub network_access: bool,
    /// Extra in-container scratch mounts.
    pub writable_paths: Vec<String>,
    pub env: Vec<(String, String)>,
    pub timeout: Duration,
}

impl ExecRequest {
    /// Reject requests that would break the isolation guarantees.
    pub fn validate(&self) -> Result<(), ExecError> {
        if self.command.is_empty() {
            return Err(ExecError::EmptyCommand);
        }
        for path in &self.writable_paths {
            validate_scratch_path(path).map_err(ExecError::ScratchPath)?;
        }
        Ok(())
    }
}

/// Captured result of a finished container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub duration: Duration,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// stdout followed by stderr.
    pub fn combined(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else if self.stdout.is_empty() {
            self.stderr.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }
}

/// Errors produced by container execution.
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("command timed out after {}s", limit.as_secs())]
    Timeout { limit: Duration },

    #[error("writable path rejected: {0}")]
    ScratchPath(String),

    #[error("refusing to run an empty command")]
    EmptyCommand,

    #[error("Docker is not available: {0}")]
    DockerUnavailable(String),

    #[error("docker run failed: {0}")]
    Docker(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Runs commands in isolated containers.
#[async_trait]
pub trait ContainerExecutor: Send + Sync {
    async fn run(&self, request: &ExecRequest) -> Result<ExecOutput, ExecError>;
}
