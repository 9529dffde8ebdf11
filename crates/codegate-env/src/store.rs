//! Image stores: where dependency images live and how they get built.

use async_trait::async_trait;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::{debug, info};

use crate::dockerfile::REQUIREMENTS_NAME;
use crate::error::EnvError;
use crate::Result;

/// Everything needed to build one dependency image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildRequest {
    pub tag: String,
    pub dockerfile: String,
    pub requirements: String,
}

/// Content-addressed image storage keyed by tag.
#[async_trait]
pub trait ImageStore: Send + Sync {
    /// Whether an image with this tag is already available.
    async fn exists(&self, tag: &str) -> Result<bool>;

    /// Build and tag an image. Must either leave `request.tag` present or fail.
    async fn build(&self, request: &BuildRequest) -> Result<()>;
}

/// [`ImageStore`] backed by the local Docker daemon via the `docker` CLI.
///
/// Images persist in the daemon, so they are reused across runs.
#[derive(Debug, Clone)]
pub struct DockerImageStore {
    docker: String,
    build_timeout: Duration,
}

impl DockerImageStore {
    pub fn new(docker: impl Into<String>, build_timeout: Duration) -> Self {
        Self {
            docker: docker.into(),
            build_timeout,
        }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.docker);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    fn spawn_error(&self, err: std::io::Error) -> EnvError {
        if err.kind() == std::io::ErrorKind::NotFound {
            EnvError::DockerUnavailable(format!("'{}' not found in PATH", self.docker))
        } else {
            EnvError::Io(err)
        }
    }
}

#[async_trait]
impl ImageStore for DockerImageStore {
    async fn exists(&self, tag: &str) -> Result<bool> {
        let output = self
            .command()
            .args(["image", "inspect", "--format", "{{.Id}}", tag])
            .output()
            .await
            .map_err(|e| self.spawn_error(e))?;

        if output.status.success() {
            return Ok(true);
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        if is_daemon_unreachable(&stderr) {
            return Err(EnvError::DockerUnavailable(stderr.trim().to_string()));
        }
        debug!(tag = %tag, "image not present");
        Ok(false)
    }

    async fn build(&self, request: &BuildRequest) -> Result<()> {
        let context = tempfile::tempdir()?;
        let dockerfile = context.path().join("Dockerfile");
        tokio::fs::write(&dockerfile, &request.dockerfile).await?;
        tokio::fs::write(context.path().join(REQUIREMENTS_NAME), &request.requirements).await?;

        info!(tag = %request.tag, "building dependency image");
        let start = Instant::now();
        let child = self
            .command()
            .arg("build")
            .arg("-t")
            .arg(&request.tag)
            .arg("-f")
            .arg(&dockerfile)
            .arg(context.path())
            .spawn()
            .map_err(|e| self.spawn_error(e))?;

        // On timeout the future owning the child is dropped, and kill_on_drop
        // takes the build down with it.
        let output = tokio::time::timeout(self.build_timeout, child.wait_with_output())
            .await
            .map_err(|_| EnvError::BuildTimeout {
                tag: request.tag.clone(),
                limit_secs: self.build_timeout.as_secs(),
            })??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if is_daemon_unreachable(&stderr) {
                return Err(EnvError::DockerUnavailable(stderr.trim().to_string()));
            }
            return Err(EnvError::BuildFailed {
                tag: request.tag.clone(),
                reason: condense_build_error(&stderr),
            });
        }

        info!(
            tag = %request.tag,
            duration_ms = start.elapsed().as_millis() as u64,
            "dependency image built"
        );
        Ok(())
    }
}

fn is_daemon_unreachable(stderr: &str) -> bool {
    stderr.contains("Cannot connect to the Docker daemon")
        || stderr.contains("Is the docker daemon running")
        || stderr.contains("permission denied while trying to connect")
}

/// Pick the most telling line out of `docker build` stderr.
pub fn condense_build_error(stderr: &str) -> String {
    const MARKERS: &[&str] = &["No matching distribution", "Could not find", "ERROR:"];
    for marker in MARKERS {
        if let Some(line) = stderr.lines().find(|line| line.contains(marker)) {
            return line.trim().to_string();
        }
    }
    if let Some(line) = stderr
        .lines()
        .find(|line| line.to_ascii_lowercase().contains("error:"))
    {
        return line.trim().to_string();
    }

    let trimmed = stderr.trim();
    let tail_start = trimmed
        .char_indices()
        .rev()
        .nth(499)
        .map(|(i, _)| i)
        .unwrap_or(0);
    trimmed[tail_start..].to_string()
}
