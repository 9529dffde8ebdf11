use async_trait::async_trait;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::{debug, warn};
use uuid::Uuid;

use codegate_core::WORKSPACE_MOUNT;

use super::{ContainerExecutor, ExecError, ExecOutput, ExecRequest, SCRATCH_DIR};
use crate::config::{EngineConfig, ResourceLimits};

/// `docker run` exits 125 when the daemon itself could not start the container.
const DOCKER_RUN_FAILURE: i32 = 125;

const KILL_TIMEOUT: Duration = Duration::from_secs(30);

/// Arguments for `docker run`, excluding the binary.
///
/// The project is mounted read-only, the root filesystem is read-only, and
/// scratch space is tmpfs only.
pub fn docker_run_args(name: &str, request: &ExecRequest, limits: &ResourceLimits) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "run".into(),
        "--rm".into(),
        "--name".into(),
        name.into(),
    ];

    if !request.network_access {
        args.push("--network=none".into());
    }

    args.push("--read-only".into());
    args.push("--tmpfs".into());
    args.push(format!("{SCRATCH_DIR}:rw,exec,nosuid,size=512m"));
    let mut mounted = vec![SCRATCH_DIR.trim_end_matches('/').to_string()];
    for path in &request.writable_paths {
        let path = path.trim_end_matches('/').to_string();
        if mounted.contains(&path) {
            continue;
        }
        args.push("--tmpfs".into());
        args.push(format!("{path}:rw,exec,nosuid"));
        mounted.push(path);
    }

    args.push("-v".into());
    args.push(format!(
        "{}:{WORKSPACE_MOUNT}:ro",
        request.project_path.display()
    ));
    args.push("-w".into());
    args.push(WORKSPACE_MOUNT.into());

    args.push(format!("--cpus={}", limits.cpus));
    args.push(format!("--memory={}", limits.memory));
    args.push(format!("--memory-swap={}", limits.memory));
    args.push(format!("--pids-limit={}", limits.pids_limit));
    args.push("--security-opt=no-new-privileges".into());

    args.push("-e".into());
    args.push(format!("HOME={SCRATCH_DIR}"));
    args.push("-e".into());
    args.push("PYTHONDONTWRITEBYTECODE=1".into());
    for (key, value) in &request.env {
        args.push("-e".into());
        args.push(format!("{key}={value}"));
    }

    args.push(request.image.clone());
    args.extend(request.command.iter().cloned());
    args
}

/// [`ContainerExecutor`] driving the Docker CLI.
#[derive(Debug, Clone)]
pub struct DockerExecutor {
    docker: String,
    limits: ResourceLimits,
}

impl DockerExecutor {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            docker: config.docker.clone(),
            limits: config.limits.clone(),
        }
    }

    /// Best-effort kill of a container whose CLI we already dropped.
    async fn kill(&self, name: &str) {
        let kill = Command::new(&self.docker)
            .args(["kill", name])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();
        match tokio::time::timeout(KILL_TIMEOUT, kill).await {
            Ok(Ok(out)) if out.status.success() => debug!(container = %name, "container killed"),
            Ok(Ok(out)) => debug!(
                container = %name,
                stderr = %String::from_utf8_lossy(&out.stderr).trim(),
                "docker kill reported failure; container likely already gone"
            ),
            Ok(Err(e)) => warn!(container = %name, error = %e, "failed to run docker kill"),
            Err(_) => warn!(container = %name, "docker kill did not finish in time"),
        }
    }
}

#[async_trait]
impl ContainerExecutor for DockerExecutor {
    async fn run(&self, request: &ExecRequest) -> Result<ExecOutput, ExecError> {
        request.validate()?;

        let name = format!("codegate-{}", Uuid::new_v4().simple());
        let args = docker_run_args(&name, request, &self.limits);
        debug!(container = %name, image = %request.image, command = ?request.command, "starting container");

        let start = Instant::now();
        let child = Command::new(&self.docker)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    ExecError::DockerUnavailable(format!("'{}' not found in PATH", self.docker))
                } else {
                    ExecError::Io(e)
                }
            })?;

        let output = match tokio::time::timeout(request.timeout, child.wait_with_output()).await {
            Ok(output) => output?,
            Err(_) => {
                // The CLI died with the dropped future; the container may not have.
                warn!(container = %name, limit_secs = request.timeout.as_secs(), "container timed out");
                self.kill(&name).await;
                return Err(ExecError::Timeout {
                    limit: request.timeout,
                });
            }
        };

        let exit_code = output.status.code().unwrap_or(-1);
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        if exit_code == DOCKER_RUN_FAILURE && stdout.is_empty() {
            return Err(ExecError::Docker(stderr.trim().to_string()));
        }

        let duration = start.elapsed();
        debug!(container = %name, exit_code, duration_ms = duration.as_millis() as u64, "container finished");
        Ok(ExecOutput {
            stdout,
            stderr,
            exit_code,
            duration,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn request(network: bool, writable: &[&str]) -> ExecRequest {
        ExecRequest {
            image: "codegate-deps:0123456789ab".to_string(),
            command: vec!["python".to_string(), "-m".to_string(), "pytest".to_string()],
            project_path: PathBuf::from("/home/me/project"),
            network_access: network,
            writable_paths: writable.iter().map(|s| s.to_string()).collect(),
            env: vec![("COVERAGE_FILE".to_string(), "/tmp/.coverage".to_string())],
            timeout: Duration::from_secs(60),
        }
    }

    fn has_pair(args: &[String], flag: &str, value: &str) -> bool {
        args.windows(2).any(|w| w[0] == flag && w[1] == value)
    }

    #[test]
    fn test_isolation_flags() {
        let args = docker_run_args("codegate-x", &request(false, &[]), &ResourceLimits::default());
        assert_eq!(&args[..4], &["run", "--rm", "--name", "codegate-x"]);
        assert!(args.contains(&"--network=none".to_string()));
        assert!(args.contains(&"--read-only".to_string()));
        assert!(has_pair(&args, "-v", "/home/me/project:/workspace:ro"));
        assert!(has_pair(&args, "-w", "/workspace"));
        assert!(args.contains(&"--security-opt=no-new-privileges".to_string()));
        assert!(args.contains(&"--memory=2g".to_string()));
        assert!(args.contains(&"--memory-swap=2g".to_string()));
        assert!(args.contains(&"--cpus=2".to_string()));
        assert!(args.contains(&"--pids-limit=512".to_string()));
        assert!(has_pair(&args, "-e", "COVERAGE_FILE=/tmp/.coverage"));
    }

    #[test]
    fn test_network_enabled_omits_flag() {
        let args = docker_run_args("codegate-x", &request(true, &[]), &ResourceLimits::default());
        assert!(!args.iter().any(|a| a.starts_with("--network")));
    }

    #[test]
    fn test_image_and_command_come_last() {
        let args = docker_run_args("codegate-x", &request(false, &[]), &ResourceLimits::default());
        let n = args.len();
        assert_eq!(
            &args[n - 4..],
            &["codegate-deps:0123456789ab", "python", "-m", "pytest"]
        );
    }

    #[test]
    fn test_writable_paths_become_tmpfs() {
        let args = docker_run_args(
            "codegate-x",
            &request(false, &["/var/cache/app", "/tmp", "/var/cache/app/"]),
            &ResourceLimits::default(),
        );
        let tmpfs: Vec<&String> = args
            .windows(2)
            .filter(|w| w[0] == "--tmpfs")
            .map(|w| &w[1])
            .collect();
        assert_eq!(tmpfs.len(), 2);
        assert!(tmpfs[0].starts_with("/tmp:"));
        assert_eq!(tmpfs[1], "/var/cache/app:rw,exec,nosuid");
        assert!(!args.iter().any(|a| a.contains(":/workspace:rw")));
    }

    #[tokio::test]
    async fn test_rejects_bad_scratch_before_spawning() {
        let executor = DockerExecutor::new(&EngineConfig::default().with_docker("codegate-no-such-docker"));
        let err = executor
            .run(&request(false, &["/workspace/out"]))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecError::ScratchPath(_)));
    }

    #[tokio::test]
    async fn test_missing_docker_binary() {
        let executor = DockerExecutor::new(&EngineConfig::default().with_docker("codegate-no-such-docker"));
        let err = executor.run(&request(false, &[])).await.unwrap_err();
        assert!(matches!(err, ExecError::DockerUnavailable(_)));
    }
}
