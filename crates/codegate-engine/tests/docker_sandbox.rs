//! Sandbox guarantees against a live Docker daemon.
//!
//! Run with `cargo test -p codegate-engine --test docker_sandbox -- --ignored`.

use std::path::Path;
use std::time::{Duration, Instant};

use codegate_engine::{ContainerExecutor, DockerExecutor, EngineConfig, ExecError, ExecRequest};

const IMAGE: &str = "python:3.12-slim";

fn request(project: &Path, command: &[&str], network_access: bool, timeout: Duration) -> ExecRequest {
    ExecRequest {
        image: IMAGE.to_string(),
        command: command.iter().map(|s| s.to_string()).collect(),
        project_path: project.to_path_buf(),
        network_access,
        writable_paths: vec!["/var/scratch".to_string()],
        env: vec![],
        timeout,
    }
}

fn executor() -> DockerExecutor {
    DockerExecutor::new(&EngineConfig::from_env())
}

const CONNECT: &str = "import socket; socket.create_connection(('1.1.1.1', 53), timeout=5); print('connected')";

#[tokio::test]
#[ignore = "requires a Docker daemon"]
async fn test_timeout_kills_container() {
    let dir = tempfile::tempdir().unwrap();
    let started = Instant::now();
    let result = executor()
        .run(&request(dir.path(), &["sleep", "10"], false, Duration::from_secs(1)))
        .await;

    assert!(matches!(result, Err(ExecError::Timeout { .. })), "{result:?}");
    assert!(started.elapsed() < Duration::from_secs(10));
}

#[tokio::test]
#[ignore = "requires a Docker daemon"]
async fn test_network_disabled_blocks_outbound() {
    let dir = tempfile::tempdir().unwrap();
    let out = executor()
        .run(&request(dir.path(), &["python", "-c", CONNECT], false, Duration::from_secs(60)))
        .await
        .unwrap();
    assert_ne!(out.exit_code, 0);
    assert!(!out.stdout.contains("connected"));
}

#[tokio::test]
#[ignore = "requires a Docker daemon with outbound network"]
async fn test_network_enabled_allows_outbound() {
    let dir = tempfile::tempdir().unwrap();
    let out = executor()
        .run(&request(dir.path(), &["python", "-c", CONNECT], true, Duration::from_secs(60)))
        .await
        .unwrap();
    assert_eq!(out.exit_code, 0, "{}", out.stderr);
    assert!(out.stdout.contains("connected"));
}

#[tokio::test]
#[ignore = "requires a Docker daemon"]
async fn test_project_is_read_only_and_scratch_is_writable() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("main.py"), "x = 1\n").unwrap();
    let exec = executor();

    let write_project = exec
        .run(&request(dir.path(), &["touch", "/workspace/new.txt"], false, Duration::from_secs(60)))
        .await
        .unwrap();
    assert_ne!(write_project.exit_code, 0);
    assert!(!dir.path().join("new.txt").exists());

    for scratch in ["/tmp/ok.txt", "/var/scratch/ok.txt"] {
        let out = exec
            .run(&request(dir.path(), &["touch", scratch], false, Duration::from_secs(60)))
            .await
            .unwrap();
        assert_eq!(out.exit_code, 0, "{scratch}: {}", out.stderr);
    }
}
