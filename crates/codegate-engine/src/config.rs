//! Engine tuning knobs.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// CPU, memory and process ceilings applied to every rule container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// Passed to `--cpus`, e.g. `"2"` or `"1.5"`.
    pub cpus: String,
    /// Passed to `--memory` and `--memory-swap`, e.g. `"2g"`.
    pub memory: String,
    pub pids_limit: u32,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            cpus: "2".to_string(),
            memory: "2g".to_string(),
            pids_limit: 512,
        }
    }
}

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Docker CLI binary
    pub docker: String,
    pub limits: ResourceLimits,
    pub build_timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let limits = ResourceLimits::default();
        EngineConfig {
            docker: std::env::var("CODEGATE_DOCKER").unwrap_or_else(|_| "docker".to_string()),
            limits: ResourceLimits {
                cpus: std::env::var("CODEGATE_CPUS").unwrap_or(limits.cpus),
                memory: std::env::var("CODEGATE_MEMORY").unwrap_or(limits.memory),
                pids_limit: std::env::var("CODEGATE_PIDS_LIMIT")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(limits.pids_limit),
            },
            build_timeout_secs: std::env::var("CODEGATE_BUILD_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|secs| *secs > 0)
                .unwrap_or(600),
        }
    }
}

impl EngineConfig {
    /// Create a new config from environment variables
    pub fn from_env() -> Self {
        Self::default()
    }

    pub fn with_docker(mut self, docker: &str) -> Self {
        self.docker = docker.to_string();
        self
    }

    pub fn with_limits(mut self, limits: ResourceLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn build_timeout(&self) -> Duration {
        Duration::from_secs(self.build_timeout_secs)
    }
}
