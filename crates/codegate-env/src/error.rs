//! Error types for codegate-env

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while resolving the dependency image.
///
/// Every variant is fatal to the run that hit it.
#[derive(Error, Debug)]
pub enum EnvError {
    /// Docker CLI missing or daemon not reachable
    #[error("Docker is not available: {0}")]
    DockerUnavailable(String),

    /// `docker build` exited non-zero
    #[error("Docker build of {tag} failed: {reason}")]
    BuildFailed { tag: String, reason: String },

    /// `docker build` ran past its deadline
    #[error("Docker build of {tag} timed out after {limit_secs}s")]
    BuildTimeout { tag: String, limit_secs: u64 },

    /// A fingerprint input could not be read
    #[error("failed to read {}: {source}", path.display())]
    ReadInput {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
