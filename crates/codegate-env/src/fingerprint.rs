//! Deterministic identity of a dependency environment.

use codegate_core::Contract;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::path::Path;
use tracing::debug;

use crate::error::EnvError;
use crate::Result;

/// Repository half of every dependency image tag.
pub const IMAGE_REPOSITORY: &str = "codegate-deps";

/// Bumped whenever the encoding or the generated Dockerfile changes shape,
/// so stale images are never reused.
const ENCODING_VERSION: &[u8] = b"codegate-env/v1";

const REQUIREMENTS_FILE: &str = "requirements.txt";

/// SHA-256 over the canonical environment inputs, hex-encoded.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex characters.
    pub fn short(&self) -> &str {
        &self.0[..12]
    }

    /// Local image tag, e.g. `codegate-deps:3f9a0c1b2d4e`.
    pub fn image_tag(&self) -> String {
        format!("{IMAGE_REPOSITORY}:{}", self.short())
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Everything that goes into the dependency image.
///
/// Package lists are canonical: trimmed, sorted and deduplicated, so two
/// contracts that list the same packages in a different order share an image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentInputs {
    pub runtime_image: String,
    pub system_packages: Vec<String>,
    pub python_packages: Vec<String>,
    /// Contents of the project's `requirements.txt`, if it has one.
    pub requirements_file: Option<String>,
}

fn canonical(items: &[String]) -> Vec<String> {
    let mut out: Vec<String> = items
        .iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    out.sort();
    out.dedup();
    out
}

impl EnvironmentInputs {
    pub fn new(
        runtime_image: &str,
        system_packages: &[String],
        python_packages: &[String],
        requirements_file: Option<String>,
    ) -> Self {
        Self {
            runtime_image: runtime_image.trim().to_string(),
            system_packages: canonical(system_packages),
            python_packages: canonical(python_packages),
            requirements_file: requirements_file.map(|s| s.replace("\r\n", "\n")),
        }
    }

    /// Collect inputs from a contract, reading `requirements.txt` from the
    /// project root when present.
    pub fn from_contract(contract: &Contract) -> Result<Self> {
        let requirements = read_requirements(&contract.project.path)?;
        Ok(Self::new(
            &contract.environment.runtime_image,
            &contract.environment.system_dependencies,
            &contract.python_dependencies(),
            requirements,
        ))
    }

    pub fn fingerprint(&self) -> Fingerprint {
        let mut hasher = Sha256::new();
        hasher.update(ENCODING_VERSION);
        hasher.update(b"\0");

        hasher.update(b"image\0");
        hasher.update(self.runtime_image.as_bytes());
        hasher.update(b"\0");

        hasher.update(b"system\0");
        for pkg in &self.system_packages {
            hasher.update(pkg.as_bytes());
            hasher.update(b"\0");
        }

        hasher.update(b"python\0");
        for pkg in &self.python_packages {
            hasher.update(pkg.as_bytes());
            hasher.update(b"\0");
        }

        hasher.update(b"requirements\0");
        if let Some(content) = &self.requirements_file {
            hasher.update(hex::encode(Sha256::digest(content.as_bytes())).as_bytes());
        }
        hasher.update(b"\0");

        let fingerprint = Fingerprint(hex::encode(hasher.finalize()));
        debug!(fingerprint = %fingerprint.short(), image = %self.runtime_image, "computed environment fingerprint");
        fingerprint
    }

    /// Combined pip requirements: the project's file, then the contract's specifiers.
    pub fn requirements(&self) -> String {
        let mut out = String::new();
        if let Some(file) = &self.requirements_file {
            out.push_str(file.trim_end());
            out.push('\n');
        }
        for pkg in &self.python_packages {
            out.push_str(pkg);
            out.push('\n');
        }
        out
    }

    pub fn has_requirements(&self) -> bool {
        !self.requirements().trim().is_empty()
    }
}

fn read_requirements(project: &Path) -> Result<Option<String>> {
    let path = project.join(REQUIREMENTS_FILE);
    if !path.is_file() {
        return Ok(None);
    }
    std::fs::read_to_string(&path)
        .map(Some)
        .map_err(|source| EnvError::ReadInput { path, source })
}
