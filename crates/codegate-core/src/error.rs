//! Contract-level error taxonomy.

use std::fmt;
use std::path::PathBuf;

/// A single problem found while validating a contract document.
///
/// `path` is a dotted location inside the document, e.g.
/// `rules.unit_tests.coverage_threshold`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub path: String,
    pub message: String,
}

impl FieldError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// Every problem found in a contract. Never empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub errors: Vec<FieldError>,
}

impl ValidationError {
    pub fn new(errors: Vec<FieldError>) -> Self {
        Self { errors }
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// True if any collected error points at `path` exactly.
    pub fn has_path(&self, path: &str) -> bool {
        self.errors.iter().any(|e| e.path == path)
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "contract is invalid ({} error(s))", self.errors.len())?;
        for err in &self.errors {
            write!(f, "\n  - {err}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

/// Errors produced while loading a contract from disk.
#[derive(Debug, thiserror::Error)]
pub enum ContractError {
    #[error("contract file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("failed to read contract: {0}")]
    Io(#[from] std::io::Error),

    #[error("contract is not valid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("contract file is empty")]
    Empty,

    #[error(transparent)]
    Invalid(#[from] ValidationError),
}

/// Result type for contract operations.
pub type Result<T> = std::result::Result<T, ContractError>;
