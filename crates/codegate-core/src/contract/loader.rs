use serde_json::Value;
use std::path::Path;
use tracing::debug;

use super::{Contract, RuleSchema};
use crate::error::{ContractError, Result};

/// Load and validate a YAML contract file.
///
/// `project.path` resolves against the directory holding the contract.
pub fn load_contract(path: &Path, schema: &dyn RuleSchema) -> Result<Contract> {
    if !path.is_file() {
        return Err(ContractError::NotFound(path.to_path_buf()));
    }
    let path = std::fs::canonicalize(path)?;
    let text = std::fs::read_to_string(&path)?;
    if text.trim().is_empty() {
        return Err(ContractError::Empty);
    }

    let document: Value = serde_yaml::from_str(&text)?;
    if document.is_null() {
        return Err(ContractError::Empty);
    }

    let base_dir = path.parent();
    let contract = Contract::from_value(&document, schema, base_dir)?;
    debug!(
        contract = %path.display(),
        project = %contract.project.path.display(),
        rules = contract.rules.len(),
        "contract loaded"
    );
    Ok(contract)
}
