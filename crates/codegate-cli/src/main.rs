//! CodeGate CLI
//!
//! The `codegate` command checks a code artifact against a success contract.
//!
//! ## Commands
//!
//! - `run`: evaluate every enabled rule and emit the JSON report
//! - `validate`: check a contract file without running anything

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{info, Level};

use codegate_core::{load_contract, render_report_json, render_summary_text, write_report_json, ContractError};
use codegate_engine::{EngineConfig, EvaluationRunner, RuleRegistry};

#[derive(Parser)]
#[command(name = "codegate")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Contract-driven evaluation of code artifacts", long_about = None)]
struct Cli {
    /// Debug logging and full raw tool output in evidence
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate a contract; exits 0 only if the overall status is PASS
    Run {
        /// Path to the contract file (YAML)
        contract: PathBuf,

        /// Write the JSON report here and print a summary instead
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Check that a contract file is well formed
    Validate {
        /// Path to the contract file (YAML)
        contract: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    codegate_core::init_tracing(cli.json_logs, level);

    let code = match cli.command {
        Commands::Run { contract, output } => cmd_run(&contract, output.as_deref(), cli.verbose).await?,
        Commands::Validate { contract } => cmd_validate(&contract)?,
    };
    std::process::exit(code);
}

/// Print a contract problem. Returns `Err` for anything that is not the
/// user's contract being wrong.
fn report_contract_error(path: &Path, err: ContractError) -> Result<i32> {
    match err {
        ContractError::Invalid(_) | ContractError::Yaml(_) | ContractError::Empty | ContractError::NotFound(_) => {
            eprintln!("{}: {err}", path.display());
            Ok(1)
        }
        other => Err(other).with_context(|| format!("Failed to read contract {}", path.display())),
    }
}

async fn cmd_run(contract_path: &Path, output: Option<&Path>, verbose: bool) -> Result<i32> {
    let config = EngineConfig::from_env();
    let runner = EvaluationRunner::docker(&config).with_verbose(verbose);

    let contract = match load_contract(contract_path, runner.registry()) {
        Ok(contract) => contract,
        Err(err) => return report_contract_error(contract_path, err),
    };
    info!(
        contract = %contract_path.display(),
        rules = contract.enabled_rule_count(),
        "contract loaded"
    );

    let result = runner.run(&contract).await;

    match output {
        Some(path) => {
            write_report_json(path, &result)?;
            print!("{}", render_summary_text(&result, verbose));
            println!("Report written to {}", path.display());
        }
        None => println!("{}", render_report_json(&result)?),
    }
    Ok(result.exit_code)
}

fn cmd_validate(contract_path: &Path) -> Result<i32> {
    match load_contract(contract_path, &RuleRegistry::builtin()) {
        Ok(contract) => {
            println!(
                "{} is valid ({} rule(s) enabled)",
                contract_path.display(),
                contract.enabled_rule_count()
            );
            Ok(0)
        }
        Err(err) => report_contract_error(contract_path, err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    fn write(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, body).unwrap();
        path
    }

    const POLICY_CONTRACT: &str = r#"
Environment:
  runtime_image: python:3.12-slim
project:
  path: ./app
rules:
  policy:
    forbidden_modules: [subprocess]
"#;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_arguments_parse() {
        let cli = Cli::try_parse_from(["codegate", "run", "c.yaml", "--output", "r.json", "--verbose"]).unwrap();
        assert!(cli.verbose);
        assert!(matches!(cli.command, Commands::Run { output: Some(_), .. }));
    }

    #[test]
    fn test_validate_accepts_good_and_rejects_bad_contracts() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "app/main.py", "x = 1\n");
        let good = write(dir.path(), "good.yaml", POLICY_CONTRACT);
        assert_eq!(cmd_validate(&good).unwrap(), 0);

        let bad = write(
            dir.path(),
            "bad.yaml",
            "Environment: {}\nproject:\n  path: ./missing\nrules:\n  lint: {}\n",
        );
        assert_eq!(cmd_validate(&bad).unwrap(), 1);
        assert_eq!(cmd_validate(&dir.path().join("absent.yaml")).unwrap(), 1);
    }

    #[tokio::test]
    async fn test_policy_run_writes_report_and_fails() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "app/main.py", "import subprocess\n");
        let contract = write(dir.path(), "contract.yaml", POLICY_CONTRACT);
        let report = dir.path().join("out/report.json");
        std::fs::create_dir_all(report.parent().unwrap()).unwrap();

        let code = cmd_run(&contract, Some(&report), false).await.unwrap();

        assert_eq!(code, 1);
        let json: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&report).unwrap()).unwrap();
        assert_eq!(json["overall"], "FAIL");
        assert_eq!(json["results"][0]["rule"], "policy");
    }
}
