//! Helpers for reading tool output captured from containers.

use codegate_core::{Evidence, WORKSPACE_MOUNT};
use serde_json::Value;

use crate::executor::ExecOutput;

/// Lines of raw output kept in evidence outside verbose mode.
pub const TAIL_LINES: usize = 40;

/// Last `max_lines` lines of `text`.
pub fn tail(text: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = text.trim_end().lines().collect();
    let start = lines.len().saturating_sub(max_lines);
    lines[start..].join("\n")
}

/// True if python reported `module` as not installed.
pub fn missing_python_module(output: &ExecOutput, module: &str) -> bool {
    let combined = output.combined();
    combined.contains(&format!("No module named {module}"))
        || combined.contains(&format!("No module named '{module}'"))
}

/// True if the container could not find the command's executable.
pub fn missing_executable(output: &ExecOutput) -> bool {
    output.exit_code == 127
        || output.stderr.contains("executable file not found")
        || output.stderr.contains("no such file or directory: unknown")
}

/// Project-relative form of an in-container path.
pub fn relative_to_workspace(path: &str) -> String {
    path.strip_prefix(&format!("{WORKSPACE_MOUNT}/"))
        .unwrap_or(path)
        .to_string()
}

/// First JSON document in `text` that starts at the beginning of a line.
///
/// Scanners print banners or log lines ahead of their report; those are skipped.
pub fn json_payload(text: &str) -> Result<Value, String> {
    let mut last_error = "no JSON document in output".to_string();
    let starts = std::iter::once(0).chain(text.match_indices('\n').map(|(i, _)| i + 1));
    for start in starts {
        let rest = text[start..].trim_start_matches([' ', '\t']);
        if !rest.starts_with(['{', '[']) {
            continue;
        }
        match serde_json::from_str::<Value>(rest.trim_end()) {
            Ok(value) => return Ok(value),
            Err(e) => last_error = e.to_string(),
        }
    }
    Err(last_error)
}

/// Attach raw stdout/stderr, tailed unless `verbose`.
pub fn with_raw_output(evidence: Evidence, output: &ExecOutput, verbose: bool) -> Evidence {
    let (stdout, stderr) = if verbose {
        (output.stdout.clone(), output.stderr.clone())
    } else {
        (tail(&output.stdout, TAIL_LINES), tail(&output.stderr, TAIL_LINES))
    };
    let mut evidence = evidence.with_detail("exit_code", output.exit_code);
    if !stdout.is_empty() {
        evidence = evidence.with_detail("stdout", stdout);
    }
    if !stderr.is_empty() {
        evidence = evidence.with_detail("stderr", stderr);
    }
    evidence
}

#[cfg(test)]
mod tests {
    use super::*;

    fn out(stderr: &str, exit_code: i32) -> ExecOutput {
        ExecOutput {
            stderr: stderr.to_string(),
            exit_code,
            ..Default::default()
        }
    }

    #[test]
    fn test_tail() {
        assert_eq!(tail("a\nb\nc\n", 2), "b\nc");
        assert_eq!(tail("a", 5), "a");
        assert_eq!(tail("", 5), "");
    }

    #[test]
    fn test_missing_module_detection() {
        assert!(missing_python_module(
            &out("/usr/local/bin/python: No module named bandit", 1),
            "bandit"
        ));
        assert!(missing_python_module(
            &out("ModuleNotFoundError: No module named 'pytest_cov'", 1),
            "pytest_cov"
        ));
        assert!(!missing_python_module(&out("No module named bandit", 1), "pytest"));
    }

    #[test]
    fn test_missing_executable() {
        assert!(missing_executable(&out("", 127)));
        assert!(missing_executable(&out(
            "exec: \"python\": executable file not found in $PATH",
            126
        )));
        assert!(!missing_executable(&out("", 1)));
    }

    #[test]
    fn test_relative_to_workspace() {
        assert_eq!(relative_to_workspace("/workspace/app/main.py"), "app/main.py");
        assert_eq!(relative_to_workspace("app/main.py"), "app/main.py");
    }

    #[test]
    fn test_json_payload_skips_banners() {
        let text = "[main] INFO running\n+==+ deprecated +==+\n{\"results\": []}\n";
        assert_eq!(json_payload(text).unwrap()["results"], serde_json::json!([]));
        assert_eq!(json_payload("[1, 2]").unwrap(), serde_json::json!([1, 2]));
        assert!(json_payload("Traceback (most recent call last):").is_err());
        assert!(json_payload("{ truncated").is_err());
    }

    #[test]
    fn test_raw_output_is_tailed() {
        let stdout: String = (0..100).map(|i| format!("{i}\n")).collect();
        let output = ExecOutput {
            stdout,
            exit_code: 1,
            ..Default::default()
        };
        let evidence = with_raw_output(Evidence::new(), &output, false);
        assert_eq!(
            evidence.details["stdout"].as_str().unwrap().lines().count(),
            TAIL_LINES
        );
        assert!(evidence.details.get("stderr").is_none());
        assert_eq!(evidence.details["exit_code"], 1);
    }
}
