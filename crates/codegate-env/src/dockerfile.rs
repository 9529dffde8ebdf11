//! Dockerfile generation for dependency images.

use codegate_core::WORKSPACE_MOUNT;

use crate::fingerprint::EnvironmentInputs;

/// Name of the requirements file inside the build context.
pub const REQUIREMENTS_NAME: &str = "requirements.txt";

/// Render the Dockerfile for `inputs`.
///
/// The output is a pure function of the inputs, which keeps it covered by the
/// fingerprint.
pub fn render_dockerfile(inputs: &EnvironmentInputs) -> String {
    let mut lines = vec![format!("FROM {}", inputs.runtime_image), String::new()];
    lines.push("ENV PIP_NO_CACHE_DIR=1 PIP_DISABLE_PIP_VERSION_CHECK=1 PYTHONDONTWRITEBYTECODE=1".to_string());
    lines.push(String::new());

    if !inputs.system_packages.is_empty() {
        lines.push("RUN apt-get update && apt-get install -y --no-install-recommends \\".to_string());
        for pkg in &inputs.system_packages {
            lines.push(format!("    {pkg} \\"));
        }
        lines.push("    && rm -rf /var/lib/apt/lists/*".to_string());
        lines.push(String::new());
    }

    lines.push("RUN python -m pip install --upgrade pip setuptools wheel".to_string());
    lines.push(String::new());

    if inputs.has_requirements() {
        lines.push(format!("COPY {REQUIREMENTS_NAME} /tmp/{REQUIREMENTS_NAME}"));
        lines.push(format!(
            "RUN python -m pip install --no-input -r /tmp/{REQUIREMENTS_NAME} && rm /tmp/{REQUIREMENTS_NAME}"
        ));
        lines.push(String::new());
    }

    lines.push(format!("WORKDIR {WORKSPACE_MOUNT}"));
    lines.push(String::new());
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_dockerfile() {
        let inputs = EnvironmentInputs::new("python:3.12-slim", &[], &[], None);
        let dockerfile = render_dockerfile(&inputs);
        assert!(dockerfile.starts_with("FROM python:3.12-slim\n"));
        assert!(!dockerfile.contains("apt-get"));
        assert!(!dockerfile.contains("COPY"));
        assert!(dockerfile.contains("WORKDIR /workspace"));
    }

    #[test]
    fn test_full_dockerfile() {
        let inputs = EnvironmentInputs::new(
            "python:3.12-slim",
            &["git".to_string(), "curl".to_string()],
            &["pytest".to_string()],
            None,
        );
        let dockerfile = render_dockerfile(&inputs);
        let curl = dockerfile.find("    curl \\").unwrap();
        let git = dockerfile.find("    git \\").unwrap();
        assert!(curl < git, "system packages are rendered sorted");
        assert!(dockerfile.contains("COPY requirements.txt /tmp/requirements.txt"));
        assert!(dockerfile.contains("pip install --no-input -r /tmp/requirements.txt"));
    }
}
