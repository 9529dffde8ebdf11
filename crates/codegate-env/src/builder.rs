//! Resolves the dependency image for a run: reuse by fingerprint, build on miss.

use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::dockerfile::render_dockerfile;
use crate::fingerprint::{EnvironmentInputs, Fingerprint};
use crate::store::{BuildRequest, ImageStore};
use crate::Result;

/// A dependency image ready for containerized rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedImage {
    pub tag: String,
    pub fingerprint: Fingerprint,
    /// `true` if the image existed before this call.
    pub reused: bool,
}

/// Front door to the image store.
///
/// Remembers what it resolved, so a fingerprint is built at most once per
/// builder even if the store is slow to report the new tag.
pub struct EnvironmentBuilder {
    store: Arc<dyn ImageStore>,
    resolved: Mutex<HashSet<Fingerprint>>,
}

impl EnvironmentBuilder {
    pub fn new(store: Arc<dyn ImageStore>) -> Self {
        Self {
            store,
            resolved: Mutex::new(HashSet::new()),
        }
    }

    /// Return the image for `inputs`, building it if no image with the same
    /// fingerprint exists yet.
    pub async fn ensure(&self, inputs: &EnvironmentInputs) -> Result<ResolvedImage> {
        let fingerprint = inputs.fingerprint();
        let tag = fingerprint.image_tag();

        // Held across the build so concurrent callers wait instead of building twice.
        let mut resolved = self.resolved.lock().await;
        if resolved.contains(&fingerprint) {
            debug!(tag = %tag, "dependency image already resolved in this run");
            return Ok(ResolvedImage {
                tag,
                fingerprint,
                reused: true,
            });
        }

        let reused = self.store.exists(&tag).await?;
        if reused {
            info!(tag = %tag, "reusing cached dependency image");
        } else {
            let request = BuildRequest {
                tag: tag.clone(),
                dockerfile: render_dockerfile(inputs),
                requirements: inputs.requirements(),
            };
            self.store.build(&request).await?;
        }

        resolved.insert(fingerprint.clone());
        Ok(ResolvedImage {
            tag,
            fingerprint,
            reused,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::MemoryImageStore;
    use crate::EnvError;

    fn inputs(python: &[&str]) -> EnvironmentInputs {
        let python: Vec<String> = python.iter().map(|s| s.to_string()).collect();
        EnvironmentInputs::new("python:3.12-slim", &[], &python, None)
    }

    #[tokio::test]
    async fn test_builds_once_then_memoizes() {
        let store = Arc::new(MemoryImageStore::new());
        let builder = EnvironmentBuilder::new(store.clone());

        let first = builder.ensure(&inputs(&["pytest"])).await.unwrap();
        assert!(!first.reused);
        let second = builder.ensure(&inputs(&["pytest"])).await.unwrap();
        assert!(second.reused);
        assert_eq!(first.tag, second.tag);
        assert_eq!(store.build_count(), 1);
    }

    #[tokio::test]
    async fn test_build_request_carries_dockerfile_and_requirements() {
        let store = Arc::new(MemoryImageStore::new());
        let builder = EnvironmentBuilder::new(store.clone());
        let image = builder.ensure(&inputs(&["pytest", "flask"])).await.unwrap();

        let builds = store.builds();
        assert_eq!(builds.len(), 1);
        assert_eq!(builds[0].tag, image.tag);
        assert!(builds[0].dockerfile.starts_with("FROM python:3.12-slim"));
        assert_eq!(builds[0].requirements, "flask\npytest\n");
    }

    #[tokio::test]
    async fn test_build_failure_propagates() {
        let store = Arc::new(MemoryImageStore::failing("No matching distribution found for nope"));
        let builder = EnvironmentBuilder::new(store.clone());
        let err = builder.ensure(&inputs(&["nope"])).await.unwrap_err();
        assert!(matches!(err, EnvError::BuildFailed { .. }));
    }
}
