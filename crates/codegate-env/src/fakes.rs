//! In-memory [`ImageStore`] for tests and dry runs.

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use crate::error::EnvError;
use crate::store::{BuildRequest, ImageStore};
use crate::Result;

// ---------------------------------------------------------------------------
// MemoryImageStore
// ---------------------------------------------------------------------------

/// Image store backed by a `HashSet<tag>` that records every build request.
///
/// Share one instance across runs (behind an `Arc`) to model a persistent
/// daemon cache.
#[derive(Debug, Default)]
pub struct MemoryImageStore {
    images: Mutex<HashSet<String>>,
    builds: Mutex<Vec<BuildRequest>>,
    fail_builds: Option<String>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MemoryImageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store whose every build fails with `reason`.
    pub fn failing(reason: impl Into<String>) -> Self {
        Self {
            fail_builds: Some(reason.into()),
            ..Self::default()
        }
    }

    /// Pretend `tag` was built earlier.
    pub fn with_image(self, tag: impl Into<String>) -> Self {
        lock(&self.images).insert(tag.into());
        self
    }

    pub fn build_count(&self) -> usize {
        lock(&self.builds).len()
    }

    pub fn builds(&self) -> Vec<BuildRequest> {
        lock(&self.builds).clone()
    }

    pub fn contains(&self, tag: &str) -> bool {
        lock(&self.images).contains(tag)
    }
}

#[async_trait]
impl ImageStore for MemoryImageStore {
    async fn exists(&self, tag: &str) -> Result<bool> {
        Ok(self.contains(tag))
    }

    async fn build(&self, request: &BuildRequest) -> Result<()> {
        lock(&self.builds).push(request.clone());
        if let Some(reason) = &self.fail_builds {
            return Err(EnvError::BuildFailed {
                tag: request.tag.clone(),
                reason: reason.clone(),
            });
        }
        lock(&self.images).insert(request.tag.clone());
        Ok(())
    }
}
