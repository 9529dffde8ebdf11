//! Dependency environments for CodeGate.
//!
//! Containerized rules share one image per run, holding the contract's base
//! runtime plus its system and python packages. Images are content-addressed:
//! the tag is derived from a [`Fingerprint`] of the canonical inputs, so an
//! unchanged environment is never rebuilt while the store keeps it.

pub mod builder;
pub mod dockerfile;
pub mod error;
pub mod fakes;
pub mod fingerprint;
pub mod store;

pub use builder::{EnvironmentBuilder, ResolvedImage};
pub use dockerfile::render_dockerfile;
pub use error::EnvError;
pub use fakes::MemoryImageStore;
pub use fingerprint::{EnvironmentInputs, Fingerprint, IMAGE_REPOSITORY};
pub use store::{condense_build_error, BuildRequest, DockerImageStore, ImageStore};

/// Result type for environment operations.
pub type Result<T> = std::result::Result<T, EnvError>;
