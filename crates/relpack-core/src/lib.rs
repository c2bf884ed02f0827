//! relpack engine: the artifact registry, bounded fan-out, Alpine packaging
//! and S3 publishing.

pub mod config;
pub mod context;
pub mod error;
pub mod group;
pub mod io;
pub mod registry;
pub mod stages;
pub mod template;

pub use config::{AlpineSpec, ConfigError, ProjectConfig, S3Destination};
pub use context::{ReleaseContext, StageOutcome};
pub use error::{PipelineError, Result};
pub use group::TaskGroup;
pub use registry::{ArtifactRegistry, ArtifactSet};
pub use template::{ReleaseTemplate, TemplateResolver};

/// Manifest file written to the dist directory after a run.
pub const MANIFEST_FILE: &str = "artifacts.json";
