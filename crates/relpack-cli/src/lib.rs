//! relpack - release packaging
//!
//! Builds Alpine `.apk` packages from cross-compiled binaries and publishes
//! release artifacts to S3-compatible storage.
//!
//! # Files
//!
//! ```text
//! relpack.toml            # project configuration
//! <dist>/artifacts.json   # artifact manifest, read and rewritten every run
//! <dist>/alpine-<name>/   # per-architecture apk working directories
//! ```

pub mod cmd;

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use relpack_core::{ArtifactRegistry, MANIFEST_FILE, ProjectConfig, ReleaseContext};
use relpack_schema::Artifact;

/// Command line arguments.
#[derive(Debug, Parser)]
#[command(name = "relpack")]
#[command(author, about = "relpack - Alpine packaging and S3 publishing")]
pub struct Cli {
    /// Project configuration file
    #[arg(long, short, default_value = "relpack.toml")]
    pub config: PathBuf,

    /// Artifact manifest produced by the build (JSON array)
    #[arg(long, short)]
    pub artifacts: Option<PathBuf>,

    /// Version being released, without the leading `v`
    #[arg(long, env = "RELPACK_VERSION")]
    pub version: String,

    /// Git tag being released (defaults to `v<version>`)
    #[arg(long)]
    pub tag: Option<String>,

    /// Maximum number of concurrent units (defaults to the CPU count)
    #[arg(long, short = 'p')]
    pub parallelism: Option<usize>,

    /// Skip every publishing stage
    #[arg(long)]
    pub skip_publish: bool,

    #[allow(missing_docs)]
    #[command(subcommand)]
    pub command: Commands,
}

/// Stages to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Subcommand)]
pub enum Commands {
    /// Build and sign Alpine packages
    Package,
    /// Upload artifacts to the configured S3 destinations
    Publish,
    /// Package, then publish
    All,
}

/// Read an artifact manifest.
pub fn read_manifest(path: &Path) -> Result<Vec<Artifact>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read artifact manifest {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse artifact manifest {}", path.display()))
}

/// Write the registry snapshot to `<dist>/artifacts.json` and return the path.
pub fn write_manifest(ctx: &ReleaseContext) -> Result<PathBuf> {
    let dist = &ctx.config.dist;
    std::fs::create_dir_all(dist)
        .with_context(|| format!("Failed to create {}", dist.display()))?;

    let path = dist.join(MANIFEST_FILE);
    let json = serde_json::to_string_pretty(&ctx.artifacts.list())?;
    std::fs::write(&path, json)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(path)
}

impl Cli {
    /// Build the release context: configuration, seeded registry and the
    /// given environment.
    pub fn context(&self, env: HashMap<String, String>) -> Result<ReleaseContext> {
        let config = ProjectConfig::from_file(&self.config)
            .with_context(|| format!("Failed to load {}", self.config.display()))?;

        let artifacts = match &self.artifacts {
            Some(path) => read_manifest(path)?,
            None => Vec::new(),
        };

        let mut ctx = ReleaseContext::new(config, self.version.trim_start_matches('v'))
            .with_env(env)
            .with_registry(ArtifactRegistry::with_artifacts(artifacts).into());
        if let Some(tag) = &self.tag {
            ctx.tag.clone_from(tag);
        }
        if let Some(parallelism) = self.parallelism {
            ctx.parallelism = parallelism.max(1);
        }
        ctx.skip_publish = self.skip_publish;
        Ok(ctx)
    }
}
