//! Release configuration parsed from `relpack.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur when loading a configuration file.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// An I/O error occurred while reading the file.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The TOML content could not be deserialized.
    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Top-level project configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Project name, available to templates as `{{ .ProjectName }}`.
    #[serde(default)]
    pub project_name: String,

    /// Output directory for everything the pipeline writes.
    #[serde(default = "default_dist")]
    pub dist: PathBuf,

    /// Alpine repositories to build packages for.
    #[serde(default)]
    pub alpine: Vec<AlpineSpec>,

    /// Object-store destinations to publish to.
    #[serde(default)]
    pub s3: Vec<S3Destination>,
}

/// One Alpine repository/channel to build an `.apk` for.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlpineSpec {
    /// Package name (`pkgname`).
    pub name: String,

    /// Repository root directory.
    #[serde(default = "default_alpine_root")]
    pub root: String,

    /// Alpine branch (e.g. `edge`, `v3.19`).
    #[serde(default = "default_alpine_branch")]
    pub branch: String,

    /// Sub-repository (e.g. `main`, `community`).
    #[serde(default = "default_alpine_repository")]
    pub repository: String,

    /// Release revision (`pkgrel`).
    #[serde(default)]
    pub rel: u32,

    /// Package description (`pkgdesc`).
    #[serde(default)]
    pub description: String,

    /// Project homepage (`url`).
    #[serde(default)]
    pub url: String,

    /// SPDX license identifier.
    #[serde(default)]
    pub license: String,

    /// Maintainer line, omitted when empty.
    #[serde(default)]
    pub maintainer: String,

    /// Contributor line, omitted when empty.
    #[serde(default)]
    pub contributor: String,

    /// Shell snippet run as the package's `check()` phase.
    #[serde(default)]
    pub check: Option<String>,
}

impl AlpineSpec {
    /// Create a spec with defaults for everything but the name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            root: default_alpine_root(),
            branch: default_alpine_branch(),
            repository: default_alpine_repository(),
            rel: 0,
            description: String::new(),
            url: String::new(),
            license: String::new(),
            maintainer: String::new(),
            contributor: String::new(),
            check: None,
        }
    }

    /// The check script, or `None` when unset or blank.
    pub fn check_script(&self) -> Option<&str> {
        self.check.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }

    /// `<root>/<branch>/<repository>/<arch>`.
    pub fn repo_subpath(&self, native_arch: &str) -> String {
        [
            self.root.as_str(),
            self.branch.as_str(),
            self.repository.as_str(),
            native_arch,
        ]
        .iter()
        .map(|part| part.trim_matches('/'))
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("/")
    }
}

/// One S3-compatible publishing destination.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Destination {
    /// Bucket name (templated).
    pub bucket: String,

    /// Key prefix inside the bucket (templated).
    #[serde(default)]
    pub folder: String,

    /// AWS region.
    #[serde(default = "default_region")]
    pub region: String,

    /// Custom endpoint (`MinIO`, R2, ...). Forces path-style addressing.
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Named credentials profile.
    #[serde(default)]
    pub profile: Option<String>,

    /// Canned ACL applied to every object (templated).
    #[serde(default = "default_acl")]
    pub acl: String,

    /// Artifact kinds to upload (`archive`, `binary`, `apk`, ...).
    #[serde(default)]
    pub artifacts: Vec<String>,
}

impl S3Destination {
    /// Create a destination with defaults for everything but the bucket.
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            folder: String::new(),
            region: default_region(),
            endpoint: None,
            profile: None,
            acl: default_acl(),
            artifacts: Vec::new(),
        }
    }
}

fn default_dist() -> PathBuf {
    PathBuf::from("dist")
}

fn default_alpine_root() -> String {
    "alpine".to_string()
}

fn default_alpine_branch() -> String {
    "edge".to_string()
}

fn default_alpine_repository() -> String {
    "main".to_string()
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_acl() -> String {
    "private".to_string()
}

impl ProjectConfig {
    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Load configuration from a file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::parse(&content)
    }
}

impl FromStr for ProjectConfig {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
