//! The artifact record and its kind vocabulary.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Kind of file an [`Artifact`] describes.
///
/// The set is closed: downstream stages select artifacts by kind, and the
/// publish configuration names kinds with the short vocabulary accepted by
/// [`ArtifactKind::from_publish_name`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArtifactKind {
    /// A compiled binary that is not meant to be uploaded on its own.
    Binary,
    /// A compiled binary that is published as-is.
    UploadableBinary,
    /// An archive (`.tar.gz`, `.zip`) bundling binaries and extra files.
    UploadableArchive,
    /// A `.deb`/`.rpm` package produced by the linux packager.
    LinuxPackage,
    /// A checksums file.
    Checksum,
    /// A detached signature.
    Signature,
    /// An Alpine `.apk` package.
    ApkPackage,
    /// A signed `APKINDEX.tar.gz`.
    ApkIndex,
}

/// Errors raised while parsing artifact vocabulary.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ArtifactError {
    /// A configured artifact kind name is not part of the publish vocabulary.
    #[error("unknown artifact type: {0}")]
    UnknownArtifactType(String),
}

impl ArtifactKind {
    /// Short names accepted in publish configuration, paired with their kind.
    pub const PUBLISH_NAMES: &'static [(&'static str, ArtifactKind)] = &[
        ("archive", ArtifactKind::UploadableArchive),
        ("binary", ArtifactKind::UploadableBinary),
        ("nfpm", ArtifactKind::LinuxPackage),
        ("checksum", ArtifactKind::Checksum),
        ("signature", ArtifactKind::Signature),
        ("apk", ArtifactKind::ApkPackage),
        ("apkindex", ArtifactKind::ApkIndex),
    ];

    /// Resolve a publish-configuration name (`archive`, `apk`, ...) to a kind.
    ///
    /// # Errors
    ///
    /// Returns [`ArtifactError::UnknownArtifactType`] for any name outside
    /// [`Self::PUBLISH_NAMES`].
    pub fn from_publish_name(name: &str) -> Result<Self, ArtifactError> {
        Self::PUBLISH_NAMES
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, kind)| *kind)
            .ok_or_else(|| ArtifactError::UnknownArtifactType(name.to_string()))
    }

    /// Stable string representation (matches the serde encoding).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Binary => "binary",
            Self::UploadableBinary => "uploadable-binary",
            Self::UploadableArchive => "uploadable-archive",
            Self::LinuxPackage => "linux-package",
            Self::Checksum => "checksum",
            Self::Signature => "signature",
            Self::ApkPackage => "apk-package",
            Self::ApkIndex => "apk-index",
        }
    }
}

impl std::fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Auxiliary metadata attached to an artifact.
///
/// Stages that need context beyond the core fields match on these variants
/// instead of looking up free-form keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "key", content = "value", rename_all = "snake_case")]
pub enum ArtifactExtra {
    /// Architecture name used by `abuild` for this package.
    ApkArch(String),
    /// Name of the binary the artifact was built from.
    Binary(String),
}

/// One produced file plus its platform tags and destination metadata.
///
/// Once handed to the registry an artifact is never rewritten; readers only
/// ever receive copies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    /// What this file is.
    #[serde(rename = "type")]
    pub kind: ArtifactKind,

    /// Display and file name (e.g. `app_linux_amd64`).
    pub name: String,

    /// Location of the artifact's bytes on the local filesystem.
    pub path: PathBuf,

    /// Target operating system; empty when not platform-specific.
    #[serde(default)]
    pub os: String,

    /// Canonical target architecture; empty when not platform-specific.
    #[serde(default)]
    pub arch: String,

    /// Architecture variant such as an ARM revision; empty when none.
    #[serde(default)]
    pub arch_variant: String,

    /// Logical destination subdirectory used by publishers.
    #[serde(default)]
    pub repo_subpath: String,

    /// Typed auxiliary metadata.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra: Vec<ArtifactExtra>,
}

impl Artifact {
    /// Create an artifact with no platform tags or metadata.
    pub fn new(kind: ArtifactKind, name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            name: name.into(),
            path: path.into(),
            os: String::new(),
            arch: String::new(),
            arch_variant: String::new(),
            repo_subpath: String::new(),
            extra: Vec::new(),
        }
    }

    /// Set the platform tags.
    pub fn with_platform(
        mut self,
        os: impl Into<String>,
        arch: impl Into<String>,
        arch_variant: impl Into<String>,
    ) -> Self {
        self.os = os.into();
        self.arch = arch.into();
        self.arch_variant = arch_variant.into();
        self
    }

    /// Set the repository subpath.
    pub fn with_repo_subpath(mut self, subpath: impl Into<String>) -> Self {
        self.repo_subpath = subpath.into();
        self
    }

    /// Attach one metadata entry.
    pub fn with_extra(mut self, extra: ArtifactExtra) -> Self {
        self.extra.push(extra);
        self
    }

    /// The `abuild` architecture recorded for this artifact, if any.
    pub fn apk_arch(&self) -> Option<&str> {
        self.extra.iter().find_map(|e| match e {
            ArtifactExtra::ApkArch(arch) => Some(arch.as_str()),
            ArtifactExtra::Binary(_) => None,
        })
    }

    /// The binary name recorded for this artifact, if any.
    pub fn binary(&self) -> Option<&str> {
        self.extra.iter().find_map(|e| match e {
            ArtifactExtra::Binary(name) => Some(name.as_str()),
            ArtifactExtra::ApkArch(_) => None,
        })
    }
}
