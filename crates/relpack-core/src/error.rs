//! Error taxonomy shared by every stage.

use std::path::PathBuf;

use relpack_schema::{ArtifactError, ArtifactKind};
use thiserror::Error;

/// Everything that can go wrong while packaging or publishing.
///
/// Configuration problems are raised before any fan-out starts. Every other
/// variant is reported per unit of work and collected by
/// [`TaskGroup`](crate::group::TaskGroup) into [`PipelineError::Aggregate`].
#[derive(Error, Debug)]
pub enum PipelineError {
    /// `PACKAGER_PUBKEY` and/or `PACKAGER_PRIVKEY` are unset or empty.
    #[error("environment variables PACKAGER_PUBKEY and PACKAGER_PRIVKEY need to be set")]
    MissingSigningKeys,

    /// A configuration value is missing or invalid.
    #[error("configuration error: {0}")]
    Config(String),

    /// A configured artifact kind name is not in the publish vocabulary.
    #[error("unknown artifact type: {0}")]
    UnknownArtifactType(String),

    /// A template could not be resolved against the release context.
    #[error("failed to apply template {template:?}: {reason}")]
    Template {
        /// The offending template string.
        template: String,
        /// Why resolution failed.
        reason: String,
    },

    /// An external tool could not be started or exited unsuccessfully.
    #[error("{tool} failed (exit code {}):\n{output}", .exit_code.map_or_else(|| "none".to_string(), |c| c.to_string()))]
    ExternalTool {
        /// Program name.
        tool: String,
        /// Exit code, `None` when the process was killed or never started.
        exit_code: Option<i32>,
        /// Combined stdout and stderr, verbatim.
        output: String,
    },

    /// A local create/copy/chmod/open failed.
    #[error("{action} {}: {source}", .path.display())]
    Filesystem {
        /// What was being attempted (e.g. "copy binary to").
        action: &'static str,
        /// The path involved.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The object store rejected or failed an upload.
    #[error("failed to upload {key}: {message}")]
    Storage {
        /// Object key of the failed upload.
        key: String,
        /// Error reported by the store client.
        message: String,
    },

    /// The registry already holds an artifact with this identity.
    #[error("artifact {kind} {name} ({arch}) is already registered")]
    DuplicateArtifact {
        /// Kind of the rejected artifact.
        kind: ArtifactKind,
        /// Name of the rejected artifact.
        name: String,
        /// Canonical architecture of the rejected artifact.
        arch: String,
    },

    /// A unit of work panicked.
    #[error("task panicked: {0}")]
    Panicked(String),

    /// The governing context was cancelled before the unit finished.
    #[error("cancelled")]
    Cancelled,

    /// A labelled failure, used to attribute unit errors to their target.
    #[error("{label}: {source}")]
    Unit {
        /// What the unit was working on (e.g. "alpine app (x86_64)").
        label: String,
        /// The unit's error.
        #[source]
        source: Box<PipelineError>,
    },

    /// Several units failed; every failure is listed.
    #[error("{} task(s) failed:{}", .0.len(), format_failures(.0))]
    Aggregate(Vec<PipelineError>),
}

fn format_failures(errors: &[PipelineError]) -> String {
    errors.iter().map(|e| format!("\n  - {e}")).collect()
}

impl PipelineError {
    /// Attach a label to an error produced by one unit of work.
    pub fn unit(label: impl Into<String>, source: PipelineError) -> Self {
        Self::Unit {
            label: label.into(),
            source: Box::new(source),
        }
    }

    /// Build a [`PipelineError::Filesystem`] from an I/O error.
    pub fn fs(action: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Filesystem {
            action,
            path: path.into(),
            source,
        }
    }

    /// Returns `true` for errors that must stop a stage before any work starts.
    pub fn is_fatal_config(&self) -> bool {
        matches!(
            self,
            Self::MissingSigningKeys | Self::Config(_) | Self::UnknownArtifactType(_)
        )
    }

    /// Flatten nested aggregates into a list of leaf failures.
    pub fn into_failures(self) -> Vec<PipelineError> {
        match self {
            Self::Aggregate(errors) => errors.into_iter().flat_map(Self::into_failures).collect(),
            other => vec![other],
        }
    }
}

impl From<ArtifactError> for PipelineError {
    fn from(err: ArtifactError) -> Self {
        match err {
            ArtifactError::UnknownArtifactType(name) => Self::UnknownArtifactType(name),
        }
    }
}

/// Result alias used throughout the crate.
pub type Result<T, E = PipelineError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_external_tool_message_contains_output() {
        let err = PipelineError::ExternalTool {
            tool: "abuild".to_string(),
            exit_code: Some(2),
            output: "missing APKBUILD".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("abuild failed (exit code 2)"));
        assert!(msg.contains("missing APKBUILD"));
    }

    #[test]
    fn test_aggregate_lists_every_failure() {
        let err = PipelineError::Aggregate(vec![
            PipelineError::Config("a".to_string()),
            PipelineError::Cancelled,
        ]);
        let msg = err.to_string();
        assert!(msg.starts_with("2 task(s) failed:"));
        assert!(msg.contains("configuration error: a"));
        assert!(msg.contains("cancelled"));
    }

    #[test]
    fn test_into_failures_flattens() {
        let err = PipelineError::Aggregate(vec![
            PipelineError::Cancelled,
            PipelineError::Aggregate(vec![PipelineError::Cancelled, PipelineError::Cancelled]),
        ]);
        assert_eq!(err.into_failures().len(), 3);
    }

    #[test]
    fn test_fatal_config() {
        assert!(PipelineError::MissingSigningKeys.is_fatal_config());
        assert!(PipelineError::UnknownArtifactType("deb".into()).is_fatal_config());
        assert!(!PipelineError::Cancelled.is_fatal_config());
    }
}
