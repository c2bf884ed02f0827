//! Per-run release context shared by every stage.

use std::collections::HashMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::ProjectConfig;
use crate::registry::ArtifactRegistry;

/// Everything a stage needs to know about the current release.
#[derive(Debug, Clone)]
pub struct ReleaseContext {
    /// Parsed project configuration.
    pub config: ProjectConfig,
    /// Version being released, without a leading `v`.
    pub version: String,
    /// Git tag being released.
    pub tag: String,
    /// Environment visible to templates and key lookup.
    pub env: HashMap<String, String>,
    /// Concurrency ceiling for every fan-out.
    pub parallelism: usize,
    /// Skip every publishing stage.
    pub skip_publish: bool,
    /// Artifacts produced so far.
    pub artifacts: Arc<ArtifactRegistry>,
    /// Cancelled when the run should stop.
    pub cancel: CancellationToken,
}

impl ReleaseContext {
    /// Create a context with an empty registry and environment.
    ///
    /// `parallelism` defaults to the number of logical CPUs.
    pub fn new(config: ProjectConfig, version: impl Into<String>) -> Self {
        let version = version.into();
        Self {
            config,
            tag: format!("v{version}"),
            version,
            env: HashMap::new(),
            parallelism: num_cpus::get(),
            skip_publish: false,
            artifacts: Arc::new(ArtifactRegistry::new()),
            cancel: CancellationToken::new(),
        }
    }

    /// Use `env` as the visible environment.
    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = env;
        self
    }

    /// Share an existing registry.
    pub fn with_registry(mut self, artifacts: Arc<ArtifactRegistry>) -> Self {
        self.artifacts = artifacts;
        self
    }

    /// Look up a non-empty environment value.
    pub fn env_var(&self, key: &str) -> Option<&str> {
        self.env.get(key).map(String::as_str).filter(|v| !v.is_empty())
    }
}

/// How a stage finished when it did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    /// The stage ran (possibly with zero matching artifacts).
    Completed,
    /// The stage is not configured or disabled; nothing was attempted.
    Skipped(String),
}

impl StageOutcome {
    /// Returns `true` for [`StageOutcome::Skipped`].
    pub fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let ctx = ReleaseContext::new(ProjectConfig::default(), "1.2.3");
        assert_eq!(ctx.tag, "v1.2.3");
        assert!(ctx.parallelism >= 1);
        assert!(ctx.artifacts.is_empty());
    }

    #[test]
    fn test_env_var_ignores_empty() {
        let env = HashMap::from([
            ("A".to_string(), "1".to_string()),
            ("B".to_string(), String::new()),
        ]);
        let ctx = ReleaseContext::new(ProjectConfig::default(), "1.0.0").with_env(env);
        assert_eq!(ctx.env_var("A"), Some("1"));
        assert_eq!(ctx.env_var("B"), None);
        assert_eq!(ctx.env_var("C"), None);
    }
}
