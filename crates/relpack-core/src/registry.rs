//! Append-only artifact registry.
//!
//! One registry lives for the whole release run and is shared (behind an
//! `Arc`) by every stage. The only mutation is [`ArtifactRegistry::add`];
//! readers receive snapshots, so an append racing with a query is either
//! fully visible to it or not at all.

use std::sync::{Arc, PoisonError, RwLock};

use relpack_schema::{Artifact, Filter};

use crate::error::{PipelineError, Result};

/// Process-wide store of every artifact produced so far.
#[derive(Debug, Default)]
pub struct ArtifactRegistry {
    items: RwLock<Vec<Arc<Artifact>>>,
}

impl ArtifactRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry seeded with `artifacts`, preserving their order.
    pub fn with_artifacts(artifacts: impl IntoIterator<Item = Artifact>) -> Self {
        Self {
            items: RwLock::new(artifacts.into_iter().map(Arc::new).collect()),
        }
    }

    /// Append an artifact.
    pub fn add(&self, artifact: Artifact) {
        let mut items = self.items.write().unwrap_or_else(PoisonError::into_inner);
        items.push(Arc::new(artifact));
    }

    /// Append an artifact unless it clashes with one already registered.
    ///
    /// See [`ArtifactRegistry::add_all_unique`] for what counts as a clash.
    pub fn add_unique(&self, artifact: Artifact) -> Result<()> {
        self.add_all_unique(vec![artifact])
    }

    /// Append every artifact in `batch`, or none of them.
    ///
    /// Two artifacts clash when they share kind, name, architecture and
    /// repository subpath, or when they share kind and local path. The batch
    /// is checked against the registry and against itself under one write
    /// lock before anything is appended.
    pub fn add_all_unique(&self, batch: Vec<Artifact>) -> Result<()> {
        let mut items = self.items.write().unwrap_or_else(PoisonError::into_inner);
        for (i, artifact) in batch.iter().enumerate() {
            let clash = items
                .iter()
                .map(Arc::as_ref)
                .chain(&batch[..i])
                .any(|existing| clashes(existing, artifact));
            if clash {
                return Err(PipelineError::DuplicateArtifact {
                    kind: artifact.kind,
                    name: artifact.name.clone(),
                    arch: artifact.arch.clone(),
                });
            }
        }
        items.extend(batch.into_iter().map(Arc::new));
        Ok(())
    }

    /// Snapshot the artifacts matching `filter`, in registration order.
    pub fn filter(&self, filter: &Filter) -> ArtifactSet {
        let items = self.items.read().unwrap_or_else(PoisonError::into_inner);
        ArtifactSet {
            items: items
                .iter()
                .filter(|a| filter.matches(a))
                .cloned()
                .collect(),
        }
    }

    /// Snapshot every artifact, in registration order.
    pub fn list(&self) -> Vec<Artifact> {
        let items = self.items.read().unwrap_or_else(PoisonError::into_inner);
        items.iter().map(|a| Artifact::clone(a)).collect()
    }

    /// Number of registered artifacts.
    pub fn len(&self) -> usize {
        self.items.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Returns `true` if nothing has been registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn clashes(a: &Artifact, b: &Artifact) -> bool {
    a.kind == b.kind
        && ((a.name == b.name && a.arch == b.arch && a.repo_subpath == b.repo_subpath)
            || (!a.path.as_os_str().is_empty() && a.path == b.path))
}

/// Result of [`ArtifactRegistry::filter`]: an isolated, ordered snapshot.
#[derive(Debug, Clone, Default)]
pub struct ArtifactSet {
    items: Vec<Arc<Artifact>>,
}

impl ArtifactSet {
    /// Narrow the snapshot further.
    pub fn filter(&self, filter: &Filter) -> ArtifactSet {
        ArtifactSet {
            items: self
                .items
                .iter()
                .filter(|a| filter.matches(a))
                .cloned()
                .collect(),
        }
    }

    /// Owned copies of the matching artifacts.
    pub fn list(&self) -> Vec<Artifact> {
        self.items.iter().map(|a| Artifact::clone(a)).collect()
    }

    /// Number of matching artifacts.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns `true` if nothing matched.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
