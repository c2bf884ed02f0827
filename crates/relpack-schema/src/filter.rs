//! Composable artifact predicates.
//!
//! Primitive predicates test one field; [`Filter::And`], [`Filter::Or`] and
//! [`Filter::Not`] combine them. An empty `And` matches everything and an
//! empty `Or` matches nothing.

use crate::artifact::{Artifact, ArtifactKind};

/// A predicate over [`Artifact`]s.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    /// Artifact kind equals the given kind.
    ByType(ArtifactKind),
    /// Target OS equals the given value (empty matches untagged artifacts).
    ByOs(String),
    /// Canonical architecture equals the given value.
    ByArch(String),
    /// Architecture variant equals the given value (empty means "no variant").
    ByArchVariant(String),
    /// Every inner filter matches.
    And(Vec<Filter>),
    /// At least one inner filter matches.
    Or(Vec<Filter>),
    /// The inner filter does not match.
    Not(Box<Filter>),
}

impl Filter {
    /// Match artifacts of `kind`.
    pub fn by_type(kind: ArtifactKind) -> Self {
        Self::ByType(kind)
    }

    /// Match artifacts targeting `os`.
    pub fn by_os(os: impl Into<String>) -> Self {
        Self::ByOs(os.into())
    }

    /// Match artifacts targeting `arch`.
    pub fn by_arch(arch: impl Into<String>) -> Self {
        Self::ByArch(arch.into())
    }

    /// Match artifacts with architecture variant `variant`.
    pub fn by_arch_variant(variant: impl Into<String>) -> Self {
        Self::ByArchVariant(variant.into())
    }

    /// Evaluate the predicate against one artifact.
    pub fn matches(&self, artifact: &Artifact) -> bool {
        match self {
            Self::ByType(kind) => artifact.kind == *kind,
            Self::ByOs(os) => artifact.os == *os,
            Self::ByArch(arch) => artifact.arch == *arch,
            Self::ByArchVariant(variant) => artifact.arch_variant == *variant,
            Self::And(filters) => filters.iter().all(|f| f.matches(artifact)),
            Self::Or(filters) => filters.iter().any(|f| f.matches(artifact)),
            Self::Not(inner) => !inner.matches(artifact),
        }
    }
}

impl std::ops::Not for Filter {
    type Output = Filter;

    fn not(self) -> Filter {
        Filter::Not(Box::new(self))
    }
}
