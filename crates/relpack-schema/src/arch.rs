//! Architecture naming.
//!
//! Artifacts are tagged with the release's canonical architecture names
//! (`386`, `amd64`, `arm64`, ...). Native toolchains expect their own names,
//! so every translation goes through a fixed table rather than a heuristic.

/// Canonical to `abuild` architecture names.
///
/// Only names that differ are listed; everything else passes through.
pub const APK_ARCH_TABLE: &[(&str, &str)] = &[("386", "x86"), ("amd64", "x86_64")];

/// Translate a canonical architecture name into the name `abuild` expects.
///
/// # Example
///
/// ```
/// use relpack_schema::apk_arch;
///
/// assert_eq!(apk_arch("386"), "x86");
/// assert_eq!(apk_arch("amd64"), "x86_64");
/// assert_eq!(apk_arch("arm64"), "arm64");
/// ```
pub fn apk_arch(canonical: &str) -> &str {
    APK_ARCH_TABLE
        .iter()
        .find(|(from, _)| *from == canonical)
        .map_or(canonical, |(_, to)| to)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_entries() {
        assert_eq!(apk_arch("386"), "x86");
        assert_eq!(apk_arch("amd64"), "x86_64");
    }

    #[test]
    fn test_passthrough() {
        for name in ["arm64", "arm", "ppc64le", "s390x", "x86_64", ""] {
            assert_eq!(apk_arch(name), name);
        }
    }

    #[test]
    fn test_case_sensitive() {
        assert_eq!(apk_arch("AMD64"), "AMD64");
    }
}
