//! `APKBUILD` rendering.

use std::collections::BTreeMap;
use std::fmt::Write;

use crate::config::AlpineSpec;
use crate::error::{PipelineError, Result};

/// Inputs for one `APKBUILD` file.
#[derive(Debug)]
pub struct ApkBuild<'a> {
    /// Package metadata.
    pub spec: &'a AlpineSpec,
    /// Release version (`pkgver`).
    pub version: &'a str,
    /// Binary name to source path inside the build directory.
    ///
    /// Ordered so the rendered file is stable.
    pub binaries: BTreeMap<String, String>,
}

/// Escape a value for use inside a double-quoted shell string.
fn quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '"' | '\\' | '$' | '`') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

impl ApkBuild<'_> {
    /// Render the file contents.
    pub fn render(&self) -> Result<String> {
        self.write_lines().map_err(|e| PipelineError::Template {
            template: "APKBUILD".to_string(),
            reason: e.to_string(),
        })
    }

    fn write_lines(&self) -> Result<String, std::fmt::Error> {
        let spec = self.spec;
        let mut out = String::new();

        if !spec.contributor.is_empty() {
            writeln!(out, "# Contributor: {}", spec.contributor)?;
        }
        if !spec.maintainer.is_empty() {
            writeln!(out, "# Maintainer: {}", spec.maintainer)?;
        }
        writeln!(out, "pkgname={}", spec.name)?;
        writeln!(out, "pkgver={}", self.version)?;
        writeln!(out, "pkgrel={}", spec.rel)?;
        writeln!(out, "pkgdesc=\"{}\"", quote(&spec.description))?;
        writeln!(out, "url=\"{}\"", quote(&spec.url))?;
        writeln!(out, "arch=\"all\"")?;
        writeln!(out, "license=\"{}\"", quote(&spec.license))?;
        for empty in [
            "depends",
            "makedepends",
            "install",
            "subpackages",
            "source",
            "builddir",
        ] {
            writeln!(out, "{empty}=\"\"")?;
        }

        match spec.check_script() {
            None => writeln!(out, "options=\"!check\"")?,
            Some(script) => {
                writeln!(out)?;
                writeln!(out, "check() {{")?;
                writeln!(out, "\tcd \"$builddir\"")?;
                for line in script.lines() {
                    writeln!(out, "\t{line}")?;
                }
                writeln!(out, "}}")?;
            }
        }

        writeln!(out)?;
        writeln!(out, "package() {{")?;
        for (name, source) in &self.binaries {
            writeln!(
                out,
                "\tinstall -Dm755 \"{source}\" \"$pkgdir/usr/bin/{name}\""
            )?;
        }
        writeln!(out, "}}")?;

        Ok(out)
    }
}
