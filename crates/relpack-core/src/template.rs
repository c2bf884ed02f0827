//! Placeholder resolution for configuration strings.
//!
//! Stages consume templating through the [`TemplateResolver`] trait. The
//! default [`ReleaseTemplate`] understands `{{ .Field }}` placeholders:
//!
//! | Placeholder | Value |
//! |---|---|
//! | `{{ .Version }}` | Release version (`1.2.3`) |
//! | `{{ .Tag }}` | Git tag (`v1.2.3`) |
//! | `{{ .ProjectName }}` | `project_name` from the config |
//! | `{{ .Major }}` / `{{ .Minor }}` / `{{ .Patch }}` | Version components |
//! | `{{ .Env.NAME }}` | Value of `NAME` in the context environment |
//!
//! Whitespace inside the braces and the leading dot are optional.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

use crate::context::ReleaseContext;
use crate::error::{PipelineError, Result};

/// Resolves placeholders in a configuration string.
pub trait TemplateResolver: Send + Sync {
    /// Substitute every placeholder in `template`.
    fn apply(&self, template: &str) -> Result<String>;
}

static FIELD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\.?([A-Za-z_][A-Za-z0-9_]*)(?:\.([A-Za-z_][A-Za-z0-9_]*))?$")
        .expect("placeholder pattern is valid")
});

/// [`TemplateResolver`] backed by the values of a [`ReleaseContext`].
#[derive(Debug, Clone)]
pub struct ReleaseTemplate {
    fields: HashMap<&'static str, String>,
    env: HashMap<String, String>,
}

impl ReleaseTemplate {
    /// Capture the template-visible values of `ctx`.
    pub fn new(ctx: &ReleaseContext) -> Self {
        let mut parts = ctx.version.split(['.', '-', '+']);
        let mut fields = HashMap::from([
            ("Version", ctx.version.clone()),
            ("Tag", ctx.tag.clone()),
            ("ProjectName", ctx.config.project_name.clone()),
        ]);
        for key in ["Major", "Minor", "Patch"] {
            fields.insert(key, parts.next().unwrap_or_default().to_string());
        }

        Self {
            fields,
            env: ctx.env.clone(),
        }
    }

    fn lookup(&self, template: &str, expr: &str) -> Result<String> {
        let fail = |reason: String| PipelineError::Template {
            template: template.to_string(),
            reason,
        };

        let caps = FIELD
            .captures(expr)
            .ok_or_else(|| fail(format!("invalid placeholder {{{{ {expr} }}}}")))?;
        let head = &caps[1];

        match (head, caps.get(2)) {
            ("Env", Some(name)) => self
                .env
                .get(name.as_str())
                .cloned()
                .ok_or_else(|| fail(format!("environment variable {} is not set", name.as_str()))),
            (field, None) => self
                .fields
                .get(field)
                .cloned()
                .ok_or_else(|| fail(format!("unknown field .{field}"))),
            (field, Some(sub)) => Err(fail(format!("unknown field .{field}.{}", sub.as_str()))),
        }
    }
}

impl TemplateResolver for ReleaseTemplate {
    fn apply(&self, template: &str) -> Result<String> {
        let mut out = String::with_capacity(template.len());
        let mut rest = template;

        while let Some(start) = rest.find("{{") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let end = after.find("}}").ok_or_else(|| PipelineError::Template {
                template: template.to_string(),
                reason: "unterminated placeholder".to_string(),
            })?;
            out.push_str(&self.lookup(template, after[..end].trim())?);
            rest = &after[end + 2..];
        }

        out.push_str(rest);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProjectConfig;

    fn template() -> ReleaseTemplate {
        let config = ProjectConfig {
            project_name: "app".to_string(),
            ..ProjectConfig::default()
        };
        let ctx = ReleaseContext::new(config, "1.2.3").with_env(HashMap::from([(
            "BUCKET".to_string(),
            "prod".to_string(),
        )]));
        ReleaseTemplate::new(&ctx)
    }

    #[test]
    fn test_version_placeholder() {
        assert_eq!(
            template().apply("releases/{{.Version}}").unwrap(),
            "releases/1.2.3"
        );
        assert_eq!(
            template().apply("releases/{{ .Version }}").unwrap(),
            "releases/1.2.3"
        );
    }

    #[test]
    fn test_all_fields() {
        let t = template();
        assert_eq!(
            t.apply("{{ .ProjectName }}-{{ .Tag }}-{{.Major}}.{{.Minor}}.{{.Patch}}")
                .unwrap(),
            "app-v1.2.3-1.2.3"
        );
        assert_eq!(t.apply("{{ .Env.BUCKET }}").unwrap(), "prod");
    }

    #[test]
    fn test_no_placeholders() {
        assert_eq!(template().apply("plain").unwrap(), "plain");
        assert_eq!(template().apply("").unwrap(), "");
    }

    #[test]
    fn test_errors() {
        let t = template();
        assert!(matches!(
            t.apply("{{ .Nope }}"),
            Err(PipelineError::Template { .. })
        ));
        assert!(t.apply("{{ .Env.MISSING }}").is_err());
        assert!(t.apply("{{ .Version").is_err());
        assert!(t.apply("{{ not a field }}").is_err());
    }
}
