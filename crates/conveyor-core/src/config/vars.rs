//! Environment variable interpolation for topology files.
//!
//! Supports:
//! - `$VAR` or `${VAR}` - substitute with env var value, error if missing
//! - `${VAR:-default}` - use default if VAR is unset OR empty
//! - `${VAR-default}` - use default only if VAR is unset
//! - `$$` - literal `$`

use regex::{Captures, Regex};
use snafu::Snafu;
use std::env;
use std::sync::LazyLock;

static ENV_VAR_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?x)
        \$\$
        |
        \$\{
            ([A-Za-z_][A-Za-z0-9_]*)
            (?:(:?-)([^}]*))?
        \}
        |
        \$([A-Za-z_][A-Za-z0-9_]*)
        ",
    )
    .expect("Invalid regex pattern")
});

/// A placeholder that could not be substituted.
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
pub enum Unresolved {
    #[snafu(display("${name} is not set and has no default"))]
    Unset { name: String },

    /// Topology values are single-line; a multi-line value would reshape the YAML.
    #[snafu(display("${name} spans multiple lines"))]
    Multiline { name: String },
}

/// Text after substitution plus every placeholder left unresolved.
#[derive(Debug)]
pub struct InterpolationResult {
    pub text: String,
    pub errors: Vec<Unresolved>,
}

impl InterpolationResult {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// How a `${NAME...}` placeholder behaves when `NAME` is missing or blank.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fallback<'a> {
    Required,
    WhenUnset(&'a str),
    WhenUnsetOrEmpty(&'a str),
}

impl<'a> Fallback<'a> {
    fn from_captures(caps: &Captures<'a>) -> Self {
        match (caps.get(2).map(|m| m.as_str()), caps.get(3)) {
            (Some(":-"), Some(default)) => Fallback::WhenUnsetOrEmpty(default.as_str()),
            (Some(_), Some(default)) => Fallback::WhenUnset(default.as_str()),
            _ => Fallback::Required,
        }
    }

    fn apply(self, name: &str, value: Option<String>) -> Result<String, Unresolved> {
        match (value, self) {
            (Some(v), _) if v.contains(['\n', '\r']) => MultilineSnafu { name }.fail(),
            (Some(v), Fallback::WhenUnsetOrEmpty(default)) if v.is_empty() => Ok(default.to_owned()),
            (Some(v), _) => Ok(v),
            (None, Fallback::WhenUnset(default) | Fallback::WhenUnsetOrEmpty(default)) => {
                Ok(default.to_owned())
            }
            (None, Fallback::Required) => UnsetSnafu { name }.fail(),
        }
    }
}

/// Substitute environment references in `input`. Unresolved placeholders
/// are left verbatim in `text` and listed in `errors`.
pub fn interpolate(input: &str) -> InterpolationResult {
    let mut errors = Vec::new();

    let text = ENV_VAR_PATTERN
        .replace_all(input, |caps: &Captures| {
            let placeholder = &caps[0];
            if placeholder == "$$" {
                return "$".to_owned();
            }
            let Some(name) = caps.get(1).or_else(|| caps.get(4)) else {
                return placeholder.to_owned();
            };
            let value = env::var(name.as_str()).ok();
            Fallback::from_captures(caps)
                .apply(name.as_str(), value)
                .unwrap_or_else(|unresolved| {
                    errors.push(unresolved);
                    placeholder.to_owned()
                })
        })
        .into_owned();

    InterpolationResult { text, errors }
}
