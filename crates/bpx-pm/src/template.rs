//! `{KEY}` placeholder expansion against a [`Context`].
//!
//! `{{` and `}}` produce literal braces. A placeholder naming a key the
//! context does not hold is an error, never an empty substitution.

use regex::{Captures, Regex};
use std::sync::OnceLock;

use crate::config::Context;
use crate::error::{BuildpackError, Result};

fn placeholder_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r"\{\{|\}\}|\{([A-Za-z0-9_.\-]+)\}").unwrap())
}

/// Expand every placeholder in `template`. The template itself is not modified.
pub fn expand(template: &str, ctx: &Context) -> Result<String> {
    let mut missing: Option<String> = None;

    let expanded = placeholder_regex().replace_all(template, |caps: &Captures| {
        match caps.get(1) {
            None if &caps[0] == "{{" => "{".to_string(),
            None => "}".to_string(),
            Some(name) => match ctx.get_str(name.as_str()) {
                Some(value) => value,
                None => {
                    missing.get_or_insert_with(|| name.as_str().to_string());
                    String::new()
                }
            },
        }
    });

    match missing {
        Some(key) => Err(BuildpackError::Config { key }),
        None => Ok(expanded.into_owned()),
    }
}
