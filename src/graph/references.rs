//! Variable reference extraction and rewriting for query text.
//!
//! A reference is the configured prefix followed by an identifier, e.g.
//! `v.buckets`. Tokens are identifier-bounded: `v.bucket` inside `v.buckets`
//! is not a reference to `bucket`, and `r.v.x` is not a reference at all.

use regex::{Captures, Regex};

use crate::core::DashvarError;

/// Finds and rewrites variable reference tokens.
#[derive(Debug, Clone)]
pub struct ReferenceScanner {
    prefix: String,
    pattern: Regex,
}

impl ReferenceScanner {
    /// Build a scanner for `prefix` (usually `v.`).
    pub fn new(prefix: &str) -> Result<Self, DashvarError> {
        if prefix.is_empty() {
            return Err(DashvarError::ConfigError {
                message: "reference prefix must not be empty".to_string(),
            });
        }
        let source = format!(r"(?P<pre>^|[^\w.]){}(?P<name>[A-Za-z_]\w*)", regex::escape(prefix));
        let pattern = Regex::new(&source).map_err(|e| DashvarError::ConfigError {
            message: format!("invalid reference prefix '{prefix}': {e}"),
        })?;
        Ok(Self {
            prefix: prefix.to_string(),
            pattern,
        })
    }

    /// The prefix this scanner recognises.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Distinct referenced names, in order of first appearance.
    pub fn references<'a>(&self, text: &'a str) -> Vec<&'a str> {
        let mut names: Vec<&'a str> = Vec::new();
        for caps in self.pattern.captures_iter(text) {
            if let Some(name) = caps.name("name") {
                let name = name.as_str();
                if !names.contains(&name) {
                    names.push(name);
                }
            }
        }
        names
    }

    /// True when `text` references `name`.
    pub fn mentions(&self, text: &str, name: &str) -> bool {
        self.references(text).contains(&name)
    }

    /// Replace every reference for which `literal` returns `Some` with that literal.
    ///
    /// References for which `literal` returns `None` are left untouched.
    pub fn rewrite<F>(&self, text: &str, mut literal: F) -> String
    where
        F: FnMut(&str) -> Option<String>,
    {
        self.pattern
            .replace_all(text, |caps: &Captures<'_>| {
                let pre = caps.name("pre").map_or("", |m| m.as_str());
                let name = caps.name("name").map_or("", |m| m.as_str());
                match literal(name) {
                    Some(value) => format!("{pre}{value}"),
                    None => format!("{pre}{}{name}", self.prefix),
                }
            })
            .into_owned()
    }
}

/// Render a value as a double-quoted query-language string literal.
pub fn string_literal(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for ch in value.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            _ => out.push(ch),
        }
    }
    out.push('"');
    out
}
