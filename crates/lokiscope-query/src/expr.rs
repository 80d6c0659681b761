use std::fmt;

use lokiscope_types::{FieldConstraints, NoiseFilters, Polarity, TextMatchTerm};

/// Stream selector used when none is configured
pub const DEFAULT_SELECTOR: &str = r#"{job="accelerator-logs"}"#;

/// Regexes for the built-in noise-exclusion terms
///
/// The defaults must stay byte-for-byte as they are: they match tag and
/// marker conventions of the producing systems, not a general grammar.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NoisePatterns {
    /// `ABC: ... changed from ...` change-log lines
    pub changelog: String,
    /// Entries written by the watcher
    pub watcher: String,
    /// `new=... old=...` put-log diffs
    pub putlog: String,
}

impl NoisePatterns {
    pub const CHANGELOG: &'static str = "[A-Z]{2,4}: .*changed from";
    pub const WATCHER: &'static str = r"\(watcher\)";
    pub const PUTLOG: &'static str = "new=.* old=.*";
}

impl Default for NoisePatterns {
    fn default() -> Self {
        Self {
            changelog: Self::CHANGELOG.to_string(),
            watcher: Self::WATCHER.to_string(),
            putlog: Self::PUTLOG.to_string(),
        }
    }
}

/// A complete LogQL query string
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueryExpression(String);

impl QueryExpression {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for QueryExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Composes a selector and line filters into one query
#[derive(Clone, Debug)]
pub struct QueryExpressionBuilder {
    selector: String,
    noise: NoisePatterns,
}

impl QueryExpressionBuilder {
    pub fn new(selector: impl Into<String>) -> Self {
        Self {
            selector: selector.into(),
            noise: NoisePatterns::default(),
        }
    }

    /// Replace the noise-exclusion regexes
    pub fn with_noise_patterns(mut self, noise: NoisePatterns) -> Self {
        self.noise = noise;
        self
    }

    /// Build the expression
    ///
    /// Every filter is an independent AND-ed stage, so constraint order does
    /// not matter. Regexes are not validated here; the store rejects bad ones.
    pub fn build(
        &self,
        constraints: FieldConstraints,
        terms: &[TextMatchTerm],
        noise: NoiseFilters,
    ) -> QueryExpression {
        let mut expr = self.selector.clone();

        for (key, value) in constraints.iter() {
            push_stage(&mut expr, "|=", &format!(r#""{}": "{}""#, key, value));
        }

        for term in terms {
            let op = match term.polarity {
                Polarity::MustMatch => "|~",
                Polarity::MustNotMatch => "!~",
            };
            push_stage(&mut expr, op, &term.pattern);
        }

        let defaults = [
            (noise.changelog, &self.noise.changelog),
            (noise.watcher, &self.noise.watcher),
            (noise.putlog, &self.noise.putlog),
        ];
        for (enabled, pattern) in defaults {
            if enabled {
                push_stage(&mut expr, "!~", pattern);
            }
        }

        QueryExpression(expr)
    }
}

impl Default for QueryExpressionBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_SELECTOR)
    }
}

fn push_stage(expr: &mut String, op: &str, operand: &str) {
    expr.push(' ');
    expr.push_str(op);
    expr.push(' ');
    expr.push_str(&string_literal(operand));
}

/// Quote a value as a LogQL string
///
/// Backtick strings are taken literally, so they are preferred. A value that
/// itself contains a backtick needs an escaped double-quoted string.
fn string_literal(value: &str) -> String {
    if !value.contains('`') {
        return format!("`{value}`");
    }
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}
