//! Glob-style endpoint filter patterns.
//!
//! These patterns select endpoints for filtering and for scoping custom
//! properties. They are distinct from [`crate::catalog::PathTemplate`]
//! matching: a template matches segment-wise, a pattern is a glob where `*`
//! expands to `.*` and `{name}` to a single path segment.

use regex::Regex;

use crate::ConformalError;

/// A compiled endpoint glob such as `/api/users/*` or `/api/{id}`.
#[derive(Debug, Clone)]
pub struct EndpointPattern {
    raw: String,
    regex: Regex,
}

impl EndpointPattern {
    /// Compiles a glob pattern.
    ///
    /// `*` matches any run of characters (including `/`); `{name}` matches
    /// exactly one path segment. Everything else is literal.
    pub fn parse(pattern: impl Into<String>) -> Result<Self, ConformalError> {
        let raw = pattern.into();
        let mut expression = String::with_capacity(raw.len() + 8);
        expression.push('^');

        let mut chars = raw.chars().peekable();
        while let Some(current) = chars.next() {
            match current {
                '*' => expression.push_str(".*"),
                '{' => {
                    // Consume the placeholder name up to the closing brace.
                    let mut name = String::new();
                    let mut closed = false;
                    for inner in chars.by_ref() {
                        if inner == '}' {
                            closed = true;
                            break;
                        }
                        name.push(inner);
                    }
                    if closed {
                        expression.push_str("[^/]+");
                    } else {
                        expression.push_str(&regex::escape("{"));
                        expression.push_str(&regex::escape(&name));
                    }
                }
                other => expression.push_str(&regex::escape(&other.to_string())),
            }
        }
        expression.push('$');

        let regex = Regex::new(&expression).map_err(|err| ConformalError::InvalidPattern {
            pattern: raw.clone(),
            error: err.to_string(),
        })?;
        Ok(Self { raw, regex })
    }

    /// Returns whether the concrete path matches this pattern.
    pub fn matches(&self, path: &str) -> bool {
        self.regex.is_match(path)
    }

    /// The pattern as written.
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

/// An any-of collection of patterns.
#[derive(Debug, Clone, Default)]
pub struct PatternSet {
    patterns: Vec<EndpointPattern>,
}

impl PatternSet {
    pub fn parse<I, S>(patterns: I) -> Result<Self, ConformalError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let patterns = patterns
            .into_iter()
            .map(EndpointPattern::parse)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Returns whether any pattern matches the path.
    pub fn matches(&self, path: &str) -> bool {
        self.patterns.iter().any(|pattern| pattern.matches(path))
    }
}
