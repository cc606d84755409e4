use std::fmt;

/// A parsed HTTP path template such as `/api/users/{userId}/posts`.
///
/// Templates are compared segment-wise against concrete paths: a concrete path
/// matches when both sides have the same number of `/`-separated segments,
/// every literal segment matches case-insensitively, and every `{name}`
/// segment is covered by a non-empty concrete segment. The raw template text
/// is preserved as written so it can be echoed back in reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathTemplate {
    raw: String,
    segments: Vec<Segment>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
}

impl PathTemplate {
    /// Parses a template from its textual form.
    ///
    /// Any segment fully wrapped in braces becomes a parameter segment; every
    /// other segment is a literal. Parsing never fails: malformed brace usage
    /// is treated as a literal segment.
    pub fn parse(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        let segments = raw
            .split('/')
            .map(|segment| {
                segment
                    .strip_prefix('{')
                    .and_then(|rest| rest.strip_suffix('}'))
                    .filter(|name| !name.is_empty())
                    .map_or_else(
                        || Segment::Literal(segment.to_string()),
                        |name| Segment::Param(name.to_string()),
                    )
            })
            .collect();
        Self { raw, segments }
    }

    /// Returns whether a concrete path (no query string) comes from this template.
    pub fn matches(&self, concrete: &str) -> bool {
        let mut concrete_segments = concrete.split('/');
        let mut template_segments = self.segments.iter();

        loop {
            match (template_segments.next(), concrete_segments.next()) {
                (None, None) => return true,
                (None, Some(_)) | (Some(_), None) => return false,
                (Some(Segment::Literal(literal)), Some(actual)) => {
                    if !literal.eq_ignore_ascii_case(actual) {
                        return false;
                    }
                }
                (Some(Segment::Param(_)), Some(actual)) => {
                    if actual.is_empty() {
                        return false;
                    }
                }
            }
        }
    }

    /// Parameter names in declaration order.
    pub fn param_names(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|segment| match segment {
            Segment::Param(name) => Some(name.as_str()),
            Segment::Literal(_) => None,
        })
    }

    /// The template exactly as written.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Substitutes parameter values into the template, producing a concrete path.
    ///
    /// Values are expected to be already percent-encoded by the caller.
    /// Returns `None` when a parameter has no value.
    pub(crate) fn render(
        &self,
        mut value_for: impl FnMut(&str) -> Option<String>,
    ) -> Option<String> {
        let rendered = self
            .segments
            .iter()
            .map(|segment| match segment {
                Segment::Literal(literal) => Some(literal.clone()),
                Segment::Param(name) => value_for(name),
            })
            .collect::<Option<Vec<_>>>()?;
        Some(rendered.join("/"))
    }
}

impl fmt::Display for PathTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}
