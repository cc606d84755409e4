use async_trait::async_trait;
use http::Method;

use super::{Property, PropertyContext, PropertyResult, ensure_sampled};
use crate::ConformalError;
use crate::http::{Request, Response};

const RFC_REFERENCE: &str = "RFC 7231 §4.2.1";

/// Checks that a safe method leaves persistent state untouched.
///
/// Both snapshots are taken after the orchestrator has already exchanged the
/// triggering request, so the check measures steady-state drift between two
/// consecutive samples rather than a pre/post difference around the request.
#[derive(Debug, Clone)]
pub struct SafetyProperty {
    method: Method,
    name: &'static str,
    description: &'static str,
}

impl SafetyProperty {
    pub fn get() -> Self {
        Self {
            method: Method::GET,
            name: "GET Method Safety",
            description: "GET requests must not cause observable state changes",
        }
    }

    pub fn head() -> Self {
        Self {
            method: Method::HEAD,
            name: "HEAD Method Safety",
            description: "HEAD requests must not cause observable state changes",
        }
    }

    pub fn options() -> Self {
        Self {
            method: Method::OPTIONS,
            name: "OPTIONS Method Safety",
            description: "OPTIONS requests must not cause observable state changes",
        }
    }
}

#[async_trait]
impl Property for SafetyProperty {
    fn name(&self) -> &str {
        self.name
    }

    fn description(&self) -> &str {
        self.description
    }

    fn rfc_reference(&self) -> Option<&str> {
        Some(RFC_REFERENCE)
    }

    async fn check(
        &self,
        ctx: &PropertyContext,
        request: &Request,
        _response: &Response,
    ) -> Result<PropertyResult, ConformalError> {
        if request.method != self.method {
            return Ok(PropertyResult::not_applicable());
        }

        let before = ctx.capture().await?;
        let after = ctx.capture().await?;
        ensure_sampled(&before, &after)?;

        let diff = before.diff(&after);
        let result = if diff.has_changes() {
            PropertyResult::fail(format!(
                "state changed during a safe {} request: {}",
                self.method,
                diff.summary()
            ))
        } else {
            PropertyResult::pass()
        };
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_expose_stable_identity() {
        assert_eq!(SafetyProperty::get().name(), "GET Method Safety");
        assert_eq!(SafetyProperty::head().name(), "HEAD Method Safety");
        assert_eq!(SafetyProperty::options().name(), "OPTIONS Method Safety");
        assert_eq!(
            SafetyProperty::get().rfc_reference(),
            Some("RFC 7231 §4.2.1")
        );
    }
}
