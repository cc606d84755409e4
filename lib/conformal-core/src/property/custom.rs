//! User-defined business rules.
//!
//! A rule is an immutable [`CustomProperty`] assembled by a
//! [`CustomPropertyBuilder`]: endpoint glob patterns and a method set scope
//! where it applies, request predicates gate individual pairs, and a mandatory
//! assertion decides the verdict.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use http::Method;

use super::{Property, PropertyContext, PropertyResult};
use crate::ConformalError;
use crate::http::{Request, Response};
use crate::pattern::PatternSet;
use crate::state::StateSource;

/// Future returned by a rule assertion.
pub type AssertionFuture = Pin<Box<dyn Future<Output = Result<bool, ConformalError>> + Send>>;

type Predicate = Arc<dyn Fn(&Request) -> bool + Send + Sync>;
type Assertion =
    Arc<dyn Fn(Request, Response, Arc<dyn StateSource>) -> AssertionFuture + Send + Sync>;

/// A business rule evaluated like any built-in property.
#[derive(Clone, derive_more::Debug)]
pub struct CustomProperty {
    name: String,
    reason: String,
    patterns: PatternSet,
    methods: Vec<Method>,
    #[debug(ignore)]
    predicates: Vec<Predicate>,
    #[debug(ignore)]
    assertion: Assertion,
}

impl CustomProperty {
    pub fn builder() -> CustomPropertyBuilder {
        CustomPropertyBuilder::default()
    }

    fn applies_to(&self, request: &Request) -> bool {
        if !self.methods.is_empty() && !self.methods.contains(&request.method) {
            return false;
        }
        if !self.patterns.is_empty() && !self.patterns.matches(&request.path) {
            return false;
        }
        self.predicates.iter().all(|predicate| predicate(request))
    }
}

#[async_trait]
impl Property for CustomProperty {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.reason
    }

    async fn check(
        &self,
        ctx: &PropertyContext,
        request: &Request,
        response: &Response,
    ) -> Result<PropertyResult, ConformalError> {
        if !self.applies_to(request) {
            return Ok(PropertyResult::not_applicable());
        }

        let future = (self.assertion)(
            request.clone(),
            response.clone(),
            Arc::clone(ctx.state()),
        );
        let result = match future.await {
            Ok(true) => PropertyResult::pass(),
            Ok(false) => PropertyResult::fail(self.reason.clone()),
            Err(error) => PropertyResult::fail_with_details(
                self.reason.clone(),
                format!("assertion error: {error}"),
            ),
        };
        Ok(result)
    }
}

/// Step-by-step assembly of a [`CustomProperty`].
#[derive(Clone, Default, derive_more::Debug)]
pub struct CustomPropertyBuilder {
    name: Option<String>,
    reason: Option<String>,
    patterns: Vec<String>,
    methods: Vec<Method>,
    #[debug(ignore)]
    predicates: Vec<Predicate>,
    #[debug(ignore)]
    assertion: Option<Assertion>,
}

impl CustomPropertyBuilder {
    /// Stable name used in reports.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Description of the rule, also used as the failure reason.
    #[must_use]
    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Restricts the rule to paths matching a glob pattern.
    ///
    /// May be called repeatedly; any match applies. No patterns means every
    /// path applies.
    #[must_use]
    pub fn for_endpoint(mut self, pattern: impl Into<String>) -> Self {
        self.patterns.push(pattern.into());
        self
    }

    /// Restricts the rule to a method. No methods means every method applies.
    #[must_use]
    pub fn for_method(mut self, method: Method) -> Self {
        if !self.methods.contains(&method) {
            self.methods.push(method);
        }
        self
    }

    /// Adds a request predicate; all predicates must hold for the rule to run.
    #[must_use]
    pub fn when(mut self, predicate: impl Fn(&Request) -> bool + Send + Sync + 'static) -> Self {
        self.predicates.push(Arc::new(predicate));
        self
    }

    /// The verdict of the rule. Mandatory.
    #[must_use]
    pub fn assert(
        mut self,
        assertion: impl Fn(Request, Response, Arc<dyn StateSource>) -> AssertionFuture
        + Send
        + Sync
        + 'static,
    ) -> Self {
        self.assertion = Some(Arc::new(assertion));
        self
    }

    pub fn build(self) -> Result<CustomProperty, ConformalError> {
        let Self {
            name,
            reason,
            patterns,
            methods,
            predicates,
            assertion,
        } = self;

        let name = name.ok_or_else(|| ConformalError::InvalidCustomProperty {
            error: "a rule needs a name".to_string(),
        })?;
        let assertion = assertion.ok_or_else(|| ConformalError::InvalidCustomProperty {
            error: format!("rule '{name}' has no assertion"),
        })?;
        let reason = reason.unwrap_or_else(|| format!("business rule '{name}' violated"));
        let patterns = PatternSet::parse(patterns)?;

        Ok(CustomProperty {
            name,
            reason,
            patterns,
            methods,
            predicates,
            assertion,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn always_true() -> Assertion {
        Arc::new(|_, _, _| Box::pin(async { Ok(true) }))
    }

    fn rule() -> CustomPropertyBuilder {
        CustomProperty::builder()
            .name("posts need titles")
            .reason("created posts must have a title")
            .assert(|_, _, _| Box::pin(async { Ok(true) }))
    }

    #[test]
    fn should_require_name_and_assertion() {
        let missing_name = CustomProperty::builder()
            .assert(|_, _, _| Box::pin(async { Ok(true) }))
            .build();
        assert!(missing_name.is_err());

        let missing_assertion = CustomProperty::builder().name("x").build();
        assert!(missing_assertion.is_err());

        assert!(rule().build().is_ok());
    }

    #[test]
    fn should_default_reason_from_name() {
        let property = CustomProperty::builder()
            .name("rule-x")
            .assert(|_, _, _| Box::pin(async { Ok(true) }))
            .build()
            .expect("buildable");
        assert!(property.description().contains("rule-x"));
    }

    #[test]
    fn should_scope_by_method_and_pattern() {
        let property = rule()
            .for_method(Method::POST)
            .for_endpoint("/api/posts*")
            .build()
            .expect("buildable");

        let applies = |method: Method, path: &str| {
            let request = Request::new(method, path);
            property.applies_to(&request)
        };
        assert!(applies(Method::POST, "/api/posts"));
        assert!(applies(Method::POST, "/api/posts/42"));
        assert!(!applies(Method::GET, "/api/posts"));
        assert!(!applies(Method::POST, "/api/users"));
    }

    #[test]
    fn should_gate_on_predicates() {
        let property = rule()
            .when(|request| request.body.is_some())
            .build()
            .expect("buildable");

        let bare = Request::new(Method::POST, "/api/posts");
        assert!(!property.applies_to(&bare));

        let with_body = bare.with_body(mime::APPLICATION_JSON, b"{}".to_vec());
        assert!(property.applies_to(&with_body));
    }

    #[test]
    fn should_keep_assertion_arc_cloneable() {
        // Rules are shared across parallel endpoint tasks.
        let assertion = always_true();
        let other = Arc::clone(&assertion);
        drop(assertion);
        drop(other);
    }
}
