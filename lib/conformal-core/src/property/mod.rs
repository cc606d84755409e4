//! The property framework: built-in RFC checks, custom business rules, and
//! the engine that evaluates them.
//!
//! A property is a predicate over one (request, response) pair. Built-ins and
//! custom rules share the same [`Property`] trait; beyond inspecting the pair,
//! a check may probe the service again or sample persistent state through the
//! [`PropertyContext`]. Properties that do not apply to the pair skip with
//! `passed=true` and `details="N/A"`.

use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::ConformalError;
use crate::catalog::EndpointCatalog;
use crate::http::{Request, Response, ServiceClient};
use crate::state::{StateSampler, StateSnapshot, StateSource};

mod safety;
pub use self::safety::SafetyProperty;

mod idempotency;
pub use self::idempotency::{DeleteIdempotencyProperty, PutIdempotencyProperty};

mod consistency;
pub use self::consistency::{
    HeadGetConsistencyProperty, MethodNotAllowedAllowProperty, OptionsAllowProperty,
};

mod custom;
pub use self::custom::{AssertionFuture, CustomProperty, CustomPropertyBuilder};

mod engine;
pub use self::engine::{PropertyEngine, PropertyOutcome, RequestReport};

/// Marker text used when a property does not apply to the checked pair.
pub const NOT_APPLICABLE: &str = "N/A";

/// Outcome of one property invocation.
///
/// `passed == false` always comes with a `failure_reason`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PropertyResult {
    pub passed: bool,
    pub failure_reason: Option<String>,
    pub details: Option<String>,
    pub metrics: IndexMap<String, serde_json::Value>,
}

impl PropertyResult {
    pub fn pass() -> Self {
        Self {
            passed: true,
            failure_reason: None,
            details: None,
            metrics: IndexMap::new(),
        }
    }

    /// A skip: the property does not apply to this request or response.
    pub fn not_applicable() -> Self {
        Self {
            passed: true,
            failure_reason: None,
            details: Some(NOT_APPLICABLE.to_string()),
            metrics: IndexMap::new(),
        }
    }

    pub fn fail(reason: impl Into<String>) -> Self {
        Self {
            passed: false,
            failure_reason: Some(reason.into()),
            details: None,
            metrics: IndexMap::new(),
        }
    }

    pub fn fail_with_details(reason: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            passed: false,
            failure_reason: Some(reason.into()),
            details: Some(details.into()),
            metrics: IndexMap::new(),
        }
    }

    #[must_use]
    pub fn with_metric(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.metrics.insert(name.into(), value);
        self
    }

    pub fn is_not_applicable(&self) -> bool {
        self.passed && self.details.as_deref() == Some(NOT_APPLICABLE)
    }
}

/// Collaborators available to a property check.
#[derive(Clone, derive_more::Debug)]
pub struct PropertyContext {
    #[debug(ignore)]
    client: Arc<dyn ServiceClient>,
    sampler: StateSampler,
    catalog: Arc<EndpointCatalog>,
    cancel: CancellationToken,
}

impl PropertyContext {
    pub fn new(
        client: Arc<dyn ServiceClient>,
        sampler: StateSampler,
        catalog: Arc<EndpointCatalog>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            client,
            sampler,
            catalog,
            cancel,
        }
    }

    pub fn client(&self) -> &dyn ServiceClient {
        self.client.as_ref()
    }

    pub fn state(&self) -> &Arc<dyn StateSource> {
        self.sampler.source()
    }

    pub fn catalog(&self) -> &EndpointCatalog {
        &self.catalog
    }

    pub fn cancel(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Takes one state snapshot, honoring the cancellation token.
    pub async fn capture(&self) -> Result<StateSnapshot, ConformalError> {
        self.sampler.capture(&self.cancel).await
    }

    /// Re-sends a request through the service client.
    pub async fn probe(&self, request: &Request) -> Result<Response, ConformalError> {
        self.client.send(request, &self.cancel).await
    }
}

/// A conformance property with a stable name and an optional RFC citation.
#[async_trait]
pub trait Property: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn rfc_reference(&self) -> Option<&str> {
        None
    }

    /// Checks the pair. Errors are turned into failing results by the engine.
    async fn check(
        &self,
        ctx: &PropertyContext,
        request: &Request,
        response: &Response,
    ) -> Result<PropertyResult, ConformalError>;
}

/// Fails with "sampling unavailable" when a kind could not be sampled in
/// either snapshot of one property invocation.
pub(crate) fn ensure_sampled(
    before: &StateSnapshot,
    after: &StateSnapshot,
) -> Result<(), ConformalError> {
    for kind in before.tracked_kinds() {
        let failed_twice = before.sample(kind).is_none()
            && after.tracked_kinds().contains(kind)
            && after.sample(kind).is_none();
        if failed_twice {
            return Err(ConformalError::SamplingUnavailable);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::time::Duration;

    use chrono::Utc;
    use indexmap::IndexMap;

    use super::*;
    use crate::state::EntitySample;

    #[test]
    fn should_tie_failure_to_reason() {
        let result = PropertyResult::fail("broken");
        assert!(!result.passed);
        assert_eq!(result.failure_reason.as_deref(), Some("broken"));

        let result = PropertyResult::pass();
        assert!(result.passed);
        assert!(result.failure_reason.is_none());
    }

    #[test]
    fn should_mark_not_applicable() {
        let result = PropertyResult::not_applicable();
        assert!(result.passed);
        assert!(result.is_not_applicable());
    }

    #[test]
    fn should_serialize_metrics() {
        let result = PropertyResult::pass().with_metric("probes", serde_json::json!(2));
        let json = serde_json::to_value(&result).expect("serializable");
        assert_eq!(json["metrics"]["probes"], 2);
    }

    fn snapshot_with(kind: &str, sampled: bool) -> StateSnapshot {
        let mut samples = IndexMap::new();
        if sampled {
            samples.insert(
                kind.to_string(),
                EntitySample {
                    count: 1,
                    checksum: None,
                },
            );
        }
        StateSnapshot::new(
            Utc::now(),
            Duration::ZERO,
            samples,
            BTreeSet::from([kind.to_string()]),
        )
    }

    #[test]
    fn should_fail_after_two_consecutive_sampling_failures() {
        let before = snapshot_with("Users", false);
        let after = snapshot_with("Users", false);
        assert!(matches!(
            ensure_sampled(&before, &after),
            Err(ConformalError::SamplingUnavailable)
        ));
    }

    #[test]
    fn should_tolerate_single_sampling_failure() {
        let before = snapshot_with("Users", false);
        let after = snapshot_with("Users", true);
        assert!(ensure_sampled(&before, &after).is_ok());

        let before = snapshot_with("Users", true);
        let after = snapshot_with("Users", false);
        assert!(ensure_sampled(&before, &after).is_ok());
    }
}
