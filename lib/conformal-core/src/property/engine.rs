use std::sync::Arc;
use std::time::{Duration, Instant};

use indexmap::IndexMap;
use serde::Serialize;
use tracing::debug;

use super::{Property, PropertyContext, PropertyResult};
use crate::ConformalError;
use crate::http::{Request, Response};

/// Default per-property time budget.
const DEFAULT_PROPERTY_TIMEOUT: Duration = Duration::from_secs(30);

/// Runs a list of properties against one (request, response) pair.
///
/// Properties run sequentially in registration order to preserve state
/// causality: they share the live state source, and a reordered replay probe
/// would invalidate the snapshots of its neighbors. Errors never escape: a
/// failing `check` turns into a failing result carrying the error text.
#[derive(Debug, Clone)]
pub struct PropertyEngine {
    timeout: Duration,
}

impl Default for PropertyEngine {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_PROPERTY_TIMEOUT,
        }
    }
}

impl PropertyEngine {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub async fn evaluate(
        &self,
        properties: &[Arc<dyn Property>],
        request: &Request,
        response: &Response,
        ctx: &PropertyContext,
    ) -> RequestReport {
        let run_started = Instant::now();
        let mut outcomes = Vec::with_capacity(properties.len());

        for property in properties {
            let started = Instant::now();
            let result = if ctx.cancel().is_cancelled() {
                PropertyResult::fail(ConformalError::Cancelled.to_string())
            } else {
                let checked =
                    tokio::time::timeout(self.timeout, property.check(ctx, request, response))
                        .await;
                match checked {
                    Ok(Ok(result)) => result,
                    Ok(Err(error)) => {
                        PropertyResult::fail_with_details(error.to_string(), format!("{error:?}"))
                    }
                    Err(_elapsed) => {
                        let timeout = ConformalError::PropertyTimeout {
                            name: property.name().to_string(),
                            budget_ms: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
                        };
                        PropertyResult::fail(timeout.to_string())
                    }
                }
            };
            debug!(property = property.name(), passed = result.passed, "property checked");
            outcomes.push(PropertyOutcome::new(
                property.as_ref(),
                result,
                started.elapsed(),
            ));
        }

        RequestReport::new(request, response.status.as_u16(), outcomes, run_started.elapsed())
    }
}

/// One property's verdict inside a request report.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyOutcome {
    pub property_name: String,
    pub property_description: String,
    pub rfc_reference: Option<String>,
    pub passed: bool,
    pub failure_reason: Option<String>,
    pub details: Option<String>,
    pub execution_time_ms: u64,
    pub metrics: IndexMap<String, serde_json::Value>,
}

impl PropertyOutcome {
    fn new(property: &dyn Property, result: PropertyResult, elapsed: Duration) -> Self {
        let PropertyResult {
            passed,
            failure_reason,
            details,
            metrics,
        } = result;
        Self {
            property_name: property.name().to_string(),
            property_description: property.description().to_string(),
            rfc_reference: property.rfc_reference().map(str::to_string),
            passed,
            failure_reason,
            details,
            execution_time_ms: millis(elapsed),
            metrics,
        }
    }
}

/// Everything observed while checking one request.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestReport {
    pub request_method: String,
    pub request_path: String,
    pub response_status_code: u16,
    pub overall_passed: bool,
    pub total_properties: usize,
    pub passed_properties: usize,
    pub failed_properties: usize,
    pub execution_time_ms: u64,
    pub property_results: Vec<PropertyOutcome>,
    /// Wall-clock time of the triggering HTTP exchange; feeds the run summary.
    #[serde(skip)]
    pub response_time_ms: u64,
}

impl RequestReport {
    pub(crate) fn new(
        request: &Request,
        status: u16,
        property_results: Vec<PropertyOutcome>,
        elapsed: Duration,
    ) -> Self {
        let passed_properties = property_results
            .iter()
            .filter(|outcome| outcome.passed)
            .count();
        Self {
            request_method: request.method.to_string(),
            request_path: request.path.clone(),
            response_status_code: status,
            overall_passed: passed_properties == property_results.len(),
            total_properties: property_results.len(),
            passed_properties,
            failed_properties: property_results.len() - passed_properties,
            execution_time_ms: millis(elapsed),
            property_results,
            response_time_ms: 0,
        }
    }

    /// Synthetic report for a request that could not be sent at all.
    ///
    /// The status is recorded as 500 so downstream sorting stays meaningful.
    pub(crate) fn request_failed(request: &Request, error: &ConformalError) -> Self {
        let outcome = PropertyOutcome {
            property_name: "RequestFailed".to_string(),
            property_description: "The HTTP request could not be completed".to_string(),
            rfc_reference: None,
            passed: false,
            failure_reason: Some(error.to_string()),
            details: Some(format!("{error:?}")),
            execution_time_ms: 0,
            metrics: IndexMap::new(),
        };
        Self::new(request, 500, vec![outcome], Duration::ZERO)
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use http::{HeaderMap, Method, StatusCode};
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::catalog::EndpointCatalog;
    use crate::http::ServiceClient;
    use crate::state::{
        EntityKindDescriptor, StateSampler, StateSource, StateTrackingConfig,
    };

    #[derive(Debug)]
    struct NoService;

    #[async_trait]
    impl ServiceClient for NoService {
        async fn send(
            &self,
            _request: &Request,
            _cancel: &CancellationToken,
        ) -> Result<Response, ConformalError> {
            Err(ConformalError::EndpointNotFound {
                method: Method::GET,
                path: "/".to_string(),
            })
        }
    }

    #[derive(Debug)]
    struct NoState;

    #[async_trait]
    impl StateSource for NoState {
        async fn entity_kinds(&self) -> Result<Vec<EntityKindDescriptor>, ConformalError> {
            Ok(Vec::new())
        }

        async fn count(&self, _kind: &str) -> Result<u64, ConformalError> {
            Ok(0)
        }

        async fn list_all(&self, _kind: &str) -> Result<Vec<serde_json::Value>, ConformalError> {
            Ok(Vec::new())
        }

        async fn random_key(
            &self,
            _kind: &str,
        ) -> Result<Option<serde_json::Value>, ConformalError> {
            Ok(None)
        }
    }

    fn context(cancel: CancellationToken) -> PropertyContext {
        let sampler = StateSampler::new(Arc::new(NoState), StateTrackingConfig::default());
        PropertyContext::new(
            Arc::new(NoService),
            sampler,
            Arc::new(EndpointCatalog::default()),
            cancel,
        )
    }

    struct StubProperty {
        name: &'static str,
        behavior: Behavior,
    }

    enum Behavior {
        Pass,
        Fail,
        Error,
        Hang,
    }

    #[async_trait]
    impl Property for StubProperty {
        fn name(&self) -> &str {
            self.name
        }

        fn description(&self) -> &str {
            "stub"
        }

        async fn check(
            &self,
            _ctx: &PropertyContext,
            _request: &Request,
            _response: &Response,
        ) -> Result<PropertyResult, ConformalError> {
            match self.behavior {
                Behavior::Pass => Ok(PropertyResult::pass()),
                Behavior::Fail => Ok(PropertyResult::fail("nope")),
                Behavior::Error => Err(ConformalError::SamplingUnavailable),
                Behavior::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(PropertyResult::pass())
                }
            }
        }
    }

    fn stub(name: &'static str, behavior: Behavior) -> Arc<dyn Property> {
        Arc::new(StubProperty { name, behavior })
    }

    fn ok_response() -> Response {
        Response {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: Vec::new(),
            content_type: None,
        }
    }

    #[tokio::test]
    async fn should_aggregate_results_in_order() {
        let engine = PropertyEngine::default();
        let properties = vec![
            stub("first", Behavior::Pass),
            stub("second", Behavior::Fail),
            stub("third", Behavior::Pass),
        ];
        let request = Request::new(Method::GET, "/api/users");

        let report = engine
            .evaluate(
                &properties,
                &request,
                &ok_response(),
                &context(CancellationToken::new()),
            )
            .await;

        assert!(!report.overall_passed);
        assert_eq!(report.total_properties, 3);
        assert_eq!(report.passed_properties, 2);
        assert_eq!(report.failed_properties, 1);
        let names: Vec<_> = report
            .property_results
            .iter()
            .map(|outcome| outcome.property_name.as_str())
            .collect();
        assert_eq!(names, vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn should_convert_errors_to_failures() {
        let engine = PropertyEngine::default();
        let properties = vec![stub("erroring", Behavior::Error)];
        let request = Request::new(Method::GET, "/api/users");

        let report = engine
            .evaluate(
                &properties,
                &request,
                &ok_response(),
                &context(CancellationToken::new()),
            )
            .await;

        let outcome = &report.property_results[0];
        assert!(!outcome.passed);
        assert_eq!(outcome.failure_reason.as_deref(), Some("sampling unavailable"));
        assert!(outcome.details.is_some());
    }

    #[tokio::test]
    async fn should_time_box_each_property() {
        let engine = PropertyEngine::new(Duration::from_millis(20));
        let properties = vec![stub("hanging", Behavior::Hang), stub("after", Behavior::Pass)];
        let request = Request::new(Method::GET, "/api/users");

        let report = engine
            .evaluate(
                &properties,
                &request,
                &ok_response(),
                &context(CancellationToken::new()),
            )
            .await;

        let hanging = &report.property_results[0];
        assert!(!hanging.passed);
        assert!(
            hanging
                .failure_reason
                .as_deref()
                .is_some_and(|reason| reason.contains("time budget"))
        );
        // The slow property must not starve the rest of the list.
        assert!(report.property_results[1].passed);
    }

    #[tokio::test]
    async fn should_report_cancelled_without_running_checks() {
        let engine = PropertyEngine::default();
        let properties = vec![stub("skipped", Behavior::Pass)];
        let request = Request::new(Method::GET, "/api/users");
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = engine
            .evaluate(&properties, &request, &ok_response(), &context(cancel))
            .await;

        assert_eq!(
            report.property_results[0].failure_reason.as_deref(),
            Some("cancelled")
        );
    }

    #[tokio::test]
    async fn should_build_synthetic_request_failed_report() {
        let request = Request::new(Method::GET, "/api/broken");
        let error = ConformalError::Cancelled;

        let report = RequestReport::request_failed(&request, &error);
        assert!(!report.overall_passed);
        assert_eq!(report.response_status_code, 500);
        assert_eq!(report.property_results.len(), 1);
        assert_eq!(report.property_results[0].property_name, "RequestFailed");
    }

    #[test]
    fn should_serialize_with_stable_field_names() {
        let request = Request::new(Method::GET, "/api/users");
        let report = RequestReport::new(&request, 200, Vec::new(), Duration::ZERO);

        let json = serde_json::to_value(&report).expect("serializable");
        assert!(json.get("requestMethod").is_some());
        assert!(json.get("requestPath").is_some());
        assert!(json.get("responseStatusCode").is_some());
        assert!(json.get("overallPassed").is_some());
        assert!(json.get("propertyResults").is_some());
        // Internal timing never leaks into the payload.
        assert!(json.get("responseTimeMs").is_none());
    }
}
