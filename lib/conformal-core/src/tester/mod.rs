//! The conformance tester: builder, property registry, and run loop.
//!
//! [`ConformanceTester`] drives the whole pipeline: per endpoint it asks the
//! synthesizer for requests, exchanges each one through the service client,
//! and hands the pair to the [`PropertyEngine`]. Endpoints run sequentially by
//! default; the operator may opt into endpoint-level parallelism, in which
//! case per-endpoint concurrency stays at one to preserve property causality.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use openapiv3::OpenAPI;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::ConformalError;
use crate::catalog::{Endpoint, EndpointCatalog};
use crate::http::{Request, ServiceClient, load_openapi_from_file, load_openapi_from_url};
use crate::pattern::PatternSet;
use crate::property::{
    CustomProperty, CustomPropertyBuilder, DeleteIdempotencyProperty, HeadGetConsistencyProperty,
    MethodNotAllowedAllowProperty, OptionsAllowProperty, Property, PropertyContext, PropertyEngine,
    PutIdempotencyProperty, RequestReport, SafetyProperty,
};
use crate::state::{StateSampler, StateSource, StateTrackingConfig};
use crate::synth::RequestSynthesizer;

/// Names of the built-in safety properties.
pub const SAFETY_PROPERTY_NAMES: [&str; 3] = [
    "GET Method Safety",
    "HEAD Method Safety",
    "OPTIONS Method Safety",
];

/// Names of the built-in idempotency properties.
pub const IDEMPOTENCY_PROPERTY_NAMES: [&str; 2] =
    ["PUT Method Idempotency", "DELETE Method Idempotency"];

/// Names of the built-in response-consistency properties.
pub const CONSISTENCY_PROPERTY_NAMES: [&str; 3] = [
    "HEAD-GET Response Consistency",
    "OPTIONS Allow Header",
    "405 Method Not Allowed Allow Header",
];

const DEFAULT_SEED: u64 = 0x5eed;

#[derive(Debug, Default, Clone)]
enum OpenApiSource {
    #[default]
    Unset,
    Url(String),
    File(PathBuf),
    Document(Box<OpenAPI>),
}

/// Assembles a [`ConformanceTester`].
#[derive(Clone, derive_more::Debug)]
pub struct ConformanceTesterBuilder {
    source: OpenApiSource,
    #[debug(ignore)]
    client: Option<Arc<dyn ServiceClient>>,
    #[debug(ignore)]
    state: Option<Arc<dyn StateSource>>,
    state_tracking: StateTrackingConfig,
    include_only: Vec<String>,
    exclude: Vec<String>,
    excluded_properties: BTreeSet<String>,
    #[debug(ignore)]
    custom_properties: Vec<Arc<dyn Property>>,
    seed: u64,
    property_timeout: Duration,
    max_parallel_endpoints: usize,
}

impl Default for ConformanceTesterBuilder {
    fn default() -> Self {
        Self {
            source: OpenApiSource::Unset,
            client: None,
            state: None,
            state_tracking: StateTrackingConfig::default(),
            include_only: Vec::new(),
            exclude: Vec::new(),
            excluded_properties: BTreeSet::new(),
            custom_properties: Vec::new(),
            seed: DEFAULT_SEED,
            property_timeout: Duration::from_secs(30),
            max_parallel_endpoints: 1,
        }
    }
}

impl ConformanceTesterBuilder {
    /// Fetch the OpenAPI document from a URL at build time.
    ///
    /// See [`crate::http::DEFAULT_OPENAPI_PATH`] for the conventional path.
    #[must_use]
    pub fn with_openapi_url(mut self, url: impl Into<String>) -> Self {
        self.source = OpenApiSource::Url(url.into());
        self
    }

    /// Read the OpenAPI document from disk at build time.
    #[must_use]
    pub fn with_openapi_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.source = OpenApiSource::File(path.into());
        self
    }

    /// Use an already parsed OpenAPI document.
    #[must_use]
    pub fn with_openapi_document(mut self, doc: OpenAPI) -> Self {
        self.source = OpenApiSource::Document(Box::new(doc));
        self
    }

    /// The transport to the service under test.
    #[must_use]
    pub fn with_service_client(mut self, client: impl ServiceClient + 'static) -> Self {
        self.client = Some(Arc::new(client));
        self
    }

    /// The handle onto the service's backing store.
    #[must_use]
    pub fn with_state_source(mut self, state: impl StateSource + 'static) -> Self {
        self.state = Some(Arc::new(state));
        self
    }

    #[must_use]
    pub fn configure_state_tracking(mut self, config: StateTrackingConfig) -> Self {
        self.state_tracking = config;
        self
    }

    /// Only endpoints matching one of these globs are exercised.
    #[must_use]
    pub fn include_only_endpoints<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.include_only.extend(patterns.into_iter().map(Into::into));
        self
    }

    /// Endpoints matching one of these globs are skipped.
    #[must_use]
    pub fn exclude_endpoints<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude.extend(patterns.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn add_custom_property(mut self, property: CustomProperty) -> Self {
        self.custom_properties.push(Arc::new(property));
        self
    }

    /// Defines and registers a business rule in one step.
    pub fn define_business_rule(
        self,
        configure: impl FnOnce(CustomPropertyBuilder) -> CustomPropertyBuilder,
    ) -> Result<Self, ConformalError> {
        let property = configure(CustomProperty::builder()).build()?;
        Ok(self.add_custom_property(property))
    }

    /// Removes one built-in property by its stable name.
    #[must_use]
    pub fn exclude_property(mut self, name: impl Into<String>) -> Self {
        self.excluded_properties.insert(name.into());
        self
    }

    #[must_use]
    pub fn exclude_all_safety_properties(mut self) -> Self {
        self.excluded_properties
            .extend(SAFETY_PROPERTY_NAMES.map(str::to_string));
        self
    }

    #[must_use]
    pub fn exclude_all_idempotency_properties(mut self) -> Self {
        self.excluded_properties
            .extend(IDEMPOTENCY_PROPERTY_NAMES.map(str::to_string));
        self
    }

    #[must_use]
    pub fn exclude_all_response_consistency_properties(mut self) -> Self {
        self.excluded_properties
            .extend(CONSISTENCY_PROPERTY_NAMES.map(str::to_string));
        self
    }

    /// Seed for the request synthesizer.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Per-property time budget (default 30 s).
    #[must_use]
    pub fn with_property_timeout(mut self, timeout: Duration) -> Self {
        self.property_timeout = timeout;
        self
    }

    /// Opt into running distinct endpoints in parallel.
    #[must_use]
    pub fn with_max_parallel_endpoints(mut self, limit: usize) -> Self {
        self.max_parallel_endpoints = limit.max(1);
        self
    }

    /// Loads the OpenAPI description and assembles the tester.
    pub async fn build(
        self,
        cancel: &CancellationToken,
    ) -> Result<ConformanceTester, ConformalError> {
        let Self {
            source,
            client,
            state,
            state_tracking,
            include_only,
            exclude,
            excluded_properties,
            custom_properties,
            seed,
            property_timeout,
            max_parallel_endpoints,
        } = self;

        let client = client.ok_or_else(|| ConformalError::Configuration {
            error: "no service client configured".to_string(),
        })?;
        let state = state.ok_or_else(|| ConformalError::Configuration {
            error: "no state source configured".to_string(),
        })?;

        let doc = match source {
            OpenApiSource::Unset => {
                return Err(ConformalError::Configuration {
                    error: "no OpenAPI source configured".to_string(),
                });
            }
            OpenApiSource::Url(url) => tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(ConformalError::Cancelled),
                doc = load_openapi_from_url(&url) => doc?,
            },
            OpenApiSource::File(path) => load_openapi_from_file(&path)?,
            OpenApiSource::Document(doc) => *doc,
        };
        let catalog = EndpointCatalog::from_document(&doc);
        if catalog.is_empty() {
            warn!("catalog is empty, nothing will be exercised");
        }

        let include = PatternSet::parse(include_only)?;
        let exclude = PatternSet::parse(exclude)?;

        let built_ins: Vec<Arc<dyn Property>> = vec![
            Arc::new(SafetyProperty::get()),
            Arc::new(SafetyProperty::head()),
            Arc::new(SafetyProperty::options()),
            Arc::new(PutIdempotencyProperty),
            Arc::new(DeleteIdempotencyProperty),
            Arc::new(HeadGetConsistencyProperty),
            Arc::new(OptionsAllowProperty),
            Arc::new(MethodNotAllowedAllowProperty),
        ];
        let properties: Vec<Arc<dyn Property>> = built_ins
            .into_iter()
            .filter(|property| !excluded_properties.contains(property.name()))
            .chain(custom_properties)
            .collect();
        info!(
            endpoints = catalog.len(),
            properties = properties.len(),
            "conformance tester ready"
        );

        Ok(ConformanceTester {
            catalog: Arc::new(catalog),
            client,
            state,
            state_tracking,
            properties,
            engine: PropertyEngine::new(property_timeout),
            include,
            exclude,
            seed,
            max_parallel_endpoints,
        })
    }
}

/// A ready-to-run conformance tester.
#[derive(Clone, derive_more::Debug)]
pub struct ConformanceTester {
    catalog: Arc<EndpointCatalog>,
    #[debug(ignore)]
    client: Arc<dyn ServiceClient>,
    #[debug(ignore)]
    state: Arc<dyn StateSource>,
    state_tracking: StateTrackingConfig,
    #[debug(ignore)]
    properties: Vec<Arc<dyn Property>>,
    engine: PropertyEngine,
    include: PatternSet,
    exclude: PatternSet,
    seed: u64,
    max_parallel_endpoints: usize,
}

impl ConformanceTester {
    pub fn builder() -> ConformanceTesterBuilder {
        ConformanceTesterBuilder::default()
    }

    /// The endpoints selected for exercising, filters applied.
    pub fn endpoints(&self) -> Vec<&Endpoint> {
        self.catalog
            .all()
            .iter()
            .filter(|endpoint| self.is_selected(endpoint))
            .collect()
    }

    /// The full loaded catalog, before filtering.
    pub fn catalog(&self) -> &EndpointCatalog {
        &self.catalog
    }

    /// The registered properties in evaluation order.
    pub fn properties(&self) -> &[Arc<dyn Property>] {
        &self.properties
    }

    fn is_selected(&self, endpoint: &Endpoint) -> bool {
        let path = endpoint.path.as_str();
        if !self.include.is_empty() {
            self.include.matches(path)
        } else {
            !self.exclude.matches(path)
        }
    }

    fn context(&self, cancel: &CancellationToken) -> PropertyContext {
        let sampler = StateSampler::new(Arc::clone(&self.state), self.state_tracking.clone());
        PropertyContext::new(
            Arc::clone(&self.client),
            sampler,
            Arc::clone(&self.catalog),
            cancel.clone(),
        )
    }

    /// Exercises every selected endpoint with up to `max_per_endpoint` requests.
    ///
    /// Property failures never terminate the run; cancellation is observed
    /// between endpoints and, best-effort, between requests, returning the
    /// reports gathered so far.
    pub async fn run_all(
        &self,
        max_per_endpoint: usize,
        cancel: &CancellationToken,
    ) -> Vec<RequestReport> {
        let selected: Vec<(usize, Endpoint)> = self
            .catalog
            .all()
            .iter()
            .filter(|endpoint| self.is_selected(endpoint))
            .cloned()
            .enumerate()
            .collect();

        if self.max_parallel_endpoints > 1 {
            self.run_parallel(selected, max_per_endpoint, cancel).await
        } else {
            let mut reports = Vec::new();
            for (index, endpoint) in selected {
                if cancel.is_cancelled() {
                    break;
                }
                let endpoint_reports = self
                    .run_endpoint(index, &endpoint, max_per_endpoint, cancel)
                    .await;
                reports.extend(endpoint_reports);
            }
            reports
        }
    }

    async fn run_parallel(
        &self,
        selected: Vec<(usize, Endpoint)>,
        max_per_endpoint: usize,
        cancel: &CancellationToken,
    ) -> Vec<RequestReport> {
        let semaphore = Arc::new(Semaphore::new(self.max_parallel_endpoints));
        let mut tasks = JoinSet::new();
        for (index, endpoint) in selected {
            let tester = self.clone();
            let semaphore = Arc::clone(&semaphore);
            let cancel = cancel.clone();
            tasks.spawn(async move {
                let _permit = match semaphore.acquire().await {
                    Ok(permit) => permit,
                    Err(_closed) => return (index, Vec::new()),
                };
                if cancel.is_cancelled() {
                    return (index, Vec::new());
                }
                let reports = tester
                    .run_endpoint(index, &endpoint, max_per_endpoint, &cancel)
                    .await;
                (index, reports)
            });
        }

        let mut indexed: Vec<(usize, Vec<RequestReport>)> = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(entry) => indexed.push(entry),
                Err(join_error) => warn!(%join_error, "endpoint task failed"),
            }
        }
        indexed.sort_by_key(|(index, _)| *index);
        indexed
            .into_iter()
            .flat_map(|(_, reports)| reports)
            .collect()
    }

    async fn run_endpoint(
        &self,
        index: usize,
        endpoint: &Endpoint,
        max_per_endpoint: usize,
        cancel: &CancellationToken,
    ) -> Vec<RequestReport> {
        let mut synthesizer = RequestSynthesizer::new(
            Arc::clone(&self.state),
            self.seed.wrapping_add(index as u64),
        );
        let requests = match synthesizer
            .synthesize(endpoint, max_per_endpoint, cancel)
            .await
        {
            Ok(requests) => requests,
            Err(error) => {
                warn!(endpoint = %endpoint.path, %error, "synthesis failed, endpoint skipped");
                return Vec::new();
            }
        };
        debug!(endpoint = %endpoint.path, method = %endpoint.method, count = requests.len(), "requests synthesized");

        let ctx = self.context(cancel);
        let mut reports = Vec::new();
        for request in requests {
            if cancel.is_cancelled() {
                break;
            }
            let started = Instant::now();
            match self.client.send(&request, cancel).await {
                Ok(response) => {
                    let response_time = started.elapsed();
                    let mut report = self
                        .engine
                        .evaluate(&self.properties, &request, &response, &ctx)
                        .await;
                    report.response_time_ms =
                        u64::try_from(response_time.as_millis()).unwrap_or(u64::MAX);
                    reports.push(report);
                }
                Err(ConformalError::Cancelled) => break,
                Err(error) => {
                    warn!(%request, %error, "request failed to send");
                    reports.push(RequestReport::request_failed(&request, &error));
                }
            }
        }
        reports
    }

    /// Checks a single caller-provided request.
    ///
    /// The request must match a catalog endpoint; transport failures yield the
    /// same synthetic failing report as in [`ConformanceTester::run_all`].
    pub async fn check_request(
        &self,
        request: Request,
        cancel: &CancellationToken,
    ) -> Result<RequestReport, ConformalError> {
        if self
            .catalog
            .matches(&request.path, &request.method)
            .is_none()
        {
            return Err(ConformalError::EndpointNotFound {
                method: request.method.clone(),
                path: request.path.clone(),
            });
        }

        let started = Instant::now();
        let response = match self.client.send(&request, cancel).await {
            Ok(response) => response,
            Err(ConformalError::Cancelled) => return Err(ConformalError::Cancelled),
            Err(error) => return Ok(RequestReport::request_failed(&request, &error)),
        };
        let response_time = started.elapsed();

        let ctx = self.context(cancel);
        let mut report = self
            .engine
            .evaluate(&self.properties, &request, &response, &ctx)
            .await;
        report.response_time_ms = u64::try_from(response_time.as_millis()).unwrap_or(u64::MAX);
        Ok(report)
    }
}
