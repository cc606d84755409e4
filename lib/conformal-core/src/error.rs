use http::Method;

/// Errors that can occur while loading, probing, or checking a service.
///
/// This enum covers all failure conditions from document retrieval to property
/// evaluation. All variants implement `std::error::Error` and carry enough
/// context to appear verbatim in a report's `failure_reason`.
#[derive(Debug, derive_more::Error, derive_more::Display, derive_more::From)]
pub enum ConformalError {
    /// HTTP client error from the underlying reqwest library.
    ///
    /// Occurs when network requests fail, timeouts occur, or connection issues arise.
    ReqwestError(reqwest::Error),

    /// URL parsing error when constructing request URLs.
    UrlError(url::ParseError),

    /// HTTP protocol error from the http crate.
    HttpError(http::Error),

    /// Invalid HTTP header name.
    InvalidHeaderName(http::header::InvalidHeaderName),

    /// Invalid HTTP header value.
    ///
    /// Occurs when header values contain invalid characters.
    InvalidHeaderValue(http::header::InvalidHeaderValue),

    /// JSON serialization/deserialization error.
    JsonError(serde_json::Error),

    /// Query parameter serialization error.
    ///
    /// Occurs when converting query pairs to a URL query string.
    QuerySerializationError(serde_urlencoded::ser::Error),

    /// File system error while reading an OpenAPI document from disk.
    IoError(std::io::Error),

    /// The OpenAPI document could not be interpreted at all.
    ///
    /// Per-endpoint problems are recovered by skipping the endpoint; this
    /// variant is reserved for a document that yields no catalog.
    #[display("Invalid OpenAPI document: {error}")]
    #[from(skip)]
    DocumentError {
        /// Description of why the document is unusable.
        error: String,
    },

    /// Invalid base URL configuration for the bundled service client.
    #[display("Invalid base URL: {error}")]
    #[from(skip)]
    InvalidBaseUrl {
        /// Description of why the base URL is invalid.
        error: String,
    },

    /// No catalog endpoint matches a concrete request.
    ///
    /// Occurs when `check_request` is handed a request outside the catalog.
    #[display("No endpoint matches {method} {path}")]
    #[from(skip)]
    EndpointNotFound {
        /// The request method.
        method: Method,
        /// The concrete request path.
        path: String,
    },

    /// A request could not be synthesized for an endpoint.
    ///
    /// Logged and skipped; the run continues with the remaining requests.
    #[display("Failed to synthesize request for {method} {path}: {reason}")]
    #[from(skip)]
    Synthesis {
        /// The endpoint method.
        method: Method,
        /// The endpoint path template.
        path: String,
        /// What could not be produced.
        reason: String,
    },

    /// The backing store failed to answer a sampling query.
    #[display("State source failure for kind '{kind}': {reason}")]
    #[from(skip)]
    StateSource {
        /// The entity kind being sampled.
        kind: String,
        /// The underlying failure.
        reason: String,
    },

    /// State sampling failed twice in a row within one property invocation.
    #[display("sampling unavailable")]
    SamplingUnavailable,

    /// An endpoint filter pattern could not be compiled.
    #[display("Invalid endpoint pattern '{pattern}': {error}")]
    #[from(skip)]
    InvalidPattern {
        /// The offending glob pattern.
        pattern: String,
        /// The compilation failure.
        error: String,
    },

    /// The tester builder is missing a required collaborator.
    #[display("Configuration error: {error}")]
    #[from(skip)]
    Configuration {
        /// What is missing or inconsistent.
        error: String,
    },

    /// A custom business rule was assembled incompletely.
    #[display("Invalid custom property: {error}")]
    #[from(skip)]
    InvalidCustomProperty {
        /// What the builder was missing.
        error: String,
    },

    /// A property exceeded its per-check time budget.
    #[display("Property '{name}' exceeded its time budget of {budget_ms} ms")]
    #[from(skip)]
    PropertyTimeout {
        /// The property that ran over budget.
        name: String,
        /// The configured budget in milliseconds.
        budget_ms: u64,
    },

    /// The operation was cancelled through the cancellation token.
    ///
    /// Reported uniformly as `failure_reason="cancelled"`.
    #[display("cancelled")]
    Cancelled,
}
