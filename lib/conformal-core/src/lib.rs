#![cfg_attr(docsrs, feature(doc_cfg))]
//! Property-based conformance testing for HTTP services.
//!
//! `conformal-core` exercises a running service against the HTTP semantics it
//! should honor. Given the service's OpenAPI description and a handle onto its
//! backing store, the engine enumerates endpoints, synthesizes realistic
//! requests, sends them, and decides whether each request/response pair
//! satisfies a battery of RFC 7231 properties:
//!
//! - **Safety**: GET, HEAD, and OPTIONS must not cause observable state
//!   changes, verified by sampling the persistent store.
//! - **Idempotency**: PUT and DELETE applied twice must yield the same state
//!   and a coherent status sequence, verified by replaying the request.
//! - **Response consistency**: HEAD must mirror GET, OPTIONS and 405
//!   responses must advertise accurate `Allow` headers.
//!
//! Custom business rules join the same pipeline through
//! [`CustomPropertyBuilder`].
//!
//! # Collaborators
//!
//! The engine stays agnostic of transports and storage backends through two
//! traits:
//!
//! - [`ServiceClient`] sends one request and returns the response. The
//!   bundled [`HttpServiceClient`] covers plain HTTP services.
//! - [`StateSource`](state::StateSource) enumerates entity kinds, counts
//!   rows, and materializes records, so the engine can detect side effects.
//!   One small adapter per storage backend is all an integration needs.
//!
//! # Example
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use conformal_core::state::{EntityKindDescriptor, StateSource};
//! use conformal_core::{
//!     CancellationToken, ConformalError, ConformanceReport, ConformanceTester,
//!     HttpServiceClient,
//! };
//!
//! #[derive(Debug)]
//! struct MyStore;
//!
//! #[async_trait]
//! impl StateSource for MyStore {
//!     async fn entity_kinds(&self) -> Result<Vec<EntityKindDescriptor>, ConformalError> {
//!         Ok(vec![])
//!     }
//!
//!     async fn count(&self, _kind: &str) -> Result<u64, ConformalError> {
//!         Ok(0)
//!     }
//!
//!     async fn list_all(&self, _kind: &str) -> Result<Vec<serde_json::Value>, ConformalError> {
//!         Ok(vec![])
//!     }
//!
//!     async fn random_key(&self, _kind: &str) -> Result<Option<serde_json::Value>, ConformalError> {
//!         Ok(None)
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = HttpServiceClient::builder()
//!         .host("localhost")
//!         .port(8080)
//!         .build()?;
//!
//!     let cancel = CancellationToken::new();
//!     let tester = ConformanceTester::builder()
//!         .with_openapi_url("http://localhost:8080/swagger/v1/swagger.json")
//!         .with_service_client(client)
//!         .with_state_source(MyStore)
//!         .build(&cancel)
//!         .await?;
//!
//!     let results = tester.run_all(5, &cancel).await;
//!     let report = ConformanceReport::from_reports("my service", results);
//!     assert!(report.summary.failed_tests == 0);
//!     Ok(())
//! }
//! ```
//!
//! # Determinism
//!
//! Request synthesis draws every random value from one seeded generator
//! ([`ConformanceTesterBuilder::with_seed`]): the same seed, catalog, and
//! live data produce the same request sequence.
//!
//! # Cancellation
//!
//! One [`CancellationToken`] propagates from the top-level call through
//! synthesis, sending, state sampling, and property checks. Cancellation
//! collapses remaining work; reports gathered so far are still returned.

pub mod catalog;
mod error;
pub mod http;
pub mod pattern;
pub mod property;
pub mod report;
pub mod state;
pub mod synth;
pub mod tester;

pub use self::catalog::EndpointCatalog;
pub use self::error::ConformalError;
pub use self::http::{HttpServiceClient, Request, Response, ServiceClient};
pub use self::pattern::EndpointPattern;
pub use self::property::{
    CustomProperty, CustomPropertyBuilder, Property, PropertyEngine, PropertyResult, RequestReport,
};
pub use self::report::ConformanceReport;
pub use self::state::{StateSampler, StateSnapshot, StateSource, StateTrackingConfig};
pub use self::synth::RequestSynthesizer;
pub use self::tester::{ConformanceTester, ConformanceTesterBuilder};

/// Re-exported so callers do not need a direct `tokio-util` dependency.
pub use tokio_util::sync::CancellationToken;
