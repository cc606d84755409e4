//! Request/response model and the transport seam.
//!
//! The engine owns [`Request`] and [`Response`] values for the duration of one
//! probe. Request bodies are materialized as owned byte buffers so a request
//! can be cloned and resent without re-reading a consumed stream; the
//! transport only ever borrows them.

use std::fmt;

use async_trait::async_trait;
use http::header::{CONTENT_LENGTH, HeaderName, HeaderValue};
use http::{HeaderMap, Method, StatusCode};
use mime::Mime;
use tokio_util::sync::CancellationToken;

use crate::ConformalError;

mod client;
pub use self::client::{
    DEFAULT_OPENAPI_PATH, HttpServiceClient, HttpServiceClientBuilder, load_openapi_from_file,
    load_openapi_from_url,
};

/// An owned request body with its media type.
#[derive(Clone, derive_more::Debug)]
pub struct RequestBody {
    pub media_type: Mime,
    #[debug(ignore)]
    pub data: Vec<u8>,
}

/// A concrete HTTP request against the service under test.
///
/// Created by the synthesizer (or handed in by the caller), sent once by the
/// orchestrator, and possibly cloned by properties that need to replay it.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    /// Absolute path, percent-encoded, no query string.
    pub path: String,
    /// Query pairs in declaration order.
    pub query: Vec<(String, String)>,
    pub headers: HeaderMap,
    pub body: Option<RequestBody>,
}

impl Request {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            headers: HeaderMap::new(),
            body: None,
        }
    }

    #[must_use]
    pub fn with_query_pair(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    #[must_use]
    pub fn with_body(mut self, media_type: Mime, data: Vec<u8>) -> Self {
        self.body = Some(RequestBody { media_type, data });
        self
    }

    /// The query pairs as a URL query string, `None` when there are none.
    pub fn query_string(&self) -> Result<Option<String>, ConformalError> {
        if self.query.is_empty() {
            return Ok(None);
        }
        let query = serde_urlencoded::to_string(&self.query)?;
        Ok(Some(query))
    }

    /// Path plus query string, as sent on the wire.
    pub fn path_and_query(&self) -> Result<String, ConformalError> {
        Ok(match self.query_string()? {
            Some(query) => format!("{}?{query}", self.path),
            None => self.path.clone(),
        })
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.path)
    }
}

/// An HTTP response as observed by the engine.
#[derive(Clone, derive_more::Debug)]
pub struct Response {
    pub status: StatusCode,
    pub headers: HeaderMap,
    #[debug(ignore)]
    pub body: Vec<u8>,
    pub content_type: Option<Mime>,
}

impl Response {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// The declared `Content-Length`, when present and parsable.
    pub fn content_length(&self) -> Option<u64> {
        self.headers
            .get(CONTENT_LENGTH)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse().ok())
    }

    /// All values of a header joined with `", "`, `None` when absent.
    pub fn header_joined(&self, name: &HeaderName) -> Option<String> {
        let values: Vec<&str> = self
            .headers
            .get_all(name)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .collect();
        if values.is_empty() {
            None
        } else {
            Some(values.join(", "))
        }
    }
}

/// The transport to the service under test.
///
/// Implementations send one request and return the response; they must be
/// usable concurrently and should return promptly when the token is cancelled.
#[async_trait]
pub trait ServiceClient: Send + Sync {
    async fn send(
        &self,
        request: &Request,
        cancel: &CancellationToken,
    ) -> Result<Response, ConformalError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_build_query_string() {
        let request = Request::new(Method::GET, "/api/users")
            .with_query_pair("page", "2")
            .with_query_pair("q", "a b");

        let path_and_query = request.path_and_query().expect("valid query");
        assert_eq!(path_and_query, "/api/users?page=2&q=a+b");
    }

    #[test]
    fn should_omit_empty_query() {
        let request = Request::new(Method::GET, "/api/users");
        assert_eq!(request.path_and_query().expect("valid"), "/api/users");
    }

    #[test]
    fn should_clone_body_bytes_independently() {
        let request = Request::new(Method::POST, "/api/posts")
            .with_body(mime::APPLICATION_JSON, br#"{"title":"t"}"#.to_vec());

        let clone = request.clone();
        let original = request.body.expect("body");
        let cloned = clone.body.expect("body");
        assert_eq!(original.data, cloned.data);
    }

    #[test]
    fn should_join_repeated_headers() {
        let mut response = Response {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: Vec::new(),
            content_type: None,
        };
        response
            .headers
            .append(http::header::VARY, HeaderValue::from_static("Accept"));
        response
            .headers
            .append(http::header::VARY, HeaderValue::from_static("Origin"));

        assert_eq!(
            response.header_joined(&http::header::VARY).as_deref(),
            Some("Accept, Origin")
        );
        assert_eq!(response.header_joined(&http::header::ALLOW), None);
    }

    #[test]
    fn should_parse_content_length() {
        let mut response = Response {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: vec![0; 5],
            content_type: None,
        };
        response
            .headers
            .insert(CONTENT_LENGTH, HeaderValue::from_static("5"));
        assert_eq!(response.content_length(), Some(5));
    }
}
