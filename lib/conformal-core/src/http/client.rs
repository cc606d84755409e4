use std::fmt::Debug;
use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;

use async_trait::async_trait;
use headers::{ContentType, HeaderMapExt};
use http::uri::{PathAndQuery, Scheme};
use http::{HeaderMap, Uri};
use mime::Mime;
use openapiv3::OpenAPI;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

use super::{Request, Response, ServiceClient};
use crate::ConformalError;

/// Where services conventionally expose their OpenAPI description.
pub const DEFAULT_OPENAPI_PATH: &str = "/swagger/v1/swagger.json";

/// A [`ServiceClient`] backed by reqwest.
#[derive(Debug, Clone)]
pub struct HttpServiceClient {
    client: reqwest::Client,
    base_uri: Uri,
}

impl HttpServiceClient {
    pub fn builder() -> HttpServiceClientBuilder {
        HttpServiceClientBuilder::default()
    }

    /// The absolute URL for a request path and query.
    fn url_for(&self, request: &Request) -> Result<Url, ConformalError> {
        let base = self.base_uri.to_string();
        let url = format!(
            "{}/{}",
            base.trim_end_matches('/'),
            request.path.trim_start_matches('/')
        );
        let mut url = url.parse::<Url>()?;
        if let Some(query) = request.query_string()? {
            url.set_query(Some(&query));
        }
        Ok(url)
    }

    fn build_request(&self, request: &Request) -> Result<reqwest::Request, ConformalError> {
        let url = self.url_for(request)?;
        let mut sendable = reqwest::Request::new(request.method.clone(), url);

        let req_headers = sendable.headers_mut();
        for (name, value) in &request.headers {
            req_headers.append(name.clone(), value.clone());
        }
        if let Some(body) = &request.body {
            req_headers.typed_insert(ContentType::from(body.media_type.clone()));
            // The engine keeps ownership of the buffer; the wire gets a copy.
            *sendable.body_mut() = Some(reqwest::Body::from(body.data.clone()));
        }
        Ok(sendable)
    }
}

#[async_trait]
impl ServiceClient for HttpServiceClient {
    async fn send(
        &self,
        request: &Request,
        cancel: &CancellationToken,
    ) -> Result<Response, ConformalError> {
        let sendable = self.build_request(request)?;
        debug!(%request, "sending...");

        let response = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(ConformalError::Cancelled),
            response = self.client.execute(sendable) => response?,
        };

        let status = response.status();
        let headers: HeaderMap = response.headers().clone();
        let content_type = headers
            .get(http::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse::<Mime>().ok());
        let body = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(ConformalError::Cancelled),
            body = response.bytes() => body?.to_vec(),
        };
        debug!(%status, bytes = body.len(), "...received");

        Ok(Response {
            status,
            headers,
            body,
            content_type,
        })
    }
}

/// Builder for [`HttpServiceClient`].
#[derive(Debug, Clone)]
pub struct HttpServiceClientBuilder {
    client: reqwest::Client,
    scheme: Scheme,
    host: String,
    port: u16,
    base_path: Option<PathAndQuery>,
}

impl HttpServiceClientBuilder {
    pub fn build(self) -> Result<HttpServiceClient, ConformalError> {
        let Self {
            client,
            scheme,
            host,
            port,
            base_path,
        } = self;

        let builder = Uri::builder()
            .scheme(scheme)
            .authority(format!("{host}:{port}"));
        let builder = if let Some(path) = &base_path {
            builder.path_and_query(path.path())
        } else {
            builder.path_and_query("/")
        };
        let base_uri = builder.build()?;

        Ok(HttpServiceClient { client, base_uri })
    }

    pub fn scheme(mut self, scheme: Scheme) -> Self {
        self.scheme = scheme;
        self
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn base_path<P>(mut self, base_path: P) -> Result<Self, ConformalError>
    where
        P: TryInto<PathAndQuery>,
        P::Error: Debug + 'static,
    {
        let base_path = base_path
            .try_into()
            .map_err(|err| ConformalError::InvalidBaseUrl {
                error: format!("{err:?}"),
            })?;
        self.base_path = Some(base_path);
        Ok(self)
    }
}

impl Default for HttpServiceClientBuilder {
    fn default() -> Self {
        Self {
            client: reqwest::Client::new(),
            scheme: Scheme::HTTP,
            host: IpAddr::V4(Ipv4Addr::LOCALHOST).to_string(),
            port: 80,
            base_path: None,
        }
    }
}

/// Fetches and parses an OpenAPI 3.x document served over HTTP.
pub async fn load_openapi_from_url(url: &str) -> Result<OpenAPI, ConformalError> {
    let url = url.parse::<Url>()?;
    debug!(%url, "fetching OpenAPI document");
    let response = reqwest::get(url).await?;
    let doc = response.json::<OpenAPI>().await?;
    Ok(doc)
}

/// Reads and parses an OpenAPI 3.x document from disk.
pub fn load_openapi_from_file(path: impl AsRef<Path>) -> Result<OpenAPI, ConformalError> {
    let text = std::fs::read_to_string(path)?;
    let doc = serde_json::from_str::<OpenAPI>(&text)?;
    Ok(doc)
}

#[cfg(test)]
mod tests {
    use http::Method;

    use super::*;

    #[test]
    fn should_build_localhost_client_by_default() {
        let client = HttpServiceClient::builder()
            .build()
            .expect("should build client");

        insta::assert_snapshot!(client.base_uri.to_string(), @"http://127.0.0.1:80/");
    }

    #[test]
    fn should_build_url_with_base_path_and_query() {
        let client = HttpServiceClient::builder()
            .host("api.example.com")
            .port(8080)
            .base_path("/v1")
            .expect("valid base path")
            .build()
            .expect("should build client");

        let request = Request::new(Method::GET, "/users").with_query_pair("page", "2");
        let url = client.url_for(&request).expect("valid url");
        assert_eq!(url.as_str(), "http://api.example.com:8080/v1/users?page=2");
    }

    #[test]
    fn should_reject_invalid_base_path() {
        let result = HttpServiceClient::builder().base_path("not a path");
        assert!(result.is_err());
    }

    #[test]
    fn should_set_content_type_from_body() {
        let client = HttpServiceClient::builder()
            .build()
            .expect("should build client");
        let request = Request::new(Method::POST, "/posts")
            .with_body(mime::APPLICATION_JSON, b"{}".to_vec());

        let sendable = client.build_request(&request).expect("buildable");
        let content_type = sendable
            .headers()
            .get(http::header::CONTENT_TYPE)
            .expect("content type set");
        assert_eq!(content_type, "application/json");
    }
}
