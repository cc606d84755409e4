//! Concrete request synthesis.
//!
//! For every endpoint the synthesizer draws parameter values from the schema
//! constraints and, for identifier-typed path parameters, from live keys
//! fetched through the [`StateSource`]. The randomness source is seeded, so
//! the same seed, catalog, and live data yield the same request sequence.

use std::sync::Arc;

use http::Method;
use http::header::{COOKIE, HeaderName, HeaderValue, USER_AGENT};
use mime::Mime;
use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::ConformalError;
use crate::catalog::{
    Endpoint, ObjectSchema, Parameter, ParameterLocation, RequestBodySpec, Schema,
    is_json_media_type,
};
use crate::http::Request;
use crate::state::{EntityKindDescriptor, StateSource};

mod values;
use self::values::{ValueGenerator, scalar_of};

const DEFAULT_USER_AGENT: &str = concat!("conformal-core/", env!("CARGO_PKG_VERSION"));

/// Builds concrete [`Request`]s for catalog endpoints.
#[derive(derive_more::Debug)]
pub struct RequestSynthesizer {
    #[debug(ignore)]
    state: Arc<dyn StateSource>,
    values: ValueGenerator,
}

impl RequestSynthesizer {
    pub fn new(state: Arc<dyn StateSource>, seed: u64) -> Self {
        Self {
            state,
            values: ValueGenerator::new(seed),
        }
    }

    /// Produces up to `limit` requests for the endpoint.
    ///
    /// Requests whose required path parameters cannot be valued are dropped;
    /// the returned list may therefore be shorter than `limit`.
    pub async fn synthesize(
        &mut self,
        endpoint: &Endpoint,
        limit: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<Request>, ConformalError> {
        let kinds = match self.state.entity_kinds().await {
            Ok(kinds) => kinds,
            Err(error) => {
                warn!(%error, "entity kinds unavailable, synthesizing without live keys");
                Vec::new()
            }
        };

        let mut requests = Vec::with_capacity(limit);
        for _ in 0..limit {
            if cancel.is_cancelled() {
                return Err(ConformalError::Cancelled);
            }
            if let Some(request) = self.synthesize_one(endpoint, &kinds).await {
                requests.push(request);
            } else {
                debug!(endpoint = %endpoint.path, method = %endpoint.method, "request dropped");
            }
        }
        Ok(requests)
    }

    async fn synthesize_one(
        &mut self,
        endpoint: &Endpoint,
        kinds: &[EntityKindDescriptor],
    ) -> Option<Request> {
        // Path parameters first; a missing required value drops the request.
        let mut path_values: Vec<(String, String)> = Vec::new();
        for parameter in endpoint.parameters_in(ParameterLocation::Path) {
            match self.path_param_value(endpoint, parameter, kinds).await {
                Some(value) => path_values.push((parameter.name.clone(), encode_segment(&value))),
                None => return None,
            }
        }
        let path = endpoint.path.render(|name| {
            path_values
                .iter()
                .find(|(declared, _)| declared == name)
                .map(|(_, value)| value.clone())
        })?;

        let mut request = Request::new(endpoint.method.clone(), path);

        for parameter in endpoint.parameters_in(ParameterLocation::Query) {
            let value = self.param_value(parameter);
            request = request.with_query_pair(parameter.name.clone(), value);
        }

        for parameter in endpoint.parameters_in(ParameterLocation::Header) {
            let value = self.param_value(parameter);
            let name = HeaderName::from_bytes(parameter.name.as_bytes());
            let value = HeaderValue::from_str(&value);
            match (name, value) {
                (Ok(name), Ok(value)) => {
                    request.headers.insert(name, value);
                }
                _ => warn!(header = %parameter.name, "unrepresentable header parameter, skipped"),
            }
        }
        if !request.headers.contains_key(USER_AGENT) {
            request
                .headers
                .insert(USER_AGENT, HeaderValue::from_static(DEFAULT_USER_AGENT));
        }

        let cookies: Vec<String> = endpoint
            .parameters_in(ParameterLocation::Cookie)
            .map(|parameter| format!("{}={}", parameter.name, self.param_value(parameter)))
            .collect();
        if !cookies.is_empty() {
            if let Ok(value) = HeaderValue::from_str(&cookies.join("; ")) {
                request.headers.insert(COOKIE, value);
            }
        }

        if writes_body(&endpoint.method) {
            if let Some(spec) = &endpoint.body {
                if let Some((media_type, data)) = self.build_body(spec) {
                    request = request.with_body(media_type, data);
                }
            }
        }

        Some(request)
    }

    /// Values a path parameter: live key, document example, then schema.
    async fn path_param_value(
        &mut self,
        endpoint: &Endpoint,
        parameter: &Parameter,
        kinds: &[EntityKindDescriptor],
    ) -> Option<String> {
        if looks_like_identifier(parameter) {
            if let Some(kind) = guess_entity_kind(endpoint, parameter, kinds) {
                match self.state.random_key(&kind.name).await {
                    Ok(Some(key)) => return Some(scalar_of(&key)),
                    Ok(None) => debug!(kind = %kind.name, "no live key available"),
                    Err(error) => warn!(kind = %kind.name, %error, "live key lookup failed"),
                }
            }
        }
        if let Some(example) = &parameter.example {
            return Some(scalar_of(example));
        }
        let value = self.values.scalar_for(&parameter.schema);
        (!value.is_empty()).then_some(value)
    }

    fn param_value(&mut self, parameter: &Parameter) -> String {
        parameter
            .example
            .as_ref()
            .map_or_else(|| self.values.scalar_for(&parameter.schema), scalar_of)
    }

    fn build_body(&mut self, spec: &RequestBodySpec) -> Option<(Mime, Vec<u8>)> {
        let media = spec.preferred_media_type()?.to_string();
        let schema = spec
            .schema
            .clone()
            .unwrap_or_else(|| Schema::Object(ObjectSchema::default()));
        let value = self.values.value_for(&schema);

        if is_json_media_type(&media) {
            let data = serde_json::to_vec(&value).ok()?;
            Some((mime::APPLICATION_JSON, data))
        } else if media.to_ascii_lowercase().contains("xml") {
            let media_type = media.parse::<Mime>().unwrap_or(mime::TEXT_XML);
            Some((media_type, xml_document(&value).into_bytes()))
        } else {
            Some((mime::TEXT_PLAIN, scalar_of(&value).into_bytes()))
        }
    }
}

fn writes_body(method: &Method) -> bool {
    *method == Method::POST || *method == Method::PUT || *method == Method::PATCH
}

fn encode_segment(value: &str) -> String {
    utf8_percent_encode(value, NON_ALPHANUMERIC).to_string()
}

fn looks_like_identifier(parameter: &Parameter) -> bool {
    let name = parameter.name.to_lowercase();
    name == "id"
        || name.ends_with("id")
        || (name.contains("id") && parameter.schema.is_identifier_compatible())
}

/// The lowercase stem used to guess the entity kind: the parameter name with
/// `id`, `_`, and `-` stripped, falling back to the singular of the resource
/// segment preceding the parameter.
fn guess_entity_kind<'a>(
    endpoint: &Endpoint,
    parameter: &Parameter,
    kinds: &'a [EntityKindDescriptor],
) -> Option<&'a EntityKindDescriptor> {
    let mut stem = identifier_stem(&parameter.name);
    if stem.is_empty() {
        stem = resource_stem(endpoint.path.as_str(), &parameter.name)?;
    }
    kinds
        .iter()
        .find(|kind| kind.name.to_lowercase().contains(&stem))
}

fn identifier_stem(name: &str) -> String {
    let lower = name.to_lowercase();
    let stripped = lower.strip_suffix("id").unwrap_or(&lower);
    stripped.replace(['_', '-'], "")
}

fn resource_stem(template: &str, parameter: &str) -> Option<String> {
    use cruet::*;

    let placeholder = format!("{{{parameter}}}");
    let segments: Vec<&str> = template.split('/').collect();
    let position = segments.iter().position(|segment| *segment == placeholder)?;
    let resource = segments[..position]
        .iter()
        .rev()
        .find(|segment| !segment.is_empty() && !segment.starts_with('{'))?;
    Some(resource.to_lowercase().to_singular())
}

fn xml_document(value: &serde_json::Value) -> String {
    format!("<root>{}</root>", xml_fragment(value))
}

fn xml_fragment(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Object(map) => map
            .iter()
            .map(|(key, value)| format!("<{key}>{}</{key}>", xml_fragment(value)))
            .collect(),
        serde_json::Value::Array(items) => items
            .iter()
            .map(|item| format!("<item>{}</item>", xml_fragment(item)))
            .collect(),
        other => xml_escape(&scalar_of(other)),
    }
}

fn xml_escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}
