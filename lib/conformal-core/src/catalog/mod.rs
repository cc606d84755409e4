//! Endpoint model built from an OpenAPI 3.x description.
//!
//! [`EndpointCatalog::from_document`] normalizes a parsed document into a flat
//! sequence of [`Endpoint`]s, one per (path template, method) pair. The load is
//! best-effort: endpoints that cannot be interpreted are skipped with a
//! warning and the surviving set is returned.

use http::Method;
use indexmap::IndexMap;
use openapiv3::{OpenAPI, Operation, ParameterSchemaOrContent, PathItem, ReferenceOr, StatusCode};
use tracing::{debug, warn};

mod path;
pub use self::path::PathTemplate;

mod schema;
pub use self::schema::{
    ArraySchema, IntegerSchema, NumberSchema, ObjectSchema, Schema, StringSchema,
};
use self::schema::SchemaResolver;

/// Where a parameter is carried in the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, derive_more::Display)]
pub enum ParameterLocation {
    #[display("path")]
    Path,
    #[display("query")]
    Query,
    #[display("header")]
    Header,
    #[display("cookie")]
    Cookie,
}

/// A single request parameter declared by an endpoint.
#[derive(Debug, Clone)]
pub struct Parameter {
    pub name: String,
    pub location: ParameterLocation,
    pub required: bool,
    pub schema: Schema,
    /// Example value from the document, preferred over synthesis when present.
    pub example: Option<serde_json::Value>,
}

/// Declared request body: admissible media types plus the schema of the
/// preferred one (JSON when offered).
#[derive(Debug, Clone)]
pub struct RequestBodySpec {
    /// Media types in declaration order.
    pub media_types: Vec<String>,
    pub schema: Option<Schema>,
}

impl RequestBodySpec {
    /// The media type synthesis should use: JSON when declared, else the first.
    pub fn preferred_media_type(&self) -> Option<&str> {
        self.media_types
            .iter()
            .find(|media| is_json_media_type(media))
            .or_else(|| self.media_types.first())
            .map(String::as_str)
    }
}

pub(crate) fn is_json_media_type(media: &str) -> bool {
    let essence = media.split(';').next().unwrap_or(media).trim();
    essence.eq_ignore_ascii_case("application/json") || essence.to_ascii_lowercase().ends_with("+json")
}

/// One operation of the service under test.
///
/// Immutable once built; path + method is unique within a catalog.
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub path: PathTemplate,
    pub method: Method,
    /// Parameters in declaration order (path-item level first, then operation
    /// level; operation-level declarations win on conflicts).
    pub parameters: Vec<Parameter>,
    pub body: Option<RequestBodySpec>,
    /// Response schemas by status code, JSON media preferred.
    pub responses: IndexMap<u16, Schema>,
}

impl Endpoint {
    /// Parameters carried in the given location, declaration order preserved.
    pub fn parameters_in(&self, location: ParameterLocation) -> impl Iterator<Item = &Parameter> {
        self.parameters
            .iter()
            .filter(move |parameter| parameter.location == location)
    }
}

/// The normalized set of endpoints exposed by a service.
#[derive(Debug, Clone, Default)]
pub struct EndpointCatalog {
    endpoints: Vec<Endpoint>,
}

impl EndpointCatalog {
    /// Builds a catalog from a parsed OpenAPI document.
    ///
    /// Unparsable path items and operations are skipped and logged; the
    /// returned catalog holds every endpoint that survived.
    pub fn from_document(doc: &OpenAPI) -> Self {
        let resolver = SchemaResolver::new(doc);
        let mut endpoints: Vec<Endpoint> = Vec::new();

        for (raw_path, item) in &doc.paths.paths {
            let ReferenceOr::Item(path_item) = item else {
                warn!(path = %raw_path, "skipping referenced path item");
                continue;
            };
            let template = PathTemplate::parse(raw_path.as_str());

            for (method, operation) in operations_of(path_item) {
                let duplicate = endpoints
                    .iter()
                    .any(|existing| existing.method == method && existing.path.as_str() == raw_path);
                if duplicate {
                    warn!(path = %raw_path, %method, "duplicate endpoint, keeping the first");
                    continue;
                }
                match build_endpoint(&resolver, doc, template.clone(), method.clone(), path_item, operation) {
                    Ok(endpoint) => endpoints.push(endpoint),
                    Err(reason) => {
                        warn!(path = %raw_path, %method, reason = %reason, "skipping unparsable endpoint");
                    }
                }
            }
        }

        debug!(count = endpoints.len(), "catalog loaded");
        Self { endpoints }
    }

    /// All endpoints, document declaration order.
    pub fn all(&self) -> &[Endpoint] {
        &self.endpoints
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    /// The methods declared at the template matching a concrete path.
    ///
    /// Deduplicated, in catalog order.
    pub fn methods_for(&self, concrete_path: &str) -> Vec<Method> {
        let mut methods = Vec::new();
        for endpoint in &self.endpoints {
            if endpoint.path.matches(concrete_path) && !methods.contains(&endpoint.method) {
                methods.push(endpoint.method.clone());
            }
        }
        methods
    }

    /// The endpoint a concrete request comes from, if any.
    pub fn matches(&self, concrete_path: &str, method: &Method) -> Option<&Endpoint> {
        self.endpoints
            .iter()
            .find(|endpoint| endpoint.method == *method && endpoint.path.matches(concrete_path))
    }
}

fn operations_of(path_item: &PathItem) -> impl Iterator<Item = (Method, &Operation)> {
    [
        (Method::GET, &path_item.get),
        (Method::HEAD, &path_item.head),
        (Method::OPTIONS, &path_item.options),
        (Method::POST, &path_item.post),
        (Method::PUT, &path_item.put),
        (Method::PATCH, &path_item.patch),
        (Method::DELETE, &path_item.delete),
    ]
    .into_iter()
    .filter_map(|(method, operation)| operation.as_ref().map(|op| (method, op)))
}

fn build_endpoint(
    resolver: &SchemaResolver<'_>,
    doc: &OpenAPI,
    path: PathTemplate,
    method: Method,
    path_item: &PathItem,
    operation: &Operation,
) -> Result<Endpoint, String> {
    let mut parameters: Vec<Parameter> = Vec::new();
    let declared = path_item
        .parameters
        .iter()
        .chain(operation.parameters.iter());
    for parameter in declared {
        let Some(parameter) = resolve_parameter(doc, parameter) else {
            return Err("unresolvable parameter reference".to_string());
        };
        let converted = convert_parameter(resolver, parameter)?;
        // Operation-level declarations replace path-item-level ones.
        parameters.retain(|existing| {
            !(existing.name == converted.name && existing.location == converted.location)
        });
        parameters.push(converted);
    }

    let body = convert_body(resolver, doc, operation)?;
    let responses = convert_responses(resolver, operation);

    Ok(Endpoint {
        path,
        method,
        parameters,
        body,
        responses,
    })
}

fn resolve_parameter<'a>(
    doc: &'a OpenAPI,
    parameter: &'a ReferenceOr<openapiv3::Parameter>,
) -> Option<&'a openapiv3::Parameter> {
    match parameter {
        ReferenceOr::Item(item) => Some(item),
        ReferenceOr::Reference { reference } => {
            let name = reference.strip_prefix("#/components/parameters/")?;
            match doc.components.as_ref()?.parameters.get(name)? {
                ReferenceOr::Item(item) => Some(item),
                ReferenceOr::Reference { .. } => None,
            }
        }
    }
}

fn convert_parameter(
    resolver: &SchemaResolver<'_>,
    parameter: &openapiv3::Parameter,
) -> Result<Parameter, String> {
    let (location, data) = match parameter {
        openapiv3::Parameter::Path { parameter_data, .. } => {
            (ParameterLocation::Path, parameter_data)
        }
        openapiv3::Parameter::Query { parameter_data, .. } => {
            (ParameterLocation::Query, parameter_data)
        }
        openapiv3::Parameter::Header { parameter_data, .. } => {
            (ParameterLocation::Header, parameter_data)
        }
        openapiv3::Parameter::Cookie { parameter_data, .. } => {
            (ParameterLocation::Cookie, parameter_data)
        }
    };

    let schema = match &data.format {
        ParameterSchemaOrContent::Schema(schema) => resolver.convert_ref(schema),
        ParameterSchemaOrContent::Content(content) => {
            let media = content
                .first()
                .ok_or_else(|| format!("parameter '{}' declares empty content", data.name))?;
            media
                .1
                .schema
                .as_ref()
                .map(|schema| resolver.convert_ref(schema))
                .ok_or_else(|| format!("parameter '{}' content has no schema", data.name))?
        }
    };

    Ok(Parameter {
        name: data.name.clone(),
        location,
        // Path parameters are required whatever the document claims.
        required: data.required || location == ParameterLocation::Path,
        schema,
        example: data.example.clone(),
    })
}

fn convert_body(
    resolver: &SchemaResolver<'_>,
    doc: &OpenAPI,
    operation: &Operation,
) -> Result<Option<RequestBodySpec>, String> {
    let Some(body) = &operation.request_body else {
        return Ok(None);
    };
    let body = match body {
        ReferenceOr::Item(item) => item,
        ReferenceOr::Reference { reference } => {
            let name = reference
                .strip_prefix("#/components/requestBodies/")
                .ok_or_else(|| format!("unsupported body reference '{reference}'"))?;
            match doc
                .components
                .as_ref()
                .and_then(|components| components.request_bodies.get(name))
            {
                Some(ReferenceOr::Item(item)) => item,
                _ => return Err(format!("unresolvable body reference '{reference}'")),
            }
        }
    };

    let media_types: Vec<String> = body.content.keys().cloned().collect();
    let schema = media_types
        .iter()
        .find(|media| is_json_media_type(media))
        .or_else(|| media_types.first())
        .and_then(|media| body.content.get(media))
        .and_then(|media| media.schema.as_ref())
        .map(|schema| resolver.convert_ref(schema));

    Ok(Some(RequestBodySpec {
        media_types,
        schema,
    }))
}

fn convert_responses(resolver: &SchemaResolver<'_>, operation: &Operation) -> IndexMap<u16, Schema> {
    let mut responses = IndexMap::new();
    for (status, response) in &operation.responses.responses {
        let StatusCode::Code(code) = status else {
            continue;
        };
        let ReferenceOr::Item(response) = response else {
            continue;
        };
        let schema = response
            .content
            .iter()
            .find(|(media, _)| is_json_media_type(media))
            .or_else(|| response.content.first())
            .and_then(|(_, media)| media.schema.as_ref())
            .map(|schema| resolver.convert_ref(schema));
        if let Some(schema) = schema {
            responses.insert(*code, schema);
        }
    }
    responses
}
