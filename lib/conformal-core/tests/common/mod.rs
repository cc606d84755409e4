//! Scripted collaborators for end-to-end conformance scenarios.
#![allow(missing_docs)]
// Each test crate compiles this module separately and uses a different subset.
#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use conformal_core::state::EntityKindDescriptor;
use conformal_core::{
    CancellationToken, ConformalError, Request, Response, ServiceClient, StateSource,
};
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use serde_json::json;

/// Builds a bare response with the given status.
pub fn response(status: u16) -> Response {
    Response {
        status: StatusCode::from_u16(status).expect("valid status code"),
        headers: HeaderMap::new(),
        body: Vec::new(),
        content_type: None,
    }
}

pub fn with_header(mut response: Response, name: &str, value: &str) -> Response {
    response.headers.append(
        name.parse::<HeaderName>().expect("valid header name"),
        HeaderValue::from_str(value).expect("valid header value"),
    );
    response
}

pub fn with_body(mut response: Response, body: &[u8]) -> Response {
    response.body = body.to_vec();
    response
}

type Handler = dyn Fn(&Request, u32) -> Response + Send + Sync;

/// A [`ServiceClient`] whose behavior is a closure over (request, nth call).
///
/// The call counter is tracked per (method, path) pair, so scripted services
/// can answer differently on repeats, e.g. DELETE returning 200 then 404.
#[derive(Clone)]
pub struct ScriptedService {
    handler: Arc<Handler>,
    calls: Arc<Mutex<BTreeMap<(String, String), u32>>>,
}

impl ScriptedService {
    pub fn new(handler: impl Fn(&Request, u32) -> Response + Send + Sync + 'static) -> Self {
        Self {
            handler: Arc::new(handler),
            calls: Arc::new(Mutex::new(BTreeMap::new())),
        }
    }

    /// How many times a (method, path) pair has been exchanged.
    pub fn calls_to(&self, method: &str, path: &str) -> u32 {
        self.calls
            .lock()
            .expect("lock")
            .get(&(method.to_string(), path.to_string()))
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl ServiceClient for ScriptedService {
    async fn send(
        &self,
        request: &Request,
        _cancel: &CancellationToken,
    ) -> Result<Response, ConformalError> {
        let nth = {
            let mut calls = self.calls.lock().expect("lock");
            let counter = calls
                .entry((request.method.to_string(), request.path.clone()))
                .or_insert(0);
            let nth = *counter;
            *counter += 1;
            nth
        };
        Ok((self.handler)(request, nth))
    }
}

/// An in-memory store whose counts change synchronously with service calls.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    counts: Arc<Mutex<BTreeMap<String, u64>>>,
}

impl MemoryStore {
    pub fn with_kinds(kinds: &[(&str, u64)]) -> Self {
        Self {
            counts: Arc::new(Mutex::new(
                kinds
                    .iter()
                    .map(|(kind, count)| ((*kind).to_string(), *count))
                    .collect(),
            )),
        }
    }

    pub fn bump(&self, kind: &str) {
        *self
            .counts
            .lock()
            .expect("lock")
            .entry(kind.to_string())
            .or_insert(0) += 1;
    }
}

#[async_trait]
impl StateSource for MemoryStore {
    async fn entity_kinds(&self) -> Result<Vec<EntityKindDescriptor>, ConformalError> {
        Ok(self
            .counts
            .lock()
            .expect("lock")
            .keys()
            .map(|name| EntityKindDescriptor {
                name: name.clone(),
                key_field_name: "id".to_string(),
                type_id: None,
            })
            .collect())
    }

    async fn count(&self, kind: &str) -> Result<u64, ConformalError> {
        Ok(self
            .counts
            .lock()
            .expect("lock")
            .get(kind)
            .copied()
            .unwrap_or(0))
    }

    async fn list_all(&self, kind: &str) -> Result<Vec<serde_json::Value>, ConformalError> {
        let count = self.count(kind).await?;
        Ok((0..count).map(|id| json!({"id": id})).collect())
    }

    async fn random_key(&self, kind: &str) -> Result<Option<serde_json::Value>, ConformalError> {
        let count = self.count(kind).await?;
        Ok((count > 0).then(|| json!(0)))
    }
}

/// A store answering `count` from a per-kind script, repeating the last entry.
///
/// Models writes that land between two samples (audit queues, projections).
#[derive(Debug, Clone, Default)]
pub struct ScriptedCounts {
    sequences: Arc<Mutex<BTreeMap<String, (Vec<u64>, usize)>>>,
    rows: Arc<Mutex<BTreeMap<String, (Vec<Vec<serde_json::Value>>, usize)>>>,
}

impl ScriptedCounts {
    #[must_use]
    pub fn kind(self, name: &str, answers: &[u64]) -> Self {
        self.sequences
            .lock()
            .expect("lock")
            .insert(name.to_string(), (answers.to_vec(), 0));
        self
    }

    /// Scripts successive `list_all` answers for a kind.
    #[must_use]
    pub fn rows(self, name: &str, answers: &[Vec<serde_json::Value>]) -> Self {
        self.rows
            .lock()
            .expect("lock")
            .insert(name.to_string(), (answers.to_vec(), 0));
        self
    }
}

#[async_trait]
impl StateSource for ScriptedCounts {
    async fn entity_kinds(&self) -> Result<Vec<EntityKindDescriptor>, ConformalError> {
        Ok(self
            .sequences
            .lock()
            .expect("lock")
            .keys()
            .map(|name| EntityKindDescriptor {
                name: name.clone(),
                key_field_name: "id".to_string(),
                type_id: None,
            })
            .collect())
    }

    async fn count(&self, kind: &str) -> Result<u64, ConformalError> {
        let mut sequences = self.sequences.lock().expect("lock");
        let (answers, cursor) = sequences
            .get_mut(kind)
            .ok_or_else(|| ConformalError::StateSource {
                kind: kind.to_string(),
                reason: "unknown kind".to_string(),
            })?;
        let answer = answers
            .get(*cursor)
            .or_else(|| answers.last())
            .copied()
            .unwrap_or(0);
        *cursor += 1;
        Ok(answer)
    }

    async fn list_all(&self, kind: &str) -> Result<Vec<serde_json::Value>, ConformalError> {
        let mut rows = self.rows.lock().expect("lock");
        if let Some((answers, cursor)) = rows.get_mut(kind) {
            let answer = answers
                .get(*cursor)
                .or_else(|| answers.last())
                .cloned()
                .unwrap_or_default();
            *cursor += 1;
            return Ok(answer);
        }
        Ok(Vec::new())
    }

    async fn random_key(&self, _kind: &str) -> Result<Option<serde_json::Value>, ConformalError> {
        Ok(Some(json!(1)))
    }
}

/// Parses an OpenAPI document from inline JSON.
pub fn openapi(doc: serde_json::Value) -> openapiv3::OpenAPI {
    serde_json::from_value(doc).expect("valid OpenAPI document")
}
