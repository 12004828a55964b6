//! Shared test fixtures: a recording mock transport and a sample entity.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use nimbus_client::{
    Entity, EntityMeta, FieldMap, HttpRequest, HttpResponse, HttpTransport, NimbusClient,
    StoreError, StoreResult,
};

/// Transport double: replays canned responses in order and records every
/// request it saw.
#[derive(Default)]
pub struct MockTransport {
    requests: Mutex<Vec<HttpRequest>>,
    responses: Mutex<VecDeque<StoreResult<HttpResponse>>>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue a 2xx response with a JSON body.
    pub fn respond(&self, status: u16, body: Value) {
        self.responses.lock().push_back(Ok(HttpResponse {
            status,
            headers: Vec::new(),
            body: body.to_string(),
        }));
    }

    /// Queue a response carrying extra headers (e.g. `X-Request-Time`).
    pub fn respond_with_headers(&self, status: u16, headers: &[(&str, &str)], body: Value) {
        self.responses.lock().push_back(Ok(HttpResponse {
            status,
            headers: headers
                .iter()
                .map(|(n, v)| (n.to_string(), v.to_string()))
                .collect(),
            body: body.to_string(),
        }));
    }

    /// Queue a transport-level failure.
    pub fn fail_next(&self, reason: &str) {
        self.responses
            .lock()
            .push_back(Err(StoreError::Network(reason.to_string())));
    }

    /// Every request sent so far, in order.
    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }

    /// `"METHOD url-path"` per request, for order assertions.
    pub fn request_lines(&self) -> Vec<String> {
        self.requests
            .lock()
            .iter()
            .map(|r| format!("{} {}", r.method, r.url))
            .collect()
    }
}

#[async_trait]
impl HttpTransport for MockTransport {
    async fn send(&self, request: HttpRequest) -> StoreResult<HttpResponse> {
        let line = format!("{} {}", request.method, request.url);
        self.requests.lock().push(request);
        self.responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| panic!("no canned response for: {}", line))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Book {
    #[serde(flatten)]
    pub meta: EntityMeta,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pages: Option<i64>,
}

impl Book {
    pub fn new(title: &str) -> Self {
        Self {
            meta: EntityMeta::default(),
            title: title.to_string(),
            pages: None,
        }
    }

    pub fn with_id(id: &str, title: &str) -> Self {
        Self {
            meta: EntityMeta::with_id(id),
            title: title.to_string(),
            pages: None,
        }
    }
}

impl Entity for Book {
    fn entity_id(&self) -> Option<&str> {
        self.meta.entity_id()
    }

    fn set_entity_id(&mut self, id: String) {
        self.meta.set_entity_id(id);
    }
}

pub fn book_fields() -> FieldMap {
    FieldMap::new()
        .field("id", "_id")
        .field("title", "title")
        .field("pages", "pages")
}

/// An in-memory client wired to the given mock transport.
pub fn test_client(transport: Arc<MockTransport>) -> NimbusClient {
    NimbusClient::builder("http://backend.test", "test-app")
        .in_memory()
        .transport(transport)
        .build()
        .unwrap()
}
