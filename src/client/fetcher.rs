//! Remote-store access: translated queries, single fetches, delta fetches,
//! and the three write verbs, all through the installed transport.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::entity;
use crate::error::{StoreError, StoreResult};
use crate::query::TranslatedQuery;

use super::credentials::ActiveCredential;
use super::transport::{HttpRequest, HttpResponse, HttpTransport, Method};

/// Response header carrying the backend's own timestamp for the request;
/// preferred over client clocks when recording `last_request_time`.
pub const REQUEST_TIME_HEADER: &str = "X-Request-Time";

/// Reference to a deleted entity inside a delta response.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EntityIdRef {
    #[serde(rename = "_id")]
    pub id: String,
}

/// What a delta fetch returns: entities changed since the reference time and
/// references to entities deleted since then. Consumed by the merge, never
/// persisted as-is.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeltaSetResponse {
    #[serde(default)]
    pub changed: Vec<Value>,
    #[serde(default)]
    pub deleted: Vec<EntityIdRef>,
}

/// Executes data operations against the remote store and categorizes
/// failures: transport trouble is [`StoreError::Network`] (retryable),
/// non-2xx responses are [`StoreError::Backend`] with the server's message
/// surfaced verbatim.
pub struct NetworkFetcher {
    base_url: String,
    transport: Arc<dyn HttpTransport>,
    credential: Arc<ActiveCredential>,
}

impl NetworkFetcher {
    pub fn new(
        base_url: &str,
        transport: Arc<dyn HttpTransport>,
        credential: Arc<ActiveCredential>,
    ) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            transport,
            credential,
        }
    }

    fn request(&self, method: Method, url: String) -> HttpRequest {
        let request = HttpRequest::new(method, url)
            .with_header("Content-Type", "application/json");
        match self.credential.token() {
            Some(token) => request.with_bearer(&token),
            None => request,
        }
    }

    async fn send(&self, request: HttpRequest) -> StoreResult<HttpResponse> {
        let method = request.method;
        let url = request.url.clone();
        let response = self.transport.send(request).await?;
        if !response.is_success() {
            return Err(StoreError::Backend {
                status: response.status,
                message: if response.body.is_empty() {
                    format!("HTTP {} {} {}", response.status, method, url)
                } else {
                    response.body
                },
            });
        }
        Ok(response)
    }

    /// Run a translated query, returning the matching entities and the
    /// request time to record for delta bookkeeping.
    pub async fn find(
        &self,
        collection: &str,
        query: &TranslatedQuery,
    ) -> StoreResult<(Vec<Value>, String)> {
        let url = format!(
            "{}/data/{}?query={}",
            self.base_url,
            collection,
            query.query_string()
        );
        debug!(collection, url = %url, "remote find");
        let response = self.send(self.request(Method::Get, url)).await?;
        let request_time = request_time(&response);
        let entities = parse_body(&response)?;
        Ok((entities, request_time))
    }

    pub async fn find_by_id(&self, collection: &str, id: &str) -> StoreResult<Value> {
        let url = format!("{}/data/{}/{}", self.base_url, collection, id);
        let response = self.send(self.request(Method::Get, url)).await?;
        parse_body(&response)
    }

    /// Fetch only the entities changed or deleted since `since` for a query.
    pub async fn find_delta(
        &self,
        collection: &str,
        query: &TranslatedQuery,
        since: &str,
    ) -> StoreResult<(DeltaSetResponse, String)> {
        let url = format!(
            "{}/data/{}/_delta?since={}&query={}",
            self.base_url, collection, since, query.filter
        );
        debug!(collection, since, "remote delta find");
        let response = self.send(self.request(Method::Get, url)).await?;
        let request_time = request_time(&response);
        let delta = parse_body(&response)?;
        Ok((delta, request_time))
    }

    /// Create an entity; the response carries the server-assigned id.
    pub async fn create(&self, collection: &str, entity: &Value) -> StoreResult<Value> {
        let url = format!("{}/data/{}", self.base_url, collection);
        let request = self.request(Method::Post, url).with_body(entity.clone());
        let response = self.send(request).await?;
        parse_body(&response)
    }

    pub async fn update(&self, collection: &str, id: &str, entity: &Value) -> StoreResult<Value> {
        let url = format!("{}/data/{}/{}", self.base_url, collection, id);
        let request = self.request(Method::Put, url).with_body(entity.clone());
        let response = self.send(request).await?;
        parse_body(&response)
    }

    /// Delete by id, returning the backend's deletion count.
    pub async fn delete(&self, collection: &str, id: &str) -> StoreResult<u64> {
        let url = format!("{}/data/{}/{}", self.base_url, collection, id);
        let response = self.send(self.request(Method::Delete, url)).await?;

        #[derive(Deserialize)]
        struct DeleteResponse {
            count: u64,
        }
        let parsed: DeleteResponse = parse_body(&response)?;
        Ok(parsed.count)
    }
}

fn request_time(response: &HttpResponse) -> String {
    response
        .header(REQUEST_TIME_HEADER)
        .map(str::to_string)
        .unwrap_or_else(entity::wire_now)
}

fn parse_body<T: DeserializeOwned>(response: &HttpResponse) -> StoreResult<T> {
    serde_json::from_str(&response.body).map_err(|e| StoreError::Backend {
        status: response.status,
        message: format!("unparseable response body: {}", e),
    })
}
