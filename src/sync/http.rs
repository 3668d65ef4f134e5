//! Document store client over a JSON REST API
//!
//! Talks to a document service exposing:
//! - `GET   {base}/v1/{collection}/{id}` (404 when the document is absent)
//! - `PATCH {base}/v1/{collection}/{id}?merge=true` / `PUT` to overwrite
//! - `GET   {base}/v1/{collection}?orderBy={field}&direction=desc&limit={n}`
//!
//! Collection names and document ids are percent-encoded as path segments.

use std::time::Duration;

use reqwest::{StatusCode, Url};
use serde::Deserialize;

use super::{Document, RemoteStore, SyncError};

/// Configuration for the document service
#[derive(Clone, Debug)]
pub struct HttpStoreConfig {
    /// Base URL of the service (e.g., "http://localhost:8080")
    pub base_url: String,
    /// Optional bearer token sent with every request
    pub api_key: Option<String>,
    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for HttpStoreConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            api_key: None,
            timeout_secs: 15,
        }
    }
}

/// Query responses come either as a bare array or wrapped in `documents`
#[derive(Deserialize)]
#[serde(untagged)]
enum QueryResponse {
    Bare(Vec<Document>),
    Wrapped { documents: Vec<Document> },
}

impl QueryResponse {
    fn into_documents(self) -> Vec<Document> {
        match self {
            QueryResponse::Bare(docs) => docs,
            QueryResponse::Wrapped { documents } => documents,
        }
    }
}

/// Remote store backed by the document REST API
pub struct HttpStore {
    config: HttpStoreConfig,
    base: Url,
    client: reqwest::Client,
}

impl HttpStore {
    pub fn new(config: HttpStoreConfig) -> Result<Self, SyncError> {
        let base = Url::parse(&config.base_url)
            .map_err(|e| SyncError::RemoteUnavailable(format!("bad base url {}: {}", config.base_url, e)))?;
        if base.cannot_be_a_base() {
            return Err(SyncError::RemoteUnavailable(format!(
                "base url {} cannot take a path",
                config.base_url
            )));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| SyncError::RemoteUnavailable(e.to_string()))?;

        Ok(Self { config, base, client })
    }

    /// `{base}/v1/` followed by `segments`, each encoded as one path segment.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, SyncError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| SyncError::RemoteUnavailable(format!("base url {} cannot take a path", self.base)))?
            .pop_if_empty()
            .push("v1")
            .extend(segments);
        Ok(url)
    }

    fn document_url(&self, collection: &str, id: &str) -> Result<Url, SyncError> {
        self.endpoint(&[collection, id])
    }

    fn query_url(&self, collection: &str, order_by: &str, limit: usize) -> Result<Url, SyncError> {
        let mut url = self.endpoint(&[collection])?;
        url.query_pairs_mut()
            .append_pair("orderBy", order_by)
            .append_pair("direction", "desc")
            .append_pair("limit", &limit.to_string());
        Ok(url)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, SyncError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Err(SyncError::RemoteUnavailable(format!("Status {}: {}", status, body)))
    }

    /// Check if the document service is reachable
    pub async fn health_check(&self) -> bool {
        let Ok(url) = self.endpoint(&["health"]) else {
            return false;
        };
        self.authorize(self.client.get(url))
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }
}

impl RemoteStore for HttpStore {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, SyncError> {
        let response = self
            .authorize(self.client.get(self.document_url(collection, id)?))
            .send()
            .await
            .map_err(|e| SyncError::RemoteUnavailable(e.to_string()))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let response = Self::check(response).await?;
        let doc: Document = response
            .json()
            .await
            .map_err(|e| SyncError::InvalidData(e.to_string()))?;
        Ok(Some(doc))
    }

    async fn set(&self, collection: &str, id: &str, doc: Document, merge: bool) -> Result<(), SyncError> {
        let url = self.document_url(collection, id)?;
        let request = if merge {
            self.client.patch(url).query(&[("merge", "true")])
        } else {
            self.client.put(url)
        };

        let response = self
            .authorize(request)
            .json(&doc)
            .send()
            .await
            .map_err(|e| SyncError::RemoteUnavailable(e.to_string()))?;

        Self::check(response).await.map(|_| ())
    }

    async fn query_top(&self, collection: &str, order_by: &str, limit: usize) -> Result<Vec<Document>, SyncError> {
        let response = self
            .authorize(self.client.get(self.query_url(collection, order_by, limit)?))
            .send()
            .await
            .map_err(|e| SyncError::RemoteUnavailable(e.to_string()))?;

        let response = Self::check(response).await?;
        let parsed: QueryResponse = response
            .json()
            .await
            .map_err(|e| SyncError::InvalidData(e.to_string()))?;
        Ok(parsed.into_documents())
    }
}
