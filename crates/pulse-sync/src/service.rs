//! Remote service boundary.
//!
//! [`RemoteService`] is the only way the engine talks to the backend. The HTTP
//! implementation normalizes every response envelope before returning, so the
//! rest of the crate sees canonical types only.

use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use async_trait::async_trait;
use pulse_core::{envelope, Block, DatasetSummary, Page, ScopedSelection, Selection, SelectionKey};
use reqwest::{Client, RequestBuilder, Response};
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// Query for the paged, filterable content blocks listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockQuery {
    /// Restrict to one dataset; `None` lists across all datasets.
    pub dataset_id: Option<String>,
    pub limit: usize,
    pub offset: usize,
    /// Free-text filter.
    pub search: Option<String>,
}

impl BlockQuery {
    /// First page of one dataset's listing.
    #[must_use]
    pub fn dataset(dataset_id: impl Into<String>, limit: usize) -> Self {
        Self {
            dataset_id: Some(dataset_id.into()),
            limit,
            offset: 0,
            search: None,
        }
    }

    /// First page of the listing across every dataset.
    #[must_use]
    pub const fn all(limit: usize) -> Self {
        Self {
            dataset_id: None,
            limit,
            offset: 0,
            search: None,
        }
    }

    #[must_use]
    pub const fn at_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    /// Filter by free text. Blank input clears the filter.
    #[must_use]
    pub fn with_search(mut self, search: impl Into<String>) -> Self {
        let search = search.into();
        let search = search.trim();
        self.search = (!search.is_empty()).then(|| search.to_string());
        self
    }
}

/// Operations the engine consumes from the remote service.
#[async_trait]
pub trait RemoteService: Send + Sync {
    /// Every selection of `user_id` across all datasets (optional fast path).
    async fn all_selections(&self, user_id: &str) -> Result<Vec<Selection>>;

    /// Selections of `user_id` within one dataset. Records carry no dataset id.
    async fn scoped_selections(&self, user_id: &str, dataset_id: &str)
        -> Result<Vec<ScopedSelection>>;

    /// Create a selection. Success means a 2xx status.
    async fn create_selection(&self, user_id: &str, key: &SelectionKey) -> Result<()>;

    /// Delete a selection. Success means a 2xx (including 204) status.
    async fn delete_selection(&self, user_id: &str, key: &SelectionKey) -> Result<()>;

    /// One page of the datasets listing.
    async fn list_datasets(&self, limit: usize, offset: usize) -> Result<Page<DatasetSummary>>;

    /// One page of the content blocks listing.
    async fn list_blocks(&self, query: &BlockQuery) -> Result<Page<Block>>;
}

/// [`RemoteService`] over HTTP/JSON.
#[derive(Debug, Clone)]
pub struct HttpService {
    client: Client,
    base_url: String,
}

#[derive(Serialize)]
struct CreateSelectionRequest<'a> {
    user_id: &'a str,
    dataset_id: &'a str,
    question_id: &'a str,
}

impl HttpService {
    /// Build a client for the service at `config.base_url`.
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be constructed.
    pub fn new(config: &SyncConfig) -> Result<Self> {
        let mut builder = Client::builder();
        if let Some(secs) = config.request_timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }

        Ok(Self {
            client: builder.build()?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Send a request and turn non-success statuses into `SyncError::Http`.
    async fn send(request: RequestBuilder) -> Result<Response> {
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(SyncError::Http {
            status: status.as_u16(),
            body,
        })
    }

    async fn get_json(&self, path: &str, query: &[(&str, String)]) -> Result<Value> {
        let response = Self::send(self.client.get(self.url(path)).query(query)).await?;
        let text = response.text().await?;
        serde_json::from_str(&text).map_err(|e| SyncError::UnexpectedShape(e.to_string()))
    }
}

#[async_trait]
impl RemoteService for HttpService {
    async fn all_selections(&self, user_id: &str) -> Result<Vec<Selection>> {
        let body = self
            .get_json("/selections/all", &[("user_id", user_id.to_string())])
            .await?;
        let normalized = envelope::selections(&body, user_id)?;
        if normalized.dropped > 0 {
            debug!(dropped = normalized.dropped, "Dropped selections without ids");
        }
        Ok(normalized.items)
    }

    async fn scoped_selections(
        &self,
        user_id: &str,
        dataset_id: &str,
    ) -> Result<Vec<ScopedSelection>> {
        let body = self
            .get_json(
                "/selections",
                &[
                    ("user_id", user_id.to_string()),
                    ("dataset_id", dataset_id.to_string()),
                ],
            )
            .await?;
        Ok(envelope::scoped_selections(&body)?.items)
    }

    async fn create_selection(&self, user_id: &str, key: &SelectionKey) -> Result<()> {
        let body = CreateSelectionRequest {
            user_id,
            dataset_id: &key.dataset_id,
            question_id: &key.question_id,
        };
        Self::send(self.client.post(self.url("/selections")).json(&body)).await?;
        Ok(())
    }

    async fn delete_selection(&self, user_id: &str, key: &SelectionKey) -> Result<()> {
        let query = [
            ("user_id", user_id),
            ("dataset_id", key.dataset_id.as_str()),
            ("question_id", key.question_id.as_str()),
        ];
        Self::send(self.client.delete(self.url("/selections")).query(&query)).await?;
        Ok(())
    }

    async fn list_datasets(&self, limit: usize, offset: usize) -> Result<Page<DatasetSummary>> {
        let body = self
            .get_json(
                "/datasets",
                &[("limit", limit.to_string()), ("offset", offset.to_string())],
            )
            .await?;
        Ok(envelope::datasets(&body)?)
    }

    async fn list_blocks(&self, query: &BlockQuery) -> Result<Page<Block>> {
        let mut params = vec![
            ("limit", query.limit.to_string()),
            ("offset", query.offset.to_string()),
        ];
        if let Some(dataset_id) = &query.dataset_id {
            params.push(("dataset_id", dataset_id.clone()));
        }
        if let Some(search) = query.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            params.push(("search", search.to_string()));
        }

        let body = self.get_json("/questions/blocks", &params).await?;
        Ok(envelope::blocks(&body, query.dataset_id.as_deref())?)
    }
}
