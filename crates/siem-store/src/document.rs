//! Document store writer/search client: a thin async struct wrapping a
//! `reqwest` client handle, one method per store operation, `#[instrument]`
//! on each.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, instrument};

use crate::error::{Result, StoreError};

/// Compatibility media type so requests interoperate with 8.x servers.
const ES8_MEDIA_TYPE: &str = "application/vnd.elasticsearch+json;compatible-with=8";

/// Computes `"<prefix>-YYYY.MM.DD"` from a UTC timestamp. Every document
/// lands in the daily index its own timestamp names, never the wall-clock
/// day it happened to be written on.
pub fn index_name(prefix: &str, timestamp: DateTime<Utc>) -> String {
    format!("{prefix}-{}", timestamp.format("%Y.%m.%d"))
}

pub struct DocumentStore {
    client: Client,
    base_url: String,
}

impl DocumentStore {
    pub fn new(scheme: &str, host: &str, port: u16) -> Self {
        Self {
            client: Client::new(),
            base_url: format!("{scheme}://{host}:{port}"),
        }
    }

    fn request(
        &self,
        method: reqwest::Method,
        path: &str,
    ) -> reqwest::RequestBuilder {
        self.client
            .request(method, format!("{}/{}", self.base_url, path))
            .header("Accept", ES8_MEDIA_TYPE)
            .header("Content-Type", ES8_MEDIA_TYPE)
    }

    /// Writes a document into `"<index_prefix>-YYYY.MM.DD"`, dated from
    /// `index_date`. The store assigns the id; callers that need it back
    /// read it from the response.
    #[instrument(skip(self, document), fields(index_prefix))]
    pub async fn write_document<T: Serialize>(
        &self,
        document: &T,
        index_prefix: &str,
        index_date: DateTime<Utc>,
    ) -> Result<String> {
        let index = index_name(index_prefix, index_date);
        let body = serde_json::to_value(document)?;
        debug!(index, "writing document");

        let response = self
            .request(reqwest::Method::POST, &format!("{index}/_doc"))
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(StoreError::Transport(format!(
                "write to {index} failed with status {}",
                response.status()
            )));
        }

        let parsed: Value = response.json().await?;
        parsed
            .get("_id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| StoreError::Transport("write response missing _id".into()))
    }

    /// Raw search passthrough used by the correlation engine's query
    /// builders.
    #[instrument(skip(self, body), fields(index_pattern))]
    pub async fn search(&self, index_pattern: &str, body: Value) -> Result<Value> {
        let response = self
            .request(reqwest::Method::POST, &format!("{index_pattern}/_search"))
            .json(&body)
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(StoreError::NotFound(index_pattern.to_string()));
        }
        if !response.status().is_success() {
            return Err(StoreError::Transport(format!(
                "search on {index_pattern} failed with status {}",
                response.status()
            )));
        }
        Ok(response.json().await?)
    }

    /// Updates a single document by id (used for IoC mutation operations).
    #[instrument(skip(self, body), fields(index))]
    pub async fn update_by_id(&self, index: &str, id: &str, body: Value) -> Result<()> {
        let response = self
            .request(reqwest::Method::POST, &format!("{index}/_update/{id}"))
            .json(&body)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(StoreError::Transport(format!(
                "update of {id} in {index} failed with status {}",
                response.status()
            )));
        }
        Ok(())
    }

    /// Scripted update-by-query across an index pattern, with
    /// `conflicts=proceed` so a concurrent writer never aborts the sweep.
    #[instrument(skip(self, body), fields(index_pattern))]
    pub async fn update_by_query(&self, index_pattern: &str, body: Value) -> Result<u64> {
        let response = self
            .request(
                reqwest::Method::POST,
                &format!("{index_pattern}/_update_by_query?conflicts=proceed"),
            )
            .json(&body)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(StoreError::Transport(format!(
                "update_by_query on {index_pattern} failed with status {}",
                response.status()
            )));
        }
        let parsed: Value = response.json().await?;
        Ok(parsed.get("updated").and_then(Value::as_u64).unwrap_or(0))
    }

    #[instrument(skip(self), fields(index))]
    pub async fn delete_by_id(&self, index: &str, id: &str) -> Result<()> {
        let response = self
            .request(reqwest::Method::DELETE, &format!("{index}/_doc/{id}"))
            .send()
            .await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(StoreError::NotFound(id.to_string()));
        }
        if !response.status().is_success() {
            return Err(StoreError::Transport(format!(
                "delete of {id} in {index} failed with status {}",
                response.status()
            )));
        }
        Ok(())
    }
}

/// Narrow, object-safe view of [`DocumentStore`] over `serde_json::Value`
/// bodies, so the ingestion, indicator, and correlation services can depend
/// on an interface and be tested against an in-memory fake instead of a
/// live document store.
#[async_trait]
pub trait DocumentClient: Send + Sync {
    async fn write_document(&self, document: Value, index_prefix: &str, index_date: DateTime<Utc>) -> Result<String>;
    async fn search(&self, index_pattern: &str, body: Value) -> Result<Value>;
    async fn update_by_id(&self, index: &str, id: &str, body: Value) -> Result<()>;
    async fn update_by_query(&self, index_pattern: &str, body: Value) -> Result<u64>;
    async fn delete_by_id(&self, index: &str, id: &str) -> Result<()>;
}

#[async_trait]
impl DocumentClient for DocumentStore {
    async fn write_document(&self, document: Value, index_prefix: &str, index_date: DateTime<Utc>) -> Result<String> {
        DocumentStore::write_document(self, &document, index_prefix, index_date).await
    }

    async fn search(&self, index_pattern: &str, body: Value) -> Result<Value> {
        DocumentStore::search(self, index_pattern, body).await
    }

    async fn update_by_id(&self, index: &str, id: &str, body: Value) -> Result<()> {
        DocumentStore::update_by_id(self, index, id, body).await
    }

    async fn update_by_query(&self, index_pattern: &str, body: Value) -> Result<u64> {
        DocumentStore::update_by_query(self, index_pattern, body).await
    }

    async fn delete_by_id(&self, index: &str, id: &str) -> Result<()> {
        DocumentStore::delete_by_id(self, index, id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn index_name_formats_as_prefix_dash_date() {
        let ts = Utc.with_ymd_and_hms(2026, 3, 7, 12, 0, 0).unwrap();
        assert_eq!(index_name("siem-syslog-events", ts), "siem-syslog-events-2026.03.07");
    }
}
