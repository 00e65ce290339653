//! PostgREST-style row store over HTTP.
//!
//! Rows live in a single table exposed at `{base_url}/rest/v1/{table}`.
//! Filters use the PostgREST operator syntax (`eq.`, `gt.`, `lt.`) and
//! upserts rely on `Prefer: resolution=merge-duplicates`.

use crate::cache::backend::{CacheRow, RowStore, StoreError, StoreResult};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, instrument};

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the REST row store
#[derive(Debug, Clone)]
pub struct RestRowStoreConfig {
    /// Service base URL, e.g. `https://project.supabase.co`
    pub base_url: String,
    /// API key sent as both `apikey` and bearer token
    pub api_key: String,
    /// Table holding cache rows
    pub table: String,
    /// Per-request timeout
    pub timeout: Duration,
}

impl Default for RestRowStoreConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:54321".to_string(),
            api_key: String::new(),
            table: "unified_cache".to_string(),
            timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Deserialize)]
struct KeyOnly {
    #[allow(dead_code)]
    cache_key: String,
}

// =============================================================================
// REST Row Store
// =============================================================================

/// [`RowStore`] backed by a PostgREST endpoint
pub struct RestRowStore {
    config: RestRowStoreConfig,
    client: Client,
    endpoint: String,
}

impl RestRowStore {
    /// Create a new REST row store
    pub fn new(config: RestRowStoreConfig) -> StoreResult<Self> {
        let client = Client::builder().timeout(config.timeout).build()?;
        let endpoint = format!(
            "{}/rest/v1/{}",
            config.base_url.trim_end_matches('/'),
            config.table
        );

        Ok(Self {
            config,
            client,
            endpoint,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("apikey", &self.config.api_key)
            .bearer_auth(&self.config.api_key)
    }

    async fn check(response: Response) -> StoreResult<Response> {
        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(StoreError::Status {
                status: status.as_u16(),
                body,
            })
        }
    }
}

/// Filter value for a PostgREST `eq.` operator
fn eq(value: &str) -> String {
    format!("eq.{}", value)
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[async_trait]
impl RowStore for RestRowStore {
    #[instrument(skip(self), fields(table = %self.config.table))]
    async fn select(
        &self,
        cache_key: &str,
        live_at: Option<DateTime<Utc>>,
    ) -> StoreResult<Option<CacheRow>> {
        let mut query = vec![
            ("select", "*".to_string()),
            ("cache_key", eq(cache_key)),
            ("limit", "1".to_string()),
        ];
        if let Some(at) = live_at {
            query.push(("expires_at", format!("gt.{}", timestamp(at))));
        }

        let response = self
            .authorize(self.client.get(&self.endpoint))
            .query(&query)
            .send()
            .await?;
        let rows: Vec<CacheRow> = Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| StoreError::Decode(e.to_string()))?;

        Ok(rows.into_iter().next())
    }

    #[instrument(skip(self, row), fields(table = %self.config.table, key = %row.cache_key))]
    async fn upsert(&self, row: CacheRow) -> StoreResult<()> {
        let response = self
            .authorize(self.client.post(&self.endpoint))
            .query(&[("on_conflict", "cache_key")])
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(&[row])
            .send()
            .await?;
        Self::check(response).await?;
        debug!("Upserted cache row");
        Ok(())
    }

    #[instrument(skip(self), fields(table = %self.config.table))]
    async fn delete(&self, cache_key: &str) -> StoreResult<()> {
        let response = self
            .authorize(self.client.delete(&self.endpoint))
            .query(&[("cache_key", eq(cache_key))])
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    #[instrument(skip(self), fields(table = %self.config.table))]
    async fn delete_expired(&self, before: DateTime<Utc>) -> StoreResult<usize> {
        let response = self
            .authorize(self.client.delete(&self.endpoint))
            .query(&[
                ("expires_at", format!("lt.{}", timestamp(before))),
                ("select", "cache_key".to_string()),
            ])
            .header("Prefer", "return=representation")
            .send()
            .await?;
        let removed: Vec<KeyOnly> = Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| StoreError::Decode(e.to_string()))?;
        Ok(removed.len())
    }

    #[instrument(skip(self), fields(table = %self.config.table))]
    async fn count_live(&self, live_at: DateTime<Utc>) -> StoreResult<u64> {
        let response = self
            .authorize(self.client.get(&self.endpoint))
            .query(&[
                ("select", "cache_key".to_string()),
                ("expires_at", format!("gt.{}", timestamp(live_at))),
            ])
            .send()
            .await?;
        let rows: Vec<KeyOnly> = Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| StoreError::Decode(e.to_string()))?;
        Ok(rows.len() as u64)
    }
}
