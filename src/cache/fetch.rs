//! JSON Fetcher
//!
//! Read-through fetcher for JSON documents used by the cache's warm-up and
//! the API's fetch endpoint. Transient failures are retried with
//! exponential backoff.

use crate::cache::key::Identifier;
use crate::error::{Error, Result};
use async_trait::async_trait;
use backoff::{future::retry, ExponentialBackoff};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CACHE_CONTROL};
use reqwest::Client;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, instrument};

/// Default request timeout
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

// =============================================================================
// Fetcher Port
// =============================================================================

/// Source of values for identifiers that miss the cache
#[async_trait]
pub trait Fetch<T>: Send + Sync {
    async fn fetch(&self, identifier: &Identifier) -> Result<T>;
}

// =============================================================================
// HTTP JSON Fetcher
// =============================================================================

/// Configuration for [`HttpJsonFetcher`]
#[derive(Debug, Clone)]
pub struct FetcherConfig {
    /// Per-request timeout
    pub timeout: Duration,
    /// Total time spent retrying transient failures
    pub max_retry_duration: Duration,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_FETCH_TIMEOUT,
            max_retry_duration: Duration::from_secs(10),
        }
    }
}

/// Fetches JSON documents by URL, bypassing intermediate HTTP caches
#[derive(Debug, Clone)]
pub struct HttpJsonFetcher {
    client: Client,
    config: FetcherConfig,
}

impl HttpJsonFetcher {
    pub fn new(config: FetcherConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));

        let client = Client::builder()
            .timeout(config.timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| Error::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    /// Fetch and decode a JSON document
    #[instrument(skip(self))]
    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        reqwest::Url::parse(url).map_err(|e| Error::InvalidUrl(format!("{}: {}", url, e)))?;

        let backoff = ExponentialBackoff {
            max_elapsed_time: Some(self.config.max_retry_duration),
            ..ExponentialBackoff::default()
        };

        retry(backoff, || async {
            let result = self.attempt(url).await;
            result.map_err(|e| {
                if e.is_transient() {
                    debug!(url, error = %e, "Transient fetch failure, retrying");
                    backoff::Error::transient(e)
                } else {
                    backoff::Error::permanent(e)
                }
            })
        })
        .await
    }

    async fn attempt<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                Error::Timeout {
                    url: url.to_string(),
                    timeout: self.config.timeout,
                }
            } else {
                Error::Http(e)
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::UpstreamStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        Ok(response.json::<T>().await?)
    }
}

#[async_trait]
impl<T: DeserializeOwned + Send + 'static> Fetch<T> for HttpJsonFetcher {
    async fn fetch(&self, identifier: &Identifier) -> Result<T> {
        match identifier {
            Identifier::Text(url) => self.get_json(url).await,
            Identifier::Structured(value) => Err(Error::InvalidUrl(format!(
                "structured identifier cannot be fetched over HTTP: {}",
                value
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::{json, Value};

    #[tokio::test]
    async fn test_invalid_url_is_permanent() {
        let fetcher = HttpJsonFetcher::new(FetcherConfig::default()).unwrap();
        let result: Result<Value> = fetcher.get_json("not a url").await;
        assert_matches!(result, Err(Error::InvalidUrl(_)));
    }

    #[tokio::test]
    async fn test_structured_identifier_is_rejected() {
        let fetcher = HttpJsonFetcher::new(FetcherConfig::default()).unwrap();
        let result: Result<Value> = fetcher
            .fetch(&Identifier::Structured(json!({"set": "base1"})))
            .await;
        assert_matches!(result, Err(Error::InvalidUrl(_)));
    }

    #[tokio::test]
    async fn test_unreachable_host_gives_up() {
        let fetcher = HttpJsonFetcher::new(FetcherConfig {
            timeout: Duration::from_millis(200),
            max_retry_duration: Duration::from_millis(300),
        })
        .unwrap();
        let result: Result<Value> = fetcher.get_json("http://127.0.0.1:9/pokemon/25").await;
        assert!(result.is_err());
    }
}
