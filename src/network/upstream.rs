//! Upstream origin access for the network cache.

use crate::error::{Error, Result};
use crate::network::request::{NetworkRequest, NetworkResponse};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, CONNECTION, HOST};
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

/// Source of live responses
#[async_trait]
pub trait Upstream: Send + Sync {
    async fn fetch(&self, request: &NetworkRequest) -> Result<NetworkResponse>;
}

/// [`Upstream`] that forwards requests with `reqwest`
#[derive(Debug, Clone)]
pub struct HttpUpstream {
    client: Client,
    timeout: Duration,
}

impl HttpUpstream {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Internal(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client, timeout })
    }
}

/// Headers that describe the hop rather than the request
fn forwardable(headers: &HeaderMap) -> HeaderMap {
    let mut forwarded = headers.clone();
    forwarded.remove(HOST);
    forwarded.remove(CONNECTION);
    forwarded
}

#[async_trait]
impl Upstream for HttpUpstream {
    async fn fetch(&self, request: &NetworkRequest) -> Result<NetworkResponse> {
        debug!(method = %request.method, url = %request.url, "Forwarding request upstream");

        let response = self
            .client
            .request(request.method.clone(), request.url.clone())
            .headers(forwardable(&request.headers))
            .body(request.body.clone())
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::Timeout {
                        url: request.url.to_string(),
                        timeout: self.timeout,
                    }
                } else {
                    Error::Http(e)
                }
            })?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await?;
        Ok(NetworkResponse::new(status, headers, body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{HeaderValue, ACCEPT};
    use reqwest::Url;

    #[test]
    fn test_hop_headers_are_stripped() {
        let mut headers = HeaderMap::new();
        headers.insert(HOST, HeaderValue::from_static("localhost:8080"));
        headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
        headers.insert(ACCEPT, HeaderValue::from_static("image/webp"));

        let forwarded = forwardable(&headers);
        assert!(forwarded.get(HOST).is_none());
        assert!(forwarded.get(CONNECTION).is_none());
        assert_eq!(forwarded.get(ACCEPT).unwrap(), "image/webp");
    }

    #[tokio::test]
    async fn test_unreachable_origin_is_error() {
        let upstream = HttpUpstream::new(Duration::from_millis(200)).unwrap();
        let request = NetworkRequest::get(Url::parse("http://127.0.0.1:9/index.html").unwrap());
        assert!(upstream.fetch(&request).await.is_err());
    }
}
