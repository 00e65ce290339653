//! Request and response types exchanged with the network cache.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CACHE_CONTROL, CONTENT_TYPE};
use reqwest::{Method, StatusCode, Url};
use std::time::Duration;

/// How the request was issued by the client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestMode {
    /// Top-level document navigation
    Navigate,
    SameOrigin,
    #[default]
    Cors,
    NoCors,
}

impl RequestMode {
    /// Infer the mode from `Sec-Fetch-Mode`, falling back to the `Accept`
    /// header for clients that do not send fetch metadata.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        if let Some(mode) = headers.get("sec-fetch-mode").and_then(|v| v.to_str().ok()) {
            return match mode {
                "navigate" => RequestMode::Navigate,
                "same-origin" => RequestMode::SameOrigin,
                "no-cors" => RequestMode::NoCors,
                _ => RequestMode::Cors,
            };
        }

        let accepts_html = headers
            .get(ACCEPT)
            .and_then(|v| v.to_str().ok())
            .map_or(false, |accept| accept.contains("text/html"));
        if accepts_html {
            RequestMode::Navigate
        } else {
            RequestMode::Cors
        }
    }
}

// =============================================================================
// Request
// =============================================================================

/// An intercepted HTTP request
#[derive(Debug, Clone)]
pub struct NetworkRequest {
    pub method: Method,
    pub url: Url,
    pub mode: RequestMode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl NetworkRequest {
    /// A GET request with no headers
    pub fn get(url: Url) -> Self {
        Self {
            method: Method::GET,
            url,
            mode: RequestMode::Cors,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    /// A GET navigation request
    pub fn navigate(url: Url) -> Self {
        Self {
            mode: RequestMode::Navigate,
            ..Self::get(url)
        }
    }

    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn with_mode(mut self, mode: RequestMode) -> Self {
        self.mode = mode;
        self
    }

    /// Key under which the response is stored in a bucket
    pub fn cache_key(&self) -> &str {
        self.url.as_str()
    }

    pub fn is_get(&self) -> bool {
        self.method == Method::GET
    }
}

// =============================================================================
// Response
// =============================================================================

/// A response, either from the network or from a bucket
#[derive(Debug, Clone)]
pub struct NetworkResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
    /// When this response was received from the network
    pub stored_at: DateTime<Utc>,
}

impl NetworkResponse {
    pub fn new(status: StatusCode, headers: HeaderMap, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers,
            body: body.into(),
            stored_at: Utc::now(),
        }
    }

    /// A response with a single content type header
    pub fn with_content_type(status: StatusCode, content_type: &'static str, body: impl Into<Bytes>) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
        Self::new(status, headers, body)
    }

    /// Successful (2xx) response
    pub fn is_ok(&self) -> bool {
        self.status.is_success()
    }

    /// Time since the response was received
    pub fn age(&self) -> Duration {
        (Utc::now() - self.stored_at).to_std().unwrap_or_default()
    }

    /// Whether the response is no older than `max_age`
    pub fn is_fresh(&self, max_age: Duration) -> bool {
        self.age() <= max_age
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok())
    }

    /// Mark the response as not to be cached by the client
    pub fn no_cache(mut self) -> Self {
        self.headers
            .insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_from_fetch_metadata() {
        let mut headers = HeaderMap::new();
        headers.insert("sec-fetch-mode", HeaderValue::from_static("navigate"));
        assert_eq!(RequestMode::from_headers(&headers), RequestMode::Navigate);

        headers.insert("sec-fetch-mode", HeaderValue::from_static("no-cors"));
        assert_eq!(RequestMode::from_headers(&headers), RequestMode::NoCors);
    }

    #[test]
    fn test_mode_from_accept() {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("text/html,application/xhtml+xml"));
        assert_eq!(RequestMode::from_headers(&headers), RequestMode::Navigate);

        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        assert_eq!(RequestMode::from_headers(&headers), RequestMode::Cors);
    }

    #[test]
    fn test_freshness() {
        let mut response = NetworkResponse::with_content_type(StatusCode::OK, "text/plain", "hi");
        assert!(response.is_ok());
        assert!(response.is_fresh(Duration::from_secs(60)));

        response.stored_at = Utc::now() - chrono::Duration::hours(2);
        assert!(!response.is_fresh(Duration::from_secs(3600)));
        assert_eq!(response.content_type(), Some("text/plain"));
    }
}
