//! REST API Handlers
//!
//! Cache administration endpoints plus the caching reverse proxy that hands
//! every unmatched request to the network cache.

use crate::api::metrics::ApiMetrics;
use crate::cache::{CacheKey, CacheStatsSnapshot, Fetch, FetchOptions, Identifier, Priority, TieredCache};
use crate::error::Error;
use crate::network::{NetworkCache, NetworkRequest, NetworkResponse, NetworkStats, RequestMode};
use axum::{
    body::{to_bytes, Body},
    extract::{Json, Path, Query, Request, State},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

/// Largest request body forwarded by the proxy
pub const MAX_PROXY_BODY: usize = 10 * 1024 * 1024;

// =============================================================================
// Request/Response Types
// =============================================================================

/// Query of `GET /cache/fetch`
#[derive(Debug, Clone, Deserialize)]
pub struct FetchQuery {
    pub url: String,
    #[serde(default)]
    pub priority: Option<String>,
    #[serde(default)]
    pub ttl_secs: Option<u64>,
    #[serde(default)]
    pub stale: Option<bool>,
}

/// Body of `GET /cache/stats`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsResponse {
    pub cache: CacheStatsSnapshot,
    pub network: NetworkStats,
}

/// Body of `POST /cache/cleanup`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupResponse {
    pub removed_entries: usize,
    pub removed_responses: usize,
}

/// API error response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiErrorResponse {
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ApiErrorResponse {
    fn new(error: &str, message: impl Into<String>) -> Self {
        Self {
            error: error.to_string(),
            message: message.into(),
            details: None,
        }
    }
}

fn error_response(status: StatusCode, body: ApiErrorResponse) -> Response {
    (status, Json(body)).into_response()
}

// =============================================================================
// REST Router
// =============================================================================

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub cache: Arc<TieredCache<Value>>,
    pub network: Arc<NetworkCache>,
    pub fetcher: Arc<dyn Fetch<Value>>,
    pub metrics: Arc<ApiMetrics>,
    ready: Arc<AtomicBool>,
}

impl AppState {
    pub fn new(
        cache: Arc<TieredCache<Value>>,
        network: Arc<NetworkCache>,
        fetcher: Arc<dyn Fetch<Value>>,
        metrics: Arc<ApiMetrics>,
    ) -> Self {
        Self {
            cache,
            network,
            fetcher,
            metrics,
            ready: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flip readiness once startup work is done
    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }
}

/// REST API router builder
pub struct RestRouter {
    state: AppState,
}

impl RestRouter {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    /// Build the Axum router
    pub fn build(self) -> Router {
        Router::new()
            // Health endpoints
            .route("/healthz", get(health_check))
            .route("/readyz", get(readiness_check))
            .route("/metrics", get(metrics))
            // Cache endpoints
            .route("/cache/stats", get(cache_stats))
            .route("/cache/fetch", get(fetch_document))
            .route("/cache/entries/:key", delete(delete_entry))
            .route("/cache/clear", post(clear_cache))
            .route("/cache/cleanup", post(cleanup_cache))
            // Everything else goes through the network cache
            .fallback(proxy)
            .layer(TraceLayer::new_for_http())
            .with_state(self.state)
    }
}

// =============================================================================
// Handlers
// =============================================================================

async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    if state.is_ready() {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "starting")
    }
}

async fn metrics(State(state): State<AppState>) -> Response {
    let cache = state.cache.stats().await;
    let network = state.network.stats();

    match state.metrics.render(&cache, &network) {
        Ok((content_type, body)) => (
            StatusCode::OK,
            [(axum::http::header::CONTENT_TYPE, content_type)],
            body,
        )
            .into_response(),
        Err(e) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            ApiErrorResponse::new("metrics_failed", e.to_string()),
        ),
    }
}

async fn cache_stats(State(state): State<AppState>) -> impl IntoResponse {
    Json(StatsResponse {
        cache: state.cache.stats().await,
        network: state.network.stats(),
    })
}

/// Read-through fetch of a JSON document
async fn fetch_document(State(state): State<AppState>, Query(query): Query<FetchQuery>) -> Response {
    if query.url.trim().is_empty() {
        return error_response(
            StatusCode::BAD_REQUEST,
            ApiErrorResponse::new("invalid_request", "Query parameter 'url' is required"),
        );
    }

    let priority = match query.priority.as_deref().map(str::parse::<Priority>) {
        None => Priority::default(),
        Some(Ok(priority)) => priority,
        Some(Err(message)) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                ApiErrorResponse::new("invalid_priority", message),
            );
        }
    };

    let mut options = FetchOptions::new(priority).stale_while_revalidate(query.stale.unwrap_or(false));
    if let Some(ttl) = query.ttl_secs {
        options = options.with_ttl(Duration::from_secs(ttl));
    }

    debug!(url = %query.url, priority = %priority, "Fetching document");
    let identifier = Identifier::from(&query.url);
    let fetcher = Arc::clone(&state.fetcher);

    match state
        .cache
        .cached_fetch(query.url.clone(), || fetcher.fetch(&identifier), options)
        .await
    {
        Ok(document) => (StatusCode::OK, Json(document)).into_response(),
        Err(e) => {
            warn!(url = %query.url, error = %e, "Document fetch failed");
            let status = match &e {
                Error::InvalidUrl(_) => StatusCode::BAD_REQUEST,
                Error::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
                _ => StatusCode::BAD_GATEWAY,
            };
            error_response(
                status,
                ApiErrorResponse {
                    error: "fetch_failed".into(),
                    message: format!("Failed to fetch {}", query.url),
                    details: Some(e.to_string()),
                },
            )
        }
    }
}

/// Remove the entry cached for an identifier from every tier
async fn delete_entry(State(state): State<AppState>, Path(identifier): Path<String>) -> impl IntoResponse {
    let key = CacheKey::of(identifier);
    info!(key = %key, "Deleting cache entry");
    state.cache.delete(&key).await;
    StatusCode::NO_CONTENT
}

async fn clear_cache(State(state): State<AppState>) -> impl IntoResponse {
    info!("Clearing tiered cache");
    state.cache.clear().await;
    StatusCode::NO_CONTENT
}

async fn cleanup_cache(State(state): State<AppState>) -> impl IntoResponse {
    let removed_entries = state.cache.cleanup().await;
    let removed_responses = state.network.sweep();
    state.network.flush().await;
    Json(CleanupResponse {
        removed_entries,
        removed_responses,
    })
}

// =============================================================================
// Proxy
// =============================================================================

async fn proxy(State(state): State<AppState>, request: Request) -> Response {
    let (parts, body) = request.into_parts();

    let body = match to_bytes(body, MAX_PROXY_BODY).await {
        Ok(body) => body,
        Err(_) => {
            return error_response(
                StatusCode::PAYLOAD_TOO_LARGE,
                ApiErrorResponse::new("body_too_large", "Request body exceeds proxy limit"),
            );
        }
    };

    let request = match network_request(&state.network, &parts, body) {
        Ok(request) => request,
        Err(e) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                ApiErrorResponse::new("invalid_request", e.to_string()),
            );
        }
    };

    into_response(state.network.handle(request).await)
}

/// Rebuild an incoming request for the network cache.
///
/// Absolute-form targets (`GET https://api.pokemontcg.io/v2/cards HTTP/1.1`)
/// that match an API pattern are kept as sent, which is how clients reach the
/// cross-origin API strategy. Every other target is rebased onto the origin.
fn network_request(network: &NetworkCache, parts: &Parts, body: bytes::Bytes) -> crate::Result<NetworkRequest> {
    let url = match api_target(network, &parts.uri) {
        Some(url) => url,
        None => {
            let path = parts.uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
            if path.starts_with("//") {
                return Err(Error::InvalidUrl(path.to_string()));
            }
            network
                .config()
                .origin
                .join(path)
                .map_err(|e| Error::InvalidUrl(format!("{}: {}", path, e)))?
        }
    };

    let method = reqwest::Method::from_bytes(parts.method.as_str().as_bytes())
        .map_err(|e| Error::ApiValidation(format!("method {}: {}", parts.method, e)))?;

    let mut headers = reqwest::header::HeaderMap::new();
    for (name, value) in parts.headers.iter() {
        let name = reqwest::header::HeaderName::from_bytes(name.as_str().as_bytes());
        let value = reqwest::header::HeaderValue::from_bytes(value.as_bytes());
        if let (Ok(name), Ok(value)) = (name, value) {
            headers.append(name, value);
        }
    }

    Ok(NetworkRequest {
        method,
        url,
        mode: RequestMode::from_headers(&headers),
        headers,
        body,
    })
}

fn api_target(network: &NetworkCache, uri: &axum::http::Uri) -> Option<reqwest::Url> {
    if uri.scheme().is_none() || uri.authority().is_none() {
        return None;
    }
    let url = reqwest::Url::parse(&uri.to_string()).ok()?;
    network.is_api(&url).then_some(url)
}

const HOP_HEADERS: &[&str] = &["connection", "transfer-encoding", "content-length", "keep-alive"];

fn into_response(response: NetworkResponse) -> Response {
    let status = StatusCode::from_u16(response.status.as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
    let mut builder = Response::builder().status(status);
    for (name, value) in response.headers.iter() {
        if HOP_HEADERS.contains(&name.as_str()) {
            continue;
        }
        builder = builder.header(name.as_str(), value.as_bytes());
    }

    builder
        .body(Body::from(response.body))
        .unwrap_or_else(|_| StatusCode::BAD_GATEWAY.into_response())
}
