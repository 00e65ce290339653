//! Network Cache
//!
//! Service-worker style caching of raw HTTP exchanges. Every intercepted GET
//! is classified by URL and request shape, then served with the strategy of
//! its class:
//!
//! | Class      | Strategy                                              |
//! |------------|-------------------------------------------------------|
//! | Api        | stale-while-revalidate, background refresh            |
//! | Image      | cache-first with max-age, placeholder on failure      |
//! | Navigation | network-first, cached page, index, offline document   |
//! | Static     | cache-first, fetch on total miss                      |
//! | Other      | network-only, offline response on failure             |
//!
//! Independent of the tiered application cache.

pub mod bucket;
pub mod fallback;
pub mod request;
pub mod upstream;

pub use bucket::{Bucket, BucketRegistry, BucketStats, BUCKET_ITEM_PREFIX};
pub use request::{NetworkRequest, NetworkResponse, RequestMode};
pub use upstream::{HttpUpstream, Upstream};

use crate::cache::backend::KeyValueStore;
use crate::cache::manager::CleanupHandle;
use crate::error::{Error, Result};
use reqwest::Url;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the network cache
#[derive(Debug, Clone)]
pub struct NetworkCacheConfig {
    /// Origin the cache fronts; other origins are only cached for API patterns
    pub origin: Url,
    /// Bucket name prefix
    pub prefix: String,
    /// Version tag carried by every bucket name
    pub version: String,
    /// Glob patterns of data-API URLs
    pub api_patterns: Vec<glob::Pattern>,
    /// Hosts whose responses are always images
    pub image_hosts: Vec<String>,
    /// API responses older than this are revalidated inline
    pub api_max_age: Duration,
    /// Image responses older than this are refetched
    pub image_max_age: Duration,
    /// Bound on the image bucket
    pub image_max_entries: usize,
    /// Bound on the API bucket
    pub api_max_entries: usize,
    /// Bound on the static bucket, navigations included
    pub static_max_entries: usize,
    /// Paths fetched into the static bucket by [`NetworkCache::install`]
    pub precache: Vec<String>,
}

/// API URL patterns cached by default
pub const DEFAULT_API_PATTERNS: &[&str] = &[
    "https://api.pokemontcg.io/v2/*",
    "https://images.pokemontcg.io/*",
    "https://raw.githubusercontent.com/chase-manning/pokemon-tcg-pocket-cards/*",
    "https://limitlesstcg.nyc3.cdn.digitaloceanspaces.com/*",
];

/// Hosts serving card images
pub const DEFAULT_IMAGE_HOSTS: &[&str] = &[
    "images.pokemontcg.io",
    "limitlesstcg.nyc3.cdn.digitaloceanspaces.com",
];

impl NetworkCacheConfig {
    /// Defaults for the given origin
    pub fn for_origin(origin: Url) -> Self {
        Self {
            origin,
            prefix: "dextrends".to_string(),
            version: "1.1.0".to_string(),
            api_patterns: DEFAULT_API_PATTERNS
                .iter()
                .filter_map(|p| glob::Pattern::new(p).ok())
                .collect(),
            image_hosts: DEFAULT_IMAGE_HOSTS.iter().map(|h| h.to_string()).collect(),
            api_max_age: Duration::from_secs(24 * 60 * 60),
            image_max_age: Duration::from_secs(24 * 60 * 60),
            image_max_entries: 200,
            api_max_entries: 500,
            static_max_entries: 300,
            precache: vec!["/".to_string(), "/manifest.json".to_string()],
        }
    }

    /// Replace the API patterns, rejecting malformed globs
    pub fn with_api_patterns<S: AsRef<str>>(mut self, patterns: &[S]) -> Result<Self> {
        self.api_patterns = patterns
            .iter()
            .map(|p| {
                glob::Pattern::new(p.as_ref()).map_err(|e| {
                    Error::Configuration(format!("invalid API pattern '{}': {}", p.as_ref(), e))
                })
            })
            .collect::<Result<_>>()?;
        Ok(self)
    }

    /// Bucket name for a resource class: `<prefix>-<class>-v<version>`
    pub fn bucket_name(&self, class: BucketClass) -> String {
        format!("{}-{}-v{}", self.prefix, class, self.version)
    }
}

// =============================================================================
// Classification
// =============================================================================

/// Resource class of an intercepted request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceClass {
    Api,
    Image,
    Navigation,
    Static,
    Other,
}

/// Buckets kept by the network cache
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BucketClass {
    Static,
    Api,
    Images,
}

impl fmt::Display for BucketClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BucketClass::Static => write!(f, "static"),
            BucketClass::Api => write!(f, "api"),
            BucketClass::Images => write!(f, "images"),
        }
    }
}

const IMAGE_EXTENSIONS: &[&str] = &[".jpg", ".jpeg", ".png", ".gif", ".webp", ".svg"];
const STATIC_EXTENSIONS: &[&str] = &[".js", ".mjs", ".css", ".woff", ".woff2", ".ttf", ".otf", ".eot", ".map"];
const STATIC_PREFIX: &str = "/_next/static/";

// =============================================================================
// Statistics
// =============================================================================

#[derive(Debug, Default)]
struct NetworkMetrics {
    hits: AtomicU64,
    misses: AtomicU64,
    network_requests: AtomicU64,
    network_failures: AtomicU64,
    revalidations: AtomicU64,
    fallbacks: AtomicU64,
}

/// Point-in-time network cache statistics
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NetworkStats {
    pub version: String,
    pub hits: u64,
    pub misses: u64,
    pub network_requests: u64,
    pub network_failures: u64,
    /// Background API refreshes that updated a bucket
    pub revalidations: u64,
    /// Responses synthesized because nothing else was available
    pub fallbacks: u64,
    pub buckets: Vec<BucketStats>,
}

// =============================================================================
// Network Cache
// =============================================================================

/// Strategy-driven HTTP response cache
pub struct NetworkCache {
    config: NetworkCacheConfig,
    upstream: Arc<dyn Upstream>,
    buckets: BucketRegistry,
    metrics: Arc<NetworkMetrics>,
}

impl NetworkCache {
    /// Cache whose buckets live in process memory only
    pub fn new(config: NetworkCacheConfig, upstream: Arc<dyn Upstream>) -> Arc<Self> {
        Self::with_registry(config, upstream, BucketRegistry::new())
    }

    /// Cache whose buckets are kept in `store`, restoring whatever a
    /// previous process left there, older versions included
    pub async fn open(
        config: NetworkCacheConfig,
        upstream: Arc<dyn Upstream>,
        store: Arc<dyn KeyValueStore>,
    ) -> Result<Arc<Self>> {
        let registry = BucketRegistry::with_store(store);
        let restored = registry.restore().await?;
        info!(restored, buckets = ?registry.names(), "Restored network buckets");
        Ok(Self::with_registry(config, upstream, registry))
    }

    pub fn with_registry(
        config: NetworkCacheConfig,
        upstream: Arc<dyn Upstream>,
        buckets: BucketRegistry,
    ) -> Arc<Self> {
        info!(
            origin = %config.origin,
            version = %config.version,
            api_patterns = config.api_patterns.len(),
            persistent = buckets.is_persistent(),
            "Network cache initialized"
        );
        Arc::new(Self {
            config,
            upstream,
            buckets,
            metrics: Arc::new(NetworkMetrics::default()),
        })
    }

    pub fn config(&self) -> &NetworkCacheConfig {
        &self.config
    }

    pub fn buckets(&self) -> &BucketRegistry {
        &self.buckets
    }

    /// Bucket of the current version for a class
    pub fn bucket(&self, class: BucketClass) -> Arc<Bucket> {
        self.buckets.open(&self.config.bucket_name(class))
    }

    /// Whether the URL matches one of the API patterns
    pub fn is_api(&self, url: &Url) -> bool {
        self.config
            .api_patterns
            .iter()
            .any(|pattern| pattern.matches(url.as_str()))
    }

    fn is_image(&self, url: &Url) -> bool {
        let path = url.path().to_ascii_lowercase();
        IMAGE_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
            || url
                .host_str()
                .map_or(false, |host| self.config.image_hosts.iter().any(|h| host.contains(h.as_str())))
    }

    fn is_static(&self, url: &Url) -> bool {
        let path = url.path().to_ascii_lowercase();
        path.starts_with(STATIC_PREFIX)
            || STATIC_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
            || self.config.precache.iter().any(|p| p != "/" && p == url.path())
    }

    fn same_origin(&self, url: &Url) -> bool {
        url.origin() == self.config.origin.origin()
    }

    /// Whether the request is handled by a caching strategy at all.
    /// Non-GET requests and cross-origin requests outside the API patterns
    /// go straight to the network.
    pub fn intercepts(&self, request: &NetworkRequest) -> bool {
        request.is_get() && (self.same_origin(&request.url) || self.is_api(&request.url))
    }

    /// Classify an intercepted request; API patterns win over image rules
    pub fn classify(&self, request: &NetworkRequest) -> ResourceClass {
        let url = &request.url;
        if self.is_api(url) {
            ResourceClass::Api
        } else if self.is_image(url) {
            ResourceClass::Image
        } else if request.mode == RequestMode::Navigate {
            ResourceClass::Navigation
        } else if self.is_static(url) {
            ResourceClass::Static
        } else {
            ResourceClass::Other
        }
    }

    /// Serve a request. Never fails: failures become cached or synthesized
    /// responses.
    pub async fn handle(&self, request: NetworkRequest) -> NetworkResponse {
        if !self.intercepts(&request) {
            return match self.fetch(&request).await {
                Ok(response) => response,
                Err(_) => self.fallback(fallback::service_unavailable()),
            };
        }

        let class = self.classify(&request);
        debug!(url = %request.url, class = ?class, "Handling request");

        match class {
            ResourceClass::Api => self.handle_api(request).await,
            ResourceClass::Image => self.handle_image(request).await,
            ResourceClass::Navigation => self.handle_navigation(request).await,
            ResourceClass::Static => self.handle_static(request).await,
            ResourceClass::Other => self.handle_other(request).await,
        }
    }

    async fn fetch(&self, request: &NetworkRequest) -> Result<NetworkResponse> {
        self.metrics.network_requests.fetch_add(1, Ordering::Relaxed);
        let result = self.upstream.fetch(request).await;
        if let Err(e) = &result {
            self.metrics.network_failures.fetch_add(1, Ordering::Relaxed);
            warn!(url = %request.url, error = %e, "Network fetch failed");
        }
        result
    }

    fn hit(&self, response: NetworkResponse) -> NetworkResponse {
        self.metrics.hits.fetch_add(1, Ordering::Relaxed);
        response
    }

    fn miss(&self) {
        self.metrics.misses.fetch_add(1, Ordering::Relaxed);
    }

    fn fallback(&self, response: NetworkResponse) -> NetworkResponse {
        self.metrics.fallbacks.fetch_add(1, Ordering::Relaxed);
        response
    }

    fn max_entries(&self, class: BucketClass) -> usize {
        match class {
            BucketClass::Static => self.config.static_max_entries,
            BucketClass::Api => self.config.api_max_entries,
            BucketClass::Images => self.config.image_max_entries,
        }
    }

    /// Store a response and hold the bucket to its bound
    fn store(&self, class: BucketClass, bucket: &Bucket, key: &str, response: NetworkResponse) {
        bucket.put(key, response);
        let trimmed = bucket.trim_to(self.max_entries(class));
        if trimmed > 0 {
            debug!(bucket = %class, trimmed, "Trimmed bucket");
        }
    }

    // -------------------------------------------------------------------------
    // Strategies
    // -------------------------------------------------------------------------

    /// Stale-while-revalidate
    async fn handle_api(&self, request: NetworkRequest) -> NetworkResponse {
        let bucket = self.bucket(BucketClass::Api);
        let cached = bucket.lookup(request.cache_key());

        if let Some(response) = cached.as_ref().filter(|r| r.is_fresh(self.config.api_max_age)) {
            self.spawn_revalidation(request.clone(), Arc::clone(&bucket));
            return self.hit(response.clone());
        }

        self.miss();
        match self.fetch(&request).await {
            Ok(response) if response.is_ok() => {
                self.store(BucketClass::Api, &bucket, request.cache_key(), response.clone());
                response
            }
            Ok(response) => match cached {
                Some(stale) => self.hit(stale),
                None => response,
            },
            Err(_) => match cached {
                Some(stale) => {
                    debug!(url = %request.url, "Serving stale API response");
                    self.hit(stale)
                }
                None => self.fallback(fallback::service_unavailable()),
            },
        }
    }

    /// Refresh an API response without holding up the caller
    fn spawn_revalidation(&self, request: NetworkRequest, bucket: Arc<Bucket>) {
        let upstream = Arc::clone(&self.upstream);
        let metrics = Arc::clone(&self.metrics);
        let max_entries = self.config.api_max_entries;

        tokio::spawn(async move {
            metrics.network_requests.fetch_add(1, Ordering::Relaxed);
            match upstream.fetch(&request).await {
                Ok(response) if response.is_ok() => {
                    bucket.put(request.cache_key(), response);
                    bucket.trim_to(max_entries);
                    metrics.revalidations.fetch_add(1, Ordering::Relaxed);
                    debug!(url = %request.url, "Revalidated API response");
                }
                Ok(response) => {
                    debug!(url = %request.url, status = %response.status, "Revalidation not stored");
                }
                Err(e) => {
                    metrics.network_failures.fetch_add(1, Ordering::Relaxed);
                    debug!(url = %request.url, error = %e, "Background revalidation failed");
                }
            }
        });
    }

    /// Cache-first with a freshness check
    async fn handle_image(&self, request: NetworkRequest) -> NetworkResponse {
        let bucket = self.bucket(BucketClass::Images);
        let cached = bucket.lookup(request.cache_key());

        if let Some(response) = cached.as_ref().filter(|r| r.is_fresh(self.config.image_max_age)) {
            return self.hit(response.clone());
        }

        self.miss();
        match self.fetch(&request).await {
            Ok(response) if response.is_ok() => {
                self.store(BucketClass::Images, &bucket, request.cache_key(), response.clone());
                response
            }
            _ => match cached {
                Some(expired) => self.hit(expired),
                None => self.fallback(fallback::placeholder_image()),
            },
        }
    }

    /// Network-first
    async fn handle_navigation(&self, request: NetworkRequest) -> NetworkResponse {
        let bucket = self.bucket(BucketClass::Static);

        let live = match self.fetch(&request).await {
            Ok(response) if response.is_ok() => {
                self.store(BucketClass::Static, &bucket, request.cache_key(), response.clone());
                return response;
            }
            Ok(response) => Some(response),
            Err(_) => None,
        };

        if let Some(cached) = bucket.lookup(request.cache_key()) {
            return self.hit(cached);
        }
        if let Some(response) = live {
            return response;
        }

        self.miss();
        let index = self.config.origin.join("/").ok();
        if let Some(cached) = index.and_then(|url| bucket.lookup(url.as_str())) {
            return self.hit(cached);
        }
        self.fallback(fallback::offline_document())
    }

    /// Cache-first, fetch on total miss
    async fn handle_static(&self, request: NetworkRequest) -> NetworkResponse {
        let bucket = self.bucket(BucketClass::Static);
        if let Some(cached) = bucket.lookup(request.cache_key()) {
            return self.hit(cached);
        }

        self.miss();
        match self.fetch(&request).await {
            Ok(response) => {
                if response.is_ok() {
                    self.store(BucketClass::Static, &bucket, request.cache_key(), response.clone());
                }
                response
            }
            Err(_) => self.offline(&request),
        }
    }

    /// Network-only
    async fn handle_other(&self, request: NetworkRequest) -> NetworkResponse {
        match self.fetch(&request).await {
            Ok(response) => response,
            Err(_) => self.offline(&request),
        }
    }

    /// Any bucketed copy of the request, else the class-appropriate fallback
    fn offline(&self, request: &NetworkRequest) -> NetworkResponse {
        for class in [BucketClass::Static, BucketClass::Api, BucketClass::Images] {
            if let Some(cached) = self.bucket(class).lookup(request.cache_key()) {
                return self.hit(cached);
            }
        }

        let response = if request.mode == RequestMode::Navigate {
            fallback::offline_document()
        } else if self.is_image(&request.url) {
            fallback::placeholder_image()
        } else {
            fallback::service_unavailable()
        };
        self.fallback(response)
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    /// Fetch the precache list into the static bucket, returning how many
    /// paths were stored. Failures are logged and skipped.
    pub async fn install(&self) -> usize {
        let bucket = self.bucket(BucketClass::Static);
        let mut stored = 0;

        for path in &self.config.precache {
            let url = match self.config.origin.join(path) {
                Ok(url) => url,
                Err(e) => {
                    warn!(path = %path, error = %e, "Skipping invalid precache path");
                    continue;
                }
            };
            let request = NetworkRequest::get(url);
            match self.fetch(&request).await {
                Ok(response) if response.is_ok() => {
                    self.store(BucketClass::Static, &bucket, request.cache_key(), response);
                    stored += 1;
                }
                Ok(response) => {
                    warn!(url = %request.url, status = %response.status, "Precache fetch rejected");
                }
                Err(_) => {}
            }
        }

        info!(stored, total = self.config.precache.len(), "Network cache installed");
        self.flush().await;
        stored
    }

    /// Delete every bucket that does not carry the current version, from
    /// the store as well when the buckets are persistent
    pub async fn activate(&self) -> Vec<String> {
        let deleted = self.buckets.retain_version(&self.config.version);
        self.flush().await;
        info!(version = %self.config.version, deleted = deleted.len(), "Network cache activated");
        deleted
    }

    /// Drop aged API and image responses and hold every bucket to its bound
    pub fn sweep(&self) -> usize {
        let api = self.bucket(BucketClass::Api);
        let aged_api = api.purge_older_than(self.config.api_max_age);
        let trimmed_api = api.trim_to(self.config.api_max_entries);

        let images = self.bucket(BucketClass::Images);
        let aged_images = images.purge_older_than(self.config.image_max_age);
        let trimmed_images = images.trim_to(self.config.image_max_entries);

        let trimmed_static = self
            .bucket(BucketClass::Static)
            .trim_to(self.config.static_max_entries);

        let removed = aged_api + trimmed_api + aged_images + trimmed_images + trimmed_static;
        if removed > 0 {
            debug!(
                api = aged_api + trimmed_api,
                images = aged_images + trimmed_images,
                static_assets = trimmed_static,
                "Swept network buckets"
            );
        }
        removed
    }

    /// Write changed buckets to the store, returning how many were written.
    /// Store failures are logged; the buckets stay marked for the next flush.
    pub async fn flush(&self) -> usize {
        match self.buckets.persist().await {
            Ok(written) => {
                if written > 0 {
                    debug!(written, "Flushed network buckets");
                }
                written
            }
            Err(e) => {
                warn!(error = %e, "Failed to persist network buckets");
                0
            }
        }
    }

    /// Run [`sweep`](Self::sweep) and [`flush`](Self::flush) every `period`
    /// until stopped
    pub fn spawn_sweep(self: &Arc<Self>, period: Duration) -> CleanupHandle {
        let cache = Arc::clone(self);
        CleanupHandle::spawn("network-sweep", period, move || {
            let cache = Arc::clone(&cache);
            async move {
                cache.sweep();
                cache.flush().await;
            }
        })
    }

    pub fn stats(&self) -> NetworkStats {
        NetworkStats {
            version: self.config.version.clone(),
            hits: self.metrics.hits.load(Ordering::Relaxed),
            misses: self.metrics.misses.load(Ordering::Relaxed),
            network_requests: self.metrics.network_requests.load(Ordering::Relaxed),
            network_failures: self.metrics.network_failures.load(Ordering::Relaxed),
            revalidations: self.metrics.revalidations.load(Ordering::Relaxed),
            fallbacks: self.metrics.fallbacks.load(Ordering::Relaxed),
            buckets: self.buckets.stats(),
        }
    }
}
