//! Network cache strategies against a scripted origin

use async_trait::async_trait;
use dexcache::cache::backend::{KeyValueStore, MemoryKeyValueStore};
use dexcache::network::{
    BucketClass, NetworkCache, NetworkCacheConfig, NetworkRequest, NetworkResponse, Upstream,
};
use dexcache::{Error, Result};
use reqwest::{Method, StatusCode, Url};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Origin that answers with the request path and a call counter, or fails
/// while offline
struct ScriptedOrigin {
    online: AtomicBool,
    calls: AtomicUsize,
}

impl ScriptedOrigin {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            online: AtomicBool::new(true),
            calls: AtomicUsize::new(0),
        })
    }

    fn go_offline(&self) {
        self.online.store(false, Ordering::SeqCst);
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Upstream for ScriptedOrigin {
    async fn fetch(&self, request: &NetworkRequest) -> Result<NetworkResponse> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if !self.online.load(Ordering::SeqCst) {
            return Err(Error::Internal("connection refused".into()));
        }
        let status = if request.url.path().contains("missing") {
            StatusCode::NOT_FOUND
        } else {
            StatusCode::OK
        };
        Ok(NetworkResponse::with_content_type(
            status,
            "text/plain",
            format!("{} #{}", request.url.path(), n),
        ))
    }
}

fn config() -> NetworkCacheConfig {
    NetworkCacheConfig::for_origin(Url::parse("https://dextrends.app").unwrap())
}

fn setup() -> (Arc<NetworkCache>, Arc<ScriptedOrigin>) {
    let origin = ScriptedOrigin::new();
    (NetworkCache::new(config(), origin.clone()), origin)
}

fn get(url: &str) -> NetworkRequest {
    NetworkRequest::get(Url::parse(url).unwrap())
}

fn navigate(url: &str) -> NetworkRequest {
    NetworkRequest::navigate(Url::parse(url).unwrap())
}

fn text(response: &NetworkResponse) -> String {
    String::from_utf8(response.body.to_vec()).unwrap()
}

fn aged(body: &'static str, age: chrono::Duration) -> NetworkResponse {
    let mut response = NetworkResponse::with_content_type(StatusCode::OK, "text/plain", body);
    response.stored_at = chrono::Utc::now() - age;
    response
}

#[tokio::test]
async fn api_requests_revalidate_in_background() {
    let (cache, origin) = setup();
    let url = "https://api.pokemontcg.io/v2/cards?q=name:pikachu";

    let first = cache.handle(get(url)).await;
    assert_eq!(text(&first), "/v2/cards #1");

    // Served from the bucket while a refresh runs
    let second = cache.handle(get(url)).await;
    assert_eq!(text(&second), "/v2/cards #1");

    tokio::time::timeout(Duration::from_secs(2), async {
        while cache.stats().revalidations == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    let third = cache.handle(get(url)).await;
    assert_eq!(text(&third), "/v2/cards #2");
    assert!(origin.calls() >= 2);
}

#[tokio::test]
async fn api_failures_fall_back_to_cached_copy() {
    let (cache, origin) = setup();
    let url = "https://api.pokemontcg.io/v2/sets";

    // Aged past max-age so the request goes to the network inline
    cache
        .bucket(BucketClass::Api)
        .put(url, aged("cached sets", chrono::Duration::hours(30)));
    origin.go_offline();

    let response = cache.handle(get(url)).await;
    assert_eq!(text(&response), "cached sets");

    let uncached = cache.handle(get("https://api.pokemontcg.io/v2/types")).await;
    assert_eq!(uncached.status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(text(&uncached), "Offline");
}

#[tokio::test]
async fn api_error_status_is_not_cached() {
    let (cache, _) = setup();
    let url = "https://api.pokemontcg.io/v2/cards/missing";

    let response = cache.handle(get(url)).await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);
    assert!(cache.bucket(BucketClass::Api).lookup(url).is_none());
}

#[tokio::test]
async fn images_are_cache_first_until_stale() {
    let (cache, origin) = setup();
    let url = "https://dextrends.app/images/pokeball.png";

    cache.handle(get(url)).await;
    let cached = cache.handle(get(url)).await;
    assert_eq!(text(&cached), "/images/pokeball.png #1");
    assert_eq!(origin.calls(), 1);

    // Stale copy is refetched, and still served when the network fails
    cache
        .bucket(BucketClass::Images)
        .put(url, aged("old pokeball", chrono::Duration::hours(25)));
    let refreshed = cache.handle(get(url)).await;
    assert_eq!(text(&refreshed), "/images/pokeball.png #2");

    cache
        .bucket(BucketClass::Images)
        .put(url, aged("old pokeball", chrono::Duration::hours(25)));
    origin.go_offline();
    let offline = cache.handle(get(url)).await;
    assert_eq!(text(&offline), "old pokeball");

    let placeholder = cache.handle(get("https://dextrends.app/images/unknown.webp")).await;
    assert_eq!(placeholder.content_type(), Some("image/svg+xml"));
}

#[tokio::test]
async fn image_bucket_is_bounded() {
    let origin = ScriptedOrigin::new();
    let mut config = config();
    config.image_max_entries = 3;
    let cache = NetworkCache::new(config, origin);

    for i in 0..5 {
        cache
            .handle(get(&format!("https://dextrends.app/sprites/{}.png", i)))
            .await;
    }

    let bucket = cache.bucket(BucketClass::Images);
    assert_eq!(bucket.len(), 3);
    assert!(bucket.lookup("https://dextrends.app/sprites/0.png").is_none());
    assert!(bucket.lookup("https://dextrends.app/sprites/4.png").is_some());
}

#[tokio::test]
async fn static_and_api_buckets_are_bounded() {
    let origin = ScriptedOrigin::new();
    let mut config = config();
    config.static_max_entries = 3;
    config.api_max_entries = 3;
    let cache = NetworkCache::new(config, origin);

    // Query-string variants are distinct entries
    for i in 0..4 {
        cache
            .handle(get(&format!("https://dextrends.app/_next/static/app.js?v={}", i)))
            .await;
        cache
            .handle(get(&format!("https://api.pokemontcg.io/v2/cards?page={}", i)))
            .await;
    }

    let assets = cache.bucket(BucketClass::Static);
    assert_eq!(assets.len(), 3);
    assert!(assets.lookup("https://dextrends.app/_next/static/app.js?v=0").is_none());
    assert!(assets.lookup("https://dextrends.app/_next/static/app.js?v=3").is_some());
    assert_eq!(cache.bucket(BucketClass::Api).len(), 3);
}

#[tokio::test]
async fn navigation_is_network_first_with_fallbacks() {
    let (cache, origin) = setup();
    assert_eq!(cache.install().await, 2);

    let live = cache.handle(navigate("https://dextrends.app/pokedex")).await;
    assert_eq!(text(&live), "/pokedex #3");

    origin.go_offline();

    let cached = cache.handle(navigate("https://dextrends.app/pokedex")).await;
    assert_eq!(text(&cached), "/pokedex #3");

    // Never visited: the precached index document answers
    let index = cache.handle(navigate("https://dextrends.app/sets/base1")).await;
    assert_eq!(text(&index), "/ #1");
}

#[tokio::test]
async fn navigation_without_index_gets_offline_document() {
    let (cache, origin) = setup();
    origin.go_offline();

    let response = cache.handle(navigate("https://dextrends.app/trending")).await;
    assert_eq!(response.status, StatusCode::OK);
    assert!(response.content_type().unwrap().starts_with("text/html"));
    assert!(text(&response).contains("Offline"));
    assert_eq!(cache.stats().fallbacks, 1);
}

#[tokio::test]
async fn static_assets_are_cache_first() {
    let (cache, origin) = setup();
    let url = "https://dextrends.app/_next/static/css/app.css";

    cache.handle(get(url)).await;
    origin.go_offline();
    let cached = cache.handle(get(url)).await;

    assert_eq!(text(&cached), "/_next/static/css/app.css #1");
    assert_eq!(cache.stats().hits, 1);
}

#[tokio::test]
async fn non_get_and_foreign_requests_bypass_buckets() {
    let (cache, origin) = setup();

    let post = get("https://dextrends.app/api/favorites").with_method(Method::POST);
    assert!(!cache.intercepts(&post));
    let response = cache.handle(post).await;
    assert_eq!(response.status, StatusCode::OK);

    let foreign = get("https://analytics.example.com/collect.js");
    cache.handle(foreign).await;

    assert_eq!(origin.calls(), 2);
    assert!(cache.buckets().stats().iter().all(|bucket| bucket.entries == 0));
}

#[tokio::test]
async fn other_requests_are_network_only() {
    let (cache, origin) = setup();
    let url = "https://dextrends.app/api/health";

    cache.handle(get(url)).await;
    cache.handle(get(url)).await;
    assert_eq!(origin.calls(), 2);

    origin.go_offline();
    let response = cache.handle(get(url)).await;
    assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn activation_drops_previous_versions() {
    let (cache, _) = setup();
    cache.buckets().open("dextrends-static-v1.0.0");
    cache.buckets().open("dextrends-api-v1.0.0");
    cache.bucket(BucketClass::Static);

    let mut deleted = cache.activate().await;
    deleted.sort();
    assert_eq!(deleted, vec!["dextrends-api-v1.0.0", "dextrends-static-v1.0.0"]);
    assert_eq!(cache.buckets().names(), vec!["dextrends-static-v1.1.0"]);
}

#[tokio::test]
async fn sweep_purges_aged_responses() {
    let (cache, _) = setup();
    let api = cache.bucket(BucketClass::Api);
    api.put("https://api.pokemontcg.io/v2/a", aged("old", chrono::Duration::hours(25)));
    api.put("https://api.pokemontcg.io/v2/b", aged("new", chrono::Duration::minutes(5)));
    cache
        .bucket(BucketClass::Images)
        .put("https://dextrends.app/x.png", aged("old", chrono::Duration::hours(48)));

    assert_eq!(cache.sweep(), 2);
    assert_eq!(api.len(), 1);

    let handle = cache.spawn_sweep(Duration::from_millis(10));
    assert!(handle.is_running());
    handle.stop().await;
}

#[tokio::test]
async fn new_version_deletes_persisted_buckets() {
    let store = Arc::new(MemoryKeyValueStore::new());

    let first = NetworkCache::open(config(), ScriptedOrigin::new(), store.clone())
        .await
        .unwrap();
    first.activate().await;
    first.handle(get("https://dextrends.app/_next/static/app.js")).await;
    first.handle(get("https://api.pokemontcg.io/v2/sets")).await;
    assert_eq!(first.flush().await, 2);

    let mut next_config = config();
    next_config.version = "1.2.0".to_string();
    let next = NetworkCache::open(next_config, ScriptedOrigin::new(), store.clone())
        .await
        .unwrap();
    assert_eq!(
        next.buckets().names(),
        vec!["dextrends-api-v1.1.0", "dextrends-static-v1.1.0"]
    );

    let mut deleted = next.activate().await;
    deleted.sort();
    assert_eq!(deleted, vec!["dextrends-api-v1.1.0", "dextrends-static-v1.1.0"]);
    assert!(next.buckets().names().is_empty());
    assert!(store.keys().await.unwrap().is_empty());
}

#[tokio::test]
async fn cached_responses_survive_restart() {
    let store = Arc::new(MemoryKeyValueStore::new());
    let url = "https://dextrends.app/_next/static/css/app.css";

    let first = NetworkCache::open(config(), ScriptedOrigin::new(), store.clone())
        .await
        .unwrap();
    first.handle(get(url)).await;
    first.flush().await;

    let origin = ScriptedOrigin::new();
    origin.go_offline();
    let restarted = NetworkCache::open(config(), origin.clone(), store).await.unwrap();
    assert!(restarted.activate().await.is_empty());

    let cached = restarted.handle(get(url)).await;
    assert_eq!(text(&cached), "/_next/static/css/app.css #1");
    assert_eq!(origin.calls(), 0);
}
