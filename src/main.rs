//! dexcache
//!
//! Cache service for the DexTrends content explorer. Serves a read-through
//! JSON cache over a memory, local-file and remote-row tier stack, and
//! fronts the web origin with a strategy-driven response cache.

use clap::Parser;
use serde_json::Value;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use dexcache::cache::backend::{FileKeyValueStore, MemoryRowStore, RestRowStore, RowStore};
use dexcache::cache::fetch::FetcherConfig;
use dexcache::cache::warm::DEFAULT_WARM_CONCURRENCY;
use dexcache::network::HttpUpstream;
use dexcache::{
    ApiMetrics, ApiServer, ApiServerConfig, AppState, Error, HttpJsonFetcher, NetworkCache,
    Priority, Result, Settings, TieredCache, WarmRequest,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// dexcache - tiered data cache and caching proxy for DexTrends
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// REST API bind address
    #[arg(long, env = "API_ADDR", default_value = "0.0.0.0:8090")]
    api_addr: String,

    /// YAML settings file
    #[arg(long, env = "DEXCACHE_CONFIG")]
    config: Option<PathBuf>,

    /// Data directory: `local/` holds the local tier, `network/` the
    /// response buckets
    #[arg(long, env = "DEXCACHE_DATA_DIR", default_value = "./data")]
    data_dir: PathBuf,

    /// Origin fronted by the network cache
    #[arg(long, env = "ORIGIN_URL")]
    origin: Option<String>,

    /// Base URL of the remote row service
    #[arg(long, env = "REMOTE_URL")]
    remote_url: Option<String>,

    /// API key of the remote row service
    #[arg(long, env = "REMOTE_API_KEY", hide_env_values = true)]
    remote_key: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

impl Args {
    /// Command-line values win over the settings file
    fn apply(&self, settings: &mut Settings) {
        if let Some(origin) = &self.origin {
            settings.network.origin = origin.clone();
        }
        if let Some(url) = &self.remote_url {
            settings.remote.url = Some(url.clone());
        }
        if let Some(key) = &self.remote_key {
            settings.remote.api_key = key.clone();
        }
    }
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args);

    let mut settings = match &args.config {
        Some(path) => Settings::load(path).await?,
        None => Settings::default(),
    };
    args.apply(&mut settings);
    settings.validate()?;

    info!("Starting dexcache");
    info!("  Version: {}", dexcache::VERSION);
    info!("  REST API: {}", args.api_addr);
    info!("  Origin: {}", settings.network.origin);
    info!("  Data dir: {}", args.data_dir.display());

    // Tiered cache
    let local_store =
        FileKeyValueStore::open_with_quota(args.data_dir.join("local"), settings.local.quota_bytes).await?;

    let row_store: Arc<dyn RowStore> = match settings.row_store_config() {
        Some(config) => {
            info!("  Remote tier: {}", config.base_url);
            Arc::new(RestRowStore::new(config)?)
        }
        None => {
            warn!("No remote row service configured, remote tier kept in process memory");
            Arc::new(MemoryRowStore::new())
        }
    };

    let cache: Arc<TieredCache<Value>> =
        TieredCache::new(settings.tiered_cache_config(), Arc::new(local_store), row_store);
    let cleanup = cache.spawn_cleanup(settings.cleanup_interval());

    // Network cache
    let upstream = HttpUpstream::new(Duration::from_secs(settings.network.upstream_timeout_secs))?;
    let bucket_store = FileKeyValueStore::open(args.data_dir.join("network")).await?;
    let network = NetworkCache::open(
        settings.network_cache_config()?,
        Arc::new(upstream),
        Arc::new(bucket_store),
    )
    .await?;
    network.activate().await;
    let sweep = network.spawn_sweep(settings.sweep_interval());

    // API
    let fetcher = Arc::new(HttpJsonFetcher::new(FetcherConfig::default())?);
    let state = AppState::new(
        cache.clone(),
        network.clone(),
        fetcher.clone(),
        Arc::new(ApiMetrics::new()?),
    );

    let addr: SocketAddr = args
        .api_addr
        .parse()
        .map_err(|e| Error::Configuration(format!("Invalid REST API address: {}", e)))?;
    let server = ApiServer::new(ApiServerConfig { addr }, state.clone());

    // Precache and warm-up run while the server already answers
    let warm_urls = settings.warm_urls.clone();
    let installing = network.clone();
    tokio::spawn(async move {
        installing.install().await;
        if !warm_urls.is_empty() {
            let requests = warm_urls
                .into_iter()
                .map(|url| WarmRequest::new(url, Priority::High))
                .collect();
            cache
                .warm_cache(fetcher.as_ref(), requests, DEFAULT_WARM_CONCURRENCY)
                .await;
        }
        state.set_ready(true);
        info!("dexcache ready");
    });

    let shutdown = server.shutdown_handle();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutdown signal received");
                let _ = shutdown.send(());
            }
            Err(e) => error!("Failed to listen for shutdown signal: {}", e),
        }
    });

    server.run().await?;

    cleanup.stop().await;
    sweep.stop().await;
    network.flush().await;

    info!("dexcache shutdown complete");
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    for directive in ["hyper=warn", "reqwest=info", "tower_http=info"] {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}
