//! dexcache - Tiered Cache for the DexTrends Content Explorer
//!
//! Client-side caching in front of slow or rate-limited public data APIs
//! (Pokemon species, trading cards, prices), plus a service-worker style
//! network cache serving raw HTTP responses with per-resource strategies.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────────┐
//! │                               API Server (axum)                              │
//! │        /cache/*  /metrics  /healthz           fallback: caching proxy        │
//! ├──────────────────────────────────────┬──────────────────────────────────────┤
//! │          TieredCache<Value>          │             NetworkCache             │
//! │  ┌────────┐ ┌────────┐ ┌──────────┐  │  ┌────────┐ ┌────────┐ ┌──────────┐  │
//! │  │ Memory │ │ Local  │ │  Remote  │  │  │ static │ │  api   │ │  images  │  │
//! │  │  LRU   │ │ prefix │ │   rows   │  │  │ bucket │ │ bucket │ │  bucket  │  │
//! │  └────────┘ └───┬────┘ └────┬─────┘  │  └────────┘ └────────┘ └──────────┘  │
//! ├─────────────────┼───────────┼────────┴──────────────────────────────────────┤
//! │         KeyValueStore   RowStore (REST)              Upstream (reqwest)      │
//! └─────────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`cache`]: key codec, the three tiers and the orchestrator
//! - [`network`]: strategy-driven HTTP response cache
//! - [`api`]: REST endpoints and server
//! - [`config`]: YAML settings
//! - [`error`]: Error types and handling

pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod network;

// Re-export commonly used types
pub use api::{ApiMetrics, ApiServer, ApiServerConfig, AppState};

pub use cache::{
    CacheEntry, CacheEvent, CacheKey, CacheStatsSnapshot, CacheTier, CleanupHandle, Fetch,
    FetchOptions, GetOptions, HttpJsonFetcher, Identifier, Priority, SetOptions, TieredCache,
    TieredCacheConfig, WarmReport, WarmRequest,
};

pub use config::Settings;

pub use error::{Error, Result};

pub use network::{NetworkCache, NetworkCacheConfig, NetworkRequest, NetworkResponse, ResourceClass};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
