//! Tiered Application Cache
//!
//! A three-tier cache in front of external data APIs:
//! - **Memory**: bounded in-process map, least-recently-accessed eviction
//! - **Local**: JSON envelopes in a device key-value store under a prefix
//! - **Remote**: rows in a shared table, tagged with a category
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                            TieredCache<T>                                │
//! │        get: waterfall + promotion   set: priority fan-out                │
//! │        cached_fetch: read-through with optional stale fallback           │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐  ┌──────────────────┐  ┌──────────────────────────┐   │
//! │  │  MemoryTier  │  │    LocalTier     │  │       RemoteTier         │   │
//! │  │  (IndexMap)  │  │  KeyValueStore   │  │        RowStore          │   │
//! │  │  5 min TTL   │  │  1 h TTL         │  │        24 h TTL          │   │
//! │  └──────────────┘  └──────────────────┘  └──────────────────────────┘   │
//! │      Normal ──────────── High ─────────────────── Critical              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use dexcache::cache::{FetchOptions, Priority, TieredCache, TieredCacheConfig};
//! use dexcache::cache::backend::{MemoryKeyValueStore, MemoryRowStore};
//! use std::sync::Arc;
//!
//! let cache: Arc<TieredCache<serde_json::Value>> = TieredCache::new(
//!     TieredCacheConfig::default(),
//!     Arc::new(MemoryKeyValueStore::new()),
//!     Arc::new(MemoryRowStore::new()),
//! );
//!
//! let pokemon = cache
//!     .cached_fetch(
//!         "https://pokeapi.co/api/v2/pokemon/25",
//!         || fetcher.get_json("https://pokeapi.co/api/v2/pokemon/25"),
//!         FetchOptions::new(Priority::High).stale_while_revalidate(true),
//!     )
//!     .await?;
//!
//! let cleanup = cache.spawn_cleanup(std::time::Duration::from_secs(300));
//! // ...
//! cleanup.stop().await;
//! ```

pub mod backend;
pub mod entry;
pub mod events;
pub mod fetch;
pub mod key;
pub mod manager;
pub mod metrics;
pub mod storage;
pub mod tier;
pub mod warm;

// Re-export main types
pub use entry::CacheEntry;
pub use events::CacheEvent;
pub use fetch::{Fetch, FetcherConfig, HttpJsonFetcher};
pub use key::{CacheKey, Identifier, KeyParams};
pub use manager::{CleanupHandle, FetchOptions, GetOptions, SetOptions, TieredCache, TieredCacheConfig};
pub use metrics::{CacheStatsSnapshot, TierStats};
pub use storage::{CacheValue, LocalTier, MemoryTier, ReadMode, RemoteTier, TierFault, TierResult, TierStorage};
pub use tier::{CacheTier, Priority};
pub use warm::{WarmReport, WarmRequest};
