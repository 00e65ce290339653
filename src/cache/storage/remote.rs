//! Persistent-Remote Tier
//!
//! Upserts serialized values into a shared [`RowStore`] table. Every store
//! failure is logged and reported as a fault, never propagated to callers
//! of the orchestrator.

use crate::cache::backend::{CacheRow, RowStore};
use crate::cache::entry::{expiry_from, CacheEntry, SCHEMA_VERSION};
use crate::cache::key::CacheKey;
use crate::cache::metrics::{TierMetrics, TierStats};
use crate::cache::storage::{CacheValue, ReadMode, TierFault, TierResult, TierStorage};
use crate::cache::tier::{CacheTier, REMOTE_DEFAULT_TTL};
use async_trait::async_trait;
use chrono::Utc;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Configuration for the persistent-remote tier
#[derive(Debug, Clone)]
pub struct RemoteTierConfig {
    /// Lifetime used when the caller supplies none
    pub default_ttl: Duration,
}

impl Default for RemoteTierConfig {
    fn default() -> Self {
        Self {
            default_ttl: REMOTE_DEFAULT_TTL,
        }
    }
}

/// Category tag for a key, from keywords in its plain-text hint
pub fn category_for(hint: &str) -> &'static str {
    let hint = hint.to_ascii_lowercase();
    if hint.contains("pokemon") {
        "pokemon"
    } else if hint.contains("card") || hint.contains("tcg") {
        "cards"
    } else if hint.contains("price") {
        "prices"
    } else {
        "general"
    }
}

/// Persistent-remote tier over a shared row store
pub struct RemoteTier<T> {
    store: Arc<dyn RowStore>,
    config: RemoteTierConfig,
    metrics: TierMetrics,
    _value: PhantomData<fn() -> T>,
}

impl<T: CacheValue> RemoteTier<T> {
    pub fn new(store: Arc<dyn RowStore>) -> Self {
        Self::with_config(store, RemoteTierConfig::default())
    }

    pub fn with_config(store: Arc<dyn RowStore>, config: RemoteTierConfig) -> Self {
        Self {
            store,
            config,
            metrics: TierMetrics::new(),
            _value: PhantomData,
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.config.default_ttl
    }

    async fn read(&self, key: &CacheKey, mode: ReadMode) -> TierResult<CacheEntry<T>> {
        let now = Utc::now();
        // The store filters expiry unless the caller wants stale rows back
        let live_at = (mode != ReadMode::IgnoreExpiry).then_some(now);

        let row = self
            .store
            .select(key.as_str(), live_at)
            .await
            .map_err(|e| {
                warn!(key = %key, error = %e, "Remote cache lookup failed");
                TierFault::Unavailable(e.to_string())
            })?
            .ok_or(TierFault::Absent)?;

        let data: T = serde_json::from_value(row.cache_data).map_err(|e| {
            warn!(key = %key, error = %e, "Remote cache row has an unexpected shape");
            TierFault::Corrupt(e.to_string())
        })?;

        Ok(CacheEntry {
            key: key.clone(),
            data,
            stored_at: row.created_at,
            expires_at: row.expires_at,
            schema_version: SCHEMA_VERSION.to_string(),
        })
    }
}

#[async_trait]
impl<T: CacheValue> TierStorage<T> for RemoteTier<T> {
    fn tier(&self) -> CacheTier {
        CacheTier::Remote
    }

    async fn get(&self, key: &CacheKey, mode: ReadMode) -> TierResult<CacheEntry<T>> {
        let result = self.read(key, mode).await;
        if mode != ReadMode::IgnoreExpiry {
            match &result {
                Ok(_) => self.metrics.record_hit(),
                Err(_) => self.metrics.record_miss(),
            }
        }
        result
    }

    async fn set(&self, key: &CacheKey, value: &T, ttl: Duration) -> TierResult<()> {
        let created_at = Utc::now();
        let cache_data =
            serde_json::to_value(value).map_err(|e| TierFault::Corrupt(e.to_string()))?;
        let row = CacheRow {
            cache_key: key.as_str().to_string(),
            cache_data,
            expires_at: expiry_from(created_at, ttl),
            created_at,
            category: category_for(key.hint()).to_string(),
        };

        self.store.upsert(row).await.map_err(|e| {
            warn!(key = %key, error = %e, "Remote cache write dropped");
            TierFault::Unavailable(e.to_string())
        })
    }

    async fn delete(&self, key: &CacheKey) -> TierResult<()> {
        self.store.delete(key.as_str()).await.map_err(|e| {
            warn!(key = %key, error = %e, "Remote cache delete failed");
            TierFault::Unavailable(e.to_string())
        })
    }

    /// Deletes only rows already past expiry; live rows written by other
    /// clients sharing the table are left alone.
    async fn clear(&self) -> TierResult<()> {
        self.metrics.reset();
        self.cleanup().await.map(|_| ())
    }

    async fn cleanup(&self) -> TierResult<usize> {
        let removed = self.store.delete_expired(Utc::now()).await.map_err(|e| {
            warn!(error = %e, "Remote cache cleanup failed");
            TierFault::Unavailable(e.to_string())
        })?;
        if removed > 0 {
            self.metrics.record_expirations(removed as u64);
            debug!(removed, "Deleted expired remote rows");
        }
        Ok(removed)
    }

    async fn stats(&self) -> TierStats {
        let size = self.store.count_live(Utc::now()).await.unwrap_or(0);
        self.metrics.snapshot(CacheTier::Remote, size, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::backend::MemoryRowStore;
    use assert_matches::assert_matches;
    use serde_json::{json, Value};

    const TTL: Duration = Duration::from_secs(3600);

    #[test]
    fn test_category_rule() {
        assert_eq!(category_for("https://pokeapi.co/api/v2/pokemon/25"), "pokemon");
        assert_eq!(category_for("https://api.pokemontcg.io/v2/cards"), "pokemon");
        assert_eq!(category_for("tcg-sets"), "cards");
        assert_eq!(category_for("card-search?q=charizard"), "cards");
        assert_eq!(category_for("market-prices/base1-4"), "prices");
        assert_eq!(category_for("items/master-ball"), "general");
    }

    #[tokio::test]
    async fn test_round_trip_with_category() {
        let store = Arc::new(MemoryRowStore::new());
        let tier: RemoteTier<Value> = RemoteTier::new(store.clone());
        let key = CacheKey::of("tcg-cards?set=base1");

        tier.set(&key, &json!({"count": 102}), TTL).await.unwrap();

        let row = store.row(key.as_str()).unwrap();
        assert_eq!(row.category, "cards");
        assert!(row.expires_at > row.created_at);

        let entry = tier.get(&key, ReadMode::Fresh).await.unwrap();
        assert_eq!(entry.data["count"], 102);
    }

    #[tokio::test]
    async fn test_expired_rows_are_misses() {
        let store = Arc::new(MemoryRowStore::new());
        let tier: RemoteTier<Value> = RemoteTier::new(store);
        let key = CacheKey::raw("k");

        tier.set(&key, &json!(1), Duration::from_millis(1)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_matches!(tier.get(&key, ReadMode::Fresh).await, Err(TierFault::Absent));
        assert_eq!(tier.get(&key, ReadMode::IgnoreExpiry).await.unwrap().data, json!(1));
    }

    #[tokio::test]
    async fn test_store_failure_becomes_fault() {
        let store = Arc::new(MemoryRowStore::new());
        let tier: RemoteTier<Value> = RemoteTier::new(store.clone());
        store.set_available(false);

        assert_matches!(
            tier.set(&CacheKey::raw("k"), &json!(1), TTL).await,
            Err(TierFault::Unavailable(_))
        );
        assert_matches!(
            tier.get(&CacheKey::raw("k"), ReadMode::Fresh).await,
            Err(TierFault::Unavailable(_))
        );
        assert_eq!(tier.stats().await.size, 0);
    }

    #[tokio::test]
    async fn test_clear_only_removes_expired_rows() {
        let store = Arc::new(MemoryRowStore::new());
        let tier: RemoteTier<Value> = RemoteTier::new(store.clone());
        tier.set(&CacheKey::raw("live"), &json!(1), TTL).await.unwrap();
        tier.set(&CacheKey::raw("dead"), &json!(2), Duration::from_millis(1)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        tier.clear().await.unwrap();

        assert!(store.row("live").is_some());
        assert!(store.row("dead").is_none());
    }

    #[tokio::test]
    async fn test_wrong_shape_is_corrupt() {
        let store = Arc::new(MemoryRowStore::new());
        let writer: RemoteTier<Value> = RemoteTier::new(store.clone());
        let reader: RemoteTier<u32> = RemoteTier::new(store);

        writer.set(&CacheKey::raw("k"), &json!("text"), TTL).await.unwrap();
        assert_matches!(
            reader.get(&CacheKey::raw("k"), ReadMode::Fresh).await,
            Err(TierFault::Corrupt(_))
        );
    }
}
