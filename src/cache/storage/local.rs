//! Persistent-Local Tier
//!
//! Stores JSON envelopes in a [`KeyValueStore`] under a fixed item-name
//! prefix, so the tier shares the store with other users without touching
//! their items.

use crate::cache::backend::{KeyValueStore, StoreError};
use crate::cache::entry::{expiry_from, from_millis, CacheEntry, SCHEMA_VERSION};
use crate::cache::key::CacheKey;
use crate::cache::metrics::{TierMetrics, TierStats};
use crate::cache::storage::{CacheValue, ReadMode, TierFault, TierResult, TierStorage};
use crate::cache::tier::{CacheTier, LOCAL_DEFAULT_TTL};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Default item-name prefix
pub const DEFAULT_PREFIX: &str = "dextrends_cache_";

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the persistent-local tier
#[derive(Debug, Clone)]
pub struct LocalTierConfig {
    /// Prefix prepended to every item name owned by this tier
    pub prefix: String,
    /// Lifetime used when the caller supplies none
    pub default_ttl: Duration,
}

impl Default for LocalTierConfig {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_PREFIX.to_string(),
            default_ttl: LOCAL_DEFAULT_TTL,
        }
    }
}

// =============================================================================
// Stored Envelope
// =============================================================================

/// Serialized form of one entry: `{data, expiry, timestamp, version}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalEnvelope<T> {
    pub data: T,
    /// Expiry time, epoch milliseconds
    pub expiry: i64,
    /// Write time, epoch milliseconds
    pub timestamp: i64,
    pub version: String,
}

/// Envelope header, parsed without decoding the payload
#[derive(Debug, Deserialize)]
struct EnvelopeHeader {
    expiry: i64,
}

// =============================================================================
// Local Tier
// =============================================================================

/// Persistent-local tier over a device key-value store
pub struct LocalTier<T> {
    store: Arc<dyn KeyValueStore>,
    config: LocalTierConfig,
    metrics: TierMetrics,
    _value: PhantomData<fn() -> T>,
}

impl<T: CacheValue> LocalTier<T> {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self::with_config(store, LocalTierConfig::default())
    }

    pub fn with_config(store: Arc<dyn KeyValueStore>, config: LocalTierConfig) -> Self {
        Self {
            store,
            config,
            metrics: TierMetrics::new(),
            _value: PhantomData,
        }
    }

    pub fn prefix(&self) -> &str {
        &self.config.prefix
    }

    fn item_name(&self, key: &CacheKey) -> String {
        format!("{}{}", self.config.prefix, key.as_str())
    }

    /// Item names owned by this tier
    async fn owned_items(&self) -> TierResult<Vec<String>> {
        let keys = self.store.keys().await.map_err(unavailable)?;
        Ok(keys
            .into_iter()
            .filter(|name| name.starts_with(&self.config.prefix))
            .collect())
    }

    async fn remove_quietly(&self, name: &str) {
        if let Err(e) = self.store.remove_item(name).await {
            warn!(item = %name, error = %e, "Failed to remove local cache item");
        }
    }

    async fn read(&self, key: &CacheKey, mode: ReadMode) -> TierResult<CacheEntry<T>> {
        let name = self.item_name(key);
        let raw = self
            .store
            .get_item(&name)
            .await
            .map_err(unavailable)?
            .ok_or(TierFault::Absent)?;

        let envelope: LocalEnvelope<T> = match serde_json::from_str(&raw) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(key = %key, error = %e, "Removing corrupt local cache item");
                self.remove_quietly(&name).await;
                return Err(TierFault::Corrupt(e.to_string()));
            }
        };

        let (Some(stored_at), Some(expires_at)) =
            (from_millis(envelope.timestamp), from_millis(envelope.expiry))
        else {
            self.remove_quietly(&name).await;
            return Err(TierFault::Corrupt("timestamp out of range".to_string()));
        };

        let entry = CacheEntry {
            key: key.clone(),
            data: envelope.data,
            stored_at,
            expires_at,
            schema_version: envelope.version,
        };

        if !mode.accepts(entry.is_valid()) {
            if mode.removes_expired() {
                self.remove_quietly(&name).await;
                self.metrics.record_expirations(1);
            }
            return Err(TierFault::Expired);
        }
        Ok(entry)
    }

    async fn write(&self, name: &str, payload: &str) -> TierResult<()> {
        match self.store.set_item(name, payload).await {
            Ok(()) => Ok(()),
            Err(StoreError::QuotaExceeded) => {
                debug!(item = %name, "Local store full, sweeping before retry");
                self.sweep().await?;
                self.store.set_item(name, payload).await.map_err(|e| match e {
                    StoreError::QuotaExceeded => TierFault::QuotaExceeded,
                    other => unavailable(other),
                })
            }
            Err(e) => Err(unavailable(e)),
        }
    }

    /// Remove expired and unparsable items under the prefix
    async fn sweep(&self) -> TierResult<usize> {
        let now = Utc::now().timestamp_millis();
        let mut removed = 0;

        for name in self.owned_items().await? {
            let raw = match self.store.get_item(&name).await {
                Ok(Some(raw)) => raw,
                Ok(None) => continue,
                Err(e) => {
                    warn!(item = %name, error = %e, "Skipping unreadable local cache item");
                    continue;
                }
            };

            let stale = match serde_json::from_str::<EnvelopeHeader>(&raw) {
                Ok(header) => now > header.expiry,
                Err(_) => true,
            };
            if stale && self.store.remove_item(&name).await.is_ok() {
                removed += 1;
            }
        }

        if removed > 0 {
            self.metrics.record_expirations(removed as u64);
        }
        Ok(removed)
    }
}

fn unavailable(e: StoreError) -> TierFault {
    TierFault::Unavailable(e.to_string())
}

#[async_trait]
impl<T: CacheValue> TierStorage<T> for LocalTier<T> {
    fn tier(&self) -> CacheTier {
        CacheTier::Local
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
        let stored_at = Utc::now();
        let envelope = LocalEnvelope {
            data: value,
            expiry: expiry_from(stored_at, ttl).timestamp_millis(),
            timestamp: stored_at.timestamp_millis(),
            version: SCHEMA_VERSION.to_string(),
        };
        let payload = serde_json::to_string(&envelope)
            .map_err(|e| TierFault::Corrupt(e.to_string()))?;

        self.write(&self.item_name(key), &payload).await
    }

    async fn delete(&self, key: &CacheKey) -> TierResult<()> {
        self.store
            .remove_item(&self.item_name(key))
            .await
            .map_err(unavailable)
    }

    async fn clear(&self) -> TierResult<()> {
        for name in self.owned_items().await? {
            self.store.remove_item(&name).await.map_err(unavailable)?;
        }
        self.metrics.reset();
        Ok(())
    }

    async fn cleanup(&self) -> TierResult<usize> {
        let removed = self.sweep().await?;
        if removed > 0 {
            debug!(removed, "Swept expired local entries");
        }
        Ok(removed)
    }

    async fn stats(&self) -> TierStats {
        let size = match self.owned_items().await {
            Ok(items) => items.len() as u64,
            Err(_) => 0,
        };
        self.metrics.snapshot(CacheTier::Local, size, None)
    }
}

// =============================================================================
// Tests
// =============================================================================
