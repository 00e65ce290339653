//! Tiered Cache Manager
//!
//! Coordinates the three tiers: waterfall reads with promotion, priority
//! fan-out on writes, read-through fetching with an optional stale fallback,
//! and the periodic cleanup task.

use crate::cache::backend::{KeyValueStore, RowStore};
use crate::cache::entry::CacheEntry;
use crate::cache::events::CacheEvent;
use crate::cache::key::{CacheKey, Identifier, KeyParams};
use crate::cache::metrics::{CacheMetrics, CacheStatsSnapshot};
use crate::cache::storage::{
    CacheValue, LocalTier, LocalTierConfig, MemoryTier, MemoryTierConfig, ReadMode, RemoteTier,
    RemoteTierConfig, TierFault, TierStorage,
};
use crate::cache::tier::{CacheTier, Priority};
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the tiered cache
#[derive(Debug, Clone)]
pub struct TieredCacheConfig {
    pub memory: MemoryTierConfig,
    pub local: LocalTierConfig,
    pub remote: RemoteTierConfig,
    /// Event channel capacity
    pub event_channel_capacity: usize,
}

impl Default for TieredCacheConfig {
    fn default() -> Self {
        Self {
            memory: MemoryTierConfig::default(),
            local: LocalTierConfig::default(),
            remote: RemoteTierConfig::default(),
            event_channel_capacity: 1024,
        }
    }
}

// =============================================================================
// Call Options
// =============================================================================

/// Options for [`TieredCache::get`]
#[derive(Debug, Clone, Copy, Default)]
pub struct GetOptions {
    /// Tiers consulted; lower tiers than the priority allows are skipped
    pub priority: Priority,
    pub read_mode: ReadMode,
}

impl GetOptions {
    pub fn new(priority: Priority) -> Self {
        Self {
            priority,
            read_mode: ReadMode::Fresh,
        }
    }

    pub fn with_read_mode(mut self, read_mode: ReadMode) -> Self {
        self.read_mode = read_mode;
        self
    }
}

/// Options for [`TieredCache::set`]
#[derive(Debug, Clone, Copy, Default)]
pub struct SetOptions {
    pub priority: Priority,
    /// Lifetime for every tier written; `None` uses each tier's default
    pub ttl: Option<Duration>,
}

impl SetOptions {
    pub fn new(priority: Priority) -> Self {
        Self {
            priority,
            ttl: None,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }
}

/// Options for [`TieredCache::cached_fetch`]
#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    pub priority: Priority,
    pub ttl: Option<Duration>,
    /// Extra parameters folded into the key
    pub params: Option<KeyParams>,
    /// On fetch failure, return a previously cached value even if expired
    pub stale_while_revalidate: bool,
}

impl FetchOptions {
    pub fn new(priority: Priority) -> Self {
        Self {
            priority,
            ..Default::default()
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn with_params(mut self, params: KeyParams) -> Self {
        self.params = Some(params);
        self
    }

    pub fn stale_while_revalidate(mut self, enabled: bool) -> Self {
        self.stale_while_revalidate = enabled;
        self
    }
}

// =============================================================================
// Tiered Cache
// =============================================================================

/// Three-tier cache orchestrator
pub struct TieredCache<T: CacheValue> {
    memory: Arc<dyn TierStorage<T>>,
    local: Arc<dyn TierStorage<T>>,
    remote: Arc<dyn TierStorage<T>>,
    config: TieredCacheConfig,
    metrics: CacheMetrics,
    event_tx: broadcast::Sender<CacheEvent>,
}

impl<T: CacheValue> TieredCache<T> {
    /// Build the standard tiers over the given backing stores
    pub fn new(
        config: TieredCacheConfig,
        local_store: Arc<dyn KeyValueStore>,
        row_store: Arc<dyn RowStore>,
    ) -> Arc<Self> {
        let (event_tx, _) = broadcast::channel(config.event_channel_capacity.max(1));

        let memory = MemoryTier::with_config(config.memory.clone()).with_events(event_tx.clone());
        let local = LocalTier::with_config(local_store, config.local.clone());
        let remote = RemoteTier::with_config(row_store, config.remote.clone());

        info!(
            max_entries = config.memory.max_entries,
            prefix = %config.local.prefix,
            "Tiered cache initialized"
        );

        Arc::new(Self {
            memory: Arc::new(memory),
            local: Arc::new(local),
            remote: Arc::new(remote),
            config,
            metrics: CacheMetrics::new(),
            event_tx,
        })
    }

    /// Assemble a cache from arbitrary tier implementations
    pub fn from_tiers(
        config: TieredCacheConfig,
        memory: Arc<dyn TierStorage<T>>,
        local: Arc<dyn TierStorage<T>>,
        remote: Arc<dyn TierStorage<T>>,
    ) -> Arc<Self> {
        let (event_tx, _) = broadcast::channel(config.event_channel_capacity.max(1));
        Arc::new(Self {
            memory,
            local,
            remote,
            config,
            metrics: CacheMetrics::new(),
            event_tx,
        })
    }

    /// Subscribe to cache events
    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.event_tx.subscribe()
    }

    pub(crate) fn emit(&self, event: CacheEvent) {
        let _ = self.event_tx.send(event);
    }

    fn storage(&self, tier: CacheTier) -> &dyn TierStorage<T> {
        match tier {
            CacheTier::Memory => self.memory.as_ref(),
            CacheTier::Local => self.local.as_ref(),
            CacheTier::Remote => self.remote.as_ref(),
        }
    }

    /// Default lifetime configured for a tier
    pub fn default_ttl(&self, tier: CacheTier) -> Duration {
        match tier {
            CacheTier::Memory => self.config.memory.default_ttl,
            CacheTier::Local => self.config.local.default_ttl,
            CacheTier::Remote => self.config.remote.default_ttl,
        }
    }

    fn note_fault(&self, tier: CacheTier, operation: &str, key: &CacheKey, fault: &TierFault) {
        if fault.is_miss() {
            debug!(tier = %tier, key = %key, reason = %fault, "Tier miss");
        } else {
            warn!(tier = %tier, key = %key, operation, error = %fault, "Tier failure treated as miss");
            self.emit(CacheEvent::tier_failure(tier, operation, fault));
        }
    }

    /// Copy an entry into every tier faster than the one that served it
    async fn promote(&self, entry: &CacheEntry<T>, from: CacheTier) {
        let Some(remaining) = entry.remaining_ttl() else {
            return;
        };

        for target in from.faster_tiers() {
            let ttl = self.default_ttl(*target).min(remaining);
            match self.storage(*target).set(&entry.key, &entry.data, ttl).await {
                Ok(()) => {
                    self.metrics.record_promotion();
                    self.emit(CacheEvent::promote(&entry.key, from, *target));
                    debug!(key = %entry.key, from = %from, to = %target, "Promoted cache entry");
                }
                Err(fault) => self.note_fault(*target, "promote", &entry.key, &fault),
            }
        }
    }

    /// Waterfall lookup returning the entry and the tier that served it
    pub async fn get_entry(
        &self,
        key: &CacheKey,
        options: GetOptions,
    ) -> Option<(CacheEntry<T>, CacheTier)> {
        let counted = options.read_mode != ReadMode::IgnoreExpiry;

        for tier in options.priority.tiers() {
            match self.storage(*tier).get(key, options.read_mode).await {
                Ok(entry) => {
                    if *tier != CacheTier::Memory && entry.is_valid() {
                        self.promote(&entry, *tier).await;
                    }
                    if counted {
                        self.metrics.record_lookup(true);
                        self.emit(CacheEvent::hit(key, *tier));
                    }
                    debug!(key = %key, tier = %tier, "Cache hit");
                    return Some((entry, *tier));
                }
                Err(fault) => self.note_fault(*tier, "get", key, &fault),
            }
        }

        if counted {
            self.metrics.record_lookup(false);
            self.emit(CacheEvent::miss(key));
        }
        None
    }

    /// Waterfall lookup: memory, then local (priority >= High), then remote
    /// (Critical). A hit in a slower tier is promoted into the faster ones.
    pub async fn get(&self, key: &CacheKey, options: GetOptions) -> Option<T> {
        self.get_entry(key, options).await.map(|(entry, _)| entry.data)
    }

    /// Whether a fresh value exists in any tier the priority allows
    pub async fn has(&self, key: &CacheKey, priority: Priority) -> bool {
        self.get_entry(key, GetOptions::new(priority)).await.is_some()
    }

    /// Write to every tier the priority selects. Each write is independent:
    /// a failure in a slower tier never undoes a faster one.
    pub async fn set(&self, key: &CacheKey, value: &T, options: SetOptions) {
        for tier in options.priority.tiers() {
            let ttl = options.ttl.unwrap_or_else(|| self.default_ttl(*tier));
            match self.storage(*tier).set(key, value, ttl).await {
                Ok(()) => self.emit(CacheEvent::set(key, *tier)),
                Err(fault) => self.note_fault(*tier, "set", key, &fault),
            }
        }
    }

    /// Read-through fetch.
    ///
    /// Returns the cached value when any allowed tier has it; otherwise runs
    /// `fetcher` and caches its result. If the fetcher fails and
    /// `stale_while_revalidate` is set, an expired value is returned when one
    /// is still stored. The fetcher's error is returned unchanged otherwise.
    pub async fn cached_fetch<F, Fut, E>(
        &self,
        identifier: impl Into<Identifier>,
        fetcher: F,
        options: FetchOptions,
    ) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let key = CacheKey::derive(identifier, options.params.as_ref());
        let read_mode = if options.stale_while_revalidate {
            ReadMode::Preserve
        } else {
            ReadMode::Fresh
        };

        let lookup = GetOptions::new(options.priority).with_read_mode(read_mode);
        if let Some(value) = self.get(&key, lookup).await {
            return Ok(value);
        }

        match fetcher().await {
            Ok(value) => {
                let mut write = SetOptions::new(options.priority);
                write.ttl = options.ttl;
                self.set(&key, &value, write).await;
                Ok(value)
            }
            Err(e) if options.stale_while_revalidate => {
                let fallback = GetOptions::new(options.priority).with_read_mode(ReadMode::IgnoreExpiry);
                match self.get(&key, fallback).await {
                    Some(stale) => {
                        warn!(key = %key, error = %e, "Fetch failed, serving stale value");
                        self.metrics.record_stale_served();
                        self.emit(CacheEvent::stale_served(&key));
                        Ok(stale)
                    }
                    None => Err(e),
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Remove a key from all three tiers regardless of priority
    pub async fn delete(&self, key: &CacheKey) {
        for tier in CacheTier::lookup_order() {
            if let Err(fault) = self.storage(*tier).delete(key).await {
                self.note_fault(*tier, "delete", key, &fault);
            }
        }
        self.emit(CacheEvent::Delete {
            key: key.to_string(),
        });
    }

    /// Clear every tier and reset the global counters.
    ///
    /// The remote tier only drops rows that are already expired.
    pub async fn clear(&self) {
        for tier in CacheTier::lookup_order() {
            if let Err(fault) = self.storage(*tier).clear().await {
                warn!(tier = %tier, error = %fault, "Failed to clear tier");
                self.emit(CacheEvent::tier_failure(*tier, "clear", &fault));
            }
        }
        self.metrics.reset();
        self.emit(CacheEvent::Cleared);
        info!("Cache cleared");
    }

    /// Sweep expired entries from every tier, returning how many went
    pub async fn cleanup(&self) -> usize {
        let mut removed = 0;
        for tier in CacheTier::lookup_order() {
            match self.storage(*tier).cleanup().await {
                Ok(count) => removed += count,
                Err(fault) => {
                    warn!(tier = %tier, error = %fault, "Tier cleanup failed");
                    self.emit(CacheEvent::tier_failure(*tier, "cleanup", &fault));
                }
            }
        }
        debug!(removed, "Cache cleanup finished");
        self.emit(CacheEvent::CleanupComplete { removed });
        removed
    }

    /// Global counters plus the statistics of each tier
    pub async fn stats(&self) -> CacheStatsSnapshot {
        let mut tiers = Vec::with_capacity(3);
        for tier in CacheTier::lookup_order() {
            tiers.push(self.storage(*tier).stats().await);
        }
        self.metrics.snapshot(tiers)
    }

    /// Run [`cleanup`](Self::cleanup) every `period` until the returned
    /// handle is stopped.
    pub fn spawn_cleanup(self: &Arc<Self>, period: Duration) -> CleanupHandle {
        let cache = Arc::clone(self);
        CleanupHandle::spawn("cache-cleanup", period, move || {
            let cache = Arc::clone(&cache);
            async move {
                cache.cleanup().await;
            }
        })
    }
}

// =============================================================================
// Cleanup Handle
// =============================================================================

/// Owner of a periodic maintenance task
pub struct CleanupHandle {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl CleanupHandle {
    /// Run `task` every `period`, first after one full period, until stopped
    pub fn spawn<F, Fut>(name: &'static str, period: Duration, mut task: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let token = CancellationToken::new();
        let cancelled = token.clone();
        let period = period.max(Duration::from_millis(1));

        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(task = name, period_secs = period.as_secs(), "Periodic task started");

            loop {
                tokio::select! {
                    _ = cancelled.cancelled() => {
                        info!(task = name, "Periodic task stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        task().await;
                    }
                }
            }
        });

        Self { token, handle }
    }

    /// Stop the task and wait for it to exit
    pub async fn stop(self) {
        self.token.cancel();
        if let Err(e) = self.handle.await {
            warn!(error = %e, "Cleanup task ended abnormally");
        }
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::backend::{MemoryKeyValueStore, MemoryRowStore};
    use serde_json::{json, Value};

    fn cache() -> Arc<TieredCache<Value>> {
        TieredCache::new(
            TieredCacheConfig::default(),
            Arc::new(MemoryKeyValueStore::new()),
            Arc::new(MemoryRowStore::new()),
        )
    }

    #[tokio::test]
    async fn test_set_get_round_trip() {
        let cache = cache();
        let key = CacheKey::of("pokemon/1");
        cache.set(&key, &json!({"name": "bulbasaur"}), SetOptions::default()).await;

        let value = cache.get(&key, GetOptions::default()).await.unwrap();
        assert_eq!(value["name"], "bulbasaur");

        let stats = cache.stats().await;
        assert_eq!(stats.requests, 1);
        assert_eq!(stats.hits, 1);
    }

    #[tokio::test]
    async fn test_normal_priority_skips_persistent_tiers() {
        let cache = cache();
        let key = CacheKey::of("pokemon/4");
        cache.set(&key, &json!(4), SetOptions::new(Priority::Normal)).await;

        let stats = cache.stats().await;
        assert_eq!(stats.tier(CacheTier::Memory).unwrap().size, 1);
        assert_eq!(stats.tier(CacheTier::Local).unwrap().size, 0);
        assert_eq!(stats.tier(CacheTier::Remote).unwrap().size, 0);
    }

    #[tokio::test]
    async fn test_has_and_delete() {
        let cache = cache();
        let key = CacheKey::of("pokemon/7");
        cache.set(&key, &json!(7), SetOptions::new(Priority::Critical)).await;
        assert!(cache.has(&key, Priority::Critical).await);

        cache.delete(&key).await;
        assert!(!cache.has(&key, Priority::Critical).await);
    }

    #[tokio::test]
    async fn test_fetch_error_propagates_unchanged() {
        let cache = cache();
        let result = cache
            .cached_fetch(
                "pokemon/999",
                || async { Err::<Value, _>("not found".to_string()) },
                FetchOptions::default(),
            )
            .await;
        assert_eq!(result.unwrap_err(), "not found");
    }

    #[tokio::test]
    async fn test_cleanup_task_runs_and_stops() {
        let cache = cache();
        let mut events = cache.subscribe();
        let handle = cache.spawn_cleanup(Duration::from_millis(10));
        assert!(handle.is_running());

        let event = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if let Ok(CacheEvent::CleanupComplete { removed }) = events.recv().await {
                    return removed;
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(event, 0);

        handle.stop().await;
    }
}
