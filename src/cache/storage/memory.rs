//! Ephemeral In-Memory Tier
//!
//! Bounded map with least-recently-accessed eviction and lazy expiry.
//! Entries live in an `IndexMap` ordered by recency: the front is the
//! least recently accessed entry, the back the most recent.

use crate::cache::entry::CacheEntry;
use crate::cache::events::CacheEvent;
use crate::cache::key::CacheKey;
use crate::cache::metrics::{TierMetrics, TierStats};
use crate::cache::storage::{CacheValue, ReadMode, TierFault, TierResult, TierStorage};
use crate::cache::tier::{CacheTier, MEMORY_DEFAULT_MAX_ENTRIES, MEMORY_DEFAULT_TTL};
use async_trait::async_trait;
use indexmap::IndexMap;
use parking_lot::Mutex;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::debug;

// =============================================================================
// Memory Tier Configuration
// =============================================================================

/// Configuration for the ephemeral tier
#[derive(Debug, Clone)]
pub struct MemoryTierConfig {
    /// Maximum number of entries held at once
    pub max_entries: usize,
    /// Lifetime used when the caller supplies none
    pub default_ttl: Duration,
}

impl Default for MemoryTierConfig {
    fn default() -> Self {
        Self {
            max_entries: MEMORY_DEFAULT_MAX_ENTRIES,
            default_ttl: MEMORY_DEFAULT_TTL,
        }
    }
}

// =============================================================================
// Memory Tier
// =============================================================================

/// Ephemeral tier held in process memory
pub struct MemoryTier<T> {
    entries: Mutex<IndexMap<String, CacheEntry<T>>>,
    config: MemoryTierConfig,
    metrics: TierMetrics,
    events: Option<broadcast::Sender<CacheEvent>>,
}

impl<T: CacheValue> MemoryTier<T> {
    /// Create a tier with the default capacity of 100 entries
    pub fn new() -> Self {
        Self::with_config(MemoryTierConfig::default())
    }

    /// Create a tier holding at most `max_entries` entries
    pub fn with_capacity(max_entries: usize) -> Self {
        Self::with_config(MemoryTierConfig {
            max_entries,
            ..Default::default()
        })
    }

    pub fn with_config(config: MemoryTierConfig) -> Self {
        Self {
            entries: Mutex::new(IndexMap::with_capacity(config.max_entries)),
            config: MemoryTierConfig {
                max_entries: config.max_entries.max(1),
                ..config
            },
            metrics: TierMetrics::new(),
            events: None,
        }
    }

    /// Publish eviction and expiry events on the given channel
    pub fn with_events(mut self, events: broadcast::Sender<CacheEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Number of entries currently held, expired ones included
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn max_entries(&self) -> usize {
        self.config.max_entries
    }

    /// Whether a key is present, without touching recency or expiry
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.entries.lock().contains_key(key.as_str())
    }

    fn emit(&self, event: CacheEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }

    /// Lookup with recency refresh; the lock is never held across an await
    fn lookup(&self, key: &CacheKey, mode: ReadMode) -> TierResult<CacheEntry<T>> {
        let mut entries = self.entries.lock();

        let valid = match entries.get(key.as_str()) {
            Some(entry) => entry.is_valid(),
            None => return Err(TierFault::Absent),
        };

        if !mode.accepts(valid) {
            if mode.removes_expired() {
                entries.shift_remove(key.as_str());
                drop(entries);
                self.metrics.record_expirations(1);
                self.emit(CacheEvent::expire(key, CacheTier::Memory));
            }
            return Err(TierFault::Expired);
        }

        // Move to back = most recently accessed
        let entry = entries
            .shift_remove(key.as_str())
            .ok_or(TierFault::Absent)?;
        entries.insert(key.as_str().to_string(), entry.clone());
        Ok(entry)
    }

    fn insert(&self, key: &CacheKey, value: &T, ttl: Duration) {
        let evicted = {
            let mut entries = self.entries.lock();
            let evicted = if !entries.contains_key(key.as_str())
                && entries.len() >= self.config.max_entries
            {
                entries.shift_remove_index(0).map(|(k, _)| k)
            } else {
                None
            };

            // Re-inserting moves an existing key to the back
            entries.shift_remove(key.as_str());
            entries.insert(
                key.as_str().to_string(),
                CacheEntry::new(key.clone(), value.clone(), ttl),
            );
            evicted
        };

        if let Some(victim) = evicted {
            self.metrics.record_eviction();
            debug!(key = %victim, "Evicted least recently accessed entry");
            self.emit(CacheEvent::evict(&CacheKey::raw(victim), CacheTier::Memory));
        }
    }
}

impl<T: CacheValue> Default for MemoryTier<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T: CacheValue> TierStorage<T> for MemoryTier<T> {
    fn tier(&self) -> CacheTier {
        CacheTier::Memory
    }

    async fn get(&self, key: &CacheKey, mode: ReadMode) -> TierResult<CacheEntry<T>> {
        let result = self.lookup(key, mode);
        if mode != ReadMode::IgnoreExpiry {
            match &result {
                Ok(_) => self.metrics.record_hit(),
                Err(_) => self.metrics.record_miss(),
            }
        }
        result
    }

    async fn set(&self, key: &CacheKey, value: &T, ttl: Duration) -> TierResult<()> {
        self.insert(key, value, ttl);
        Ok(())
    }

    async fn delete(&self, key: &CacheKey) -> TierResult<()> {
        self.entries.lock().shift_remove(key.as_str());
        Ok(())
    }

    async fn clear(&self) -> TierResult<()> {
        self.entries.lock().clear();
        self.metrics.reset();
        Ok(())
    }

    async fn cleanup(&self) -> TierResult<usize> {
        let removed = {
            let mut entries = self.entries.lock();
            let before = entries.len();
            entries.retain(|_, entry| entry.is_valid());
            before - entries.len()
        };
        if removed > 0 {
            self.metrics.record_expirations(removed as u64);
            debug!(removed, "Swept expired memory entries");
        }
        Ok(removed)
    }

    async fn stats(&self) -> TierStats {
        self.metrics.snapshot(
            CacheTier::Memory,
            self.len() as u64,
            Some(self.config.max_entries as u64),
        )
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn key(id: &str) -> CacheKey {
        CacheKey::raw(id)
    }

    const TTL: Duration = Duration::from_secs(60);

    #[tokio::test]
    async fn test_set_get_round_trip() {
        let tier = MemoryTier::<String>::new();
        tier.set(&key("a"), &"pikachu".to_string(), TTL).await.unwrap();

        let entry = tier.get(&key("a"), ReadMode::Fresh).await.unwrap();
        assert_eq!(entry.data, "pikachu");
        assert_eq!(entry.key, key("a"));
    }

    #[tokio::test]
    async fn test_absent_is_miss() {
        let tier = MemoryTier::<u32>::new();
        assert_matches!(tier.get(&key("nope"), ReadMode::Fresh).await, Err(TierFault::Absent));

        let stats = tier.stats().await;
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 0);
    }

    #[tokio::test]
    async fn test_lazy_expiry_removes_entry() {
        let tier = MemoryTier::<u32>::new();
        tier.set(&key("a"), &1, Duration::from_millis(10)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert_matches!(tier.get(&key("a"), ReadMode::Fresh).await, Err(TierFault::Expired));
        assert!(!tier.contains(&key("a")));
        assert_matches!(tier.get(&key("a"), ReadMode::Fresh).await, Err(TierFault::Absent));
    }

    #[tokio::test]
    async fn test_preserve_and_ignore_expiry() {
        let tier = MemoryTier::<u32>::new();
        tier.set(&key("a"), &7, Duration::from_millis(10)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert_matches!(tier.get(&key("a"), ReadMode::Preserve).await, Err(TierFault::Expired));
        assert!(tier.contains(&key("a")));

        let stale = tier.get(&key("a"), ReadMode::IgnoreExpiry).await.unwrap();
        assert_eq!(stale.data, 7);
        assert!(stale.is_expired());
    }

    #[tokio::test]
    async fn test_evicts_least_recently_accessed() {
        let tier = MemoryTier::<u32>::with_capacity(2);
        tier.set(&key("a"), &1, TTL).await.unwrap();
        tier.set(&key("b"), &2, TTL).await.unwrap();

        // Touch A so B becomes the eviction victim
        tier.get(&key("a"), ReadMode::Fresh).await.unwrap();
        tier.set(&key("c"), &3, TTL).await.unwrap();

        assert!(tier.contains(&key("a")));
        assert!(!tier.contains(&key("b")));
        assert!(tier.contains(&key("c")));
        assert_eq!(tier.stats().await.evictions, 1);
    }

    #[tokio::test]
    async fn test_overwrite_at_capacity_does_not_evict() {
        let tier = MemoryTier::<u32>::with_capacity(2);
        tier.set(&key("a"), &1, TTL).await.unwrap();
        tier.set(&key("b"), &2, TTL).await.unwrap();
        tier.set(&key("a"), &10, TTL).await.unwrap();

        assert_eq!(tier.len(), 2);
        assert_eq!(tier.get(&key("a"), ReadMode::Fresh).await.unwrap().data, 10);
        assert!(tier.contains(&key("b")));
    }

    #[tokio::test]
    async fn test_size_never_exceeds_capacity() {
        let tier = MemoryTier::<usize>::with_capacity(5);
        for i in 0..50 {
            tier.set(&key(&i.to_string()), &i, TTL).await.unwrap();
            assert!(tier.len() <= 5);
        }
    }

    #[tokio::test]
    async fn test_cleanup_sweeps_expired() {
        let tier = MemoryTier::<u32>::new();
        tier.set(&key("old"), &1, Duration::from_millis(5)).await.unwrap();
        tier.set(&key("new"), &2, TTL).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(tier.cleanup().await.unwrap(), 1);
        assert_eq!(tier.len(), 1);
        assert!(tier.contains(&key("new")));
    }

    #[tokio::test]
    async fn test_clear_resets_stats() {
        let tier = MemoryTier::<u32>::new();
        tier.set(&key("a"), &1, TTL).await.unwrap();
        tier.get(&key("a"), ReadMode::Fresh).await.unwrap();

        tier.clear().await.unwrap();
        tier.clear().await.unwrap();

        let stats = tier.stats().await;
        assert_eq!(stats.size, 0);
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.max_size, Some(100));
    }

    #[tokio::test]
    async fn test_eviction_event() {
        let (tx, mut rx) = broadcast::channel(16);
        let tier = MemoryTier::<u32>::with_capacity(1).with_events(tx);
        tier.set(&key("a"), &1, TTL).await.unwrap();
        tier.set(&key("b"), &2, TTL).await.unwrap();

        assert_matches!(rx.try_recv(), Ok(CacheEvent::Evict { tier: CacheTier::Memory, .. }));
    }
}
