//! Cache Metrics
//!
//! Lock-free counters for each tier and for the orchestrator, with
//! serializable point-in-time snapshots for diagnostics.

use crate::cache::tier::CacheTier;
use chrono::Utc;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Cache line size for alignment (64 bytes on most modern CPUs)
pub const CACHE_LINE_SIZE: usize = 64;

fn ratio(hits: u64, misses: u64) -> f64 {
    let total = hits + misses;
    if total == 0 {
        0.0
    } else {
        hits as f64 / total as f64
    }
}

// =============================================================================
// Per-Tier Counters (Cache-Line Aligned)
// =============================================================================

/// Counters for a single tier, aligned to prevent false sharing
#[repr(C, align(64))]
#[derive(Debug)]
pub struct TierMetrics {
    /// Number of reads that returned an entry
    pub hits: AtomicU64,
    /// Number of reads that returned nothing
    pub misses: AtomicU64,
    /// Entries evicted for capacity
    pub evictions: AtomicU64,
    /// Entries removed because they had expired
    pub expirations: AtomicU64,
    /// Last update timestamp (Unix millis)
    pub last_update_ms: AtomicU64,
}

const _: () = assert!(std::mem::size_of::<TierMetrics>() <= CACHE_LINE_SIZE);

impl Default for TierMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl TierMetrics {
    /// Create new zeroed counters
    pub fn new() -> Self {
        Self {
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
            last_update_ms: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
        self.touch();
    }

    #[inline]
    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
        self.touch();
    }

    #[inline]
    pub fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
        self.touch();
    }

    #[inline]
    pub fn record_expirations(&self, count: u64) {
        self.expirations.fetch_add(count, Ordering::Relaxed);
        self.touch();
    }

    /// Zero every counter (used by `clear()`)
    pub fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.evictions.store(0, Ordering::Relaxed);
        self.expirations.store(0, Ordering::Relaxed);
        self.touch();
    }

    #[inline]
    fn touch(&self) {
        self.last_update_ms
            .store(Utc::now().timestamp_millis() as u64, Ordering::Release);
    }

    /// Calculate hit ratio (0.0 to 1.0)
    pub fn hit_rate(&self) -> f64 {
        ratio(
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
        )
    }

    /// Snapshot the counters together with the tier's current occupancy
    pub fn snapshot(&self, tier: CacheTier, size: u64, max_size: Option<u64>) -> TierStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        TierStats {
            tier,
            hits,
            misses,
            size,
            max_size,
            hit_rate: ratio(hits, misses),
            evictions: self.evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time statistics of one tier
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TierStats {
    pub tier: CacheTier,
    pub hits: u64,
    pub misses: u64,
    /// Current entry count
    pub size: u64,
    /// Entry capacity, if the tier has one
    pub max_size: Option<u64>,
    pub hit_rate: f64,
    pub evictions: u64,
    pub expirations: u64,
}

impl TierStats {
    /// Get total requests
    pub fn total_requests(&self) -> u64 {
        self.hits + self.misses
    }
}

// =============================================================================
// Orchestrator Counters
// =============================================================================

/// Global request counters kept by the orchestrator
#[derive(Debug, Default)]
pub struct CacheMetrics {
    requests: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    promotions: AtomicU64,
    stale_served: AtomicU64,
}

impl CacheMetrics {
    /// Create new zeroed counters
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a lookup and whether any tier answered it
    pub fn record_lookup(&self, hit: bool) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        if hit {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_promotion(&self) {
        self.promotions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stale_served(&self) {
        self.stale_served.fetch_add(1, Ordering::Relaxed);
    }

    /// Zero every counter
    pub fn reset(&self) {
        self.requests.store(0, Ordering::Relaxed);
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.promotions.store(0, Ordering::Relaxed);
        self.stale_served.store(0, Ordering::Relaxed);
    }

    /// Combine the global counters with per-tier statistics
    pub fn snapshot(&self, tiers: Vec<TierStats>) -> CacheStatsSnapshot {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        CacheStatsSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            hits,
            misses,
            hit_rate: ratio(hits, misses),
            promotions: self.promotions.load(Ordering::Relaxed),
            stale_served: self.stale_served.load(Ordering::Relaxed),
            tiers,
        }
    }
}

// =============================================================================
// Aggregate Cache Statistics
// =============================================================================

/// Aggregate statistics across the orchestrator and all tiers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStatsSnapshot {
    /// Lookups served by the orchestrator
    pub requests: u64,
    /// Lookups answered by any tier
    pub hits: u64,
    /// Lookups answered by no tier
    pub misses: u64,
    pub hit_rate: f64,
    pub promotions: u64,
    /// Fetch failures answered with an expired value
    pub stale_served: u64,
    /// Per-tier statistics, fastest tier first
    pub tiers: Vec<TierStats>,
}

impl CacheStatsSnapshot {
    /// Statistics for a single tier
    pub fn tier(&self, tier: CacheTier) -> Option<&TierStats> {
        self.tiers.iter().find(|t| t.tier == tier)
    }

    /// Entries held across all tiers
    pub fn total_entries(&self) -> u64 {
        self.tiers.iter().map(|t| t.size).sum()
    }
}
