//! Prometheus exposition of cache statistics

use crate::cache::CacheStatsSnapshot;
use crate::error::Result;
use crate::network::NetworkStats;
use prometheus::{Encoder, GaugeVec, IntGaugeVec, Opts, Registry, TextEncoder};

/// Gauges refreshed from cache snapshots on every scrape
pub struct ApiMetrics {
    registry: Registry,
    cache: IntGaugeVec,
    hit_rate: GaugeVec,
    tiers: IntGaugeVec,
    network: IntGaugeVec,
    buckets: IntGaugeVec,
}

impl ApiMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let cache = IntGaugeVec::new(
            Opts::new("dexcache_cache_stats", "Tiered cache counters"),
            &["metric"],
        )?;
        registry.register(Box::new(cache.clone()))?;

        let hit_rate = GaugeVec::new(
            Opts::new("dexcache_hit_rate", "Hit rate by scope"),
            &["scope"],
        )?;
        registry.register(Box::new(hit_rate.clone()))?;

        let tiers = IntGaugeVec::new(
            Opts::new("dexcache_tier_stats", "Per-tier counters"),
            &["tier", "metric"],
        )?;
        registry.register(Box::new(tiers.clone()))?;

        let network = IntGaugeVec::new(
            Opts::new("dexcache_network_stats", "Network cache counters"),
            &["metric"],
        )?;
        registry.register(Box::new(network.clone()))?;

        let buckets = IntGaugeVec::new(
            Opts::new("dexcache_bucket_entries", "Responses held per bucket"),
            &["bucket"],
        )?;
        registry.register(Box::new(buckets.clone()))?;

        Ok(Self {
            registry,
            cache,
            hit_rate,
            tiers,
            network,
            buckets,
        })
    }

    fn observe(&self, cache: &CacheStatsSnapshot, network: &NetworkStats) {
        for (metric, value) in [
            ("requests", cache.requests),
            ("hits", cache.hits),
            ("misses", cache.misses),
            ("promotions", cache.promotions),
            ("stale_served", cache.stale_served),
        ] {
            self.cache.with_label_values(&[metric]).set(value as i64);
        }
        self.hit_rate.with_label_values(&["cache"]).set(cache.hit_rate);

        for tier in &cache.tiers {
            let name = tier.tier.to_string();
            for (metric, value) in [
                ("hits", tier.hits),
                ("misses", tier.misses),
                ("size", tier.size),
                ("evictions", tier.evictions),
                ("expirations", tier.expirations),
            ] {
                self.tiers.with_label_values(&[name.as_str(), metric]).set(value as i64);
            }
            self.hit_rate.with_label_values(&[name.as_str()]).set(tier.hit_rate);
        }

        for (metric, value) in [
            ("hits", network.hits),
            ("misses", network.misses),
            ("network_requests", network.network_requests),
            ("network_failures", network.network_failures),
            ("revalidations", network.revalidations),
            ("fallbacks", network.fallbacks),
        ] {
            self.network.with_label_values(&[metric]).set(value as i64);
        }

        self.buckets.reset();
        for bucket in &network.buckets {
            self.buckets
                .with_label_values(&[bucket.name.as_str()])
                .set(bucket.entries as i64);
        }
    }

    /// Refresh every gauge and encode the registry in text format
    pub fn render(&self, cache: &CacheStatsSnapshot, network: &NetworkStats) -> Result<(String, Vec<u8>)> {
        self.observe(cache, network);

        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok((encoder.format_type().to_string(), buffer))
    }
}
