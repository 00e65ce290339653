//! Cache Events
//!
//! Events emitted by the cache for monitoring and observability.

use crate::cache::key::CacheKey;
use crate::cache::tier::CacheTier;
use serde::{Deserialize, Serialize};

/// Events emitted by the cache system
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CacheEvent {
    /// Value written to a tier
    Set { key: String, tier: CacheTier },

    /// Lookup answered by a tier
    Hit { key: String, tier: CacheTier },

    /// Lookup answered by no tier
    Miss { key: String },

    /// Entry copied into a faster tier after a read
    Promote {
        key: String,
        from_tier: CacheTier,
        to_tier: CacheTier,
    },

    /// Entry evicted for capacity
    Evict { key: String, tier: CacheTier },

    /// Expired entry removed on read
    Expire { key: String, tier: CacheTier },

    /// Fetch failed and an expired value was returned instead
    StaleServed { key: String },

    /// A tier swallowed a storage failure
    TierFailure {
        tier: CacheTier,
        operation: String,
        reason: String,
    },

    /// Entry removed from every tier
    Delete { key: String },

    /// All tiers cleared
    Cleared,

    /// Periodic sweep finished
    CleanupComplete { removed: usize },

    /// Warm-up run finished
    WarmComplete {
        requested: usize,
        loaded: usize,
        failed: usize,
    },
}

impl CacheEvent {
    pub fn set(key: &CacheKey, tier: CacheTier) -> Self {
        CacheEvent::Set {
            key: key.to_string(),
            tier,
        }
    }

    pub fn hit(key: &CacheKey, tier: CacheTier) -> Self {
        CacheEvent::Hit {
            key: key.to_string(),
            tier,
        }
    }

    pub fn miss(key: &CacheKey) -> Self {
        CacheEvent::Miss {
            key: key.to_string(),
        }
    }

    pub fn promote(key: &CacheKey, from_tier: CacheTier, to_tier: CacheTier) -> Self {
        CacheEvent::Promote {
            key: key.to_string(),
            from_tier,
            to_tier,
        }
    }

    pub fn evict(key: &CacheKey, tier: CacheTier) -> Self {
        CacheEvent::Evict {
            key: key.to_string(),
            tier,
        }
    }

    pub fn expire(key: &CacheKey, tier: CacheTier) -> Self {
        CacheEvent::Expire {
            key: key.to_string(),
            tier,
        }
    }

    pub fn stale_served(key: &CacheKey) -> Self {
        CacheEvent::StaleServed {
            key: key.to_string(),
        }
    }

    pub fn tier_failure(tier: CacheTier, operation: &str, reason: impl ToString) -> Self {
        CacheEvent::TierFailure {
            tier,
            operation: operation.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Get the key associated with this event (if any)
    pub fn key(&self) -> Option<&str> {
        match self {
            CacheEvent::Set { key, .. }
            | CacheEvent::Hit { key, .. }
            | CacheEvent::Miss { key }
            | CacheEvent::Promote { key, .. }
            | CacheEvent::Evict { key, .. }
            | CacheEvent::Expire { key, .. }
            | CacheEvent::StaleServed { key }
            | CacheEvent::Delete { key } => Some(key),
            _ => None,
        }
    }

    /// Get the tier associated with this event (if any)
    pub fn tier(&self) -> Option<CacheTier> {
        match self {
            CacheEvent::Set { tier, .. }
            | CacheEvent::Hit { tier, .. }
            | CacheEvent::Evict { tier, .. }
            | CacheEvent::Expire { tier, .. }
            | CacheEvent::TierFailure { tier, .. } => Some(*tier),
            CacheEvent::Promote { to_tier, .. } => Some(*to_tier),
            _ => None,
        }
    }

    /// Check if this is an error event
    pub fn is_error(&self) -> bool {
        matches!(self, CacheEvent::TierFailure { .. })
    }
}
