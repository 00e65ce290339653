//! Cache Tier Definitions
//!
//! Defines the three-tier caching hierarchy and the priority policy that
//! selects which tiers participate for a given entry.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

// =============================================================================
// Default Lifetimes
// =============================================================================

/// Default TTL for the ephemeral tier: 5 minutes
pub const MEMORY_DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);

/// Default TTL for the persistent-local tier: 1 hour
pub const LOCAL_DEFAULT_TTL: Duration = Duration::from_secs(60 * 60);

/// Default TTL for the persistent-remote tier: 24 hours
pub const REMOTE_DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Default maximum entry count for the ephemeral tier
pub const MEMORY_DEFAULT_MAX_ENTRIES: usize = 100;

// =============================================================================
// Cache Tier
// =============================================================================

/// Cache tier representing the storage hierarchy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheTier {
    /// In-process memory (fastest, smallest)
    Memory,
    /// On-device persistent key-value storage
    Local,
    /// Remote row store (slowest, optional)
    Remote,
}

impl CacheTier {
    /// Get all tiers in lookup order (fastest first)
    pub fn lookup_order() -> &'static [CacheTier] {
        &[CacheTier::Memory, CacheTier::Local, CacheTier::Remote]
    }

    /// Tiers faster than this one, slowest first (promotion order)
    pub fn faster_tiers(&self) -> &'static [CacheTier] {
        match self {
            CacheTier::Memory => &[],
            CacheTier::Local => &[CacheTier::Memory],
            CacheTier::Remote => &[CacheTier::Local, CacheTier::Memory],
        }
    }

    /// Default entry lifetime for this tier
    pub fn default_ttl(&self) -> Duration {
        match self {
            CacheTier::Memory => MEMORY_DEFAULT_TTL,
            CacheTier::Local => LOCAL_DEFAULT_TTL,
            CacheTier::Remote => REMOTE_DEFAULT_TTL,
        }
    }

    /// Lowest priority at which this tier participates
    pub fn min_priority(&self) -> Priority {
        match self {
            CacheTier::Memory => Priority::Normal,
            CacheTier::Local => Priority::High,
            CacheTier::Remote => Priority::Critical,
        }
    }
}

impl fmt::Display for CacheTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheTier::Memory => write!(f, "memory"),
            CacheTier::Local => write!(f, "local"),
            CacheTier::Remote => write!(f, "remote"),
        }
    }
}

// =============================================================================
// Priority
// =============================================================================

/// Caller-chosen policy selecting which tiers an entry is written to
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Memory only
    #[default]
    Normal,
    /// Memory + local
    High,
    /// Memory + local + remote
    Critical,
}

impl Priority {
    /// Tiers written (and consulted) for this priority, fastest first
    pub fn tiers(&self) -> &'static [CacheTier] {
        match self {
            Priority::Normal => &[CacheTier::Memory],
            Priority::High => &[CacheTier::Memory, CacheTier::Local],
            Priority::Critical => &[CacheTier::Memory, CacheTier::Local, CacheTier::Remote],
        }
    }

    /// Whether the given tier participates at this priority
    pub fn includes(&self, tier: CacheTier) -> bool {
        *self >= tier.min_priority()
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Priority::Normal => write!(f, "normal"),
            Priority::High => write!(f, "high"),
            Priority::Critical => write!(f, "critical"),
        }
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "normal" | "1" => Ok(Priority::Normal),
            "high" | "2" => Ok(Priority::High),
            "critical" | "3" => Ok(Priority::Critical),
            other => Err(format!("unknown priority '{}'", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_tier_sets_are_nested() {
        let normal = Priority::Normal.tiers();
        let high = Priority::High.tiers();
        let critical = Priority::Critical.tiers();

        assert!(normal.iter().all(|t| high.contains(t)));
        assert!(high.iter().all(|t| critical.contains(t)));
        assert_eq!(critical.len(), 3);
    }

    #[test]
    fn test_priority_includes() {
        assert!(Priority::Normal.includes(CacheTier::Memory));
        assert!(!Priority::Normal.includes(CacheTier::Local));
        assert!(Priority::High.includes(CacheTier::Local));
        assert!(!Priority::High.includes(CacheTier::Remote));
        assert!(Priority::Critical.includes(CacheTier::Remote));
    }

    #[test]
    fn test_promotion_order() {
        assert!(CacheTier::Memory.faster_tiers().is_empty());
        assert_eq!(CacheTier::Local.faster_tiers(), &[CacheTier::Memory]);
        assert_eq!(
            CacheTier::Remote.faster_tiers(),
            &[CacheTier::Local, CacheTier::Memory]
        );
    }

    #[test]
    fn test_priority_parsing() {
        assert_eq!("HIGH".parse::<Priority>().unwrap(), Priority::High);
        assert_eq!("3".parse::<Priority>().unwrap(), Priority::Critical);
        assert!("urgent".parse::<Priority>().is_err());
    }

    #[test]
    fn test_default_ttls_increase_with_depth() {
        assert!(CacheTier::Memory.default_ttl() < CacheTier::Local.default_ttl());
        assert!(CacheTier::Local.default_ttl() < CacheTier::Remote.default_ttl());
    }
}
