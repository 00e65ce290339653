//! Cache Entry Types
//!
//! The unit stored in every tier, plus expiry arithmetic shared by the tiers.

use crate::cache::key::CacheKey;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Schema version written with every persisted entry
pub const SCHEMA_VERSION: &str = "1.0";

// =============================================================================
// Cache Entry
// =============================================================================

/// A cached value with its lifetime metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    /// Key this entry is stored under
    pub key: CacheKey,
    /// The cached value
    pub data: T,
    /// Time the entry was written
    pub stored_at: DateTime<Utc>,
    /// Time after which the entry is no longer valid
    pub expires_at: DateTime<Utc>,
    /// Schema version of the stored payload
    pub schema_version: String,
}

impl<T> CacheEntry<T> {
    /// Create an entry stored now with the given lifetime
    pub fn new(key: CacheKey, data: T, ttl: Duration) -> Self {
        let stored_at = Utc::now();
        Self {
            key,
            data,
            stored_at,
            expires_at: expiry_from(stored_at, ttl),
            schema_version: SCHEMA_VERSION.to_string(),
        }
    }

    /// Check if the entry is still valid (`now <= expires_at`)
    pub fn is_valid(&self) -> bool {
        Utc::now() <= self.expires_at
    }

    /// Check if the entry has expired
    pub fn is_expired(&self) -> bool {
        !self.is_valid()
    }

    /// Lifetime left before expiry, `None` once expired
    pub fn remaining_ttl(&self) -> Option<Duration> {
        (self.expires_at - Utc::now()).to_std().ok().filter(|d| !d.is_zero())
    }

    /// Age since the entry was stored
    pub fn age(&self) -> Duration {
        (Utc::now() - self.stored_at).to_std().unwrap_or_default()
    }
}

// =============================================================================
// Expiry Helpers
// =============================================================================

/// Compute `stored_at + ttl`, clamping a zero TTL to one millisecond so
/// `expires_at > stored_at` always holds.
pub fn expiry_from(stored_at: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    let ttl = ChronoDuration::from_std(ttl)
        .unwrap_or_else(|_| ChronoDuration::days(365 * 100))
        .max(ChronoDuration::milliseconds(1));
    stored_at
        .checked_add_signed(ttl)
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Convert epoch milliseconds into a timestamp
pub fn from_millis(millis: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis).single()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_lifetime_invariant() {
        let entry = CacheEntry::new(CacheKey::raw("k"), 1u32, Duration::from_secs(60));
        assert!(entry.expires_at > entry.stored_at);
        assert!(entry.is_valid());
        assert!(entry.remaining_ttl().is_some());
        assert_eq!(entry.schema_version, SCHEMA_VERSION);
    }

    #[test]
    fn test_zero_ttl_is_clamped() {
        let entry = CacheEntry::new(CacheKey::raw("k"), "v", Duration::ZERO);
        assert!(entry.expires_at > entry.stored_at);
    }

    #[test]
    fn test_entry_expiry() {
        let mut entry = CacheEntry::new(CacheKey::raw("k"), "v", Duration::from_secs(60));
        entry.expires_at = Utc::now() - ChronoDuration::seconds(1);
        assert!(entry.is_expired());
        assert_eq!(entry.remaining_ttl(), None);
    }

    #[test]
    fn test_huge_ttl_saturates() {
        let now = Utc::now();
        let expiry = expiry_from(now, Duration::from_secs(u64::MAX));
        assert!(expiry > now);
    }

    #[test]
    fn test_from_millis() {
        let now = Utc::now();
        let back = from_millis(now.timestamp_millis()).unwrap();
        assert_eq!(back.timestamp_millis(), now.timestamp_millis());
    }
}
