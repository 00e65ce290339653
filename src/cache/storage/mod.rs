//! Cache Tier Storage
//!
//! One implementation per tier, all behind the [`TierStorage`] trait so the
//! orchestrator can treat them uniformly and tests can substitute doubles.

mod local;
mod memory;
mod remote;

pub use local::{LocalEnvelope, LocalTier, LocalTierConfig, DEFAULT_PREFIX};
pub use memory::{MemoryTier, MemoryTierConfig};
pub use remote::{category_for, RemoteTier, RemoteTierConfig};

use crate::cache::entry::CacheEntry;
use crate::cache::key::CacheKey;
use crate::cache::metrics::TierStats;
use crate::cache::tier::CacheTier;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

// =============================================================================
// Cache Value Bound
// =============================================================================

/// Bound for values stored in the cache
pub trait CacheValue: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

impl<T> CacheValue for T where T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

// =============================================================================
// Tier Faults
// =============================================================================

/// Why a tier could not answer.
///
/// The orchestrator treats every fault as a miss; the variants exist so logs
/// tell a real absence from a swallowed failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TierFault {
    #[error("entry absent")]
    Absent,

    #[error("entry expired")]
    Expired,

    #[error("corrupt entry: {0}")]
    Corrupt(String),

    #[error("storage quota exceeded")]
    QuotaExceeded,

    #[error("tier unavailable: {0}")]
    Unavailable(String),
}

impl TierFault {
    /// Whether the fault is an ordinary miss rather than a failure
    pub fn is_miss(&self) -> bool {
        matches!(self, TierFault::Absent | TierFault::Expired)
    }
}

/// Result type at each tier boundary
pub type TierResult<T> = std::result::Result<T, TierFault>;

// =============================================================================
// Read Mode
// =============================================================================

/// How a read treats an expired entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadMode {
    /// Expired entries are removed and reported as misses
    #[default]
    Fresh,
    /// Expired entries are reported as misses but kept in place
    Preserve,
    /// Expired entries are returned as if fresh
    IgnoreExpiry,
}

impl ReadMode {
    /// Whether an entry with the given validity should be returned
    pub fn accepts(&self, valid: bool) -> bool {
        valid || *self == ReadMode::IgnoreExpiry
    }

    /// Whether an expired entry should be deleted on read
    pub fn removes_expired(&self) -> bool {
        *self == ReadMode::Fresh
    }
}

// =============================================================================
// TierStorage Trait
// =============================================================================

/// Storage operations every cache tier provides
#[async_trait]
pub trait TierStorage<T: CacheValue>: Send + Sync {
    /// Get the tier this storage serves
    fn tier(&self) -> CacheTier;

    /// Read an entry
    async fn get(&self, key: &CacheKey, mode: ReadMode) -> TierResult<CacheEntry<T>>;

    /// Write a value with the given lifetime
    async fn set(&self, key: &CacheKey, value: &T, ttl: Duration) -> TierResult<()>;

    /// Remove an entry
    async fn delete(&self, key: &CacheKey) -> TierResult<()>;

    /// Remove this tier's entries and zero its statistics
    async fn clear(&self) -> TierResult<()>;

    /// Remove expired entries, returning how many were removed
    async fn cleanup(&self) -> TierResult<usize>;

    /// Current statistics
    async fn stats(&self) -> TierStats;
}
