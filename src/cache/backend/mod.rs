//! Backing Stores
//!
//! Raw storage behind the persistent tiers. The local tier sits on a
//! [`KeyValueStore`] (string items, device-storage semantics with a quota),
//! the remote tier on a [`RowStore`] (one table of cache rows).

mod file_kv;
mod memory_kv;
mod memory_rows;
mod rest_rows;

pub use file_kv::FileKeyValueStore;
pub use memory_kv::MemoryKeyValueStore;
pub use memory_rows::MemoryRowStore;
pub use rest_rows::{RestRowStore, RestRowStoreConfig};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// =============================================================================
// Store Errors
// =============================================================================

/// Failures reported by a backing store
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("storage quota exceeded")]
    QuotaExceeded,

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("undecodable store payload: {0}")]
    Decode(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Result type for store operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

// =============================================================================
// Key-Value Store (Port)
// =============================================================================

/// String item storage shared with other users of the same device
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read an item
    async fn get_item(&self, name: &str) -> StoreResult<Option<String>>;

    /// Write an item, failing with [`StoreError::QuotaExceeded`] when full
    async fn set_item(&self, name: &str, value: &str) -> StoreResult<()>;

    /// Remove an item; removing a missing item succeeds
    async fn remove_item(&self, name: &str) -> StoreResult<()>;

    /// Names of every item in the store
    async fn keys(&self) -> StoreResult<Vec<String>>;
}

// =============================================================================
// Row Store (Port)
// =============================================================================

/// One row of the remote cache table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheRow {
    pub cache_key: String,
    pub cache_data: serde_json::Value,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub category: String,
}

/// Remote table of cache rows keyed by `cache_key`
#[async_trait]
pub trait RowStore: Send + Sync {
    /// Point lookup; with `live_at` set only rows expiring after it match
    async fn select(
        &self,
        cache_key: &str,
        live_at: Option<DateTime<Utc>>,
    ) -> StoreResult<Option<CacheRow>>;

    /// Insert or replace the row with the same `cache_key`
    async fn upsert(&self, row: CacheRow) -> StoreResult<()>;

    /// Delete the row with the given key
    async fn delete(&self, cache_key: &str) -> StoreResult<()>;

    /// Delete rows that expired before `before`, returning how many went
    async fn delete_expired(&self, before: DateTime<Utc>) -> StoreResult<usize>;

    /// Count rows still live at `live_at`
    async fn count_live(&self, live_at: DateTime<Utc>) -> StoreResult<u64>;
}
