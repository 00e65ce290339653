//! In-memory row store, used for tests and when no remote store is configured.

use crate::cache::backend::{CacheRow, RowStore, StoreError, StoreResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

/// Process-local [`RowStore`] that can be switched offline
#[derive(Debug)]
pub struct MemoryRowStore {
    rows: RwLock<HashMap<String, CacheRow>>,
    available: AtomicBool,
}

impl Default for MemoryRowStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRowStore {
    pub fn new() -> Self {
        Self {
            rows: RwLock::new(HashMap::new()),
            available: AtomicBool::new(true),
        }
    }

    /// Set availability (for testing)
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::Relaxed);
    }

    /// Check if available
    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::Relaxed)
    }

    /// Raw row lookup ignoring expiry and availability
    pub fn row(&self, cache_key: &str) -> Option<CacheRow> {
        self.rows.read().get(cache_key).cloned()
    }

    /// Total rows held, expired ones included
    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }

    fn check(&self) -> StoreResult<()> {
        if self.is_available() {
            Ok(())
        } else {
            Err(StoreError::Unavailable("row store offline".to_string()))
        }
    }
}

#[async_trait]
impl RowStore for MemoryRowStore {
    async fn select(
        &self,
        cache_key: &str,
        live_at: Option<DateTime<Utc>>,
    ) -> StoreResult<Option<CacheRow>> {
        self.check()?;
        Ok(self
            .rows
            .read()
            .get(cache_key)
            .filter(|row| live_at.map_or(true, |at| row.expires_at > at))
            .cloned())
    }

    async fn upsert(&self, row: CacheRow) -> StoreResult<()> {
        self.check()?;
        self.rows.write().insert(row.cache_key.clone(), row);
        Ok(())
    }

    async fn delete(&self, cache_key: &str) -> StoreResult<()> {
        self.check()?;
        self.rows.write().remove(cache_key);
        Ok(())
    }

    async fn delete_expired(&self, before: DateTime<Utc>) -> StoreResult<usize> {
        self.check()?;
        let mut rows = self.rows.write();
        let count = rows.len();
        rows.retain(|_, row| row.expires_at >= before);
        Ok(count - rows.len())
    }

    async fn count_live(&self, live_at: DateTime<Utc>) -> StoreResult<u64> {
        self.check()?;
        Ok(self
            .rows
            .read()
            .values()
            .filter(|row| row.expires_at > live_at)
            .count() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use chrono::Duration;
    use serde_json::json;

    fn row(key: &str, expires_in: Duration) -> CacheRow {
        let now = Utc::now();
        CacheRow {
            cache_key: key.to_string(),
            cache_data: json!({"id": key}),
            expires_at: now + expires_in,
            created_at: now,
            category: "general".to_string(),
        }
    }

    #[tokio::test]
    async fn test_select_filters_expired() {
        let store = MemoryRowStore::new();
        store.upsert(row("live", Duration::hours(1))).await.unwrap();
        store.upsert(row("dead", Duration::hours(-1))).await.unwrap();

        let now = Utc::now();
        assert!(store.select("live", Some(now)).await.unwrap().is_some());
        assert!(store.select("dead", Some(now)).await.unwrap().is_none());
        assert!(store.select("dead", None).await.unwrap().is_some());
        assert_eq!(store.count_live(now).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_delete_expired_is_partial() {
        let store = MemoryRowStore::new();
        store.upsert(row("live", Duration::hours(1))).await.unwrap();
        store.upsert(row("dead", Duration::hours(-1))).await.unwrap();

        assert_eq!(store.delete_expired(Utc::now()).await.unwrap(), 1);
        assert_eq!(store.len(), 1);
        assert!(store.row("live").is_some());
    }

    #[tokio::test]
    async fn test_unavailable() {
        let store = MemoryRowStore::new();
        store.set_available(false);
        assert_matches!(
            store.upsert(row("k", Duration::hours(1))).await,
            Err(StoreError::Unavailable(_))
        );
        assert_matches!(store.select("k", None).await, Err(StoreError::Unavailable(_)));
    }
}
