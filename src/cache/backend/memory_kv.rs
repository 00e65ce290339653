//! In-memory key-value store with an optional byte quota.

use crate::cache::backend::{KeyValueStore, StoreError, StoreResult};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Process-local [`KeyValueStore`]
///
/// Item sizes are counted as `name.len() + value.len()`; a write that would
/// push the total past the quota fails with [`StoreError::QuotaExceeded`].
#[derive(Debug, Default)]
pub struct MemoryKeyValueStore {
    items: RwLock<HashMap<String, String>>,
    quota_bytes: Option<usize>,
}

impl MemoryKeyValueStore {
    /// Create an unbounded store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store limited to `quota_bytes`
    pub fn with_quota(quota_bytes: usize) -> Self {
        Self {
            items: RwLock::new(HashMap::new()),
            quota_bytes: Some(quota_bytes),
        }
    }

    /// Bytes currently used
    pub fn used_bytes(&self) -> usize {
        self.items
            .read()
            .iter()
            .map(|(k, v)| k.len() + v.len())
            .sum()
    }

    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }
}

#[async_trait]
impl KeyValueStore for MemoryKeyValueStore {
    async fn get_item(&self, name: &str) -> StoreResult<Option<String>> {
        Ok(self.items.read().get(name).cloned())
    }

    async fn set_item(&self, name: &str, value: &str) -> StoreResult<()> {
        let mut items = self.items.write();

        if let Some(quota) = self.quota_bytes {
            let used: usize = items
                .iter()
                .filter(|(k, _)| k.as_str() != name)
                .map(|(k, v)| k.len() + v.len())
                .sum();
            if used + name.len() + value.len() > quota {
                return Err(StoreError::QuotaExceeded);
            }
        }

        items.insert(name.to_string(), value.to_string());
        Ok(())
    }

    async fn remove_item(&self, name: &str) -> StoreResult<()> {
        self.items.write().remove(name);
        Ok(())
    }

    async fn keys(&self) -> StoreResult<Vec<String>> {
        Ok(self.items.read().keys().cloned().collect())
    }
}
