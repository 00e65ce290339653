//! Response Buckets
//!
//! Named, versioned response stores. A bucket keeps insertion order so the
//! oldest responses are trimmed first when it grows past its bound.
//!
//! A registry opened over a [`KeyValueStore`] survives restarts: each bucket
//! is one item named `bucket:<name>`, written back when it changed and
//! removed when the bucket is deleted. Buckets left by a previous version are
//! therefore visible to the next process and dropped on activation.

use crate::cache::backend::{KeyValueStore, StoreError, StoreResult};
use crate::network::request::NetworkResponse;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Store item prefix of persisted buckets
pub const BUCKET_ITEM_PREFIX: &str = "bucket:";

fn item_name(bucket: &str) -> String {
    format!("{}{}", BUCKET_ITEM_PREFIX, bucket)
}

// =============================================================================
// Bucket
// =============================================================================

/// Responses stored by request URL
#[derive(Debug, Default)]
pub struct Bucket {
    entries: RwLock<IndexMap<String, NetworkResponse>>,
    /// Changed since last written to the store
    dirty: AtomicBool,
}

impl Bucket {
    pub fn new() -> Self {
        Self::default()
    }

    fn restored(entries: IndexMap<String, NetworkResponse>) -> Self {
        Self {
            entries: RwLock::new(entries),
            dirty: AtomicBool::new(false),
        }
    }

    fn touch(&self) {
        self.dirty.store(true, Ordering::Release);
    }

    /// Exact lookup by request URL
    pub fn lookup(&self, url: &str) -> Option<NetworkResponse> {
        self.entries.read().get(url).cloned()
    }

    /// Store a response, replacing and re-queuing any previous one
    pub fn put(&self, url: &str, response: NetworkResponse) {
        let mut entries = self.entries.write();
        entries.shift_remove(url);
        entries.insert(url.to_string(), response);
        self.touch();
    }

    pub fn delete(&self, url: &str) -> bool {
        let removed = self.entries.write().shift_remove(url).is_some();
        if removed {
            self.touch();
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Drop the oldest responses until at most `max_entries` remain
    pub fn trim_to(&self, max_entries: usize) -> usize {
        let mut entries = self.entries.write();
        let excess = entries.len().saturating_sub(max_entries);
        if excess > 0 {
            entries.drain(..excess);
            self.touch();
        }
        excess
    }

    /// Drop responses received more than `max_age` ago
    pub fn purge_older_than(&self, max_age: Duration) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, response| response.is_fresh(max_age));
        let removed = before - entries.len();
        if removed > 0 {
            self.touch();
        }
        removed
    }

    /// Whether the bucket changed since the last call
    fn take_dirty(&self) -> bool {
        self.dirty.swap(false, Ordering::AcqRel)
    }

    fn encode(&self) -> StoreResult<String> {
        let stored: Vec<StoredResponse> = self
            .entries
            .read()
            .iter()
            .map(|(url, response)| StoredResponse::new(url, response))
            .collect();
        serde_json::to_string(&stored).map_err(|e| StoreError::Decode(e.to_string()))
    }
}

// =============================================================================
// Stored Form
// =============================================================================

/// A response as written to the store
#[derive(Debug, Serialize, Deserialize)]
struct StoredResponse {
    url: String,
    status: u16,
    headers: Vec<(String, String)>,
    /// Base64 body
    body: String,
    stored_at: DateTime<Utc>,
}

impl StoredResponse {
    fn new(url: &str, response: &NetworkResponse) -> Self {
        Self {
            url: url.to_string(),
            status: response.status.as_u16(),
            headers: response
                .headers
                .iter()
                .filter_map(|(name, value)| {
                    value
                        .to_str()
                        .ok()
                        .map(|value| (name.as_str().to_string(), value.to_string()))
                })
                .collect(),
            body: STANDARD.encode(&response.body),
            stored_at: response.stored_at,
        }
    }

    /// Back to a bucket entry; `None` for an undecodable record
    fn into_entry(self) -> Option<(String, NetworkResponse)> {
        let status = StatusCode::from_u16(self.status).ok()?;
        let body = STANDARD.decode(self.body.as_bytes()).ok()?;

        let mut headers = HeaderMap::new();
        for (name, value) in &self.headers {
            if let (Ok(name), Ok(value)) = (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(value)) {
                headers.append(name, value);
            }
        }

        let mut response = NetworkResponse::new(status, headers, body);
        response.stored_at = self.stored_at;
        Some((self.url, response))
    }
}

// =============================================================================
// Bucket Registry
// =============================================================================

/// Entry count of one bucket
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BucketStats {
    pub name: String,
    pub entries: usize,
}

/// All buckets, by name
#[derive(Default)]
pub struct BucketRegistry {
    buckets: DashMap<String, Arc<Bucket>>,
    store: Option<Arc<dyn KeyValueStore>>,
    /// Deleted buckets whose store items are not yet removed
    removed: Mutex<Vec<String>>,
}

impl BucketRegistry {
    /// Registry held in process memory only
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry written through to `store` by [`persist`](Self::persist)
    pub fn with_store(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store: Some(store),
            ..Self::default()
        }
    }

    pub fn is_persistent(&self) -> bool {
        self.store.is_some()
    }

    /// Open a bucket, creating it if missing
    pub fn open(&self, name: &str) -> Arc<Bucket> {
        self.buckets
            .entry(name.to_string())
            .or_insert_with(|| {
                debug!(bucket = %name, "Created response bucket");
                Arc::new(Bucket::new())
            })
            .clone()
    }

    pub fn get(&self, name: &str) -> Option<Arc<Bucket>> {
        self.buckets.get(name).map(|b| b.value().clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.buckets.contains_key(name)
    }

    pub fn delete(&self, name: &str) -> bool {
        let deleted = self.buckets.remove(name).is_some();
        if deleted && self.store.is_some() {
            self.removed.lock().push(name.to_string());
        }
        deleted
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.buckets.iter().map(|b| b.key().clone()).collect();
        names.sort();
        names
    }

    /// Delete every bucket whose name does not end with `-v<version>`
    pub fn retain_version(&self, version: &str) -> Vec<String> {
        let tag = format!("-v{}", version);
        let stale: Vec<String> = self
            .names()
            .into_iter()
            .filter(|name| !name.ends_with(&tag))
            .collect();

        for name in &stale {
            self.delete(name);
            info!(bucket = %name, "Deleted bucket from previous version");
        }
        stale
    }

    pub fn stats(&self) -> Vec<BucketStats> {
        self.names()
            .into_iter()
            .filter_map(|name| {
                self.get(&name).map(|bucket| BucketStats {
                    entries: bucket.len(),
                    name,
                })
            })
            .collect()
    }

    // -------------------------------------------------------------------------
    // Persistence
    // -------------------------------------------------------------------------

    /// Load every stored bucket that is not already open, returning how many
    /// were loaded. Undecodable items are removed.
    pub async fn restore(&self) -> StoreResult<usize> {
        let store = match &self.store {
            Some(store) => store,
            None => return Ok(0),
        };

        let mut restored = 0;
        for item in store.keys().await? {
            let name = match item.strip_prefix(BUCKET_ITEM_PREFIX) {
                Some(name) if !self.contains(name) => name,
                _ => continue,
            };
            let raw = match store.get_item(&item).await? {
                Some(raw) => raw,
                None => continue,
            };

            match serde_json::from_str::<Vec<StoredResponse>>(&raw) {
                Ok(stored) => {
                    let entries: IndexMap<String, NetworkResponse> =
                        stored.into_iter().filter_map(StoredResponse::into_entry).collect();
                    debug!(bucket = %name, entries = entries.len(), "Restored response bucket");
                    self.buckets.insert(name.to_string(), Arc::new(Bucket::restored(entries)));
                    restored += 1;
                }
                Err(e) => {
                    warn!(bucket = %name, error = %e, "Removing undecodable bucket");
                    store.remove_item(&item).await?;
                }
            }
        }
        Ok(restored)
    }

    /// Write changed buckets and remove deleted ones from the store,
    /// returning how many buckets were written
    pub async fn persist(&self) -> StoreResult<usize> {
        let store = match &self.store {
            Some(store) => store,
            None => return Ok(0),
        };

        let removed = std::mem::take(&mut *self.removed.lock());
        for (i, name) in removed.iter().enumerate() {
            if let Err(e) = store.remove_item(&item_name(name)).await {
                self.removed.lock().extend(removed[i..].iter().cloned());
                return Err(e);
            }
        }

        let mut written = 0;
        for name in self.names() {
            let bucket = match self.get(&name) {
                Some(bucket) if bucket.take_dirty() => bucket,
                _ => continue,
            };
            let result = match bucket.encode() {
                Ok(raw) => store.set_item(&item_name(&name), &raw).await,
                Err(e) => Err(e),
            };
            if let Err(e) = result {
                bucket.touch();
                return Err(e);
            }
            written += 1;
        }
        Ok(written)
    }
}
