//! File-backed key-value store.
//!
//! One file per item under a root directory. File names are the
//! percent-encoded item names so any name maps to a valid path.

use crate::cache::backend::{KeyValueStore, StoreError, StoreResult};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

const TMP_SUFFIX: &str = ".tmp";

/// [`KeyValueStore`] persisted to a directory, with an optional byte quota
#[derive(Debug)]
pub struct FileKeyValueStore {
    root_path: PathBuf,
    quota_bytes: Option<u64>,
    /// Serializes writers so the quota check and the write are atomic
    write_lock: Mutex<()>,
}

impl FileKeyValueStore {
    /// Open (creating if needed) a store rooted at `root_path`
    pub async fn open(root_path: impl Into<PathBuf>) -> StoreResult<Self> {
        Self::open_with_quota(root_path, None).await
    }

    /// Open a store that refuses writes past `quota_bytes`
    pub async fn open_with_quota(
        root_path: impl Into<PathBuf>,
        quota_bytes: Option<u64>,
    ) -> StoreResult<Self> {
        let root_path = root_path.into();
        fs::create_dir_all(&root_path).await?;
        debug!(path = %root_path.display(), "Opened file key-value store");

        Ok(Self {
            root_path,
            quota_bytes,
            write_lock: Mutex::new(()),
        })
    }

    pub fn root_path(&self) -> &Path {
        &self.root_path
    }

    fn item_path(&self, name: &str) -> PathBuf {
        self.root_path.join(urlencoding::encode(name).as_ref())
    }

    /// Total bytes of every item except `excluding`
    async fn used_bytes(&self, excluding: &Path) -> StoreResult<u64> {
        let mut total = 0u64;
        let mut dir = fs::read_dir(&self.root_path).await?;
        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            if path == excluding || is_temp(&path) {
                continue;
            }
            if let Ok(meta) = entry.metadata().await {
                if meta.is_file() {
                    total += meta.len();
                }
            }
        }
        Ok(total)
    }
}

fn is_temp(path: &Path) -> bool {
    path.to_string_lossy().ends_with(TMP_SUFFIX)
}

#[async_trait]
impl KeyValueStore for FileKeyValueStore {
    async fn get_item(&self, name: &str) -> StoreResult<Option<String>> {
        match fs::read(self.item_path(name)).await {
            Ok(bytes) => String::from_utf8(bytes)
                .map(Some)
                .map_err(|e| StoreError::Decode(e.to_string())),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn set_item(&self, name: &str, value: &str) -> StoreResult<()> {
        let _guard = self.write_lock.lock().await;
        let path = self.item_path(name);

        if let Some(quota) = self.quota_bytes {
            let used = self.used_bytes(&path).await?;
            if used + value.len() as u64 > quota {
                return Err(StoreError::QuotaExceeded);
            }
        }

        // Write to a temp file then rename so readers never see a partial item
        let tmp = PathBuf::from(format!("{}{}", path.display(), TMP_SUFFIX));
        let mut file = fs::File::create(&tmp).await?;
        file.write_all(value.as_bytes()).await?;
        file.flush().await?;
        drop(file);
        fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn remove_item(&self, name: &str) -> StoreResult<()> {
        match fs::remove_file(self.item_path(name)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn keys(&self) -> StoreResult<Vec<String>> {
        let mut names = Vec::new();
        let mut dir = fs::read_dir(&self.root_path).await?;
        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            if is_temp(&path) {
                continue;
            }
            let file_name = entry.file_name();
            let file_name = file_name.to_string_lossy();
            if let Ok(name) = urlencoding::decode(&file_name) {
                names.push(name.into_owned());
            }
        }
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_basic_operations() {
        let dir = TempDir::new().unwrap();
        let store = FileKeyValueStore::open(dir.path()).await.unwrap();

        store.set_item("dextrends_cache_abc", "{\"v\":1}").await.unwrap();
        assert_eq!(
            store.get_item("dextrends_cache_abc").await.unwrap().as_deref(),
            Some("{\"v\":1}")
        );
        assert_eq!(store.keys().await.unwrap(), vec!["dextrends_cache_abc".to_string()]);

        store.remove_item("dextrends_cache_abc").await.unwrap();
        assert_eq!(store.get_item("dextrends_cache_abc").await.unwrap(), None);
        store.remove_item("dextrends_cache_abc").await.unwrap();
    }

    #[tokio::test]
    async fn test_names_with_path_characters() {
        let dir = TempDir::new().unwrap();
        let store = FileKeyValueStore::open(dir.path()).await.unwrap();

        store.set_item("theme/dark mode", "on").await.unwrap();
        assert_eq!(store.get_item("theme/dark mode").await.unwrap().as_deref(), Some("on"));
        assert_eq!(store.keys().await.unwrap(), vec!["theme/dark mode".to_string()]);
    }

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let store = FileKeyValueStore::open(dir.path()).await.unwrap();
            store.set_item("k", "v").await.unwrap();
        }
        let store = FileKeyValueStore::open(dir.path()).await.unwrap();
        assert_eq!(store.get_item("k").await.unwrap().as_deref(), Some("v"));
    }

    #[tokio::test]
    async fn test_quota() {
        let dir = TempDir::new().unwrap();
        let store = FileKeyValueStore::open_with_quota(dir.path(), Some(8))
            .await
            .unwrap();

        store.set_item("a", "12345").await.unwrap();
        assert_matches!(store.set_item("b", "12345").await, Err(StoreError::QuotaExceeded));

        // Overwriting does not count the old value
        store.set_item("a", "12345678").await.unwrap();
    }
}
