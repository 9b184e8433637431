//! # JSON file store
//!
//! Keeps all keys in one JSON object file. Every `set`/`remove` rewrites the
//! file through a temporary sibling and a rename, so a crash mid-write leaves
//! the previous contents intact.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use super::DurableStore;

/// File-backed store.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    cache: Mutex<Option<BTreeMap<String, String>>>,
}

impl JsonFileStore {
    /// Creates a store backed by `path`. The file is created on first write.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cache: Mutex::new(None),
        }
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<BTreeMap<String, String>, String> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) if raw.trim().is_empty() => Ok(BTreeMap::new()),
            Ok(raw) => serde_json::from_str(&raw)
                .map_err(|e| format!("cannot parse {}: {e}", self.path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(format!("cannot read {}: {e}", self.path.display())),
        }
    }

    async fn flush(&self, entries: &BTreeMap<String, String>) -> Result<(), String> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| format!("cannot create {}: {e}", parent.display()))?;
        }

        let raw = serde_json::to_string_pretty(entries).map_err(|e| e.to_string())?;
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, raw)
            .await
            .map_err(|e| format!("cannot write {}: {e}", tmp.display()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| format!("cannot replace {}: {e}", self.path.display()))?;

        debug!(path = %self.path.display(), keys = entries.len(), "store flushed");
        Ok(())
    }
}

#[async_trait]
impl DurableStore for JsonFileStore {
    async fn get(&self, key: &str) -> Result<Option<String>, String> {
        let mut cache = self.cache.lock().await;
        if cache.is_none() {
            *cache = Some(self.load().await?);
        }
        Ok(cache.as_ref().and_then(|m| m.get(key).cloned()))
    }

    async fn set(&self, key: &str, value: String) -> Result<(), String> {
        let mut cache = self.cache.lock().await;
        let mut entries = match cache.take() {
            Some(m) => m,
            None => self.load().await?,
        };
        entries.insert(key.to_string(), value);
        let res = self.flush(&entries).await;
        *cache = Some(entries);
        res
    }

    async fn remove(&self, key: &str) -> Result<(), String> {
        let mut cache = self.cache.lock().await;
        let mut entries = match cache.take() {
            Some(m) => m,
            None => self.load().await?,
        };
        let existed = entries.remove(key).is_some();
        let res = if existed {
            self.flush(&entries).await
        } else {
            Ok(())
        };
        *cache = Some(entries);
        res
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn values_survive_a_new_instance() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("state.json");

        let store = JsonFileStore::new(&path);
        store.set("a", "1".into()).await.expect("set a");
        store.set("b", "2".into()).await.expect("set b");
        store.remove("a").await.expect("remove a");

        let reopened = JsonFileStore::new(&path);
        assert_eq!(reopened.get("a").await, Ok(None));
        assert_eq!(reopened.get("b").await, Ok(Some("2".into())));
    }

    #[tokio::test]
    async fn corrupt_file_is_a_store_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("state.json");
        std::fs::write(&path, "{not json").expect("write");

        let store = JsonFileStore::new(&path);
        assert!(store.get("a").await.is_err());
    }
}
