//! Volatile in-memory store
//!
//! Used for tests and for running the service without a data directory.
//! `set_unavailable` makes every call fail, which lets callers exercise
//! their commit-failure paths.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::RwLock;

use crate::storage::error::{StoreError, StoreResult};
use crate::storage::store::{StateStore, Transaction, WriteOp};

type OrderedMap = BTreeMap<Vec<u8>, Vec<u8>>;

/// In-memory [`StateStore`]
#[derive(Default)]
pub struct MemoryStore {
    maps: RwLock<HashMap<String, OrderedMap>>,
    unavailable: AtomicBool,
    commits: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail with [`StoreError::Unavailable`]
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of successful commits so far
    pub fn commit_count(&self) -> u64 {
        self.commits.load(Ordering::Relaxed)
    }

    fn check_available(&self) -> StoreResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn open_map(&self, name: &str) -> StoreResult<()> {
        self.check_available()?;
        self.maps
            .write()
            .await
            .entry(name.to_string())
            .or_default();
        Ok(())
    }

    async fn remove_map(&self, name: &str) -> StoreResult<bool> {
        self.check_available()?;
        Ok(self.maps.write().await.remove(name).is_some())
    }

    async fn map_names(&self) -> StoreResult<Vec<String>> {
        self.check_available()?;
        let mut names: Vec<String> = self.maps.read().await.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn get(&self, map: &str, key: &[u8]) -> StoreResult<Option<Vec<u8>>> {
        self.check_available()?;
        let maps = self.maps.read().await;
        let entries = maps
            .get(map)
            .ok_or_else(|| StoreError::MapNotFound(map.to_string()))?;
        Ok(entries.get(key).cloned())
    }

    async fn count(&self, map: &str) -> StoreResult<usize> {
        self.check_available()?;
        let maps = self.maps.read().await;
        maps.get(map)
            .map(|entries| entries.len())
            .ok_or_else(|| StoreError::MapNotFound(map.to_string()))
    }

    async fn scan(&self, map: &str) -> StoreResult<Vec<(Vec<u8>, Vec<u8>)>> {
        self.check_available()?;
        let maps = self.maps.read().await;
        let entries = maps
            .get(map)
            .ok_or_else(|| StoreError::MapNotFound(map.to_string()))?;
        Ok(entries
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    async fn commit(&self, tx: Transaction) -> StoreResult<()> {
        self.check_available()?;
        let mut maps = self.maps.write().await;

        // Validate before touching anything so a bad transaction applies nothing
        if let Some(op) = tx.ops().iter().find(|op| !maps.contains_key(op.map())) {
            return Err(StoreError::MapNotFound(op.map().to_string()));
        }

        for op in tx.into_ops() {
            match op {
                WriteOp::Set { map, key, value } => {
                    if let Some(entries) = maps.get_mut(&map) {
                        entries.insert(key, value);
                    }
                }
                WriteOp::Remove { map, key } => {
                    if let Some(entries) = maps.get_mut(&map) {
                        entries.remove(&key);
                    }
                }
            }
        }

        self.commits.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_commit_and_scan_in_key_order() {
        let store = MemoryStore::new();
        store.open_map("events").await.unwrap();

        let mut tx = store.begin();
        tx.set("events", vec![0, 0, 0, 2], b"two".to_vec());
        tx.set("events", vec![0, 0, 0, 1], b"one".to_vec());
        store.commit(tx).await.unwrap();

        let entries = store.scan("events").await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].1, b"one".to_vec());
        assert_eq!(entries[1].1, b"two".to_vec());
        assert_eq!(store.count("events").await.unwrap(), 2);
        assert_eq!(store.commit_count(), 1);
    }

    #[tokio::test]
    async fn test_commit_to_missing_map_applies_nothing() {
        let store = MemoryStore::new();
        store.open_map("events").await.unwrap();

        let mut tx = store.begin();
        tx.set("events", b"k".to_vec(), b"v".to_vec());
        tx.set("missing", b"k".to_vec(), b"v".to_vec());

        let result = store.commit(tx).await;
        assert!(matches!(result, Err(StoreError::MapNotFound(_))));
        assert_eq!(store.count("events").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unavailable_store_fails_every_call() {
        let store = MemoryStore::new();
        store.open_map("events").await.unwrap();
        store.set_unavailable(true);

        assert!(matches!(
            store.get("events", b"k").await,
            Err(StoreError::Unavailable(_))
        ));
        assert!(store.commit(Transaction::new()).await.is_err());

        store.set_unavailable(false);
        assert!(store.get("events", b"k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_remove_map() {
        let store = MemoryStore::new();
        store.open_map("a").await.unwrap();
        store.open_map("b").await.unwrap();

        assert!(store.remove_map("a").await.unwrap());
        assert!(!store.remove_map("a").await.unwrap());
        assert_eq!(store.map_names().await.unwrap(), vec!["b".to_string()]);
    }
}
