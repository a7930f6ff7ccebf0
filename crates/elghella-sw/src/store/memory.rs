//! In-process cache store.

use async_trait::async_trait;
use hashbrown::HashMap;
use tokio::sync::RwLock;

use super::{CacheStore, RequestKey, StoredResponse};
use crate::StoreError;

/// One partition's entries.
#[derive(Debug, Default)]
struct Cache {
    entries: HashMap<RequestKey, StoredResponse>,
}

/// Cache store held entirely in memory. Contents vanish with the process.
#[derive(Debug, Default)]
pub struct MemoryCacheStore {
    caches: RwLock<HashMap<String, Cache>>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of entries across partitions.
    pub async fn len(&self) -> usize {
        self.caches
            .read()
            .await
            .values()
            .map(|c| c.entries.len())
            .sum()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn open(&self, partition: &str) -> Result<(), StoreError> {
        self.caches
            .write()
            .await
            .entry(partition.to_string())
            .or_default();
        Ok(())
    }

    async fn has(&self, partition: &str) -> Result<bool, StoreError> {
        Ok(self.caches.read().await.contains_key(partition))
    }

    async fn match_request(
        &self,
        partition: &str,
        key: &RequestKey,
    ) -> Result<Option<StoredResponse>, StoreError> {
        Ok(self
            .caches
            .read()
            .await
            .get(partition)
            .and_then(|c| c.entries.get(key))
            .cloned())
    }

    async fn put(
        &self,
        partition: &str,
        key: RequestKey,
        response: StoredResponse,
    ) -> Result<(), StoreError> {
        self.caches
            .write()
            .await
            .entry(partition.to_string())
            .or_default()
            .entries
            .insert(key, response);
        Ok(())
    }

    async fn put_all(
        &self,
        partition: &str,
        entries: Vec<(RequestKey, StoredResponse)>,
    ) -> Result<(), StoreError> {
        // Single write guard: readers see all of the entries or none.
        let mut caches = self.caches.write().await;
        let cache = caches.entry(partition.to_string()).or_default();
        cache.entries.extend(entries);
        Ok(())
    }

    async fn delete(&self, partition: &str, key: &RequestKey) -> Result<bool, StoreError> {
        Ok(self
            .caches
            .write()
            .await
            .get_mut(partition)
            .map(|c| c.entries.remove(key).is_some())
            .unwrap_or(false))
    }

    async fn keys(&self, partition: &str) -> Result<Vec<RequestKey>, StoreError> {
        let mut keys: Vec<RequestKey> = self
            .caches
            .read()
            .await
            .get(partition)
            .map(|c| c.entries.keys().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        Ok(keys)
    }

    async fn partition_names(&self) -> Result<Vec<String>, StoreError> {
        let mut names: Vec<String> = self.caches.read().await.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn delete_partition(&self, name: &str) -> Result<bool, StoreError> {
        Ok(self.caches.write().await.remove(name).is_some())
    }
}
