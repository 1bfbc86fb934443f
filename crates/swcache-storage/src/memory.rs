//! In-memory cache store

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};

use crate::backend::{CacheKey, CacheStore, CachedResponse};
use crate::error::StorageError;

#[derive(Default)]
struct Partition {
    order: Vec<CacheKey>,
    entries: HashMap<CacheKey, CachedResponse>,
}

/// Cache store kept entirely in process memory
///
/// Used when no cache directory is configured, and by tests.
#[derive(Default)]
pub struct MemoryStore {
    partitions: RwLock<BTreeMap<String, Partition>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn partitions(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.partitions.read().keys().cloned().collect())
    }

    async fn open(&self, partition: &str) -> Result<(), StorageError> {
        self.partitions
            .write()
            .entry(partition.to_string())
            .or_default();
        Ok(())
    }

    async fn delete_partition(&self, partition: &str) -> Result<bool, StorageError> {
        Ok(self.partitions.write().remove(partition).is_some())
    }

    async fn get(
        &self,
        partition: &str,
        key: &CacheKey,
    ) -> Result<Option<CachedResponse>, StorageError> {
        Ok(self
            .partitions
            .read()
            .get(partition)
            .and_then(|p| p.entries.get(key).cloned()))
    }

    async fn put(
        &self,
        partition: &str,
        key: &CacheKey,
        response: CachedResponse,
    ) -> Result<(), StorageError> {
        let mut partitions = self.partitions.write();
        let p = partitions.entry(partition.to_string()).or_default();

        if p.entries.insert(key.clone(), response).is_some() {
            p.order.retain(|k| k != key);
        }
        p.order.push(key.clone());
        Ok(())
    }

    async fn delete(&self, partition: &str, key: &CacheKey) -> Result<bool, StorageError> {
        let mut partitions = self.partitions.write();
        let Some(p) = partitions.get_mut(partition) else {
            return Ok(false);
        };

        if p.entries.remove(key).is_some() {
            p.order.retain(|k| k != key);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn keys(&self, partition: &str) -> Result<Vec<CacheKey>, StorageError> {
        Ok(self
            .partitions
            .read()
            .get(partition)
            .map(|p| p.order.clone())
            .unwrap_or_default())
    }
}
