//! On-disk cache store

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::backend::{
    CacheKey, CacheStore, CachedResponse, entry_file_stem, validate_partition_name,
};
use crate::error::StorageError;

const INDEX_FILE: &str = "index.json";
const ENTRIES_DIR: &str = "entries";

/// Response metadata, stored on the first line of an entry file
#[derive(Debug, Serialize, Deserialize)]
struct EntryMeta {
    url: String,
    status: u16,
    headers: Vec<(String, String)>,
}

/// Disk-backed cache store
///
/// Layout:
/// `<base_path>/<partition>/index.json` holds the keys in insertion order,
/// `<base_path>/<partition>/entries/<sha256 of key>.entry` holds each entry as
/// one line of JSON metadata followed by the raw body. Entries are replaced
/// with a single rename, so readers see either the old or the new entry.
pub struct DiskStore {
    base_path: PathBuf,
    /// Serializes read-modify-write cycles on index files
    index_lock: Mutex<()>,
}

impl DiskStore {
    /// Create a new disk store rooted at `base_path`
    pub async fn new(base_path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let base_path = base_path.as_ref().to_path_buf();
        fs::create_dir_all(&base_path).await?;

        info!("Initialized disk cache store at {:?}", base_path);

        Ok(Self {
            base_path,
            index_lock: Mutex::new(()),
        })
    }

    fn partition_path(&self, partition: &str) -> Result<PathBuf, StorageError> {
        validate_partition_name(partition)?;
        Ok(self.base_path.join(partition))
    }

    fn entry_path(&self, partition: &str, key: &CacheKey) -> Result<PathBuf, StorageError> {
        let dir = self.partition_path(partition)?.join(ENTRIES_DIR);
        Ok(dir.join(format!("{}.entry", entry_file_stem(key))))
    }

    async fn read_index(&self, partition: &str) -> Result<Vec<String>, StorageError> {
        let path = self.partition_path(partition)?.join(INDEX_FILE);
        match fs::read(&path).await {
            Ok(data) => Ok(serde_json::from_slice(&data)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    async fn write_index(&self, partition: &str, index: &[String]) -> Result<(), StorageError> {
        let path = self.partition_path(partition)?.join(INDEX_FILE);
        write_atomic(&path, &serde_json::to_vec(index)?).await
    }
}

fn encode_entry(key: &CacheKey, response: CachedResponse) -> Result<Vec<u8>, StorageError> {
    let meta = EntryMeta {
        url: key.url().to_string(),
        status: response.status,
        headers: response.headers,
    };

    let mut data = serde_json::to_vec(&meta)?;
    data.push(b'\n');
    data.extend_from_slice(&response.body);
    Ok(data)
}

fn decode_entry(key: &CacheKey, data: Vec<u8>) -> Result<CachedResponse, StorageError> {
    let split = data
        .iter()
        .position(|b| *b == b'\n')
        .ok_or_else(|| StorageError::Backend(format!("corrupt entry for {}", key)))?;

    let meta: EntryMeta = serde_json::from_slice(&data[..split])?;
    let body = Bytes::from(data).slice(split + 1..);
    Ok(CachedResponse::new(meta.status, meta.headers, body))
}

/// Write a file through a temp file and rename
async fn write_atomic(path: &Path, data: &[u8]) -> Result<(), StorageError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let temp_path = path.with_extension("tmp");
    fs::write(&temp_path, data).await?;
    fs::rename(&temp_path, path).await?;
    Ok(())
}

async fn remove_if_exists(path: &Path) -> Result<bool, StorageError> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(StorageError::Io(e)),
    }
}

#[async_trait]
impl CacheStore for DiskStore {
    async fn partitions(&self) -> Result<Vec<String>, StorageError> {
        let mut names = Vec::new();
        let mut dir = fs::read_dir(&self.base_path).await?;

        while let Some(entry) = dir.next_entry().await? {
            if entry.file_type().await?.is_dir()
                && let Some(name) = entry.file_name().to_str()
            {
                names.push(name.to_string());
            }
        }

        names.sort();
        Ok(names)
    }

    async fn open(&self, partition: &str) -> Result<(), StorageError> {
        let path = self.partition_path(partition)?;
        fs::create_dir_all(path.join(ENTRIES_DIR)).await?;
        Ok(())
    }

    async fn delete_partition(&self, partition: &str) -> Result<bool, StorageError> {
        let path = self.partition_path(partition)?;
        let _guard = self.index_lock.lock().await;
        debug!("Deleting partition at {:?}", path);

        match fs::remove_dir_all(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    async fn get(
        &self,
        partition: &str,
        key: &CacheKey,
    ) -> Result<Option<CachedResponse>, StorageError> {
        let path = self.entry_path(partition, key)?;

        let data = match fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StorageError::Io(e)),
        };

        decode_entry(key, data).map(Some)
    }

    async fn put(
        &self,
        partition: &str,
        key: &CacheKey,
        response: CachedResponse,
    ) -> Result<(), StorageError> {
        let path = self.entry_path(partition, key)?;
        debug!("Writing entry {} to {:?}", key, path);

        let data = encode_entry(key, response)?;

        let _guard = self.index_lock.lock().await;
        write_atomic(&path, &data).await?;

        let mut index = self.read_index(partition).await?;
        index.retain(|url| url != key.url());
        index.push(key.url().to_string());
        self.write_index(partition, &index).await
    }

    async fn delete(&self, partition: &str, key: &CacheKey) -> Result<bool, StorageError> {
        let path = self.entry_path(partition, key)?;
        let _guard = self.index_lock.lock().await;

        let existed = remove_if_exists(&path).await?;

        let mut index = self.read_index(partition).await?;
        let before = index.len();
        index.retain(|url| url != key.url());
        if index.len() != before {
            self.write_index(partition, &index).await?;
        }

        Ok(existed)
    }

    async fn keys(&self, partition: &str) -> Result<Vec<CacheKey>, StorageError> {
        Ok(self
            .read_index(partition)
            .await?
            .into_iter()
            .map(CacheKey::from_stored)
            .collect())
    }
}
