//! Cache store trait and entry types

use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use url::Url;

use crate::error::StorageError;

/// Header stamped on every stored response with the capture time (RFC 3339, UTC)
pub const CACHED_AT_HEADER: &str = "sw-cached-at";

/// Normalized request identity used to address an entry
///
/// Only GET requests are ever cached, so the identity is the method plus
/// the absolute URL with any fragment removed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    url: String,
}

impl CacheKey {
    /// Key for a GET request to `url`
    pub fn get(url: &Url) -> Self {
        let mut url = url.clone();
        url.set_fragment(None);
        Self {
            url: url.to_string(),
        }
    }

    /// Rebuild a key from its stored URL form
    pub fn from_stored(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    /// The request method this key was derived from
    pub fn method(&self) -> &'static str {
        "GET"
    }

    /// The request URL
    pub fn url(&self) -> &str {
        &self.url
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method(), self.url)
    }
}

/// A captured response as held in a partition
///
/// Entries are never patched: replacing one means storing a whole new value.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl CachedResponse {
    pub fn new(status: u16, headers: Vec<(String, String)>, body: Bytes) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    /// Case-insensitive header lookup
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Return a copy with `name` set to `value`, replacing any existing value
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
        self.headers.push((name.to_string(), value.into()));
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Cache store trait
///
/// A store holds any number of named partitions. Each partition maps
/// [`CacheKey`]s to [`CachedResponse`]s and remembers insertion order.
/// Every method is atomic for the single key or partition it touches;
/// nothing stronger is promised across calls.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Names of all existing partitions
    async fn partitions(&self) -> Result<Vec<String>, StorageError>;

    /// Create a partition if it does not exist yet
    async fn open(&self, partition: &str) -> Result<(), StorageError>;

    /// Delete a partition and all its entries, returns whether it existed
    async fn delete_partition(&self, partition: &str) -> Result<bool, StorageError>;

    /// Look up an entry; a missing partition reads as empty
    async fn get(
        &self,
        partition: &str,
        key: &CacheKey,
    ) -> Result<Option<CachedResponse>, StorageError>;

    /// Store an entry, creating the partition if needed
    ///
    /// Replacing an existing key moves it to the newest position.
    async fn put(
        &self,
        partition: &str,
        key: &CacheKey,
        response: CachedResponse,
    ) -> Result<(), StorageError>;

    /// Delete an entry, returns whether it existed
    async fn delete(&self, partition: &str, key: &CacheKey) -> Result<bool, StorageError>;

    /// Keys of a partition, oldest insertion first
    async fn keys(&self, partition: &str) -> Result<Vec<CacheKey>, StorageError>;
}

/// Validate a partition name before it is used as a path component
pub fn validate_partition_name(name: &str) -> Result<(), StorageError> {
    let valid = !name.is_empty()
        && name != "."
        && name != ".."
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));

    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidPartition(name.to_string()))
    }
}

/// File name used for an entry on disk
pub fn entry_file_stem(key: &CacheKey) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(key.to_string().as_bytes());
    hex::encode(hasher.finalize())
}
