//! swcache storage layer
//!
//! This crate provides the named cache partitions that back the
//! request interception layer, with in-memory and on-disk backends.

pub mod backend;
pub mod disk;
pub mod error;
pub mod memory;

pub use backend::{CACHED_AT_HEADER, CacheKey, CacheStore, CachedResponse};
pub use disk::DiskStore;
pub use error::StorageError;
pub use memory::MemoryStore;
