//! Test doubles shared by the unit tests of this crate

use async_trait::async_trait;
use bytes::Bytes;
use http::header::{CONTENT_TYPE, HeaderMap, HeaderValue};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use swcache_proxy::{FetchRequest, FetchedResponse, Fetcher, ProxyError};
use swcache_storage::{CacheKey, CacheStore, CachedResponse, MemoryStore, StorageError};
use tokio::sync::Notify;

use crate::lifecycle::RuntimeHooks;

#[derive(Clone)]
pub enum Reply {
    Respond(FetchedResponse),
    /// Never completes
    Hang,
    /// Completes once the gate is notified
    Gated(Arc<Notify>, FetchedResponse),
}

pub fn ok(content_type: &'static str, body: &'static str) -> FetchedResponse {
    status(200, content_type, body)
}

pub fn status(code: u16, content_type: &'static str, body: &'static str) -> FetchedResponse {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    FetchedResponse {
        status: code,
        headers,
        body: Bytes::from_static(body.as_bytes()),
    }
}

/// Scripted network; unknown URLs fail as if offline
#[derive(Default)]
pub struct MockFetcher {
    replies: Mutex<HashMap<String, Reply>>,
    reloads: AtomicUsize,
}

impl MockFetcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn reply(&self, url: &str, reply: Reply) {
        self.replies.lock().insert(url.to_string(), reply);
    }

    pub fn respond(&self, url: &str, response: FetchedResponse) {
        self.reply(url, Reply::Respond(response));
    }

    pub fn offline(&self, url: &str) {
        self.replies.lock().remove(url);
    }

    pub fn reloads(&self) -> usize {
        self.reloads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Fetcher for MockFetcher {
    async fn send(&self, request: &FetchRequest) -> Result<FetchedResponse, ProxyError> {
        let url = request.url.to_string();
        if request.reload {
            self.reloads.fetch_add(1, Ordering::SeqCst);
        }

        let reply = self.replies.lock().get(&url).cloned();
        match reply {
            Some(Reply::Respond(response)) => Ok(response),
            Some(Reply::Hang) => futures::future::pending().await,
            Some(Reply::Gated(gate, response)) => {
                gate.notified().await;
                Ok(response)
            }
            None => Err(ProxyError::Unavailable(url)),
        }
    }
}

/// Memory store whose reads, writes or listings can be made to fail
#[derive(Default)]
pub struct FailingStore {
    inner: MemoryStore,
    pub fail_get: AtomicBool,
    pub fail_put: AtomicBool,
    pub fail_keys: AtomicBool,
}

impl FailingStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn check(flag: &AtomicBool) -> Result<(), StorageError> {
        if flag.load(Ordering::SeqCst) {
            Err(StorageError::Backend("disk full".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl CacheStore for FailingStore {
    async fn partitions(&self) -> Result<Vec<String>, StorageError> {
        self.inner.partitions().await
    }

    async fn open(&self, partition: &str) -> Result<(), StorageError> {
        self.inner.open(partition).await
    }

    async fn delete_partition(&self, partition: &str) -> Result<bool, StorageError> {
        self.inner.delete_partition(partition).await
    }

    async fn get(
        &self,
        partition: &str,
        key: &CacheKey,
    ) -> Result<Option<CachedResponse>, StorageError> {
        Self::check(&self.fail_get)?;
        self.inner.get(partition, key).await
    }

    async fn put(
        &self,
        partition: &str,
        key: &CacheKey,
        response: CachedResponse,
    ) -> Result<(), StorageError> {
        Self::check(&self.fail_put)?;
        self.inner.put(partition, key, response).await
    }

    async fn delete(&self, partition: &str, key: &CacheKey) -> Result<bool, StorageError> {
        self.inner.delete(partition, key).await
    }

    async fn keys(&self, partition: &str) -> Result<Vec<CacheKey>, StorageError> {
        Self::check(&self.fail_keys)?;
        self.inner.keys(partition).await
    }
}

/// Hooks recording what the runtime was asked to do
#[derive(Default)]
pub struct RecordingHooks {
    pub skipped: AtomicBool,
    pub claimed: AtomicBool,
}

impl RuntimeHooks for RecordingHooks {
    fn skip_waiting(&self) {
        self.skipped.store(true, Ordering::SeqCst);
    }

    fn claim_clients(&self) -> usize {
        self.claimed.store(true, Ordering::SeqCst);
        0
    }
}

/// Let detached tasks run until they park
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}
