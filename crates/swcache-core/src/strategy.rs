//! Fetch strategies
//!
//! Each strategy satisfies one request from a partition and/or the network
//! and may leave detached work behind (background refresh, revalidation).
//! Detached work never fails the request that spawned it; its storage
//! failures are logged and broadcast as `CACHE_ERROR`.

use bytes::Bytes;
use chrono::Utc;
use std::sync::Arc;
use swcache_proxy::{FetchRequest, FetchedResponse, Fetcher};
use swcache_storage::{CacheKey, CacheStore, CachedResponse};
use tracing::{debug, info, warn};

use crate::broadcast::{BroadcastMessage, Broadcaster, EventType};
use crate::cache::{EvictionPolicy, stamp};
use crate::classifier::Route;
use crate::config::WorkerConfig;
use crate::error::CoreError;
use crate::resource::{ResourceClass, Strategy};

const IMAGE_PLACEHOLDER_SVG: &str = concat!(
    r##"<svg xmlns="http://www.w3.org/2000/svg" width="320" height="180" viewBox="0 0 320 180">"##,
    r##"<rect width="320" height="180" fill="#1f1f24"/>"##,
    r##"<text x="160" y="96" font-family="sans-serif" font-size="14" fill="#8a8a94" text-anchor="middle">Image unavailable offline</text>"##,
    "</svg>"
);

const OFFLINE_DOCUMENT: &str = concat!(
    "<!DOCTYPE html>",
    r#"<html><head><meta charset="utf-8"><meta name="viewport" content="width=device-width,initial-scale=1">"#,
    "<title>Offline</title></head>",
    "<body><h1>You are offline</h1><p>This page is not available offline. ",
    "Check your connection and reload.</p></body></html>"
);

/// Where a served response came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
    Cache,
    Network,
    /// Synthesized placeholder or offline document
    Fallback,
}

impl ResponseSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseSource::Cache => "cache",
            ResponseSource::Network => "network",
            ResponseSource::Fallback => "fallback",
        }
    }
}

/// A response handed back to the caller
#[derive(Debug, Clone)]
pub struct ServedResponse {
    pub response: CachedResponse,
    pub source: ResponseSource,
}

impl ServedResponse {
    fn new(response: CachedResponse, source: ResponseSource) -> Self {
        Self { response, source }
    }
}

/// Convert a network response into its storable form
pub fn to_cached(response: FetchedResponse) -> CachedResponse {
    let headers = response
        .headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect();

    CachedResponse::new(response.status, headers, response.body)
}

/// Minimal placeholder graphic served for unreachable images
pub fn image_placeholder() -> CachedResponse {
    CachedResponse::new(
        200,
        vec![
            ("content-type".to_string(), "image/svg+xml".to_string()),
            ("cache-control".to_string(), "no-store".to_string()),
        ],
        Bytes::from_static(IMAGE_PLACEHOLDER_SVG.as_bytes()),
    )
}

/// Minimal document served for HTML navigations with no network and no cache
pub fn offline_document() -> CachedResponse {
    CachedResponse::new(
        503,
        vec![
            (
                "content-type".to_string(),
                "text/html; charset=utf-8".to_string(),
            ),
            ("cache-control".to_string(), "no-store".to_string()),
        ],
        Bytes::from_static(OFFLINE_DOCUMENT.as_bytes()),
    )
}

/// Strategy engine
#[derive(Clone)]
pub struct StrategyEngine {
    config: Arc<WorkerConfig>,
    store: Arc<dyn CacheStore>,
    network: Arc<dyn Fetcher>,
    broadcaster: Arc<Broadcaster>,
    eviction: EvictionPolicy,
}

impl StrategyEngine {
    pub fn new(
        config: Arc<WorkerConfig>,
        store: Arc<dyn CacheStore>,
        network: Arc<dyn Fetcher>,
        broadcaster: Arc<Broadcaster>,
    ) -> Self {
        let eviction = EvictionPolicy::new(store.clone(), config.clone());
        Self {
            config,
            store,
            network,
            broadcaster,
            eviction,
        }
    }

    pub fn eviction(&self) -> &EvictionPolicy {
        &self.eviction
    }

    pub fn network(&self) -> &Arc<dyn Fetcher> {
        &self.network
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Serve a request with the strategy its route names
    pub async fn handle(
        &self,
        request: &FetchRequest,
        route: Route,
    ) -> Result<ServedResponse, CoreError> {
        debug!(
            "{} {} -> {} ({})",
            request.method, request.url, route.strategy, route.class
        );

        match route.strategy {
            Strategy::CacheFirst => self.cache_first(request, route.class).await,
            Strategy::NetworkFirst => self.network_first(request).await,
            Strategy::StaleWhileRevalidate => {
                self.stale_while_revalidate(request, route.class).await
            }
        }
    }

    /// Serve from the partition; refresh in the background on a hit
    pub async fn cache_first(
        &self,
        request: &FetchRequest,
        class: ResourceClass,
    ) -> Result<ServedResponse, CoreError> {
        let partition = self.config.partition_name(class);
        let key = CacheKey::get(&request.url);

        if let Some(cached) = self.store.get(&partition, &key).await? {
            metrics::counter!("swcache_cache_hits_total", "strategy" => "cache-first")
                .increment(1);
            debug!("Cache hit for {} in {}", key, partition);
            self.spawn_refresh(request.clone(), class);
            return Ok(ServedResponse::new(cached, ResponseSource::Cache));
        }

        metrics::counter!("swcache_cache_misses_total", "strategy" => "cache-first").increment(1);

        match self.network.fetch(request).await {
            Ok(response) => {
                let response = to_cached(response);
                if self.store_best_effort(class, &key, &response).await {
                    self.broadcaster.broadcast(
                        BroadcastMessage::new(EventType::CacheUpdated, "New content cached")
                            .with_url(key.url())
                            .with_aux(serde_json::json!({ "partition": partition })),
                    );
                }
                Ok(ServedResponse::new(response, ResponseSource::Network))
            }
            Err(e) => {
                metrics::counter!("swcache_network_failures_total").increment(1);
                if class == ResourceClass::Image {
                    debug!("Serving placeholder for {}: {}", key, e);
                    Ok(ServedResponse::new(
                        image_placeholder(),
                        ResponseSource::Fallback,
                    ))
                } else {
                    Err(e.into())
                }
            }
        }
    }

    /// Try the network, fall back to the dynamic partition
    ///
    /// Successful network responses are returned as-is and never written.
    pub async fn network_first(
        &self,
        request: &FetchRequest,
    ) -> Result<ServedResponse, CoreError> {
        let error = match self.network.fetch(request).await {
            Ok(response) => {
                return Ok(ServedResponse::new(
                    to_cached(response),
                    ResponseSource::Network,
                ));
            }
            Err(e) => e,
        };

        metrics::counter!("swcache_network_failures_total").increment(1);
        debug!("Network failed for {}: {}", request.url, error);

        let partition = self.config.partition_name(ResourceClass::DynamicDocument);
        let key = CacheKey::get(&request.url);

        if let Some(cached) = self.store.get(&partition, &key).await? {
            metrics::counter!("swcache_cache_hits_total", "strategy" => "network-first")
                .increment(1);
            info!("Offline fallback for {}", key.url());
            self.broadcaster.broadcast(
                BroadcastMessage::new(
                    EventType::OfflineFallback,
                    "Serving cached content while offline",
                )
                .with_url(key.url()),
            );
            return Ok(ServedResponse::new(cached, ResponseSource::Cache));
        }

        if request.accepts_html() {
            return Ok(ServedResponse::new(
                offline_document(),
                ResponseSource::Fallback,
            ));
        }

        Err(error.into())
    }

    /// Serve the stale entry immediately while revalidating concurrently
    ///
    /// With no stale entry the call waits for the network.
    pub async fn stale_while_revalidate(
        &self,
        request: &FetchRequest,
        class: ResourceClass,
    ) -> Result<ServedResponse, CoreError> {
        let partition = self.config.partition_name(class);
        let key = CacheKey::get(&request.url);

        let stale = self.store.get(&partition, &key).await?;

        let revalidation = {
            let this = self.clone();
            let request = request.clone();
            let stale = stale.clone();
            tokio::spawn(async move { this.revalidate(request, class, stale).await })
        };

        if let Some(stale) = stale {
            metrics::counter!("swcache_cache_hits_total", "strategy" => "stale-while-revalidate")
                .increment(1);
            return Ok(ServedResponse::new(stale, ResponseSource::Cache));
        }

        metrics::counter!("swcache_cache_misses_total", "strategy" => "stale-while-revalidate")
            .increment(1);

        match revalidation.await {
            Ok(result) => {
                result
                    .map(|response| ServedResponse::new(response, ResponseSource::Network))
            }
            Err(e) => Err(CoreError::Task(e.to_string())),
        }
    }

    /// Network leg of stale-while-revalidate
    ///
    /// Resolves to the fresh response, or to the stale one when the network
    /// fails and a stale entry existed.
    async fn revalidate(
        &self,
        request: FetchRequest,
        class: ResourceClass,
        stale: Option<CachedResponse>,
    ) -> Result<CachedResponse, CoreError> {
        let key = CacheKey::get(&request.url);

        let fresh = match self.network.fetch(&request).await {
            Ok(response) => to_cached(response),
            Err(e) => {
                metrics::counter!("swcache_network_failures_total").increment(1);
                warn!("Revalidation of {} failed: {}", key.url(), e);
                self.broadcaster.broadcast(
                    BroadcastMessage::new(
                        EventType::CacheError,
                        format!("Revalidation failed: {}", e),
                    )
                    .with_url(key.url()),
                );
                return match stale {
                    Some(stale) => Ok(stale),
                    None => Err(e.into()),
                };
            }
        };

        if self.store_best_effort(class, &key, &fresh).await {
            match &stale {
                None => {
                    self.broadcaster.broadcast(
                        BroadcastMessage::new(EventType::CacheUpdated, "New content cached")
                            .with_url(key.url()),
                    );
                }
                Some(previous) if previous.body != fresh.body => {
                    info!("Content changed for {}", key.url());
                    self.broadcaster.broadcast(
                        BroadcastMessage::new(EventType::ContentUpdated, "Content updated")
                            .with_url(key.url())
                            .with_aux(serde_json::json!({
                                "previousSize": previous.body.len(),
                                "size": fresh.body.len(),
                            })),
                    );
                }
                Some(_) => debug!("Content unchanged for {}", key.url()),
            }
        }

        Ok(fresh)
    }

    fn spawn_refresh(&self, request: FetchRequest, class: ResourceClass) {
        let this = self.clone();
        tokio::spawn(async move {
            let key = CacheKey::get(&request.url);
            match this.network.fetch(&request).await {
                Ok(response) => {
                    let response = to_cached(response);
                    if this.store_best_effort(class, &key, &response).await {
                        this.broadcaster.broadcast(
                            BroadcastMessage::new(EventType::CacheUpdated, "Cache refreshed")
                                .with_url(key.url())
                                .with_aux(serde_json::json!({ "silent": true })),
                        );
                    }
                }
                Err(e) => warn!("Background refresh of {} failed: {}", key.url(), e),
            }
        });
    }

    /// Stamp and store an entry, then enforce the partition limit
    pub async fn store_entry(
        &self,
        class: ResourceClass,
        key: &CacheKey,
        response: &CachedResponse,
    ) -> Result<(), CoreError> {
        let partition = self.config.partition_name(class);
        self.store
            .put(&partition, key, stamp(response.clone(), Utc::now()))
            .await?;

        if let Err(e) = self.eviction.enforce(class).await {
            self.report_cache_error(&partition, key, &e);
        }
        Ok(())
    }

    /// Store an entry, reporting failures instead of returning them
    async fn store_best_effort(
        &self,
        class: ResourceClass,
        key: &CacheKey,
        response: &CachedResponse,
    ) -> bool {
        match self.store_entry(class, key, response).await {
            Ok(()) => true,
            Err(e) => {
                self.report_cache_error(&self.config.partition_name(class), key, &e);
                false
            }
        }
    }

    pub(crate) fn report_cache_error(&self, partition: &str, key: &CacheKey, error: &CoreError) {
        warn!("Cache operation on {} in {} failed: {}", key, partition, error);
        self.broadcaster.broadcast(
            BroadcastMessage::new(
                EventType::CacheError,
                format!("Cache operation failed: {}", error),
            )
            .with_url(key.url())
            .with_aux(serde_json::json!({ "partition": partition })),
        );
    }
}
