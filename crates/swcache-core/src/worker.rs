//! Worker entry points
//!
//! The host runtime talks to the interception layer only through
//! [`Worker`]: `install`, `activate`, `fetch`, `message` and `tick`.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use http::Method;
use std::sync::Arc;
use swcache_proxy::{FetchRequest, Fetcher, ProxyError};
use swcache_storage::{CacheKey, CacheStore};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::broadcast::{BroadcastMessage, Broadcaster, EventType};
use crate::cache::SweepReport;
use crate::classifier::{Classifier, Route, prefetch_class};
use crate::config::WorkerConfig;
use crate::error::CoreError;
use crate::lifecycle::{BroadcasterHooks, LifecycleManager, RuntimeHooks, WorkerState};
use crate::message::{ControlMessage, MessageReply, PartitionInfo, PrefetchSummary};
use crate::strategy::{ServedResponse, StrategyEngine, to_cached};

/// Number of entry URLs listed per partition in cache info replies
const CACHE_INFO_SAMPLE: usize = 5;

/// Result of offering a request to the worker
#[derive(Debug)]
pub enum FetchOutcome {
    /// Not intercepted; the host sends it to the network untouched
    Passthrough,
    /// Intercepted and answered (or failed) by a strategy
    Responded(Result<ServedResponse, CoreError>),
}

/// The request interception layer
pub struct Worker {
    config: Arc<WorkerConfig>,
    classifier: Classifier,
    store: Arc<dyn CacheStore>,
    engine: StrategyEngine,
    lifecycle: LifecycleManager,
    broadcaster: Arc<Broadcaster>,
}

impl Worker {
    /// Create a worker whose page contexts are broadcaster subscribers
    pub fn new(
        config: WorkerConfig,
        store: Arc<dyn CacheStore>,
        network: Arc<dyn Fetcher>,
    ) -> Self {
        let broadcaster = Arc::new(Broadcaster::new());
        let hooks = Arc::new(BroadcasterHooks::new(broadcaster.clone()));
        Self::with_hooks(config, store, network, broadcaster, hooks)
    }

    /// Create a worker with explicit runtime hooks
    pub fn with_hooks(
        config: WorkerConfig,
        store: Arc<dyn CacheStore>,
        network: Arc<dyn Fetcher>,
        broadcaster: Arc<Broadcaster>,
        hooks: Arc<dyn RuntimeHooks>,
    ) -> Self {
        let config = Arc::new(config);
        let classifier = Classifier::new(&config);

        info!(
            "Initializing worker {} (prefix: {}, rules: {:?})",
            config.version,
            config.cache_prefix,
            classifier.rule_names()
        );

        let engine = StrategyEngine::new(
            config.clone(),
            store.clone(),
            network.clone(),
            broadcaster.clone(),
        );
        let lifecycle = LifecycleManager::new(
            config.clone(),
            store.clone(),
            network,
            broadcaster.clone(),
            hooks,
        );

        Self {
            config,
            classifier,
            store,
            engine,
            lifecycle,
            broadcaster,
        }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn broadcaster(&self) -> &Arc<Broadcaster> {
        &self.broadcaster
    }

    pub fn state(&self) -> WorkerState {
        self.lifecycle.state()
    }

    /// Classify a request without serving it
    pub fn route(&self, request: &FetchRequest) -> Route {
        self.classifier.classify(&request.url)
    }

    /// Install hook: precache the static manifest
    pub async fn install(&self) -> Result<usize, CoreError> {
        self.lifecycle.install().await
    }

    /// Activate hook: drop stale partitions and claim pages
    pub async fn activate(&self) -> Result<Vec<String>, CoreError> {
        self.lifecycle.activate().await
    }

    /// Fetch hook
    ///
    /// Only GET requests over http(s) reaching an active worker are
    /// intercepted; everything else passes through.
    pub async fn fetch(&self, request: &FetchRequest) -> FetchOutcome {
        if request.method != Method::GET || !request.is_http() {
            return FetchOutcome::Passthrough;
        }

        if !self.state().can_intercept_fetch() {
            debug!("Worker is {}, passing {} through", self.state(), request.url);
            return FetchOutcome::Passthrough;
        }

        let route = self.route(request);
        FetchOutcome::Responded(self.engine.handle(request, route).await)
    }

    /// Message hook
    ///
    /// `reply` receives the answer for messages that have one.
    pub async fn message(
        &self,
        message: ControlMessage,
        reply: Option<oneshot::Sender<MessageReply>>,
    ) -> Result<(), CoreError> {
        info!("Handling control message {}", message.kind());

        match message {
            ControlMessage::ForceUpdate => {
                let deleted = self.delete_all_partitions().await?;
                self.broadcaster.broadcast(
                    BroadcastMessage::new(EventType::SwUpdated, "Worker updated, reload to apply")
                        .with_aux(serde_json::json!({ "deletedPartitions": deleted })),
                );
                self.lifecycle.hooks().skip_waiting();
            }
            ControlMessage::ClearCache { cache_name } => {
                let cleared = match cache_name {
                    Some(name) => {
                        if self.store.delete_partition(&name).await? {
                            vec![name]
                        } else {
                            warn!("Asked to clear missing partition {}", name);
                            vec![]
                        }
                    }
                    None => self.delete_all_partitions().await?,
                };
                self.broadcaster.broadcast(
                    BroadcastMessage::new(EventType::CacheUpdated, "Cache cleared")
                        .with_aux(serde_json::json!({ "cleared": cleared })),
                );
            }
            ControlMessage::GetCacheInfo => {
                let info = self.cache_info().await?;
                if let Some(reply) = reply
                    && reply.send(MessageReply::CacheInfo(info)).is_err()
                {
                    debug!("Cache info requester went away");
                }
            }
            ControlMessage::PrefetchResources { urls } => {
                let engine = self.engine.clone();
                let broadcaster = self.broadcaster.clone();
                let origin = self.config.origin.clone();
                tokio::spawn(async move {
                    prefetch_urls(&engine, &broadcaster, &origin, urls).await;
                });
            }
        }

        Ok(())
    }

    /// Timer hook: sweep entries past the retention window
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<SweepReport, CoreError> {
        match self.engine.eviction().sweep(now).await {
            Ok(report) => {
                if report.failed > 0 {
                    self.broadcaster.broadcast(
                        BroadcastMessage::new(
                            EventType::CacheError,
                            "Cache cleanup partially failed",
                        )
                        .with_aux(serde_json::json!({ "failed": report.failed })),
                    );
                }
                Ok(report)
            }
            Err(e) => {
                warn!("Cache sweep failed: {}", e);
                self.broadcaster.broadcast(BroadcastMessage::new(
                    EventType::CacheError,
                    format!("Cache cleanup failed: {}", e),
                ));
                Err(e)
            }
        }
    }

    /// Prefetch URLs and wait for the result
    pub async fn prefetch(&self, urls: Vec<String>) -> PrefetchSummary {
        prefetch_urls(&self.engine, &self.broadcaster, &self.config.origin, urls)
            .await
    }

    /// Per-partition entry counts with a sample of URLs
    pub async fn cache_info(&self) -> Result<Vec<PartitionInfo>, CoreError> {
        let mut info = Vec::new();

        for name in self.store.partitions().await? {
            let keys = self.store.keys(&name).await?;
            info.push(PartitionInfo {
                count: keys.len(),
                urls: keys
                    .iter()
                    .take(CACHE_INFO_SAMPLE)
                    .map(|k| k.url().to_string())
                    .collect(),
                name,
            });
        }

        Ok(info)
    }

    async fn delete_all_partitions(&self) -> Result<Vec<String>, CoreError> {
        let mut deleted = Vec::new();
        for name in self.store.partitions().await? {
            if self.store.delete_partition(&name).await? {
                deleted.push(name);
            }
        }
        info!("Deleted {} partitions", deleted.len());
        Ok(deleted)
    }
}

async fn prefetch_urls(
    engine: &StrategyEngine,
    broadcaster: &Broadcaster,
    origin: &url::Url,
    urls: Vec<String>,
) -> PrefetchSummary {
    let requested = urls.len();

    let results = join_all(urls.into_iter().map(|raw| async move {
        let url = origin
            .join(&raw)
            .map_err(|e| ProxyError::InvalidUrl(format!("{}: {}", raw, e)))?;
        let request = FetchRequest::get(url);
        let response = engine.network().fetch(&request).await?;

        let class = prefetch_class(&request.url);
        let key = CacheKey::get(&request.url);
        if let Err(e) = engine.store_entry(class, &key, &to_cached(response)).await {
            engine.report_cache_error(&engine.config().partition_name(class), &key, &e);
            return Err(e);
        }
        debug!("Prefetched {} into {}", key.url(), class);
        Ok::<(), CoreError>(())
    }))
    .await;

    let failed = results.iter().filter(|r| r.is_err()).count();
    for error in results.iter().filter_map(|r| r.as_ref().err()) {
        warn!("Prefetch failed: {}", error);
    }

    let summary = PrefetchSummary {
        requested,
        cached: requested - failed,
        failed,
    };

    info!(
        "Prefetch complete: {} of {} cached",
        summary.cached, summary.requested
    );
    broadcaster.broadcast(
        BroadcastMessage::new(
            EventType::CacheUpdated,
            format!("Prefetched {} of {} resources", summary.cached, summary.requested),
        )
        .with_aux(serde_json::json!(summary)),
    );

    summary
}

/// Longest accepted sweep interval, one year
const MAX_SWEEP_INTERVAL_MINUTES: u64 = 365 * 24 * 60;

/// Sweep period for a configured interval, between one minute and one year
fn sweep_period(interval_minutes: u64) -> std::time::Duration {
    let minutes = interval_minutes.clamp(1, MAX_SWEEP_INTERVAL_MINUTES);
    std::time::Duration::from_secs(minutes.saturating_mul(60))
}

/// Spawn a background task that runs the age sweep periodically
pub fn spawn_sweep_task(worker: Arc<Worker>, interval_minutes: u64) -> tokio::task::JoinHandle<()> {
    use tokio::time::interval;

    info!(
        "Starting background cache sweep task (interval: {} minutes)",
        interval_minutes
    );

    tokio::spawn(async move {
        let mut ticker = interval(sweep_period(interval_minutes));

        // Skip the first tick (which fires immediately)
        ticker.tick().await;

        loop {
            ticker.tick().await;
            if !worker.state().can_intercept_fetch() {
                continue;
            }

            match worker.tick(Utc::now()).await {
                Ok(report) if report.removed > 0 => {
                    info!("Scheduled sweep removed {} entries", report.removed);
                }
                Ok(_) => {}
                Err(e) => warn!("Error during scheduled sweep: {}", e),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::ResourceClass;
    use crate::testing::{FailingStore, MockFetcher, RecordingHooks, Reply, ok, settle};
    use bytes::Bytes;
    use chrono::Duration;
    use std::sync::atomic::Ordering;
    use swcache_storage::{CachedResponse, MemoryStore};

    const ORIGIN: &str = "https://watch.example.com/";

    struct Harness {
        worker: Worker,
        store: Arc<MemoryStore>,
        network: Arc<MockFetcher>,
        hooks: Arc<RecordingHooks>,
    }

    fn config(version: &str) -> WorkerConfig {
        WorkerConfig {
            origin: url::Url::parse(ORIGIN).unwrap(),
            version: version.to_string(),
            static_manifest: vec!["/".to_string(), "/scripts/app.js".to_string()],
            ..WorkerConfig::default()
        }
    }

    fn harness_with(version: &str, store: Arc<MemoryStore>) -> Harness {
        let network = MockFetcher::new();
        network.respond(ORIGIN, ok("text/html", "<html>shell</html>"));
        network.respond(
            "https://watch.example.com/scripts/app.js",
            ok("text/javascript", "boot()"),
        );

        let hooks = Arc::new(RecordingHooks::default());
        let worker = Worker::with_hooks(
            config(version),
            store.clone(),
            network.clone(),
            Arc::new(Broadcaster::new()),
            hooks.clone(),
        );
        Harness {
            worker,
            store,
            network,
            hooks,
        }
    }

    fn harness() -> Harness {
        harness_with("v1", Arc::new(MemoryStore::new()))
    }

    async fn active() -> Harness {
        let h = harness();
        h.worker.install().await.unwrap();
        h.worker.activate().await.unwrap();
        h
    }

    fn get(url: &str) -> FetchRequest {
        FetchRequest::get_str(url).unwrap()
    }

    fn key(url: &str) -> CacheKey {
        CacheKey::get(&get(url).url)
    }

    fn responded(outcome: FetchOutcome) -> Result<ServedResponse, CoreError> {
        match outcome {
            FetchOutcome::Responded(result) => result,
            FetchOutcome::Passthrough => panic!("request was not intercepted"),
        }
    }

    #[tokio::test]
    async fn test_install_precaches_with_reload_and_skips_waiting() {
        let h = harness();
        assert_eq!(h.worker.state(), WorkerState::Installing);

        assert_eq!(h.worker.install().await.unwrap(), 2);
        assert_eq!(h.worker.state(), WorkerState::Waiting);
        assert_eq!(h.network.reloads(), 2);
        assert!(h.hooks.skipped.load(Ordering::SeqCst));

        let partition = h.worker.config().partition_name(ResourceClass::StaticAsset);
        assert_eq!(h.store.keys(&partition).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_failed_install_stores_nothing() {
        let h = harness();
        h.network.offline("https://watch.example.com/scripts/app.js");

        assert!(h.worker.install().await.is_err());
        assert_eq!(h.worker.state(), WorkerState::Redundant);
        assert!(h.store.partitions().await.unwrap().is_empty());
        assert!(!h.hooks.skipped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_activate_requires_install() {
        let h = harness();
        assert!(matches!(
            h.worker.activate().await,
            Err(CoreError::InvalidState {
                expected: WorkerState::Waiting,
                actual: WorkerState::Installing
            })
        ));
    }

    #[tokio::test]
    async fn test_version_cutover_drops_old_partitions() {
        let store = Arc::new(MemoryStore::new());
        let old = harness_with("v1", store.clone());
        old.worker.install().await.unwrap();
        old.worker.activate().await.unwrap();
        let key = key("https://watch.example.com/p/1.png");
        store
            .put("swcache-images-v1", &key, CachedResponse::new(200, vec![], Bytes::new()))
            .await
            .unwrap();
        store.open("unrelated-cache").await.unwrap();

        let new = harness_with("v2", store.clone());
        new.worker.install().await.unwrap();
        let deleted = new.worker.activate().await.unwrap();

        assert_eq!(deleted.len(), 3);
        let remaining = store.partitions().await.unwrap();
        assert_eq!(remaining, vec!["swcache-static-v2"]);
        assert!(new.hooks.claimed.load(Ordering::SeqCst));
        assert_eq!(new.worker.state(), WorkerState::Active);
    }

    #[tokio::test]
    async fn test_activation_broadcasts_to_connected_pages() {
        let h = harness();
        let (_, mut events) = h.worker.broadcaster().connect();
        h.worker.install().await.unwrap();
        h.worker.activate().await.unwrap();

        assert_eq!(events.try_recv().unwrap().event_type, EventType::SwActivated);
    }

    #[tokio::test]
    async fn test_non_get_and_non_http_pass_through() {
        let h = active().await;

        let mut post = get("https://watch.example.com/api/progress");
        post.method = Method::POST;
        assert!(matches!(h.worker.fetch(&post).await, FetchOutcome::Passthrough));

        let data = get("data:text/plain,hello");
        assert!(matches!(h.worker.fetch(&data).await, FetchOutcome::Passthrough));
    }

    #[tokio::test]
    async fn test_inactive_worker_passes_through() {
        let h = harness();
        let request = get("https://watch.example.com/p/1.png");
        let outcome = h.worker.fetch(&request).await;
        assert!(matches!(outcome, FetchOutcome::Passthrough));
    }

    #[tokio::test]
    async fn test_precached_shell_served_from_static_partition() {
        let h = active().await;
        h.network.offline(ORIGIN);

        let served = responded(h.worker.fetch(&get(ORIGIN)).await).unwrap();
        assert_eq!(served.response.body, Bytes::from_static(b"<html>shell</html>"));
    }

    #[tokio::test]
    async fn test_streaming_is_never_written() {
        let h = active().await;
        let url = "https://watch.example.com/hls/ep1/master.m3u8";
        h.network.respond(url, ok("application/vnd.apple.mpegurl", "#EXTM3U"));
        let before = h.worker.cache_info().await.unwrap();

        let served = responded(h.worker.fetch(&get(url)).await).unwrap();
        assert_eq!(served.response.body, Bytes::from_static(b"#EXTM3U"));
        assert_eq!(h.worker.cache_info().await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_offline_image_gets_svg_placeholder() {
        let h = active().await;
        let request = get("https://watch.example.com/posters/9.jpg");
        let served = responded(h.worker.fetch(&request).await).unwrap();
        assert_eq!(served.response.header("content-type"), Some("image/svg+xml"));
    }

    #[tokio::test]
    async fn test_cache_first_hit_ignores_hanging_network() {
        let h = active().await;
        let url = "https://watch.example.com/posters/1.webp";
        h.network.respond(url, ok("image/webp", "pixels"));
        responded(h.worker.fetch(&get(url)).await).unwrap();

        h.network.reply(url, Reply::Hang);
        let served = tokio::time::timeout(
            std::time::Duration::from_secs(1),
            h.worker.fetch(&get(url)),
        )
        .await
        .expect("hit must resolve before the network");
        assert_eq!(responded(served).unwrap().response.body, Bytes::from_static(b"pixels"));
    }

    #[tokio::test]
    async fn test_force_update_clears_everything() {
        let h = active().await;
        let (_, mut events) = h.worker.broadcaster().connect();

        h.worker
            .message(ControlMessage::ForceUpdate, None)
            .await
            .unwrap();

        assert!(h.store.partitions().await.unwrap().is_empty());
        assert_eq!(events.try_recv().unwrap().event_type, EventType::SwUpdated);
        assert!(h.hooks.skipped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_clear_named_cache() {
        let h = active().await;
        h.store.open("swcache-images-v1").await.unwrap();

        h.worker
            .message(
                ControlMessage::ClearCache {
                    cache_name: Some("swcache-images-v1".to_string()),
                },
                None,
            )
            .await
            .unwrap();

        assert_eq!(h.store.partitions().await.unwrap(), vec!["swcache-static-v1"]);

        h.worker
            .message(ControlMessage::ClearCache { cache_name: None }, None)
            .await
            .unwrap();
        assert!(h.store.partitions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cache_info_replies_on_channel() {
        let h = active().await;
        let (tx, rx) = oneshot::channel();

        h.worker
            .message(ControlMessage::GetCacheInfo, Some(tx))
            .await
            .unwrap();

        let MessageReply::CacheInfo(info) = rx.await.unwrap();
        assert_eq!(info.len(), 1);
        assert_eq!(info[0].name, "swcache-static-v1");
        assert_eq!(info[0].count, 2);
        assert_eq!(info[0].urls[0], ORIGIN);
    }

    #[tokio::test]
    async fn test_cache_info_samples_five_urls() {
        let h = active().await;
        for n in 0..8 {
            h.network.respond(
                &format!("https://watch.example.com/api/show/{}", n),
                ok("application/json", "{}"),
            );
        }
        let urls = (0..8).map(|n| format!("/api/show/{}", n)).collect();
        h.worker.prefetch(urls).await;

        let info = h.worker.cache_info().await.unwrap();
        let data = info.iter().find(|p| p.name == "swcache-data-v1").unwrap();
        assert_eq!(data.count, 8);
        assert_eq!(data.urls.len(), 5);
    }

    #[tokio::test]
    async fn test_prefetch_classifies_and_summarizes() {
        let h = active().await;
        let (_, mut events) = h.worker.broadcaster().connect();
        h.network
            .respond("https://watch.example.com/p/1.png", ok("image/png", "png"));
        h.network.respond(
            "https://watch.example.com/catalog.json",
            ok("application/json", "[]"),
        );
        h.network
            .respond("https://watch.example.com/ja/home", ok("text/html", "<p>"));

        h.worker
            .message(
                ControlMessage::PrefetchResources {
                    urls: vec![
                        "/p/1.png".to_string(),
                        "/catalog.json".to_string(),
                        "/ja/home".to_string(),
                        "/missing".to_string(),
                    ],
                },
                None,
            )
            .await
            .unwrap();
        settle().await;

        let event = events.try_recv().unwrap();
        assert_eq!(event.event_type, EventType::CacheUpdated);
        let aux = event.aux_data.unwrap();
        assert_eq!(aux["cached"], 3);
        assert_eq!(aux["failed"], 1);

        let names: Vec<String> = h
            .worker
            .cache_info()
            .await
            .unwrap()
            .into_iter()
            .filter(|p| p.count > 0)
            .map(|p| p.name)
            .collect();
        assert!(names.contains(&"swcache-images-v1".to_string()));
        assert!(names.contains(&"swcache-data-v1".to_string()));
        assert!(names.contains(&"swcache-dynamic-v1".to_string()));
    }

    #[tokio::test]
    async fn test_tick_sweeps_by_age() {
        let h = active().await;
        let now = Utc::now();
        let partition = h.worker.config().partition_name(ResourceClass::Image);
        let old = key("https://watch.example.com/p/old.png");
        let recent = key("https://watch.example.com/p/new.png");

        let entry = |age: i64| {
            crate::cache::stamp(
                CachedResponse::new(200, vec![], Bytes::new()),
                now - Duration::days(age),
            )
        };
        h.store.put(&partition, &old, entry(8)).await.unwrap();
        h.store.put(&partition, &recent, entry(6)).await.unwrap();

        let report = h.worker.tick(now).await.unwrap();
        assert_eq!(report.removed, 1);
        assert!(h.store.get(&partition, &old).await.unwrap().is_none());
        assert!(h.store.get(&partition, &recent).await.unwrap().is_some());
    }

    fn failing_worker() -> (Worker, Arc<FailingStore>, Arc<MockFetcher>) {
        let store = FailingStore::new();
        let network = MockFetcher::new();
        let worker = Worker::with_hooks(
            config("v1"),
            store.clone(),
            network.clone(),
            Arc::new(Broadcaster::new()),
            Arc::new(RecordingHooks::default()),
        );
        (worker, store, network)
    }

    #[tokio::test]
    async fn test_prefetch_store_failure_broadcasts_cache_error() {
        let (worker, store, network) = failing_worker();
        network.respond(
            "https://watch.example.com/catalog.json",
            ok("application/json", "[]"),
        );
        store.fail_put.store(true, Ordering::SeqCst);
        let (_, mut events) = worker.broadcaster().connect();

        let summary = worker.prefetch(vec!["/catalog.json".to_string()]).await;
        assert_eq!(summary.failed, 1);

        let error = events.try_recv().unwrap();
        assert_eq!(error.event_type, EventType::CacheError);
        assert_eq!(error.url.as_deref(), Some("https://watch.example.com/catalog.json"));
        assert_eq!(events.try_recv().unwrap().event_type, EventType::CacheUpdated);
    }

    #[tokio::test]
    async fn test_sweep_with_failures_broadcasts_cache_error() {
        let (worker, store, _) = failing_worker();
        let key = key("https://watch.example.com/p/1.png");
        store
            .put("swcache-images-v1", &key, CachedResponse::new(200, vec![], Bytes::new()))
            .await
            .unwrap();
        store.fail_get.store(true, Ordering::SeqCst);
        let (_, mut events) = worker.broadcaster().connect();

        let report = worker.tick(Utc::now()).await.unwrap();
        assert_eq!(report.failed, 1);

        let event = events.try_recv().unwrap();
        assert_eq!(event.event_type, EventType::CacheError);
        assert_eq!(event.aux_data.unwrap()["failed"], 1);
    }

    #[test]
    fn test_sweep_period_bounds() {
        assert_eq!(sweep_period(0), std::time::Duration::from_secs(60));
        assert_eq!(sweep_period(60), std::time::Duration::from_secs(3600));
        assert_eq!(
            sweep_period(u64::MAX),
            std::time::Duration::from_secs(MAX_SWEEP_INTERVAL_MINUTES * 60)
        );
    }
}
