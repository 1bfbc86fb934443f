//! Partition eviction
//!
//! Two independent mechanisms keep partitions bounded:
//! a count limit enforced after each write (oldest-inserted first, reads
//! never reset an entry's position), and a periodic sweep removing
//! entries whose capture time is past the retention window.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use swcache_storage::{CACHED_AT_HEADER, CacheStore, CachedResponse};
use tracing::{debug, info, warn};

use crate::config::WorkerConfig;
use crate::error::CoreError;
use crate::resource::ResourceClass;

/// Stamp a response with its capture time
pub fn stamp(response: CachedResponse, now: DateTime<Utc>) -> CachedResponse {
    response.with_header(CACHED_AT_HEADER, now.to_rfc3339())
}

/// Capture time of a stored response
///
/// Uses the capture stamp, falling back to the `Date` header.
pub fn captured_at(response: &CachedResponse) -> Option<DateTime<Utc>> {
    if let Some(value) = response.header(CACHED_AT_HEADER)
        && let Ok(ts) = DateTime::parse_from_rfc3339(value)
    {
        return Some(ts.with_timezone(&Utc));
    }

    response
        .header("date")
        .and_then(|value| DateTime::parse_from_rfc2822(value).ok())
        .map(|ts| ts.with_timezone(&Utc))
}

/// Outcome of one age sweep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub inspected: u64,
    pub removed: u64,
    pub failed: u64,
}

/// Eviction policy over the live partitions
#[derive(Clone)]
pub struct EvictionPolicy {
    store: Arc<dyn CacheStore>,
    config: Arc<WorkerConfig>,
}

impl EvictionPolicy {
    pub fn new(store: Arc<dyn CacheStore>, config: Arc<WorkerConfig>) -> Self {
        Self { store, config }
    }

    /// Trim a class's partition down to its configured limit
    ///
    /// Returns the number of entries removed. Two concurrent writers may
    /// both pass the count check; the next write's pass corrects the
    /// overshoot.
    pub async fn enforce(&self, class: ResourceClass) -> Result<usize, CoreError> {
        let Some(limit) = self.config.limit_for(class) else {
            return Ok(0);
        };

        let partition = self.config.partition_name(class);
        let keys = self.store.keys(&partition).await?;

        if keys.len() <= limit {
            return Ok(0);
        }

        let excess = keys.len() - limit;
        debug!(
            "Partition {} holds {} entries (limit {}), evicting {}",
            partition,
            keys.len(),
            limit,
            excess
        );

        let mut removed = 0;
        for key in keys.iter().take(excess) {
            if self.store.delete(&partition, key).await? {
                removed += 1;
            }
        }

        metrics::counter!("swcache_evictions_total", "partition" => class.as_str())
            .increment(removed as u64);
        Ok(removed)
    }

    /// Remove every entry older than the retention window
    ///
    /// Per-entry failures are logged and counted, never retried.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport, CoreError> {
        let cutoff = now - self.config.retention();
        let live = self.config.live_partitions();
        let mut report = SweepReport::default();

        info!("Sweeping cache entries captured before {}", cutoff);

        for partition in self.store.partitions().await? {
            if !live.contains(&partition) {
                continue;
            }

            let keys = match self.store.keys(&partition).await {
                Ok(keys) => keys,
                Err(e) => {
                    warn!("Failed to list partition {}: {}", partition, e);
                    report.failed += 1;
                    continue;
                }
            };

            for key in keys {
                report.inspected += 1;

                let entry = match self.store.get(&partition, &key).await {
                    Ok(Some(entry)) => entry,
                    Ok(None) => continue,
                    Err(e) => {
                        warn!("Failed to read {} from {}: {}", key, partition, e);
                        report.failed += 1;
                        continue;
                    }
                };

                let expired = captured_at(&entry)
                    .map(|ts| ts < cutoff)
                    .unwrap_or(false);
                if !expired {
                    continue;
                }

                debug!("Sweeping expired entry {} from {}", key, partition);
                match self.store.delete(&partition, &key).await {
                    Ok(_) => report.removed += 1,
                    Err(e) => {
                        warn!("Failed to delete {} from {}: {}", key, partition, e);
                        report.failed += 1;
                    }
                }
            }
        }

        info!(
            "Sweep complete: {} inspected, {} removed, {} failed",
            report.inspected, report.removed, report.failed
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use chrono::Duration;
    use swcache_storage::{CacheKey, MemoryStore};
    use url::Url;

    fn key(n: usize) -> CacheKey {
        CacheKey::get(&Url::parse(&format!("https://example.com/api/{}", n)).unwrap())
    }

    fn entry(captured: DateTime<Utc>) -> CachedResponse {
        stamp(CachedResponse::new(200, vec![], Bytes::from_static(b"{}")), captured)
    }

    fn policy(limit: usize) -> (EvictionPolicy, Arc<MemoryStore>, Arc<WorkerConfig>) {
        let mut config = WorkerConfig::default();
        config.limits.data = Some(limit);
        let config = Arc::new(config);
        let store = Arc::new(MemoryStore::new());
        (
            EvictionPolicy::new(store.clone(), config.clone()),
            store,
            config,
        )
    }

    #[tokio::test]
    async fn test_enforce_removes_first_inserted() {
        let (policy, store, config) = policy(3);
        let partition = config.partition_name(ResourceClass::StructuredData);
        let now = Utc::now();

        for n in 0..4 {
            store.put(&partition, &key(n), entry(now)).await.unwrap();
        }

        let removed = policy.enforce(ResourceClass::StructuredData).await.unwrap();
        assert_eq!(removed, 1);

        let keys = store.keys(&partition).await.unwrap();
        assert_eq!(keys, vec![key(1), key(2), key(3)]);
    }

    #[tokio::test]
    async fn test_reads_do_not_protect_old_entries() {
        let (policy, store, config) = policy(2);
        let partition = config.partition_name(ResourceClass::StructuredData);
        let now = Utc::now();

        store.put(&partition, &key(0), entry(now)).await.unwrap();
        store.put(&partition, &key(1), entry(now)).await.unwrap();
        store.get(&partition, &key(0)).await.unwrap();
        store.put(&partition, &key(2), entry(now)).await.unwrap();

        policy.enforce(ResourceClass::StructuredData).await.unwrap();
        assert!(store.get(&partition, &key(0)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_enforce_unbounded_class_is_noop() {
        let (policy, store, config) = policy(1);
        let partition = config.partition_name(ResourceClass::StaticAsset);
        for n in 0..5 {
            store
                .put(&partition, &key(n), entry(Utc::now()))
                .await
                .unwrap();
        }

        assert_eq!(policy.enforce(ResourceClass::StaticAsset).await.unwrap(), 0);
        assert_eq!(store.keys(&partition).await.unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_sweep_respects_retention_window() {
        let (policy, store, config) = policy(100);
        let now = Utc::now();
        let images = config.partition_name(ResourceClass::Image);
        let data = config.partition_name(ResourceClass::StructuredData);

        store
            .put(&images, &key(1), entry(now - Duration::days(8)))
            .await
            .unwrap();
        store
            .put(&images, &key(2), entry(now - Duration::days(6)))
            .await
            .unwrap();
        store
            .put(&data, &key(3), entry(now - Duration::days(30)))
            .await
            .unwrap();

        let report = policy.sweep(now).await.unwrap();
        assert_eq!(report.inspected, 3);
        assert_eq!(report.removed, 2);
        assert_eq!(report.failed, 0);

        assert!(store.get(&images, &key(1)).await.unwrap().is_none());
        assert!(store.get(&images, &key(2)).await.unwrap().is_some());
        assert!(store.get(&data, &key(3)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sweep_keeps_unstamped_entries() {
        let (policy, store, config) = policy(100);
        let partition = config.partition_name(ResourceClass::DynamicDocument);
        let bare = CachedResponse::new(200, vec![], Bytes::new());
        store.put(&partition, &key(1), bare).await.unwrap();

        let report = policy.sweep(Utc::now()).await.unwrap();
        assert_eq!(report.removed, 0);
        assert!(store.get(&partition, &key(1)).await.unwrap().is_some());
    }

    #[test]
    fn test_captured_at_falls_back_to_date_header() {
        let response = CachedResponse::new(
            200,
            vec![("Date".to_string(), "Tue, 15 Nov 1994 08:12:31 GMT".to_string())],
            Bytes::new(),
        );
        let ts = captured_at(&response).unwrap();
        assert_eq!(ts.to_rfc3339(), "1994-11-15T08:12:31+00:00");
    }
}
