//! Worker lifecycle
//!
//! The host runtime drives the transitions; this module supplies the side
//! effects of each one and rejects out-of-order calls:
//!
//! ```text
//! Installing --install--> Waiting --activate--> Activating --> Active
//!      \___________________________\_______________________________--> Redundant
//! ```

use chrono::Utc;
use futures::future::try_join_all;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use swcache_proxy::{FetchRequest, Fetcher};
use swcache_storage::{CacheKey, CacheStore, CachedResponse};
use tracing::{debug, info, warn};

use crate::broadcast::{BroadcastMessage, Broadcaster, EventType};
use crate::cache::stamp;
use crate::config::WorkerConfig;
use crate::error::CoreError;
use crate::resource::ResourceClass;
use crate::strategy::to_cached;

/// Worker lifecycle states
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    Installing,
    /// Installed, waiting for the previous version to let go
    Waiting,
    Activating,
    /// Controlling pages and intercepting requests
    Active,
    Redundant,
}

impl WorkerState {
    pub fn can_intercept_fetch(&self) -> bool {
        matches!(self, WorkerState::Active)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerState::Installing => "installing",
            WorkerState::Waiting => "waiting",
            WorkerState::Activating => "activating",
            WorkerState::Active => "active",
            WorkerState::Redundant => "redundant",
        }
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Calls back into the host runtime
pub trait RuntimeHooks: Send + Sync {
    /// Ask the runtime to activate this version without waiting for old pages
    fn skip_waiting(&self);

    /// Take control of every open page, returns how many were claimed
    fn claim_clients(&self) -> usize;
}

/// Hooks for a host whose only page contexts are broadcaster subscribers
pub struct BroadcasterHooks {
    broadcaster: Arc<Broadcaster>,
    skip_waiting: AtomicBool,
}

impl BroadcasterHooks {
    pub fn new(broadcaster: Arc<Broadcaster>) -> Self {
        Self {
            broadcaster,
            skip_waiting: AtomicBool::new(false),
        }
    }

    /// Whether skip-waiting has been requested
    pub fn skip_waiting_requested(&self) -> bool {
        self.skip_waiting.load(Ordering::Relaxed)
    }
}

impl RuntimeHooks for BroadcasterHooks {
    fn skip_waiting(&self) {
        self.skip_waiting.store(true, Ordering::Relaxed);
    }

    fn claim_clients(&self) -> usize {
        self.broadcaster.claim()
    }
}

/// Lifecycle manager: install, activate and version cutover
pub struct LifecycleManager {
    state: RwLock<WorkerState>,
    config: Arc<WorkerConfig>,
    store: Arc<dyn CacheStore>,
    network: Arc<dyn Fetcher>,
    broadcaster: Arc<Broadcaster>,
    hooks: Arc<dyn RuntimeHooks>,
}

impl LifecycleManager {
    pub fn new(
        config: Arc<WorkerConfig>,
        store: Arc<dyn CacheStore>,
        network: Arc<dyn Fetcher>,
        broadcaster: Arc<Broadcaster>,
        hooks: Arc<dyn RuntimeHooks>,
    ) -> Self {
        Self {
            state: RwLock::new(WorkerState::Installing),
            config,
            store,
            network,
            broadcaster,
            hooks,
        }
    }

    pub fn state(&self) -> WorkerState {
        *self.state.read()
    }

    pub fn hooks(&self) -> &Arc<dyn RuntimeHooks> {
        &self.hooks
    }

    fn transition(&self, expected: WorkerState, next: WorkerState) -> Result<(), CoreError> {
        let mut state = self.state.write();
        if *state != expected {
            return Err(CoreError::InvalidState {
                expected,
                actual: *state,
            });
        }
        debug!("Worker state {} -> {}", *state, next);
        *state = next;
        Ok(())
    }

    /// Mark the worker as replaced
    pub fn retire(&self) {
        let mut state = self.state.write();
        if *state != WorkerState::Redundant {
            info!("Worker {} is now redundant", self.config.version);
            *state = WorkerState::Redundant;
        }
    }

    /// Precache the static manifest, then request skip-waiting
    ///
    /// Every manifest URL is fetched with reload semantics. Either all of
    /// them are stored or none is, and a failed install leaves the worker
    /// redundant.
    pub async fn install(&self) -> Result<usize, CoreError> {
        {
            let state = self.state.read();
            if *state != WorkerState::Installing {
                return Err(CoreError::InvalidState {
                    expected: WorkerState::Installing,
                    actual: *state,
                });
            }
        }

        let partition = self.config.partition_name(ResourceClass::StaticAsset);
        let urls = self.config.manifest_urls();
        info!(
            "Installing worker {}: precaching {} static assets into {}",
            self.config.version,
            urls.len(),
            partition
        );

        let fetches = urls.into_iter().map(|url| async move {
            let request = FetchRequest::get(url).reloading();
            let response = self.network.fetch(&request).await?;
            Ok::<(CacheKey, CachedResponse), CoreError>((
                CacheKey::get(&request.url),
                to_cached(response),
            ))
        });

        let fetched = match try_join_all(fetches).await {
            Ok(fetched) => fetched,
            Err(e) => {
                warn!("Install failed while precaching: {}", e);
                self.retire();
                return Err(e);
            }
        };

        let now = Utc::now();
        let result = async {
            self.store.open(&partition).await?;
            for (key, response) in &fetched {
                self.store
                    .put(&partition, key, stamp(response.clone(), now))
                    .await?;
            }
            Ok::<(), CoreError>(())
        }
        .await;

        if let Err(e) = result {
            warn!("Install failed while storing static assets: {}", e);
            if let Err(cleanup) = self.store.delete_partition(&partition).await {
                warn!("Failed to discard partial static partition: {}", cleanup);
            }
            self.retire();
            return Err(e);
        }

        self.transition(WorkerState::Installing, WorkerState::Waiting)?;
        self.hooks.skip_waiting();

        info!("Installed worker {} ({} assets)", self.config.version, fetched.len());
        Ok(fetched.len())
    }

    /// Drop every partition not named for the current version, then claim pages
    ///
    /// Returns the names of the deleted partitions.
    pub async fn activate(&self) -> Result<Vec<String>, CoreError> {
        self.transition(WorkerState::Waiting, WorkerState::Activating)?;
        info!("Activating worker {}", self.config.version);

        let live = self.config.live_partitions();
        let mut deleted = Vec::new();

        let partitions = match self.store.partitions().await {
            Ok(partitions) => partitions,
            Err(e) => {
                self.retire();
                return Err(e.into());
            }
        };

        for name in partitions {
            if live.contains(&name) {
                continue;
            }
            info!("Deleting stale partition {}", name);
            match self.store.delete_partition(&name).await {
                Ok(_) => deleted.push(name),
                Err(e) => warn!("Failed to delete stale partition {}: {}", name, e),
            }
        }

        let claimed = self.hooks.claim_clients();
        self.transition(WorkerState::Activating, WorkerState::Active)?;

        self.broadcaster.broadcast(
            BroadcastMessage::new(
                EventType::SwActivated,
                format!("Worker {} activated", self.config.version),
            )
            .with_aux(serde_json::json!({
                "version": self.config.version,
                "deletedPartitions": deleted,
                "claimedClients": claimed,
            })),
        );

        info!(
            "Worker {} active: {} stale partitions removed, {} pages claimed",
            self.config.version,
            deleted.len(),
            claimed
        );
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockFetcher, ok};
    use swcache_storage::MemoryStore;

    fn manager(hooks: Arc<dyn RuntimeHooks>, broadcaster: Arc<Broadcaster>) -> LifecycleManager {
        let config = WorkerConfig {
            static_manifest: vec!["/".to_string()],
            ..WorkerConfig::default()
        };
        let network = MockFetcher::new();
        network.respond(config.origin.as_str(), ok("text/html", "<html></html>"));
        LifecycleManager::new(
            Arc::new(config),
            Arc::new(MemoryStore::new()),
            network,
            broadcaster,
            hooks,
        )
    }

    #[test]
    fn test_only_active_intercepts() {
        assert!(WorkerState::Active.can_intercept_fetch());
        assert!(!WorkerState::Waiting.can_intercept_fetch());
        assert!(!WorkerState::Redundant.can_intercept_fetch());
    }

    #[tokio::test]
    async fn test_broadcaster_hooks_claim_connected_pages() {
        let broadcaster = Arc::new(Broadcaster::new());
        let hooks = Arc::new(BroadcasterHooks::new(broadcaster.clone()));
        let (page, _rx) = broadcaster.connect();
        let lifecycle = manager(hooks.clone(), broadcaster.clone());

        lifecycle.install().await.unwrap();
        assert!(hooks.skip_waiting_requested());
        assert!(!broadcaster.is_controlled(page));

        lifecycle.activate().await.unwrap();
        assert!(broadcaster.is_controlled(page));
        assert_eq!(lifecycle.state(), WorkerState::Active);
    }

    #[tokio::test]
    async fn test_install_twice_is_rejected() {
        let broadcaster = Arc::new(Broadcaster::new());
        let hooks = Arc::new(BroadcasterHooks::new(broadcaster.clone()));
        let lifecycle = manager(hooks, broadcaster);

        lifecycle.install().await.unwrap();
        assert!(matches!(
            lifecycle.install().await,
            Err(CoreError::InvalidState { .. })
        ));
    }

    #[test]
    fn test_retire_is_terminal() {
        let broadcaster = Arc::new(Broadcaster::new());
        let hooks = Arc::new(BroadcasterHooks::new(broadcaster.clone()));
        let lifecycle = manager(hooks, broadcaster);

        lifecycle.retire();
        assert_eq!(lifecycle.state(), WorkerState::Redundant);
        assert_eq!(lifecycle.state().to_string(), "redundant");
    }
}
