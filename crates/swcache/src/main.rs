//! swcache - offline-first request interception layer

use anyhow::{Context, Result};
use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod config;

use config::{Config, LoggingConfig, StorageBackend};
use swcache_api::{AppState, create_router};
use swcache_core::{Worker, spawn_sweep_task};
use swcache_proxy::{Fetcher, HttpFetcher, HttpFetcherConfig};
use swcache_storage::{CacheStore, DiskStore, MemoryStore};

/// swcache - offline-first caching layer for a web application
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "config/default.toml")]
    config: String,

    /// Bind address
    #[arg(long, env = "SWCACHE_BIND")]
    bind: Option<String>,

    /// Port
    #[arg(short, long, env = "SWCACHE_PORT")]
    port: Option<u16>,

    /// Cache version token, overrides the config file
    #[arg(long, env = "SWCACHE_VERSION")]
    cache_version: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Load configuration
    let mut config = Config::load(&args.config)?;
    if let Some(version) = args.cache_version {
        config.worker.version = version;
    }

    // Initialize logging
    init_logging(&config.logging);

    info!("Starting swcache v{}", env!("CARGO_PKG_VERSION"));

    let metrics_handle = if config.metrics.enabled {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .context("Failed to install Prometheus recorder")?;
        Some(Arc::new(handle))
    } else {
        None
    };

    // Initialize cache store
    let store: Arc<dyn CacheStore> = match config.storage.backend {
        StorageBackend::Disk => {
            tokio::fs::create_dir_all(&config.storage.path).await?;
            Arc::new(
                DiskStore::new(&config.storage.path)
                    .await
                    .with_context(|| format!("Failed to open cache at {}", config.storage.path))?,
            )
        }
        StorageBackend::Memory => Arc::new(MemoryStore::new()),
    };

    // Initialize network client
    let mut fetcher_config = HttpFetcherConfig {
        skip_tls_verify: config.network.skip_tls_verify,
        ..HttpFetcherConfig::default()
    };
    if let Some(user_agent) = &config.network.user_agent {
        fetcher_config.user_agent = user_agent.clone();
    }
    let network: Arc<dyn Fetcher> = Arc::new(HttpFetcher::new(fetcher_config)?);

    // Install and activate the worker
    let sweep_interval = config.worker.sweep_interval_minutes;
    let worker = Arc::new(Worker::new(config.worker.clone(), store, network.clone()));

    match worker.install().await {
        Ok(count) => {
            let deleted = worker.activate().await.context("Worker activation failed")?;
            info!(
                "Worker {} ready: {} assets precached, {} stale partitions removed",
                config.worker.version,
                count,
                deleted.len()
            );
        }
        Err(e) => {
            error!("Worker install failed, requests will pass through: {}", e);
        }
    }

    // Start background sweep
    let _sweep_handle = spawn_sweep_task(worker.clone(), sweep_interval);

    // Create router
    let app = create_router(AppState::new(worker, network), metrics_handle);

    // Determine bind address
    let bind_addr = args.bind.unwrap_or(config.server.bind_address);
    let port = args.port.unwrap_or(config.server.port);
    let addr: SocketAddr = format!("{}:{}", bind_addr, port).parse()?;

    info!("Listening on {}", addr);
    info!("Origin: {}", config.worker.origin);

    // Start server
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

/// Initialize logging
fn init_logging(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&logging.level));

    if logging.format == "json" {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer())
            .with(filter)
            .init();
    }
}

/// Wait for shutdown signal
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for CTRL+C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
