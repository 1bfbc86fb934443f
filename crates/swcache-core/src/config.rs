//! Worker configuration
//!
//! Loaded once at process start and never mutated afterwards. The binary
//! reads it from the `[worker]` table of its TOML file.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use url::Url;

use crate::resource::ResourceClass;

/// Per-partition entry count limits (`None` = unbounded)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PartitionLimits {
    #[serde(default)]
    pub static_assets: Option<usize>,
    #[serde(default = "default_dynamic_limit")]
    pub dynamic: Option<usize>,
    #[serde(default = "default_images_limit")]
    pub images: Option<usize>,
    #[serde(default = "default_data_limit")]
    pub data: Option<usize>,
    #[serde(default = "default_external_limit")]
    pub external: Option<usize>,
}

impl PartitionLimits {
    /// Limit for a class; streaming media is never stored, so it has none
    pub fn for_class(&self, class: ResourceClass) -> Option<usize> {
        match class {
            ResourceClass::StaticAsset => self.static_assets,
            ResourceClass::DynamicDocument => self.dynamic,
            ResourceClass::Image => self.images,
            ResourceClass::StructuredData => self.data,
            ResourceClass::ExternalAsset => self.external,
            ResourceClass::StreamingMedia => None,
        }
    }
}

impl Default for PartitionLimits {
    fn default() -> Self {
        Self {
            static_assets: None,
            dynamic: default_dynamic_limit(),
            images: default_images_limit(),
            data: default_data_limit(),
            external: default_external_limit(),
        }
    }
}

/// Immutable configuration of the interception layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Origin the worker is scoped to
    #[serde(default = "default_origin")]
    pub origin: Url,
    /// Prefix of every partition name
    #[serde(default = "default_cache_prefix")]
    pub cache_prefix: String,
    /// Version token embedded in partition names
    #[serde(default = "default_version")]
    pub version: String,
    /// Same-origin paths precached on install and served cache-first
    #[serde(default = "default_static_manifest")]
    pub static_manifest: Vec<String>,
    /// Third-party hosts whose assets are served cache-first
    #[serde(default = "default_external_hosts")]
    pub external_hosts: Vec<String>,
    #[serde(default)]
    pub limits: PartitionLimits,
    /// Entries older than this are removed by the periodic sweep
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
    /// Interval between age sweeps
    #[serde(default = "default_sweep_interval_minutes")]
    pub sweep_interval_minutes: u64,
}

impl WorkerConfig {
    /// Partition name for a class: `<prefix>-<class>-<version>`
    pub fn partition_name(&self, class: ResourceClass) -> String {
        format!("{}-{}-{}", self.cache_prefix, class.as_str(), self.version)
    }

    /// Names of every partition the current version considers live
    pub fn live_partitions(&self) -> BTreeSet<String> {
        ResourceClass::ALL
            .into_iter()
            .map(|class| self.partition_name(class))
            .collect()
    }

    /// Absolute URLs of the static precache manifest
    ///
    /// Entries that do not resolve against the origin are skipped.
    pub fn manifest_urls(&self) -> Vec<Url> {
        self.static_manifest
            .iter()
            .filter_map(|path| self.origin.join(path).ok())
            .collect()
    }

    pub fn limit_for(&self, class: ResourceClass) -> Option<usize> {
        self.limits.for_class(class)
    }

    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::days(self.retention_days as i64)
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            origin: default_origin(),
            cache_prefix: default_cache_prefix(),
            version: default_version(),
            static_manifest: default_static_manifest(),
            external_hosts: default_external_hosts(),
            limits: PartitionLimits::default(),
            retention_days: default_retention_days(),
            sweep_interval_minutes: default_sweep_interval_minutes(),
        }
    }
}

fn default_origin() -> Url {
    Url::parse("http://localhost:8080/")
        .expect("static origin URL is valid")
}

fn default_cache_prefix() -> String {
    "swcache".to_string()
}

fn default_version() -> String {
    "v1".to_string()
}

fn default_static_manifest() -> Vec<String> {
    vec![
        "/".to_string(),
        "/index.html".to_string(),
        "/offline.html".to_string(),
        "/styles/app.css".to_string(),
        "/scripts/app.js".to_string(),
    ]
}

fn default_external_hosts() -> Vec<String> {
    vec![
        "fonts.googleapis.com".to_string(),
        "fonts.gstatic.com".to_string(),
        "cdn.jsdelivr.net".to_string(),
        "cdnjs.cloudflare.com".to_string(),
    ]
}

fn default_dynamic_limit() -> Option<usize> {
    Some(50)
}

fn default_images_limit() -> Option<usize> {
    Some(100)
}

fn default_data_limit() -> Option<usize> {
    Some(50)
}

fn default_external_limit() -> Option<usize> {
    Some(30)
}

fn default_retention_days() -> u32 {
    7
}

fn default_sweep_interval_minutes() -> u64 {
    60
}
