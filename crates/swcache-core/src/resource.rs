//! Resource classes and fetch strategies

use serde::{Deserialize, Serialize};
use std::fmt;

/// Class of an intercepted request, derived from its URL shape
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum ResourceClass {
    /// App shell files listed in the precache manifest
    StaticAsset,
    /// HTML documents, stylesheets and scripts
    DynamicDocument,
    Image,
    /// JSON and API payloads
    StructuredData,
    /// Assets served from known third-party hosts
    ExternalAsset,
    /// Segmented or progressive video
    StreamingMedia,
}

impl ResourceClass {
    pub const ALL: [ResourceClass; 6] = [
        ResourceClass::StaticAsset,
        ResourceClass::DynamicDocument,
        ResourceClass::Image,
        ResourceClass::StructuredData,
        ResourceClass::ExternalAsset,
        ResourceClass::StreamingMedia,
    ];

    /// Slug embedded in partition names
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceClass::StaticAsset => "static",
            ResourceClass::DynamicDocument => "dynamic",
            ResourceClass::Image => "images",
            ResourceClass::StructuredData => "data",
            ResourceClass::ExternalAsset => "external",
            ResourceClass::StreamingMedia => "streaming",
        }
    }
}

impl fmt::Display for ResourceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a request is satisfied from cache versus network
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    /// Serve from cache, refresh in the background
    CacheFirst,
    /// Try the network, fall back to the dynamic partition
    NetworkFirst,
    /// Serve the stale entry now, revalidate concurrently
    StaleWhileRevalidate,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::CacheFirst => "cache-first",
            Strategy::NetworkFirst => "network-first",
            Strategy::StaleWhileRevalidate => "stale-while-revalidate",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
