//! Request classification
//!
//! Maps an intercepted request URL to a resource class and the strategy
//! that serves it. Rules are tested in order and the first match wins,
//! so the order of [`Classifier::new`]'s rule list is part of the contract:
//! video must never land in a cache-first class, and images must win over
//! every freshness-oriented class.

use std::collections::HashSet;
use std::fmt;
use url::Url;

use crate::config::WorkerConfig;
use crate::resource::{ResourceClass, Strategy};

const STREAMING_SEGMENTS: &[&str] = &["/stream/", "/video/", "/hls/", "/dash/"];
const STREAMING_EXTENSIONS: &[&str] = &["m3u8", "mpd", "ts", "m4s", "mp4", "webm"];

const IMAGE_SEGMENTS: &[&str] = &["/images/", "/img/", "/posters/", "/thumbnails/", "/avatars/"];
const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "webp", "svg", "ico", "avif"];

const DATA_SEGMENTS: &[&str] = &["/api/", "/data/"];

const DOCUMENT_EXTENSIONS: &[&str] = &["html", "htm", "css", "js", "mjs"];

/// Result of classifying a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    pub class: ResourceClass,
    pub strategy: Strategy,
    /// Name of the rule that matched
    pub rule: &'static str,
}

type Predicate = Box<dyn Fn(&Url) -> bool + Send + Sync>;

struct Rule {
    route: Route,
    predicate: Predicate,
}

/// Ordered rule list mapping requests to routes
pub struct Classifier {
    rules: Vec<Rule>,
    fallback: Route,
}

impl fmt::Debug for Classifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Classifier")
            .field("rules", &self.rule_names())
            .field("fallback", &self.fallback)
            .finish()
    }
}

impl Classifier {
    /// Build the rule list for a configuration
    pub fn new(config: &WorkerConfig) -> Self {
        let external_hosts: Vec<String> = config
            .external_hosts
            .iter()
            .map(|h| h.to_ascii_lowercase())
            .collect();

        let origin = config.origin.clone();
        let manifest: HashSet<String> = config
            .manifest_urls()
            .into_iter()
            .map(|u| u.path().to_string())
            .collect();

        let rules = vec![
            Rule {
                route: Route {
                    class: ResourceClass::StreamingMedia,
                    strategy: Strategy::NetworkFirst,
                    rule: "streaming-media",
                },
                predicate: Box::new(|url| {
                    path_has_segment(url, STREAMING_SEGMENTS)
                        || path_has_extension(url, STREAMING_EXTENSIONS)
                }),
            },
            Rule {
                route: Route {
                    class: ResourceClass::Image,
                    strategy: Strategy::CacheFirst,
                    rule: "image",
                },
                predicate: Box::new(|url| {
                    path_has_extension(url, IMAGE_EXTENSIONS)
                        || path_has_segment(url, IMAGE_SEGMENTS)
                }),
            },
            Rule {
                route: Route {
                    class: ResourceClass::StructuredData,
                    strategy: Strategy::StaleWhileRevalidate,
                    rule: "structured-data",
                },
                predicate: Box::new(|url| {
                    path_has_extension(url, &["json"]) || path_has_segment(url, DATA_SEGMENTS)
                }),
            },
            Rule {
                route: Route {
                    class: ResourceClass::ExternalAsset,
                    strategy: Strategy::CacheFirst,
                    rule: "external-host",
                },
                predicate: Box::new(move |url| {
                    url.host_str()
                        .map(|host| host_matches(host, &external_hosts))
                        .unwrap_or(false)
                }),
            },
            Rule {
                route: Route {
                    class: ResourceClass::StaticAsset,
                    strategy: Strategy::CacheFirst,
                    rule: "static-manifest",
                },
                predicate: Box::new(move |url| {
                    same_origin(url, &origin)
                        && url.query().is_none()
                        && manifest.contains(url.path())
                }),
            },
            Rule {
                route: Route {
                    class: ResourceClass::DynamicDocument,
                    strategy: Strategy::StaleWhileRevalidate,
                    rule: "dynamic-document",
                },
                predicate: Box::new(|url| path_has_extension(url, DOCUMENT_EXTENSIONS)),
            },
        ];

        Self {
            rules,
            fallback: Route {
                class: ResourceClass::DynamicDocument,
                strategy: Strategy::NetworkFirst,
                rule: "fallback",
            },
        }
    }

    /// Classify a request URL
    pub fn classify(&self, url: &Url) -> Route {
        self.rules
            .iter()
            .find(|rule| (rule.predicate)(url))
            .map(|rule| rule.route)
            .unwrap_or(self.fallback)
    }

    /// Rule names in evaluation order
    pub fn rule_names(&self) -> Vec<&'static str> {
        self.rules.iter().map(|r| r.route.rule).collect()
    }
}

/// Classification used for prefetched URLs: image, JSON, or anything else
pub fn prefetch_class(url: &Url) -> ResourceClass {
    if path_has_extension(url, IMAGE_EXTENSIONS) || path_has_segment(url, IMAGE_SEGMENTS) {
        ResourceClass::Image
    } else if path_has_extension(url, &["json"]) || path_has_segment(url, DATA_SEGMENTS) {
        ResourceClass::StructuredData
    } else {
        ResourceClass::DynamicDocument
    }
}

fn extension(url: &Url) -> Option<String> {
    let last = url.path().rsplit('/').next()?;
    let (_, ext) = last.rsplit_once('.')?;
    Some(ext.to_ascii_lowercase())
}

fn path_has_extension(url: &Url, extensions: &[&str]) -> bool {
    extension(url)
        .map(|ext| extensions.contains(&ext.as_str()))
        .unwrap_or(false)
}

fn path_has_segment(url: &Url, segments: &[&str]) -> bool {
    let path = url.path().to_ascii_lowercase();
    segments.iter().any(|s| path.contains(s))
}

fn host_matches(host: &str, hosts: &[String]) -> bool {
    let host = host.to_ascii_lowercase();
    hosts.iter().any(|h| {
        host == *h
            || host
                .strip_suffix(h.as_str())
                .map(|prefix| prefix.ends_with('.'))
                .unwrap_or(false)
    })
}

fn same_origin(url: &Url, origin: &Url) -> bool {
    url.scheme() == origin.scheme()
        && url.host_str() == origin.host_str()
        && url.port_or_known_default() == origin.port_or_known_default()
}
