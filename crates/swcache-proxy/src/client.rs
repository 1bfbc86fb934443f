//! Network fetcher

use async_trait::async_trait;
use bytes::Bytes;
use http::Method;
use http::header::{self, HeaderMap, HeaderValue};
use reqwest::Client;
use tracing::{debug, info};
use url::Url;

use crate::error::ProxyError;

/// Hop-by-hop headers never forwarded to the network
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "host",
    "keep-alive",
    "proxy-connection",
    "transfer-encoding",
    "upgrade",
    "te",
    "trailer",
];

/// An intercepted request
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Bytes,
    /// Bypass any intermediate HTTP cache (forced reload)
    pub reload: bool,
}

impl FetchRequest {
    /// A plain GET request for `url`
    pub fn get(url: Url) -> Self {
        Self {
            method: Method::GET,
            url,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            reload: false,
        }
    }

    /// Parse `url` into a GET request
    pub fn get_str(url: &str) -> Result<Self, ProxyError> {
        let url = Url::parse(url)
            .map_err(|e| ProxyError::InvalidUrl(format!("{}: {}", url, e)))?;
        Ok(Self::get(url))
    }

    /// Add a header
    pub fn with_header(mut self, name: header::HeaderName, value: &'static str) -> Self {
        self.headers.insert(name, HeaderValue::from_static(value));
        self
    }

    /// Mark the request as a forced reload
    pub fn reloading(mut self) -> Self {
        self.reload = true;
        self
    }

    /// Whether the request's Accept header admits an HTML document
    pub fn accepts_html(&self) -> bool {
        self.headers
            .get_all(header::ACCEPT)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .any(|v| v.contains("text/html"))
    }

    /// Whether the URL scheme is http or https
    pub fn is_http(&self) -> bool {
        matches!(self.url.scheme(), "http" | "https")
    }
}

/// A response as received from the network
#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl FetchedResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Turn a non-ok status into an error
    pub fn error_for_status(self) -> Result<Self, ProxyError> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(ProxyError::UpstreamError {
                status: self.status,
                message: String::from_utf8_lossy(&self.body)
                    .chars()
                    .take(256)
                    .collect(),
            })
        }
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers
            .get(header::CONTENT_TYPE)
            .and_then(|h| h.to_str().ok())
    }
}

/// Network collaborator of the interception layer
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Send a request and return whatever the network answered
    async fn send(&self, request: &FetchRequest) -> Result<FetchedResponse, ProxyError>;

    /// Send a request, treating any non-ok status as a failure
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchedResponse, ProxyError> {
        self.send(request).await?.error_for_status()
    }
}

/// HTTP fetcher configuration
#[derive(Clone, Debug)]
pub struct HttpFetcherConfig {
    /// User agent sent with every request
    pub user_agent: String,
    /// Skip TLS certificate verification
    pub skip_tls_verify: bool,
}

impl Default for HttpFetcherConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("swcache/{}", env!("CARGO_PKG_VERSION")),
            skip_tls_verify: false,
        }
    }
}

/// Fetcher backed by a reqwest client
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    /// Create a new HTTP fetcher
    pub fn new(config: HttpFetcherConfig) -> Result<Self, ProxyError> {
        let mut builder = Client::builder().user_agent(config.user_agent.clone());

        if config.skip_tls_verify {
            builder = builder.danger_accept_invalid_certs(true);
        }

        let client = builder.build()?;

        info!("Created HTTP fetcher ({})", config.user_agent);

        Ok(Self { client })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn send(&self, request: &FetchRequest) -> Result<FetchedResponse, ProxyError> {
        debug!("Fetching {} {}", request.method, request.url);

        let mut builder = self
            .client
            .request(request.method.clone(), request.url.clone());

        for (name, value) in request.headers.iter() {
            if !HOP_BY_HOP.contains(&name.as_str()) {
                builder = builder.header(name, value);
            }
        }

        if request.reload {
            builder = builder
                .header(header::CACHE_CONTROL, "no-cache")
                .header(header::PRAGMA, "no-cache");
        }

        if !request.body.is_empty() {
            builder = builder.body(request.body.clone());
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response.bytes().await?;

        Ok(FetchedResponse {
            status,
            headers,
            body,
        })
    }
}
