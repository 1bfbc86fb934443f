//! swcache network client
//!
//! This crate provides the network side of the interception layer:
//! the request/response types that cross it and the HTTP fetcher.

pub mod client;
pub mod error;

pub use client::{FetchRequest, FetchedResponse, Fetcher, HttpFetcher, HttpFetcherConfig};
pub use error::ProxyError;
