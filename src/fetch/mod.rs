//! Network fetchers.
//!
//! A [`Fetcher`] performs one bounded GET and returns the raw body. Two
//! implementations ship with the crate: [`HttpFetcher`] (reqwest, configured
//! timeouts, redirects and proxy) and [`NoOpFetcher`], which fails every call
//! and backs the offline file loader.
//!
//! The trait returns a boxed future so fetchers can be stored as
//! `Arc<dyn Fetcher>` inside caches and loaders.

use crate::error::FetchError;
use bytes::Bytes;
use std::fmt::Debug;
use std::future::Future;
use std::pin::Pin;
use url::Url;

mod http;

pub use http::{FetcherBuildError, FetcherConfig, HttpFetcher, ProxyConfig};

/// Future returned by [`Fetcher::fetch`].
pub type FetchFuture<'a> = Pin<Box<dyn Future<Output = Result<Bytes, FetchError>> + Send + 'a>>;

/// Retrieves the body of a remote resource.
///
/// Implementations must bound every call (timeouts) so a hung endpoint only
/// affects the resource it serves.
pub trait Fetcher: Debug + Send + Sync + 'static {
    /// Fetches `url` and returns the response body.
    fn fetch<'a>(&'a self, url: &'a Url) -> FetchFuture<'a>;
}

/// Fetcher that never touches the network.
///
/// Every call fails with [`FetchError::Disabled`].
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpFetcher;

impl Fetcher for NoOpFetcher {
    fn fetch<'a>(&'a self, url: &'a Url) -> FetchFuture<'a> {
        let url = url.to_string();
        Box::pin(async move { Err(FetchError::Disabled { url }) })
    }
}
