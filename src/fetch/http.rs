use super::{FetchFuture, Fetcher};
use crate::error::FetchError;
use crate::prelude::debug;
use bytes::{Bytes, BytesMut};
use reqwest::redirect::Policy;
use reqwest::{Client, NoProxy, Proxy};
use serde::Deserialize;
use std::time::Duration;
use url::Url;

const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_MAX_REDIRECTS: usize = 10;
const DEFAULT_MAX_BODY_BYTES: usize = 32 * 1024 * 1024;

/// Transport settings shared by every HTTP fetcher.
///
/// All fields have defaults, so an empty `[fetcher]` table is valid.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FetcherConfig {
    /// Connection establishment timeout in milliseconds.
    pub connect_timeout_ms: u64,
    /// Whole-request timeout (connect, send, read body) in milliseconds.
    pub request_timeout_ms: u64,
    /// Follow HTTP redirects.
    pub redirects_enabled: bool,
    /// Maximum number of redirects followed when enabled.
    pub max_redirects: usize,
    /// Responses larger than this are rejected.
    pub max_body_bytes: usize,
    /// Optional forward proxy.
    pub proxy: Option<ProxyConfig>,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            redirects_enabled: true,
            max_redirects: DEFAULT_MAX_REDIRECTS,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            proxy: None,
        }
    }
}

impl FetcherConfig {
    pub(crate) fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub(crate) fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub(crate) fn redirect_policy(&self) -> Policy {
        if self.redirects_enabled {
            Policy::limited(self.max_redirects)
        } else {
            Policy::none()
        }
    }

    /// Applies timeouts, redirect policy and proxy to a client builder.
    pub(crate) fn apply(
        &self,
        builder: reqwest::ClientBuilder,
    ) -> Result<reqwest::ClientBuilder, FetcherBuildError> {
        let mut builder = builder
            .connect_timeout(self.connect_timeout())
            .timeout(self.request_timeout())
            .redirect(self.redirect_policy());

        if let Some(proxy) = &self.proxy {
            builder = builder.proxy(proxy.to_reqwest()?);
        }
        Ok(builder)
    }
}

/// Forward proxy settings.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProxyConfig {
    /// Proxy URL, e.g. `http://proxy.internal:3128`.
    pub url: Url,
    /// Basic auth user.
    #[serde(default)]
    pub username: Option<String>,
    /// Basic auth password.
    #[serde(default)]
    pub password: Option<String>,
    /// Hosts reached directly, bypassing the proxy.
    #[serde(default)]
    pub excluded_hosts: Vec<String>,
}

impl std::fmt::Debug for ProxyConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyConfig")
            .field("url", &self.url.as_str())
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("excluded_hosts", &self.excluded_hosts)
            .finish()
    }
}

impl ProxyConfig {
    fn to_reqwest(&self) -> Result<Proxy, FetcherBuildError> {
        let mut proxy = Proxy::all(self.url.as_str()).map_err(FetcherBuildError::InvalidProxy)?;
        if let Some(username) = &self.username {
            proxy = proxy.basic_auth(username, self.password.as_deref().unwrap_or_default());
        }
        if !self.excluded_hosts.is_empty() {
            proxy = proxy.no_proxy(NoProxy::from_string(&self.excluded_hosts.join(",")));
        }
        Ok(proxy)
    }
}

/// An error that can arise while building an HTTP client.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum FetcherBuildError {
    /// The proxy URL was rejected.
    #[error("invalid proxy configuration: {0}")]
    InvalidProxy(#[source] reqwest::Error),

    /// The HTTP client could not be built (TLS backend initialization).
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

/// HTTP(S) fetcher backed by a shared `reqwest::Client`.
///
/// Certificate validation of the transport is always on; see
/// [`crate::probe::PeerCertificateProbe`] for the only trust-all client.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    max_body_bytes: usize,
}

impl HttpFetcher {
    /// Builds a fetcher from the transport configuration.
    ///
    /// # Errors
    ///
    /// Returns [`FetcherBuildError`] if the proxy is invalid or the TLS
    /// backend cannot be initialized.
    pub fn new(config: &FetcherConfig) -> Result<Self, FetcherBuildError> {
        let client = config
            .apply(Client::builder().user_agent(concat!(
                env!("CARGO_PKG_NAME"),
                "/",
                env!("CARGO_PKG_VERSION")
            )))?
            .build()
            .map_err(FetcherBuildError::Client)?;

        Ok(Self {
            client,
            max_body_bytes: config.max_body_bytes,
        })
    }

    async fn get(&self, url: &Url) -> Result<Bytes, FetchError> {
        debug!("GET {}", url);
        let mut response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| transport_error(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let too_large = || FetchError::TooLarge {
            url: url.to_string(),
            limit: self.max_body_bytes,
        };
        if response
            .content_length()
            .is_some_and(|len| len > self.max_body_bytes as u64)
        {
            return Err(too_large());
        }

        let mut body = BytesMut::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| transport_error(url, e))?
        {
            if body.len() + chunk.len() > self.max_body_bytes {
                return Err(too_large());
            }
            body.extend_from_slice(&chunk);
        }
        Ok(body.freeze())
    }
}

impl Fetcher for HttpFetcher {
    fn fetch<'a>(&'a self, url: &'a Url) -> FetchFuture<'a> {
        Box::pin(self.get(url))
    }
}

fn transport_error(url: &Url, source: reqwest::Error) -> FetchError {
    if source.is_timeout() {
        FetchError::Timeout {
            url: url.to_string(),
        }
    } else {
        FetchError::Transport {
            url: url.to_string(),
            source,
        }
    }
}
