//! Cached revocation sources (CRL and AIA).
//!
//! A [`CachedRevocationSource`] answers `get(identifier)` from the durable
//! [`CacheStore`](crate::store::CacheStore) while the stored record is fresh,
//! refreshes it from the network once it expires, and falls back to the stale
//! record when the refresh fails.
//!
//! ```no_run
//! use std::sync::Arc;
//! use trustlist_registry::fetch::{FetcherConfig, HttpFetcher};
//! use trustlist_registry::revocation::CachedRevocationSource;
//! use trustlist_registry::store::SqliteCacheStore;
//! use url::Url;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(SqliteCacheStore::open("/var/lib/registry/cache.db")?);
//! let fetcher = Arc::new(HttpFetcher::new(&FetcherConfig::default())?);
//!
//! let crl = CachedRevocationSource::crl(store, fetcher)?;
//! crl.initialize()?;
//!
//! let payload = crl.get(&Url::parse("http://crl.example.org/ca.crl")?).await?;
//! if payload.is_degraded() {
//!     println!("serving a stale CRL");
//! }
//! # Ok(())
//! # }
//! ```

mod policy;
mod source;

pub use policy::{
    NextUpdatePolicy, RevocationKind, DEFAULT_AIA_MAX_NEXT_UPDATE_DELAY,
    DEFAULT_CRL_MAX_NEXT_UPDATE_DELAY, DEFAULT_CRL_NEXT_UPDATE_DELAY,
};
pub use source::CachedRevocationSource;

use crate::error::{CacheError, FetchError};
use bytes::Bytes;
use thiserror::Error;
use time::OffsetDateTime;

/// Where a payload returned by [`CachedRevocationSource::get`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheStatus {
    /// Served from a fresh cache record, no network call.
    Cached,
    /// Fetched from the network and stored.
    Fetched,
    /// The refresh failed; the expired record was served instead.
    Stale,
    /// The store was unavailable; fetched without caching.
    Uncached,
}

/// Payload returned by a revocation source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedPayload {
    payload: Bytes,
    status: CacheStatus,
    next_update: Option<OffsetDateTime>,
}

impl CachedPayload {
    pub(crate) fn new(payload: Bytes, status: CacheStatus, next_update: Option<OffsetDateTime>) -> Self {
        Self {
            payload,
            status,
            next_update,
        }
    }

    /// The raw payload (CRL or issuer certificates).
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// How the payload was obtained.
    pub fn status(&self) -> CacheStatus {
        self.status
    }

    /// When the cached copy expires. `None` for uncached payloads.
    pub fn next_update(&self) -> Option<OffsetDateTime> {
        self.next_update
    }

    /// Returns `true` when the payload was served past its `next_update`.
    pub fn is_degraded(&self) -> bool {
        self.status == CacheStatus::Stale
    }

    /// Consumes the value and returns the payload bytes.
    pub fn into_payload(self) -> Bytes {
        self.payload
    }
}

/// Errors returned by [`CachedRevocationSource`].
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RevocationSourceError {
    /// No usable record exists and the network fetch failed.
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// The cache namespace could not be created or dropped.
    #[error(transparent)]
    Cache(#[from] CacheError),
}
