#![deny(missing_docs)]
#![warn(missing_debug_implementations)]

//! A continuously refreshed registry of trust anchors sourced from signed
//! lists of trusted lists, plus persistent caches for revocation data.
//!
//! Two services make up the registry:
//!
//! - [`TlValidationJob`] periodically loads the list of trusted lists (LOTL),
//!   roots it in an out-of-band key store (following pivot LOTLs when the
//!   signing keys rotated), validates every member trust list and publishes
//!   the certificates of their granted services into a
//!   [`TrustedCertificateAggregate`];
//! - [`CachedRevocationSource`] serves CRLs and AIA issuer certificates from a
//!   durable [`CacheStore`](store::CacheStore), fetching only when a record
//!   expired and falling back to the stale record when the network fails.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use trustlist_registry::cert::KeyStoreCertificateSource;
//! use trustlist_registry::fetch::{FetcherConfig, HttpFetcher};
//! use trustlist_registry::tsl::{LotlDescriptor, TlValidationJob};
//! use url::Url;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let fetcher = Arc::new(HttpFetcher::new(&FetcherConfig::default())?);
//! let anchors = KeyStoreCertificateSource::from_file("/etc/registry/oj-keystore.pem")?;
//!
//! let job = TlValidationJob::builder()
//!     .lotl(LotlDescriptor::new(
//!         Url::parse("https://lotl.example.org/eu-lotl.json")?,
//!         anchors,
//!     ))
//!     .file_cache("/var/cache/registry/tl", fetcher)
//!     .build()?;
//!
//! // Run one cycle now, then keep refreshing in the background.
//! let result = job.run_cycle().await?;
//! for url in result.failed_lists() {
//!     println!("excluded: {url}");
//! }
//! job.spawn().await?;
//!
//! // Verifiers read the current snapshot without blocking the job.
//! let snapshot = job.aggregate().current_anchors();
//! println!("{} trusted certificates (version {})", snapshot.len(), snapshot.version());
//!
//! job.shutdown_configured().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Features
//!
//! - **`tracing`** (default): log through `tracing`
//! - **`logging`**: log through `log` instead
//! - **`cli`**: build the `trustlist-registry` binary

pub mod aggregate;
pub mod cert;
pub mod config;
pub mod error;
pub mod fetch;
pub mod loader;
pub mod metrics;
pub mod probe;
pub mod revocation;
pub mod signature;
pub mod store;
pub mod tsl;

pub(crate) mod observability;
pub(crate) mod prelude;

#[cfg(test)]
mod test_util;

pub use aggregate::{AnchorSnapshot, CertificateEntry, TrustedCertificateAggregate};
pub use cert::{Certificate, KeyStoreCertificateSource};
pub use config::RegistryConfig;
pub use error::{CacheError, FetchError, ParseError, SignatureValidationError};
pub use fetch::{Fetcher, HttpFetcher, NoOpFetcher};
pub use loader::{FileCacheLoader, FileLoader};
pub use revocation::{CacheStatus, CachedPayload, CachedRevocationSource, RevocationKind};
pub use tsl::{LotlDescriptor, TlValidationJob, TrustListDescriptor, ValidationCycleResult};
