use super::job::{JobError, TlValidationJob};
use super::pivot::DEFAULT_MAX_PIVOT_DEPTH;
use super::source::{LotlDescriptor, TrustListDescriptor};
use crate::aggregate::TrustedCertificateAggregate;
use crate::fetch::Fetcher;
use crate::loader::{FileCacheLoader, FileLoader};
use crate::metrics::MetricsRecorder;
use std::fmt::Debug;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Retry/backoff configuration after a failed cycle.
///
/// A failed cycle is retried after `min_backoff`, doubling up to
/// `max_backoff`, instead of waiting a whole refresh period. Small jitter is
/// added to each delay.
///
/// If `min_backoff > max_backoff`, they will be swapped to ensure valid configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryConfig {
    /// First delay after a failure.
    pub min_backoff: Duration,
    /// Maximum delay between retries.
    pub max_backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            min_backoff: Duration::from_secs(30),
            max_backoff: Duration::from_secs(60 * 60),
        }
    }
}

impl RetryConfig {
    pub(crate) fn normalize(mut self) -> Self {
        if self.min_backoff > self.max_backoff {
            std::mem::swap(&mut self.min_backoff, &mut self.max_backoff);
        }
        self
    }
}

/// Scheduling and bookkeeping settings of a [`TlValidationJob`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct JobConfig {
    /// Interval between scheduled cycles.
    pub refresh_period: Duration,
    /// Maximum number of pivots followed when rooting the top-level list.
    pub max_pivot_depth: usize,
    /// Number of cycle results kept in [`TlValidationJob::history`].
    pub history_size: usize,
    /// Retry policy after a failed cycle.
    pub retry: RetryConfig,
    /// Timeout used by [`TlValidationJob::shutdown_configured`].
    pub shutdown_timeout: Option<Duration>,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            refresh_period: Duration::from_secs(24 * 60 * 60),
            max_pivot_depth: DEFAULT_MAX_PIVOT_DEPTH,
            history_size: 16,
            retry: RetryConfig::default(),
            shutdown_timeout: Some(Duration::from_secs(30)),
        }
    }
}

impl JobConfig {
    // A zero period would make `tokio::time::interval` panic.
    const MIN_REFRESH_PERIOD: Duration = Duration::from_secs(1);

    pub(crate) fn normalize(mut self) -> Self {
        self.refresh_period = self.refresh_period.max(Self::MIN_REFRESH_PERIOD);
        self.history_size = self.history_size.max(1);
        self.retry = self.retry.normalize();
        self
    }
}

/// Builder for [`TlValidationJob`].
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use trustlist_registry::aggregate::TrustedCertificateAggregate;
/// use trustlist_registry::cert::KeyStoreCertificateSource;
/// use trustlist_registry::fetch::{FetcherConfig, HttpFetcher};
/// use trustlist_registry::tsl::{LotlDescriptor, TlValidationJob};
/// use url::Url;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let anchors = KeyStoreCertificateSource::from_file("/etc/registry/oj-keystore.pem")?;
/// let lotl = LotlDescriptor::new(Url::parse("https://lotl.example.org/eu-lotl.json")?, anchors)
///     .with_official_journal(Url::parse("https://eur-lex.europa.eu/oj/2019/C276/01")?);
///
/// let job = TlValidationJob::builder()
///     .aggregate(TrustedCertificateAggregate::new())
///     .lotl(lotl)
///     .file_cache("/var/cache/registry/tl", Arc::new(HttpFetcher::new(&FetcherConfig::default())?))
///     .build()?;
///
/// job.spawn().await?;
/// # Ok(())
/// # }
/// ```
pub struct TlValidationJobBuilder {
    aggregate: Option<TrustedCertificateAggregate>,
    lotl: Option<LotlDescriptor>,
    trusted_lists: Vec<TrustListDescriptor>,
    online: Option<Arc<dyn FileLoader>>,
    offline: Option<Arc<dyn FileLoader>>,
    config: JobConfig,
    metrics: Option<Arc<dyn MetricsRecorder>>,
}

impl Debug for TlValidationJobBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlValidationJobBuilder")
            .field("aggregate", &self.aggregate)
            .field("lotl", &self.lotl)
            .field("trusted_lists", &self.trusted_lists)
            .field("online", &self.online)
            .field("offline", &self.offline)
            .field("config", &self.config)
            .field(
                "metrics",
                &self.metrics.as_ref().map(|_| "<MetricsRecorder>"),
            )
            .finish()
    }
}

impl Default for TlValidationJobBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TlValidationJobBuilder {
    /// Creates a builder with the default [`JobConfig`].
    pub fn new() -> Self {
        Self {
            aggregate: None,
            lotl: None,
            trusted_lists: Vec::new(),
            online: None,
            offline: None,
            config: JobConfig::default(),
            metrics: None,
        }
    }

    /// Aggregate the job publishes into. A fresh one is created if unset.
    #[must_use]
    pub fn aggregate(mut self, aggregate: TrustedCertificateAggregate) -> Self {
        self.aggregate = Some(aggregate);
        self
    }

    /// Top-level list to root the job in.
    #[must_use]
    pub fn lotl(mut self, lotl: LotlDescriptor) -> Self {
        self.lotl = Some(lotl);
        self
    }

    /// Adds a manually configured trust list.
    ///
    /// A manual list replaces a top-level pointer to the same URL.
    #[must_use]
    pub fn trusted_list(mut self, descriptor: TrustListDescriptor) -> Self {
        self.trusted_lists.push(descriptor);
        self
    }

    /// Loader tried first for every list.
    #[must_use]
    pub fn online_loader(mut self, loader: Arc<dyn FileLoader>) -> Self {
        self.online = Some(loader);
        self
    }

    /// Loader used when the online loader fails.
    #[must_use]
    pub fn offline_loader(mut self, loader: Arc<dyn FileLoader>) -> Self {
        self.offline = Some(loader);
        self
    }

    /// Sets both loaders to file caches sharing `directory`.
    #[must_use]
    pub fn file_cache(self, directory: impl Into<PathBuf>, fetcher: Arc<dyn Fetcher>) -> Self {
        let directory = directory.into();
        self.online_loader(Arc::new(FileCacheLoader::online(directory.clone(), fetcher)))
            .offline_loader(Arc::new(FileCacheLoader::offline(directory)))
    }

    /// Replaces the job configuration.
    #[must_use]
    pub fn config(mut self, config: JobConfig) -> Self {
        self.config = config;
        self
    }

    /// Attaches a metrics recorder.
    #[must_use]
    pub fn metrics(mut self, metrics: Arc<dyn MetricsRecorder>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Builds the job. Nothing runs until [`TlValidationJob::run_cycle`] or
    /// [`TlValidationJob::spawn`] is called.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::NoListConfigured`] without a top-level or manual
    /// list, and [`JobError::MissingLoader`] when a loader is unset.
    pub fn build(self) -> Result<TlValidationJob, JobError> {
        if self.lotl.is_none() && self.trusted_lists.is_empty() {
            return Err(JobError::NoListConfigured);
        }
        let online = self.online.ok_or(JobError::MissingLoader("online"))?;
        let offline = self.offline.ok_or(JobError::MissingLoader("offline"))?;

        Ok(TlValidationJob::build_with(
            self.aggregate.unwrap_or_default(),
            self.lotl,
            self.trusted_lists,
            online,
            offline,
            self.config.normalize(),
            self.metrics,
        ))
    }
}
