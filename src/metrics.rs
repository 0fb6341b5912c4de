//! Metrics hooks for the revocation caches and the validation job.

use std::fmt;

/// Trait for recording metrics from the registry components.
///
/// Implement this trait to integrate with your metrics system (e.g., Prometheus, `StatsD`).
/// Prefer stable, low-cardinality labels when recording metrics.
///
/// # Example
///
/// ```no_run
/// use trustlist_registry::metrics::{MetricsErrorKind, MetricsRecorder};
/// use std::sync::Arc;
///
/// struct MyMetrics;
///
/// impl MetricsRecorder for MyMetrics {
///     fn record_publish(&self, version: u64) {
///         println!("aggregate version {version}");
///     }
///
///     fn record_cache_lookup(&self, namespace: &str, hit: bool) {
///         println!("{namespace} hit={hit}");
///     }
///
///     fn record_error(&self, kind: MetricsErrorKind) {
///         println!("Error: {}", kind.as_str());
///     }
/// }
///
/// let metrics = Arc::new(MyMetrics);
/// // Use with TlValidationJob::builder().metrics(...)
/// ```
pub trait MetricsRecorder: Send + Sync {
    /// Records that a new aggregate version was published.
    fn record_publish(&self, version: u64);

    /// Records a revocation cache lookup in `namespace`.
    ///
    /// `hit` is `true` when a fresh record was served without a network call.
    fn record_cache_lookup(&self, namespace: &str, hit: bool);

    /// Records an error with a structured error kind.
    fn record_error(&self, kind: MetricsErrorKind);
}

/// Error kinds for structured metrics reporting.
///
/// Use these stable, low-cardinality labels when recording metrics.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
#[non_exhaustive]
pub enum MetricsErrorKind {
    /// A revocation payload could not be fetched.
    RevocationFetch,
    /// A stale revocation payload was served because the refresh failed.
    StaleRevocationServed,
    /// The durable store failed and a lookup fell back to an uncached fetch.
    CacheStoreUnavailable,
    /// The top-level list could not be loaded online or offline.
    LotlUnavailable,
    /// The pivot chain did not reach a trust anchor.
    PivotResolution,
    /// The top-level list signature is not trusted.
    LotlSignature,
    /// A member list could not be loaded.
    MemberListUnavailable,
    /// A member list was rejected (malformed or untrusted signature).
    MemberListRejected,
    /// A scheduled cycle was skipped because the previous one was still running.
    CycleSkipped,
    /// Failed to join the scheduler task during shutdown.
    SchedulerJoinFailed,
}

impl MetricsErrorKind {
    /// Returns a string representation of the error kind.
    ///
    /// This is useful for metrics systems that require string labels.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RevocationFetch => "revocation_fetch",
            Self::StaleRevocationServed => "stale_revocation_served",
            Self::CacheStoreUnavailable => "cache_store_unavailable",
            Self::LotlUnavailable => "lotl_unavailable",
            Self::PivotResolution => "pivot_resolution",
            Self::LotlSignature => "lotl_signature",
            Self::MemberListUnavailable => "member_list_unavailable",
            Self::MemberListRejected => "member_list_rejected",
            Self::CycleSkipped => "cycle_skipped",
            Self::SchedulerJoinFailed => "scheduler_join_failed",
        }
    }
}

impl fmt::Display for MetricsErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
