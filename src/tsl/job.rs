use super::builder::{JobConfig, TlValidationJobBuilder};
use super::document::SignedTrustList;
use super::pivot::resolve_signers;
use super::result::{CycleFailure, CycleStatus, ListFailure, ListOutcome, ValidationCycleResult};
use super::source::{LotlDescriptor, TrustListDescriptor};
use crate::aggregate::{CertificateEntry, TrustedCertificateAggregate};
use crate::loader::{FallbackLoader, FileLoader, LoaderError};
use crate::metrics::{MetricsErrorKind, MetricsRecorder};
use crate::prelude::{debug, info, warn};
use bytes::Bytes;
use futures::future::join_all;
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::fmt::{self, Debug};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use time::OffsetDateTime;
use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Errors returned by [`TlValidationJob`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum JobError {
    /// A cycle is already running; the request was skipped, not queued.
    #[error("a validation cycle is already running")]
    AlreadyRunning,

    /// The job was shut down.
    #[error("validation job is closed")]
    Closed,

    /// Shutdown did not complete in time and the scheduler was aborted.
    #[error("shutdown timeout exceeded")]
    ShutdownTimeout,

    /// Neither a top-level list nor a manual list was configured.
    #[error("no trust list configured")]
    NoListConfigured,

    /// A required loader was not configured.
    #[error("{0} loader is not configured")]
    MissingLoader(&'static str),
}

/// Phase of the validation job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobState {
    /// No cycle running. Both published and failed cycles end here.
    Idle,
    /// Loading the top-level list.
    FetchingTopList,
    /// Walking the pivot chain.
    ResolvingPivots,
    /// Verifying the top-level list against the resolved signer set.
    ValidatingTopSignature,
    /// Loading member lists concurrently.
    FetchingMemberLists,
    /// Verifying member lists and extracting entries.
    ValidatingMemberLists,
    /// Publishing the new aggregate.
    Aggregating,
}

/// Periodically rebuilds the [`TrustedCertificateAggregate`] from signed trust lists.
///
/// One cycle loads the top-level list, roots it in the key store (following
/// pivots if needed), loads and validates every member list concurrently and
/// publishes the accepted entries atomically. A failure of the top-level list
/// fails the whole cycle closed and keeps the previous aggregate; a failure
/// of a member list only excludes that list.
///
/// Use [`TlValidationJob::shutdown`] or [`TlValidationJob::shutdown_configured`] to stop
/// the scheduler.
#[derive(Clone, Debug)]
pub struct TlValidationJob {
    inner: Arc<Inner>,
}

pub(crate) struct Inner {
    lotl: Option<LotlDescriptor>,
    trusted_lists: Vec<TrustListDescriptor>,
    loader: FallbackLoader,
    aggregate: TrustedCertificateAggregate,
    config: JobConfig,
    metrics: Option<Arc<dyn MetricsRecorder>>,

    // At most one cycle at a time.
    running: AtomicBool,
    state_tx: watch::Sender<JobState>,
    history: Mutex<VecDeque<Arc<ValidationCycleResult>>>,

    // Lifecycle / shutdown.
    closed: AtomicBool,
    cancel: CancellationToken,
    scheduler: AsyncMutex<Option<JoinHandle<()>>>,
}

impl Debug for Inner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlValidationJob")
            .field("lotl", &self.lotl)
            .field("trusted_lists", &self.trusted_lists)
            .field("loader", &self.loader)
            .field("aggregate", &self.aggregate)
            .field("config", &self.config)
            .field(
                "metrics",
                &self.metrics.as_ref().map(|_| "<MetricsRecorder>"),
            )
            .field("running", &self.running.load(Ordering::Relaxed))
            .field("state", &*self.state_tx.borrow())
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .field("scheduler", &"<Mutex<Option<JoinHandle<()>>>>")
            .finish()
    }
}

/// Clears the running flag and returns to `Idle`, also when a cycle is aborted.
struct RunningGuard<'a> {
    inner: &'a Inner,
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.inner.state_tx.send_replace(JobState::Idle);
        self.inner.running.store(false, Ordering::Release);
    }
}

impl TlValidationJob {
    /// Creates a builder.
    pub fn builder() -> TlValidationJobBuilder {
        TlValidationJobBuilder::new()
    }

    pub(super) fn build_with(
        aggregate: TrustedCertificateAggregate,
        lotl: Option<LotlDescriptor>,
        trusted_lists: Vec<TrustListDescriptor>,
        online: Arc<dyn FileLoader>,
        offline: Arc<dyn FileLoader>,
        config: JobConfig,
        metrics: Option<Arc<dyn MetricsRecorder>>,
    ) -> Self {
        let (state_tx, _) = watch::channel(JobState::Idle);
        Self {
            inner: Arc::new(Inner {
                lotl,
                trusted_lists,
                loader: FallbackLoader::new(online, offline),
                aggregate,
                config,
                metrics,
                running: AtomicBool::new(false),
                state_tx,
                history: Mutex::new(VecDeque::with_capacity(config.history_size)),
                closed: AtomicBool::new(false),
                cancel: CancellationToken::new(),
                scheduler: AsyncMutex::new(None),
            }),
        }
    }

    /// The aggregate this job publishes into.
    pub fn aggregate(&self) -> &TrustedCertificateAggregate {
        &self.inner.aggregate
    }

    /// Current phase.
    pub fn state(&self) -> JobState {
        *self.inner.state_tx.borrow()
    }

    /// Returns `true` while a cycle is running.
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    /// Results of the most recent cycles, oldest first.
    pub fn history(&self) -> Vec<Arc<ValidationCycleResult>> {
        self.inner.history().iter().cloned().collect()
    }

    /// Result of the most recent cycle.
    pub fn last_result(&self) -> Option<Arc<ValidationCycleResult>> {
        self.inner.history().back().cloned()
    }

    /// Runs one cycle now.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::AlreadyRunning`] if a cycle is in progress and
    /// [`JobError::Closed`] after shutdown. A cycle that fails closed is not an
    /// error; see [`ValidationCycleResult::status`].
    pub async fn run_cycle(&self) -> Result<Arc<ValidationCycleResult>, JobError> {
        self.inner.run_cycle_guarded().await
    }

    /// Starts the background scheduler. The first cycle runs immediately.
    ///
    /// Calling it again while the scheduler runs has no effect.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::Closed`] after shutdown.
    pub async fn spawn(&self) -> Result<(), JobError> {
        self.assert_open()?;
        let mut scheduler = self.inner.scheduler.lock().await;
        if scheduler.is_some() {
            return Ok(());
        }

        let task_inner = Arc::clone(&self.inner);
        let token = task_inner.cancel.clone();
        *scheduler = Some(tokio::spawn(async move {
            task_inner.run_scheduler(token).await;
        }));
        Ok(())
    }

    /// Stops the scheduler and waits for it, including a running cycle.
    ///
    /// This method is idempotent.
    ///
    /// **Note:** This method waits as long as the running cycle takes. Prefer
    /// [`TlValidationJob::shutdown_with_timeout`] in production.
    pub async fn shutdown(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.cancel.cancel();

        if let Some(handle) = self.inner.scheduler.lock().await.take() {
            if let Err(_e) = handle.await {
                warn!("Error joining scheduler task during shutdown: error={}", _e);
                self.inner.record_error(MetricsErrorKind::SchedulerJoinFailed);
            }
        }
    }

    /// Stops the scheduler, waiting up to `timeout` for a running cycle before
    /// aborting it. An aborted cycle publishes nothing.
    ///
    /// This method is idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::ShutdownTimeout`] if the scheduler had to be aborted.
    pub async fn shutdown_with_timeout(&self, timeout: Duration) -> Result<(), JobError> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.inner.cancel.cancel();

        let Some(mut handle) = self.inner.scheduler.lock().await.take() else {
            return Ok(());
        };

        match tokio::time::timeout(timeout, &mut handle).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_e)) => {
                warn!("Error joining scheduler task during shutdown: error={}", _e);
                self.inner.record_error(MetricsErrorKind::SchedulerJoinFailed);
                Ok(())
            }
            Err(_) => {
                warn!("Shutdown timeout exceeded; aborting scheduler task");
                handle.abort();
                let _ = handle.await;
                Err(JobError::ShutdownTimeout)
            }
        }
    }

    /// Stops the scheduler using the configured shutdown timeout, or waits
    /// indefinitely when none is configured.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::ShutdownTimeout`] if the configured timeout is exceeded.
    pub async fn shutdown_configured(&self) -> Result<(), JobError> {
        if let Some(timeout) = self.inner.config.shutdown_timeout {
            self.shutdown_with_timeout(timeout).await
        } else {
            self.shutdown().await;
            Ok(())
        }
    }

    fn assert_open(&self) -> Result<(), JobError> {
        if self.inner.closed.load(Ordering::Acquire) || self.inner.cancel.is_cancelled() {
            return Err(JobError::Closed);
        }
        Ok(())
    }
}

impl Inner {
    pub(super) fn config(&self) -> &JobConfig {
        &self.config
    }

    pub(super) fn record_error(&self, kind: MetricsErrorKind) {
        if let Some(metrics) = self.metrics.as_deref() {
            metrics.record_error(kind);
        }
    }

    fn history(&self) -> std::sync::MutexGuard<'_, VecDeque<Arc<ValidationCycleResult>>> {
        self.history.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: JobState) {
        self.state_tx.send_replace(state);
    }

    pub(super) async fn run_cycle_guarded(&self) -> Result<Arc<ValidationCycleResult>, JobError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(JobError::Closed);
        }
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(JobError::AlreadyRunning);
        }
        let _guard = RunningGuard { inner: self };

        let result = Arc::new(self.execute_cycle().await);
        let mut history = self.history();
        if history.len() >= self.config.history_size {
            history.pop_front();
        }
        history.push_back(Arc::clone(&result));
        Ok(result)
    }

    async fn execute_cycle(&self) -> ValidationCycleResult {
        let started_at = OffsetDateTime::now_utc();

        let mut descriptors = self.trusted_lists.clone();
        if let Some(lotl) = &self.lotl {
            match self.validate_lotl(lotl).await {
                Ok(members) => {
                    let manual: HashSet<_> = descriptors.iter().map(|d| d.url().clone()).collect();
                    descriptors.extend(members.into_iter().filter(|d| !manual.contains(d.url())));
                }
                Err(failure) => {
                    warn!(
                        "Validation cycle failed closed; keeping aggregate version {}: error={}",
                        self.aggregate.version(),
                        failure
                    );
                    self.record_error(failure.metrics_kind());
                    return ValidationCycleResult {
                        status: CycleStatus::FailedClosed(failure),
                        outcomes: BTreeMap::new(),
                        aggregate_version: self.aggregate.version(),
                        started_at,
                        produced_at: OffsetDateTime::now_utc(),
                    };
                }
            }
        }

        self.set_state(JobState::FetchingMemberLists);
        let loaded = join_all(descriptors.iter().map(|d| self.loader.get(d.url()))).await;

        self.set_state(JobState::ValidatingMemberLists);
        let mut entries = Vec::new();
        let mut outcomes = BTreeMap::new();
        for (descriptor, body) in descriptors.iter().zip(loaded) {
            let outcome = match self.validate_member(descriptor, body) {
                Ok((list, list_entries)) => {
                    debug!(
                        "Trust list accepted: territory={}, sequence_number={}, entries={}",
                        list.territory(),
                        list.sequence_number(),
                        list_entries.len()
                    );
                    let outcome = ListOutcome::Accepted {
                        territory: list.territory().to_owned(),
                        sequence_number: list.sequence_number(),
                        entries: list_entries.len(),
                    };
                    entries.extend(list_entries);
                    outcome
                }
                Err(failure) => {
                    warn!(
                        "Trust list excluded: url={}, territory={}, error={}",
                        descriptor.url(),
                        descriptor.territory(),
                        failure
                    );
                    self.record_error(failure.metrics_kind());
                    ListOutcome::Failed {
                        territory: descriptor.territory().to_owned(),
                        failure,
                    }
                }
            };
            outcomes.insert(descriptor.url().clone(), outcome);
        }

        self.set_state(JobState::Aggregating);
        let accepted = outcomes.values().filter(|o| o.is_accepted()).count();
        let version = self.aggregate.publish(entries);
        if let Some(metrics) = self.metrics.as_deref() {
            metrics.record_publish(version);
        }
        info!(
            "Trusted certificates published: version={}, lists_accepted={}, lists_failed={}",
            version,
            accepted,
            outcomes.len() - accepted
        );

        ValidationCycleResult {
            status: CycleStatus::Published { version },
            outcomes,
            aggregate_version: version,
            started_at,
            produced_at: OffsetDateTime::now_utc(),
        }
    }

    async fn validate_lotl(&self, lotl: &LotlDescriptor) -> Result<Vec<TrustListDescriptor>, CycleFailure> {
        self.set_state(JobState::FetchingTopList);
        let bytes = self
            .loader
            .get(lotl.url())
            .await
            .map_err(|source| CycleFailure::LotlUnavailable {
                url: lotl.url().clone(),
                source,
            })?;
        let current = SignedTrustList::parse(&bytes).map_err(|source| CycleFailure::LotlMalformed {
            url: lotl.url().clone(),
            source,
        })?;

        self.set_state(JobState::ResolvingPivots);
        let signers = resolve_signers(&current, lotl, &self.loader, self.config.max_pivot_depth).await?;

        self.set_state(JobState::ValidatingTopSignature);
        current
            .verify_with(&signers)
            .map_err(|source| CycleFailure::LotlSignature {
                url: lotl.url().clone(),
                source,
            })?;

        info!(
            "Top-level list validated: url={}, sequence_number={}, pointers={}",
            lotl.url(),
            current.sequence_number(),
            current.pointers().len()
        );
        Ok(lotl.member_descriptors(&current))
    }

    fn validate_member(
        &self,
        descriptor: &TrustListDescriptor,
        body: Result<Bytes, LoaderError>,
    ) -> Result<(SignedTrustList, Vec<CertificateEntry>), ListFailure> {
        let bytes = body.map_err(ListFailure::Unavailable)?;
        let list = SignedTrustList::parse(&bytes).map_err(ListFailure::Malformed)?;
        if !list.territory().eq_ignore_ascii_case(descriptor.territory()) {
            return Err(ListFailure::TerritoryMismatch {
                expected: descriptor.territory().to_owned(),
                found: list.territory().to_owned(),
            });
        }
        list.verify_with(descriptor.signers())
            .map_err(ListFailure::Signature)?;

        if list
            .next_update()
            .is_some_and(|next| next < OffsetDateTime::now_utc())
        {
            warn!(
                "Trust list is past its next update date: url={}, next_update={:?}",
                descriptor.url(),
                list.next_update()
            );
        }

        let entries = list
            .services()
            .iter()
            .filter(|service| descriptor.service_predicate().accepts(service))
            .flat_map(|service| {
                service.certificates.iter().map(|certificate| CertificateEntry {
                    certificate: certificate.clone(),
                    territory: list.territory().to_owned(),
                    service_name: service.name.clone(),
                    provider: service.provider.clone(),
                    service_status: service.status.clone(),
                })
            })
            .collect();
        Ok((list, entries))
    }
}

impl CycleFailure {
    fn metrics_kind(&self) -> MetricsErrorKind {
        match self {
            Self::LotlUnavailable { .. } => MetricsErrorKind::LotlUnavailable,
            Self::Pivot(_) => MetricsErrorKind::PivotResolution,
            Self::LotlMalformed { .. } | Self::LotlSignature { .. } => MetricsErrorKind::LotlSignature,
        }
    }
}

impl ListFailure {
    fn metrics_kind(&self) -> MetricsErrorKind {
        match self {
            Self::Unavailable(_) => MetricsErrorKind::MemberListUnavailable,
            Self::Malformed(_) | Self::Signature(_) | Self::TerritoryMismatch { .. } => {
                MetricsErrorKind::MemberListRejected
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::cert::KeyStoreCertificateSource;
    use crate::loader::FileCacheLoader;
    use crate::metrics::testing::CountingRecorder;
    use crate::test_util::{lotl_content, mint_certificate, seal, tl_content, StubFetcher, OJ_URL};
    use url::Url;

    const LOTL_URL: &str = "https://lotl.example.org/eu.json";

    struct Fixture {
        fetcher: Arc<StubFetcher>,
        job: TlValidationJob,
        metrics: Arc<CountingRecorder>,
        dir: tempfile::TempDir,
    }

    /// A top-level list anchored directly, pointing at BE and FR lists with
    /// one granted service each.
    fn fixture() -> Fixture {
        let (anchor, anchor_key) = mint_certificate("LOTL Signer");
        let (be, be_key) = mint_certificate("BE TL Signer");
        let (fr, fr_key) = mint_certificate("FR TL Signer");
        let (be_ca, _) = mint_certificate("BE QTSP CA");
        let (fr_ca, _) = mint_certificate("FR QTSP CA");

        let fetcher = Arc::new(StubFetcher::new());
        let lotl = lotl_content(
            &[&anchor],
            &[
                ("BE", "https://tl.example.org/be.json", &be),
                ("FR", "https://tl.example.org/fr.json", &fr),
            ],
            &[],
        );
        fetcher.serve(LOTL_URL, Bytes::from(seal(&lotl, &anchor, &anchor_key)));
        fetcher.serve(
            "https://tl.example.org/be.json",
            Bytes::from(seal(&tl_content("BE", &[&be_ca]), &be, &be_key)),
        );
        fetcher.serve(
            "https://tl.example.org/fr.json",
            Bytes::from(seal(&tl_content("FR", &[&fr_ca]), &fr, &fr_key)),
        );

        let dir = tempfile::tempdir().unwrap();
        let metrics = Arc::new(CountingRecorder::default());
        let job = TlValidationJob::builder()
            .lotl(
                LotlDescriptor::new(
                    Url::parse(LOTL_URL).unwrap(),
                    KeyStoreCertificateSource::new([anchor]),
                )
                .with_official_journal(Url::parse(OJ_URL).unwrap()),
            )
            .file_cache(dir.path(), fetcher.clone())
            .metrics(metrics.clone())
            .build()
            .unwrap();

        Fixture {
            fetcher,
            job,
            metrics,
            dir,
        }
    }

    #[tokio::test]
    async fn test_cycle_publishes_member_entries() {
        let f = fixture();

        let result = f.job.run_cycle().await.unwrap();

        assert!(result.is_published());
        assert_eq!(result.aggregate_version(), 1);
        assert_eq!(result.outcomes().len(), 2);
        let snapshot = f.job.aggregate().current_anchors();
        assert_eq!(snapshot.version(), 1);
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.entries_for_territory("BE").count(), 1);
        assert_eq!(f.job.state(), JobState::Idle);
        assert_eq!(f.metrics.published(), vec![1]);
    }

    #[tokio::test]
    async fn test_lotl_unavailable_fails_closed_and_keeps_aggregate() {
        let f = fixture();
        f.job.run_cycle().await.unwrap();
        // Drop the cached copy too, so neither loader can serve the list.
        FileCacheLoader::offline(f.dir.path())
            .remove(&Url::parse(LOTL_URL).unwrap())
            .unwrap();
        f.fetcher.fail(LOTL_URL);

        let result = f.job.run_cycle().await.unwrap();

        assert!(matches!(
            result.status(),
            CycleStatus::FailedClosed(CycleFailure::LotlUnavailable { .. })
        ));
        assert_eq!(result.aggregate_version(), 1);
        assert_eq!(f.job.aggregate().version(), 1);
        assert_eq!(f.metrics.errors(MetricsErrorKind::LotlUnavailable), 1);
    }

    #[tokio::test]
    async fn test_untrusted_member_list_is_excluded() {
        let f = fixture();
        let (rogue, rogue_key) = mint_certificate("Rogue");
        let (rogue_ca, _) = mint_certificate("Rogue CA");
        f.fetcher.serve(
            "https://tl.example.org/fr.json",
            Bytes::from(seal(&tl_content("FR", &[&rogue_ca]), &rogue, &rogue_key)),
        );

        let result = f.job.run_cycle().await.unwrap();

        assert!(result.is_published());
        let failed: Vec<_> = result.failed_lists().map(Url::as_str).collect();
        assert_eq!(failed, vec!["https://tl.example.org/fr.json"]);
        assert!(matches!(
            result.outcome(&Url::parse("https://tl.example.org/fr.json").unwrap()),
            Some(ListOutcome::Failed {
                failure: ListFailure::Signature(_),
                ..
            })
        ));
        assert!(!f.job.aggregate().contains_public_key(rogue_ca.public_key_der()));
        assert_eq!(f.job.aggregate().current_anchors().len(), 1);
    }

    #[tokio::test]
    async fn test_history_is_bounded() {
        let f = fixture();
        let job = TlValidationJob::build_with(
            TrustedCertificateAggregate::new(),
            f.job.inner.lotl.clone(),
            Vec::new(),
            Arc::new(FileCacheLoader::online(f.dir.path(), f.fetcher.clone())),
            Arc::new(FileCacheLoader::offline(f.dir.path())),
            JobConfig {
                history_size: 2,
                ..JobConfig::default()
            },
            None,
        );

        for _ in 0..3 {
            job.run_cycle().await.unwrap();
        }

        let history = job.history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].aggregate_version(), 2);
        assert_eq!(job.last_result().unwrap().aggregate_version(), 3);
    }

    #[tokio::test]
    async fn test_concurrent_run_is_skipped() {
        let f = fixture();
        f.fetcher.delay(Duration::from_millis(200));

        let first = f.job.clone();
        let running = tokio::spawn(async move { first.run_cycle().await });
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(f.job.is_running());
        assert_eq!(f.job.run_cycle().await.unwrap_err(), JobError::AlreadyRunning);
        assert!(running.await.unwrap().is_ok());
        assert!(!f.job.is_running());
    }

    #[tokio::test]
    async fn test_scheduler_runs_and_shuts_down() {
        let f = fixture();
        let mut updates = f.job.aggregate().updated();

        f.job.spawn().await.unwrap();
        let version = tokio::time::timeout(Duration::from_secs(5), updates.wait_for(|&v| v >= 1))
            .await
            .expect("first cycle runs immediately")
            .unwrap();
        assert_eq!(version, 1);

        f.job
            .shutdown_with_timeout(Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(f.job.run_cycle().await.unwrap_err(), JobError::Closed);
        assert_eq!(f.job.spawn().await.unwrap_err(), JobError::Closed);
    }

}
