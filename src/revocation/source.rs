use super::{CacheStatus, CachedPayload, NextUpdatePolicy, RevocationKind, RevocationSourceError};
use crate::error::CacheError;
use crate::fetch::Fetcher;
use crate::metrics::{MetricsErrorKind, MetricsRecorder};
use crate::prelude::{debug, info, warn};
use crate::store::{CacheRecord, CacheStore, Namespace};
use std::fmt;
use std::sync::Arc;
use time::OffsetDateTime;
use url::Url;

/// Revocation data cached in a [`CacheStore`] namespace.
///
/// Several sources may share one store as long as their namespaces differ.
/// Concurrent `get` calls for the same expired key may both fetch; the last
/// write wins and both return a complete payload.
#[derive(Clone)]
pub struct CachedRevocationSource {
    namespace: Namespace,
    policy: NextUpdatePolicy,
    store: Arc<dyn CacheStore>,
    fetcher: Arc<dyn Fetcher>,
    metrics: Option<Arc<dyn MetricsRecorder>>,
}

impl fmt::Debug for CachedRevocationSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedRevocationSource")
            .field("namespace", &self.namespace)
            .field("policy", &self.policy)
            .field("store", &self.store)
            .field("fetcher", &self.fetcher)
            .field(
                "metrics",
                &self.metrics.as_ref().map(|_| "<MetricsRecorder>"),
            )
            .finish()
    }
}

impl CachedRevocationSource {
    /// Creates a source storing its records under `namespace`.
    pub fn new(
        namespace: Namespace,
        policy: NextUpdatePolicy,
        store: Arc<dyn CacheStore>,
        fetcher: Arc<dyn Fetcher>,
    ) -> Self {
        Self {
            namespace,
            policy,
            store,
            fetcher,
            metrics: None,
        }
    }

    /// Creates a source for `kind` with its default namespace and policy.
    ///
    /// # Errors
    ///
    /// Never fails for the built-in kinds; the `Result` carries namespace validation.
    pub fn for_kind(
        kind: RevocationKind,
        store: Arc<dyn CacheStore>,
        fetcher: Arc<dyn Fetcher>,
    ) -> Result<Self, CacheError> {
        Ok(Self::new(
            Namespace::new(kind.default_namespace())?,
            kind.default_policy(),
            store,
            fetcher,
        ))
    }

    /// CRL source: namespace `crl_cache`, refreshed at the CRL's `nextUpdate`
    /// (capped at 7 days, 600 s when undeclared).
    ///
    /// # Errors
    ///
    /// See [`CachedRevocationSource::for_kind`].
    pub fn crl(store: Arc<dyn CacheStore>, fetcher: Arc<dyn Fetcher>) -> Result<Self, CacheError> {
        Self::for_kind(RevocationKind::Crl, store, fetcher)
    }

    /// AIA source: namespace `aia_cache`, refresh at the certificates' expiry, capped at 24 h.
    ///
    /// # Errors
    ///
    /// See [`CachedRevocationSource::for_kind`].
    pub fn aia(store: Arc<dyn CacheStore>, fetcher: Arc<dyn Fetcher>) -> Result<Self, CacheError> {
        Self::for_kind(RevocationKind::Aia, store, fetcher)
    }

    /// Replaces the refresh policy.
    #[must_use]
    pub fn with_policy(mut self, policy: NextUpdatePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Attaches a metrics recorder.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsRecorder>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Namespace the records live in.
    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    /// Creates the namespace. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`RevocationSourceError::Cache`] if the store rejects the operation.
    /// Callers treat this as fatal at startup.
    pub fn initialize(&self) -> Result<(), RevocationSourceError> {
        self.store.create_namespace(&self.namespace)?;
        info!("Revocation cache initialized: namespace={}", self.namespace);
        Ok(())
    }

    /// Drops the namespace and every cached record.
    ///
    /// # Errors
    ///
    /// Returns [`RevocationSourceError::Cache`] if the store rejects the operation.
    pub fn destroy(&self) -> Result<(), RevocationSourceError> {
        self.store.drop_namespace(&self.namespace)?;
        info!("Revocation cache destroyed: namespace={}", self.namespace);
        Ok(())
    }

    /// Returns the payload for `identifier`.
    ///
    /// A fresh record is returned without a network call. An expired or absent
    /// record triggers a fetch; when that fetch fails an expired record is
    /// still returned, flagged [`CacheStatus::Stale`].
    ///
    /// # Errors
    ///
    /// Returns [`RevocationSourceError::Fetch`] if the fetch fails and no
    /// record is stored.
    pub async fn get(&self, identifier: &Url) -> Result<CachedPayload, RevocationSourceError> {
        let key = identifier.as_str();

        let stored = match self.load(key).await {
            Ok(stored) => stored,
            Err(e) => {
                warn!(
                    "Revocation cache unavailable; fetching without cache: namespace={}, key={}, error={}",
                    self.namespace, key, e
                );
                self.record_error(MetricsErrorKind::CacheStoreUnavailable);
                return self.fetch_uncached(identifier).await;
            }
        };

        if let Some(record) = &stored {
            if record.is_fresh(OffsetDateTime::now_utc()) {
                self.record_lookup(true);
                debug!("Revocation cache hit: namespace={}, key={}", self.namespace, key);
                return Ok(CachedPayload::new(
                    record.payload().clone(),
                    CacheStatus::Cached,
                    Some(record.next_update()),
                ));
            }
        }
        self.record_lookup(false);

        match self.fetcher.fetch(identifier).await {
            Ok(payload) => {
                let retrieved_at = OffsetDateTime::now_utc();
                let next_update = self.policy.next_update(&payload, retrieved_at);
                let record = CacheRecord::new(key, payload, retrieved_at, next_update);

                if let Err(e) = self.save(record.clone()).await {
                    warn!(
                        "Failed to store revocation payload: namespace={}, key={}, error={}",
                        self.namespace, key, e
                    );
                    self.record_error(MetricsErrorKind::CacheStoreUnavailable);
                }
                debug!(
                    "Revocation payload refreshed: namespace={}, key={}, next_update={}",
                    self.namespace,
                    key,
                    record.next_update()
                );
                Ok(CachedPayload::new(
                    record.payload().clone(),
                    CacheStatus::Fetched,
                    Some(record.next_update()),
                ))
            }
            Err(e) => match stored {
                Some(record) => {
                    warn!(
                        "Refresh failed; serving stale revocation payload: namespace={}, key={}, next_update={}, error={}",
                        self.namespace,
                        key,
                        record.next_update(),
                        e
                    );
                    self.record_error(MetricsErrorKind::StaleRevocationServed);
                    Ok(CachedPayload::new(
                        record.payload().clone(),
                        CacheStatus::Stale,
                        Some(record.next_update()),
                    ))
                }
                None => {
                    self.record_error(MetricsErrorKind::RevocationFetch);
                    Err(e.into())
                }
            },
        }
    }

    async fn load(&self, key: &str) -> Result<Option<CacheRecord>, CacheError> {
        let store = Arc::clone(&self.store);
        let namespace = self.namespace.clone();
        let key = key.to_owned();
        tokio::task::spawn_blocking(move || store.get(&namespace, &key))
            .await
            .unwrap_or_else(|e| Err(CacheError::Task(e.to_string())))
    }

    async fn save(&self, record: CacheRecord) -> Result<(), CacheError> {
        let store = Arc::clone(&self.store);
        let namespace = self.namespace.clone();
        tokio::task::spawn_blocking(move || store.put(&namespace, &record))
            .await
            .unwrap_or_else(|e| Err(CacheError::Task(e.to_string())))
    }

    async fn fetch_uncached(&self, identifier: &Url) -> Result<CachedPayload, RevocationSourceError> {
        match self.fetcher.fetch(identifier).await {
            Ok(payload) => Ok(CachedPayload::new(payload, CacheStatus::Uncached, None)),
            Err(e) => {
                self.record_error(MetricsErrorKind::RevocationFetch);
                Err(e.into())
            }
        }
    }

    fn record_lookup(&self, hit: bool) {
        if let Some(metrics) = self.metrics.as_deref() {
            metrics.record_cache_lookup(self.namespace.as_str(), hit);
        }
    }

    fn record_error(&self, kind: MetricsErrorKind) {
        if let Some(metrics) = self.metrics.as_deref() {
            metrics.record_error(kind);
        }
    }
}
