//! The published set of trust anchors.
//!
//! Readers call [`TrustedCertificateAggregate::current_anchors`] and get one
//! complete, immutable [`AnchorSnapshot`]. The validation job replaces the
//! whole snapshot at once; a reader never observes a mix of two versions.

use crate::cert::{Certificate, Validity};
use arc_swap::ArcSwap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use time::OffsetDateTime;
use tokio::sync::watch;

/// One trusted certificate extracted from a validated trust list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateEntry {
    /// The certificate itself.
    pub certificate: Certificate,
    /// Territory of the trust list the entry came from.
    pub territory: String,
    /// Name of the trust service.
    pub service_name: String,
    /// Name of the trust service provider.
    pub provider: String,
    /// Status URI of the trust service.
    pub service_status: String,
}

impl CertificateEntry {
    /// Subject distinguished name.
    pub fn identity(&self) -> &str {
        self.certificate.subject()
    }

    /// Issuer distinguished name.
    pub fn issuer(&self) -> &str {
        self.certificate.issuer()
    }

    /// DER-encoded `SubjectPublicKeyInfo`.
    pub fn public_key(&self) -> &[u8] {
        self.certificate.public_key_der()
    }

    /// Validity window of the certificate.
    pub fn validity(&self) -> Validity {
        self.certificate.validity()
    }
}

/// One published version of the trust anchors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnchorSnapshot {
    version: u64,
    produced_at: OffsetDateTime,
    entries: Vec<CertificateEntry>,
}

impl AnchorSnapshot {
    fn empty() -> Self {
        Self {
            version: 0,
            produced_at: OffsetDateTime::UNIX_EPOCH,
            entries: Vec::new(),
        }
    }

    /// Monotonic version. `0` means nothing was ever published.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// When this version was published.
    pub fn produced_at(&self) -> OffsetDateTime {
        self.produced_at
    }

    /// The trusted entries.
    pub fn entries(&self) -> &[CertificateEntry] {
        &self.entries
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the snapshot holds no entry.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns `true` if an entry carries this DER-encoded public key.
    pub fn contains_public_key(&self, spki_der: &[u8]) -> bool {
        self.entries.iter().any(|e| e.public_key() == spki_der)
    }

    /// Entries coming from the given territory.
    pub fn entries_for_territory<'a>(
        &'a self,
        territory: &'a str,
    ) -> impl Iterator<Item = &'a CertificateEntry> + 'a {
        self.entries.iter().filter(move |e| e.territory == territory)
    }
}

/// Returned by [`AggregateUpdates::changed`] once the aggregate is dropped.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("trusted certificate aggregate is closed")]
pub struct AggregateClosed;

/// Handle for receiving publication notifications.
///
/// Each receiver observes the latest version; a slow receiver may skip
/// intermediate versions.
#[derive(Clone, Debug)]
pub struct AggregateUpdates {
    rx: watch::Receiver<u64>,
}

impl AggregateUpdates {
    /// Waits for the next publication and returns the new version.
    ///
    /// # Errors
    ///
    /// Returns [`AggregateClosed`] once the aggregate has been dropped.
    pub async fn changed(&mut self) -> Result<u64, AggregateClosed> {
        self.rx.changed().await.map_err(|_| AggregateClosed)?;
        Ok(*self.rx.borrow())
    }

    /// Returns the last published version without waiting.
    pub fn last(&self) -> u64 {
        *self.rx.borrow()
    }

    /// Waits until the version satisfies `f`. Returns immediately if it already does.
    ///
    /// # Errors
    ///
    /// Returns [`AggregateClosed`] once the aggregate has been dropped.
    pub async fn wait_for<F>(&mut self, mut f: F) -> Result<u64, AggregateClosed>
    where
        F: FnMut(&u64) -> bool,
    {
        let current = self.last();
        if f(&current) {
            return Ok(current);
        }
        loop {
            let version = self.changed().await?;
            if f(&version) {
                return Ok(version);
            }
        }
    }
}

/// Versioned, read-mostly registry of trust anchors.
///
/// Cheap to clone; clones share the same state.
#[derive(Clone)]
pub struct TrustedCertificateAggregate {
    inner: Arc<Inner>,
}

struct Inner {
    current: ArcSwap<AnchorSnapshot>,
    // Serializes publishers so versions are assigned in swap order.
    publish_lock: Mutex<()>,
    version: AtomicU64,
    update_tx: watch::Sender<u64>,
}

impl fmt::Debug for TrustedCertificateAggregate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrustedCertificateAggregate")
            .field("current", &"<ArcSwap<AnchorSnapshot>>")
            .field("version", &self.inner.version.load(Ordering::Relaxed))
            .finish()
    }
}

impl Default for TrustedCertificateAggregate {
    fn default() -> Self {
        Self::new()
    }
}

impl TrustedCertificateAggregate {
    /// Creates an empty aggregate at version 0.
    pub fn new() -> Self {
        let (update_tx, _) = watch::channel(0u64);
        Self {
            inner: Arc::new(Inner {
                current: ArcSwap::from_pointee(AnchorSnapshot::empty()),
                publish_lock: Mutex::new(()),
                version: AtomicU64::new(0),
                update_tx,
            }),
        }
    }

    /// Returns the current snapshot. Lock-free.
    pub fn current_anchors(&self) -> Arc<AnchorSnapshot> {
        self.inner.current.load_full()
    }

    /// Version of the current snapshot.
    pub fn version(&self) -> u64 {
        self.inner.current.load().version
    }

    /// Returns `true` if the current snapshot trusts this public key.
    pub fn contains_public_key(&self, spki_der: &[u8]) -> bool {
        self.inner.current.load().contains_public_key(spki_der)
    }

    /// Subscribes to publication notifications.
    pub fn updated(&self) -> AggregateUpdates {
        AggregateUpdates {
            rx: self.inner.update_tx.subscribe(),
        }
    }

    /// Replaces the snapshot with `entries` and returns the new version.
    pub fn publish(&self, entries: Vec<CertificateEntry>) -> u64 {
        // Guards no data, poisoning is harmless.
        let _guard = self
            .inner
            .publish_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let version = self.inner.version.fetch_add(1, Ordering::AcqRel) + 1;
        self.inner.current.store(Arc::new(AnchorSnapshot {
            version,
            produced_at: OffsetDateTime::now_utc(),
            entries,
        }));
        self.inner.update_tx.send_replace(version);
        version
    }
}
