//! Pivot resolution: rooting the current top-level list in the out-of-band
//! key store through its chain of predecessor pivot lists.
//!
//! The chain is `[current, pivot_1 (newest), ..., pivot_n]`. Each pivot
//! announces the signer set of the lists issued after it, so the signer of
//! element `i` must belong to the set announced by element `i + 1`. The walk
//! stops at the first element signed by a key-store anchor whose announcement
//! is accepted. The current list is then validated against the set announced
//! by `pivot_1`.

use super::document::SignedTrustList;
use super::source::LotlDescriptor;
use crate::cert::Certificate;
use crate::error::{ParseError, SignatureValidationError};
use crate::loader::{FileLoader, LoaderError};
use crate::prelude::debug;
use std::collections::BTreeSet;
use thiserror::Error;
use url::Url;

/// Default bound on the number of pivots followed.
pub const DEFAULT_MAX_PIVOT_DEPTH: usize = 16;

/// Why the current list could not be rooted in the key store.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PivotError {
    /// A pivot could not be loaded online or offline.
    #[error("pivot {url} is unavailable: {source}")]
    Unavailable {
        /// Pivot location.
        url: Url,
        /// Loader error.
        #[source]
        source: LoaderError,
    },

    /// A pivot is not a well-formed signed list.
    #[error("pivot {url} is malformed: {source}")]
    Malformed {
        /// Pivot location.
        url: Url,
        /// Parse error.
        #[source]
        source: ParseError,
    },

    /// A pivot does not announce any signer set for its own territory.
    #[error("pivot {url} announces no signer set")]
    MissingAnnouncement {
        /// Pivot location.
        url: Url,
    },

    /// The signer of a list is not in the set announced by the next pivot.
    #[error("chain broken at pivot {url}: signer `{subject}` is not announced")]
    ChainBroken {
        /// Pivot that failed to vouch for its successor.
        url: Url,
        /// Subject of the signer that is not announced.
        subject: String,
    },

    /// A pivot's own signature does not verify.
    #[error("pivot {url} has an invalid signature: {source}")]
    InvalidSignature {
        /// Pivot location.
        url: Url,
        /// Verification error.
        #[source]
        source: SignatureValidationError,
    },

    /// No element of the chain within the depth bound is anchored.
    #[error("no trust anchor reached after {depth} pivot(s)")]
    AnchorNotReached {
        /// Number of pivots walked.
        depth: usize,
    },
}

/// Resolves the signer set the current top-level list must be validated against.
///
/// When pivot support is disabled only the current list itself may be anchored.
///
/// # Errors
///
/// Returns [`PivotError`] when the chain is broken, a pivot is unusable, or
/// no anchor is reached within `max_depth` pivots.
pub(crate) async fn resolve_signers(
    current: &SignedTrustList,
    lotl: &LotlDescriptor,
    loader: &dyn FileLoader,
    max_depth: usize,
) -> Result<BTreeSet<Certificate>, PivotError> {
    if lotl.anchor_accepts(current) {
        debug!("Top-level list anchored directly: url={}", lotl.url());
        return Ok(lotl.anchors().certificates().clone());
    }
    if !lotl.pivot_support() {
        return Err(PivotError::AnchorNotReached { depth: 0 });
    }

    let chain = current.pivots();
    let depth = chain.len().min(max_depth);
    let mut successor_signer = current.signer().clone();
    let mut newest_announcement: Option<BTreeSet<Certificate>> = None;

    for url in &chain[..depth] {
        let bytes = loader
            .get(url)
            .await
            .map_err(|source| PivotError::Unavailable {
                url: url.clone(),
                source,
            })?;
        let pivot = SignedTrustList::parse(&bytes).map_err(|source| PivotError::Malformed {
            url: url.clone(),
            source,
        })?;

        let announced = pivot
            .announced_signers()
            .ok_or_else(|| PivotError::MissingAnnouncement { url: url.clone() })?;
        if !announced.contains(&successor_signer) {
            return Err(PivotError::ChainBroken {
                url: url.clone(),
                subject: successor_signer.subject().to_owned(),
            });
        }
        pivot
            .verify_signature()
            .map_err(|source| PivotError::InvalidSignature {
                url: url.clone(),
                source,
            })?;

        let newest = newest_announcement.get_or_insert_with(|| announced.clone());
        if lotl.anchor_accepts(&pivot) {
            debug!("Pivot chain anchored: pivot={}", url);
            return Ok(newest.clone());
        }
        successor_signer = pivot.signer().clone();
    }

    Err(PivotError::AnchorNotReached { depth })
}
