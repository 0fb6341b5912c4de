use super::pivot::PivotError;
use crate::error::{ParseError, SignatureValidationError};
use crate::loader::LoaderError;
use std::collections::BTreeMap;
use thiserror::Error;
use time::OffsetDateTime;
use url::Url;

/// Why a whole cycle failed closed. The previous aggregate stays published.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CycleFailure {
    /// The top-level list could not be loaded online or offline.
    #[error("top-level list {url} is unavailable: {source}")]
    LotlUnavailable {
        /// List location.
        url: Url,
        /// Loader error.
        #[source]
        source: LoaderError,
    },

    /// The top-level list is malformed.
    #[error("top-level list {url} is malformed: {source}")]
    LotlMalformed {
        /// List location.
        url: Url,
        /// Parse error.
        #[source]
        source: ParseError,
    },

    /// The top-level list could not be rooted in the key store.
    #[error(transparent)]
    Pivot(#[from] PivotError),

    /// The top-level list signature is not trusted.
    #[error("top-level list {url} signature rejected: {source}")]
    LotlSignature {
        /// List location.
        url: Url,
        /// Verification error.
        #[source]
        source: SignatureValidationError,
    },
}

/// Why a single member list was excluded from the aggregate.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ListFailure {
    /// The list could not be loaded online or offline.
    #[error("unavailable: {0}")]
    Unavailable(#[source] LoaderError),

    /// The list is malformed.
    #[error("malformed: {0}")]
    Malformed(#[source] ParseError),

    /// The list signature is not trusted.
    #[error("signature rejected: {0}")]
    Signature(#[source] SignatureValidationError),

    /// The list declares another territory than the one it was expected for.
    #[error("territory mismatch: expected {expected}, found {found}")]
    TerritoryMismatch {
        /// Territory of the descriptor.
        expected: String,
        /// Territory declared by the list.
        found: String,
    },
}

/// Outcome of one member list within a cycle.
#[derive(Debug)]
pub enum ListOutcome {
    /// The list was validated and its entries aggregated.
    Accepted {
        /// Territory of the list.
        territory: String,
        /// Sequence number of the validated issue.
        sequence_number: u64,
        /// Number of certificate entries contributed.
        entries: usize,
    },
    /// The list was excluded.
    Failed {
        /// Territory the list was expected for.
        territory: String,
        /// Reason for the exclusion.
        failure: ListFailure,
    },
}

impl ListOutcome {
    /// Returns `true` if the list was accepted.
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted { .. })
    }

    /// Territory of the list.
    pub fn territory(&self) -> &str {
        match self {
            Self::Accepted { territory, .. } | Self::Failed { territory, .. } => territory,
        }
    }
}

/// Overall status of a validation cycle.
#[derive(Debug)]
pub enum CycleStatus {
    /// A new aggregate version was published.
    Published {
        /// The published version.
        version: u64,
    },
    /// The cycle failed closed; the previous aggregate stays published.
    FailedClosed(CycleFailure),
}

/// Record of one validation cycle.
#[derive(Debug)]
pub struct ValidationCycleResult {
    pub(crate) status: CycleStatus,
    pub(crate) outcomes: BTreeMap<Url, ListOutcome>,
    pub(crate) aggregate_version: u64,
    pub(crate) started_at: OffsetDateTime,
    pub(crate) produced_at: OffsetDateTime,
}

impl ValidationCycleResult {
    /// Overall status.
    pub fn status(&self) -> &CycleStatus {
        &self.status
    }

    /// Returns `true` if the cycle published a new aggregate.
    pub fn is_published(&self) -> bool {
        matches!(self.status, CycleStatus::Published { .. })
    }

    /// Per member list outcome, keyed by list URL.
    pub fn outcomes(&self) -> &BTreeMap<Url, ListOutcome> {
        &self.outcomes
    }

    /// Outcome for the list at `url`.
    pub fn outcome(&self, url: &Url) -> Option<&ListOutcome> {
        self.outcomes.get(url)
    }

    /// URLs of the lists that were excluded.
    pub fn failed_lists(&self) -> impl Iterator<Item = &Url> {
        self.outcomes
            .iter()
            .filter(|(_, outcome)| !outcome.is_accepted())
            .map(|(url, _)| url)
    }

    /// Aggregate version in effect after the cycle (unchanged when it failed closed).
    pub fn aggregate_version(&self) -> u64 {
        self.aggregate_version
    }

    /// When the cycle started.
    pub fn started_at(&self) -> OffsetDateTime {
        self.started_at
    }

    /// When the cycle finished.
    pub fn produced_at(&self) -> OffsetDateTime {
        self.produced_at
    }
}
