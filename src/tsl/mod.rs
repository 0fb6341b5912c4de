//! Trust-list validation.
//!
//! A [`TlValidationJob`] loads the list of trusted lists (LOTL), roots it in an
//! out-of-band key store (directly, or through its chain of pivot lists),
//! then loads and validates each member trust list it points to. Certificates
//! of accepted trust services are published into a
//! [`TrustedCertificateAggregate`](crate::aggregate::TrustedCertificateAggregate)
//! as one atomic snapshot per cycle.
//!
//! Failure semantics:
//!
//! - a LOTL that cannot be loaded, rooted or verified fails the cycle closed
//!   and the previous snapshot stays published;
//! - a member list that fails is excluded and reported in the
//!   [`ValidationCycleResult`], the rest are published.

mod builder;
mod document;
mod job;
mod pivot;
mod result;
mod source;
mod supervisor;

pub use builder::{JobConfig, RetryConfig, TlValidationJobBuilder};
pub use document::{
    Envelope, PointerContent, ServiceContent, SignedTrustList, TrustListContent, TrustService,
    TslPointer,
};
pub use job::{JobError, JobState, TlValidationJob};
pub use pivot::{PivotError, DEFAULT_MAX_PIVOT_DEPTH};
pub use result::{CycleFailure, CycleStatus, ListFailure, ListOutcome, ValidationCycleResult};
pub use source::{
    AcceptAllServices, AnnouncementPredicate, AnyAnnouncement, GrantedTrustService,
    LotlDescriptor, OfficialJournalSchemeInformationUri, ServicePredicate, TrustListDescriptor,
    DEFAULT_LOTL_TERRITORY, SERVICE_STATUS_GRANTED,
};
