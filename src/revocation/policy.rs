use crate::cert::Certificate;
use std::time::Duration;
use time::{OffsetDateTime, PrimitiveDateTime};
use x509_parser::prelude::FromDer;
use x509_parser::revocation_list::CertificateRevocationList;

/// Default refresh delay for CRLs that declare no `nextUpdate`.
pub const DEFAULT_CRL_NEXT_UPDATE_DELAY: Duration = Duration::from_secs(600);

/// Default upper bound on how long a CRL is cached.
pub const DEFAULT_CRL_MAX_NEXT_UPDATE_DELAY: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Default upper bound on how long AIA certificates are cached.
pub const DEFAULT_AIA_MAX_NEXT_UPDATE_DELAY: Duration = Duration::from_secs(24 * 60 * 60);

/// How a freshly fetched payload's `next_update` is computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextUpdatePolicy {
    /// `retrieved_at + delay`.
    FixedDelay(Duration),

    /// The CRL's own `nextUpdate`, capped at `retrieved_at + max_delay`.
    /// CRLs without `nextUpdate`, and payloads that are not a CRL, use
    /// `retrieved_at + default_delay`.
    CrlNextUpdate {
        /// Delay used when the CRL declares no `nextUpdate`.
        default_delay: Duration,
        /// Upper bound on the computed delay.
        max_delay: Duration,
    },

    /// Earliest `notAfter` among the certificates in the payload, capped at
    /// `retrieved_at + max_delay`. Payloads without a parseable certificate
    /// use `retrieved_at + default_delay`.
    CertificateValidity {
        /// Delay used when the payload declares no validity.
        default_delay: Duration,
        /// Upper bound on the computed delay.
        max_delay: Duration,
    },
}

impl NextUpdatePolicy {
    /// Computes the refresh deadline for `payload`.
    ///
    /// Never earlier than `retrieved_at`. Delays past the last representable
    /// date saturate to that date.
    pub fn next_update(&self, payload: &[u8], retrieved_at: OffsetDateTime) -> OffsetDateTime {
        let next = match *self {
            Self::FixedDelay(delay) => saturating_add(retrieved_at, delay),
            Self::CrlNextUpdate {
                default_delay,
                max_delay,
            } => match crl_next_update(payload) {
                Some(declared) => declared.min(saturating_add(retrieved_at, max_delay)),
                None => saturating_add(retrieved_at, default_delay),
            },
            Self::CertificateValidity {
                default_delay,
                max_delay,
            } => {
                let earliest_expiry = Certificate::parse_many(payload)
                    .ok()
                    .and_then(|certs| certs.iter().map(|c| c.validity().not_after).min());
                match earliest_expiry {
                    Some(not_after) => not_after.min(saturating_add(retrieved_at, max_delay)),
                    None => saturating_add(retrieved_at, default_delay),
                }
            }
        };
        next.max(retrieved_at)
    }
}

fn saturating_add(at: OffsetDateTime, delay: Duration) -> OffsetDateTime {
    time::Duration::try_from(delay)
        .ok()
        .and_then(|delay| at.checked_add(delay))
        .unwrap_or_else(|| PrimitiveDateTime::MAX.assume_utc())
}

/// `nextUpdate` of a DER or PEM encoded CRL, if it parses and declares one.
fn crl_next_update(payload: &[u8]) -> Option<OffsetDateTime> {
    let pem;
    let der = if payload.trim_ascii_start().starts_with(b"-----BEGIN") {
        let (_, parsed) = x509_parser::pem::parse_x509_pem(payload).ok()?;
        pem = parsed;
        pem.contents.as_slice()
    } else {
        payload
    };
    let (_, crl) = CertificateRevocationList::from_der(der).ok()?;
    crl.next_update().map(|t| t.to_datetime())
}

/// The two kinds of revocation data cached by the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RevocationKind {
    /// Certificate revocation lists.
    Crl,
    /// Issuer certificates reached through Authority Information Access.
    Aia,
}

impl RevocationKind {
    /// Namespace the kind is stored under by default.
    pub const fn default_namespace(self) -> &'static str {
        match self {
            Self::Crl => "crl_cache",
            Self::Aia => "aia_cache",
        }
    }

    /// Default refresh policy for the kind.
    pub const fn default_policy(self) -> NextUpdatePolicy {
        match self {
            Self::Crl => NextUpdatePolicy::CrlNextUpdate {
                default_delay: DEFAULT_CRL_NEXT_UPDATE_DELAY,
                max_delay: DEFAULT_CRL_MAX_NEXT_UPDATE_DELAY,
            },
            Self::Aia => NextUpdatePolicy::CertificateValidity {
                default_delay: DEFAULT_CRL_NEXT_UPDATE_DELAY,
                max_delay: DEFAULT_AIA_MAX_NEXT_UPDATE_DELAY,
            },
        }
    }
}
