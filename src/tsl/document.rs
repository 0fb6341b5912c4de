//! Signed trust-list documents.
//!
//! A document travels as a JSON [`Envelope`]: the base64 content bytes, a
//! detached signature over those exact bytes, and the DER signing
//! certificate. The content is itself JSON ([`TrustListContent`]).

use crate::cert::Certificate;
use crate::error::{ParseError, SignatureValidationError};
use crate::signature::verify_signature;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use time::OffsetDateTime;
use url::Url;

/// Wire form of a signed document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Base64 of the content bytes.
    pub content: String,
    /// Base64 of the signature over the content bytes.
    pub signature: String,
    /// Base64 of the DER signing certificate.
    pub signing_certificate: String,
}

impl Envelope {
    /// Wraps already-signed content.
    pub fn new(content: &[u8], signature: &[u8], signer: &Certificate) -> Self {
        Self {
            content: STANDARD.encode(content),
            signature: STANDARD.encode(signature),
            signing_certificate: STANDARD.encode(signer.as_bytes()),
        }
    }

    /// Serializes the envelope to JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::Json`] if serialization fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>, ParseError> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// Content of a trust list or of a list of trusted lists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustListContent {
    /// Territory code (`EU` for the top-level list).
    pub territory: String,
    /// Monotonic sequence number of the issue.
    pub sequence_number: u64,
    /// Issue date.
    #[serde(with = "time::serde::rfc3339")]
    pub issue_date: OffsetDateTime,
    /// Date by which the next issue is due.
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub next_update: Option<OffsetDateTime>,
    /// Announcement URIs (e.g. the Official Journal publication).
    #[serde(default)]
    pub scheme_information_uris: Vec<Url>,
    /// Predecessor pivot lists, newest first.
    #[serde(default)]
    pub pivots: Vec<Url>,
    /// Pointers to other lists.
    #[serde(default)]
    pub pointers: Vec<PointerContent>,
    /// Trust services.
    #[serde(default)]
    pub services: Vec<ServiceContent>,
}

/// Wire form of a [`TslPointer`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointerContent {
    /// Territory of the pointed list.
    pub territory: String,
    /// Location of the pointed list.
    pub location: Url,
    /// Base64 DER certificates allowed to sign the pointed list.
    #[serde(default)]
    pub signing_certificates: Vec<String>,
}

/// Wire form of a [`TrustService`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceContent {
    /// Service name.
    pub name: String,
    /// Provider name.
    pub provider: String,
    /// Service type URI.
    pub service_type: String,
    /// Service status URI.
    pub status: String,
    /// Base64 DER service certificates.
    #[serde(default)]
    pub certificates: Vec<String>,
}

/// Pointer from a list of trusted lists to another list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TslPointer {
    /// Territory of the pointed list.
    pub territory: String,
    /// Location of the pointed list.
    pub location: Url,
    /// Certificates allowed to sign the pointed list.
    pub signing_certificates: BTreeSet<Certificate>,
}

/// One trust service of a trust list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustService {
    /// Service name.
    pub name: String,
    /// Provider name.
    pub provider: String,
    /// Service type URI.
    pub service_type: String,
    /// Service status URI.
    pub status: String,
    /// Service certificates.
    pub certificates: Vec<Certificate>,
}

/// A parsed, not yet trusted, signed trust list.
#[derive(Debug, Clone)]
pub struct SignedTrustList {
    content_bytes: Vec<u8>,
    signature: Vec<u8>,
    signer: Certificate,
    territory: String,
    sequence_number: u64,
    issue_date: OffsetDateTime,
    next_update: Option<OffsetDateTime>,
    scheme_information_uris: Vec<Url>,
    pivots: Vec<Url>,
    pointers: Vec<TslPointer>,
    services: Vec<TrustService>,
}

impl SignedTrustList {
    /// Parses an envelope and its content. No signature check happens here.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError`] for malformed JSON, base64 or certificates.
    pub fn parse(bytes: &[u8]) -> Result<Self, ParseError> {
        let envelope: Envelope = serde_json::from_slice(bytes)?;
        let content_bytes = decode("content", &envelope.content)?;
        let signature = decode("signature", &envelope.signature)?;
        let signer = Certificate::try_from(decode("signing_certificate", &envelope.signing_certificate)?)?;

        let content: TrustListContent = serde_json::from_slice(&content_bytes)?;

        let pointers = content
            .pointers
            .into_iter()
            .map(|p| {
                Ok(TslPointer {
                    territory: p.territory,
                    location: p.location,
                    signing_certificates: decode_certificates("signing_certificates", &p.signing_certificates)?
                        .into_iter()
                        .collect(),
                })
            })
            .collect::<Result<Vec<_>, ParseError>>()?;

        let services = content
            .services
            .into_iter()
            .map(|s| {
                Ok(TrustService {
                    certificates: decode_certificates("certificates", &s.certificates)?,
                    name: s.name,
                    provider: s.provider,
                    service_type: s.service_type,
                    status: s.status,
                })
            })
            .collect::<Result<Vec<_>, ParseError>>()?;

        Ok(Self {
            content_bytes,
            signature,
            signer,
            territory: content.territory,
            sequence_number: content.sequence_number,
            issue_date: content.issue_date,
            next_update: content.next_update,
            scheme_information_uris: content.scheme_information_uris,
            pivots: content.pivots,
            pointers,
            services,
        })
    }

    /// Checks that the signer belongs to `trusted` and that the signature verifies.
    ///
    /// # Errors
    ///
    /// Returns [`SignatureValidationError::EmptySignerSet`] when `trusted` is
    /// empty, [`SignatureValidationError::UntrustedSigner`] when the signer is
    /// not a member, or the verification error.
    pub fn verify_with(&self, trusted: &BTreeSet<Certificate>) -> Result<(), SignatureValidationError> {
        if trusted.is_empty() {
            return Err(SignatureValidationError::EmptySignerSet);
        }
        if !trusted.contains(&self.signer) {
            return Err(SignatureValidationError::UntrustedSigner {
                subject: self.signer.subject().to_owned(),
            });
        }
        self.verify_signature()
    }

    /// Checks the signature against the embedded signer only, without any trust decision.
    ///
    /// # Errors
    ///
    /// Returns the verification error.
    pub fn verify_signature(&self) -> Result<(), SignatureValidationError> {
        verify_signature(&self.signer, &self.content_bytes, &self.signature)
    }

    /// Certificates this list announces for its own signer, i.e. the pointer
    /// whose territory is the list's own territory.
    pub fn announced_signers(&self) -> Option<&BTreeSet<Certificate>> {
        self.pointers
            .iter()
            .find(|p| p.territory == self.territory)
            .map(|p| &p.signing_certificates)
    }

    /// Pointers to lists of other territories.
    pub fn member_pointers(&self) -> impl Iterator<Item = &TslPointer> {
        self.pointers.iter().filter(move |p| p.territory != self.territory)
    }

    /// The signing certificate.
    pub fn signer(&self) -> &Certificate {
        &self.signer
    }

    /// Territory code.
    pub fn territory(&self) -> &str {
        &self.territory
    }

    /// Sequence number.
    pub fn sequence_number(&self) -> u64 {
        self.sequence_number
    }

    /// Issue date.
    pub fn issue_date(&self) -> OffsetDateTime {
        self.issue_date
    }

    /// Next scheduled issue, if declared.
    pub fn next_update(&self) -> Option<OffsetDateTime> {
        self.next_update
    }

    /// Announcement URIs.
    pub fn scheme_information_uris(&self) -> &[Url] {
        &self.scheme_information_uris
    }

    /// Pivot URLs, newest first.
    pub fn pivots(&self) -> &[Url] {
        &self.pivots
    }

    /// Every pointer, own territory included.
    pub fn pointers(&self) -> &[TslPointer] {
        &self.pointers
    }

    /// Trust services.
    pub fn services(&self) -> &[TrustService] {
        &self.services
    }
}

fn decode(field: &'static str, value: &str) -> Result<Vec<u8>, ParseError> {
    STANDARD
        .decode(value)
        .map_err(|source| ParseError::Base64 { field, source })
}

fn decode_certificates(field: &'static str, values: &[String]) -> Result<Vec<Certificate>, ParseError> {
    values
        .iter()
        .map(|v| Ok(Certificate::try_from(decode(field, v)?)?))
        .collect()
}
