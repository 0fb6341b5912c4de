//! Error taxonomy shared by the fetchers, caches and trust-list validation.
//!
//! Four leaf kinds exist: [`FetchError`] (the network), [`ParseError`]
//! (malformed payloads), [`SignatureValidationError`] (untrusted or invalid
//! signatures) and [`CacheError`] (durable store or file cache). Component
//! errors such as [`crate::revocation::RevocationSourceError`] compose them.

use crate::cert::error::CertificateError;
use std::path::PathBuf;
use thiserror::Error;

/// Errors produced while retrieving a remote resource.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum FetchError {
    /// The request did not complete within the configured timeout.
    #[error("request to {url} timed out")]
    Timeout {
        /// Requested URL.
        url: String,
    },

    /// The HTTP client failed (connection refused, TLS failure, too many redirects, ...).
    #[error("request to {url} failed: {source}")]
    Transport {
        /// Requested URL.
        url: String,
        /// Underlying client error.
        #[source]
        source: reqwest::Error,
    },

    /// The server answered with a non-success status.
    #[error("{url} answered with HTTP status {status}")]
    Status {
        /// Requested URL.
        url: String,
        /// HTTP status code.
        status: u16,
    },

    /// The response body exceeded the configured maximum size.
    #[error("response from {url} exceeds {limit} bytes")]
    TooLarge {
        /// Requested URL.
        url: String,
        /// Configured limit in bytes.
        limit: usize,
    },

    /// Network access is disabled for this fetcher.
    #[error("network access disabled, cannot fetch {url}")]
    Disabled {
        /// Requested URL.
        url: String,
    },
}

/// Errors produced while decoding a payload.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ParseError {
    /// The document is not valid JSON or does not match the expected layout.
    #[error("malformed document: {0}")]
    Json(#[from] serde_json::Error),

    /// A base64 field could not be decoded.
    #[error("field `{field}` is not valid base64: {source}")]
    Base64 {
        /// Name of the offending field.
        field: &'static str,
        /// Decoder error.
        #[source]
        source: base64::DecodeError,
    },

    /// An embedded certificate could not be parsed.
    #[error("invalid embedded certificate: {0}")]
    Certificate(#[from] CertificateError),
}

/// Errors produced while validating a document signature against a signer set.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SignatureValidationError {
    /// The document was signed by a certificate outside the trusted signer set.
    #[error("signer `{subject}` is not in the trusted signer set")]
    UntrustedSigner {
        /// Subject of the signing certificate.
        subject: String,
    },

    /// The signer's key algorithm is not supported.
    #[error("unsupported signature key algorithm {0}")]
    UnsupportedAlgorithm(String),

    /// The signature does not match the signed content.
    #[error("signature does not match the signed content")]
    SignatureMismatch,

    /// The signer set is empty, nothing can be trusted.
    #[error("no trusted signer certificates configured")]
    EmptySignerSet,
}

/// Errors produced by the durable cache store or the file cache.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CacheError {
    /// The relational store rejected an operation.
    #[error("cache store error: {0}")]
    Store(#[from] rusqlite::Error),

    /// A cache file could not be read or written.
    #[error("cache file {path} is not accessible: {source}")]
    Io {
        /// File or directory involved.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// No cached copy exists and none can be fetched.
    #[error("no cached copy available for {key}")]
    Missing {
        /// Cache key (identifier or URL).
        key: String,
    },

    /// The namespace name is not a plain identifier.
    #[error("invalid cache namespace `{0}`")]
    InvalidNamespace(String),

    /// The namespace has not been created (or was dropped).
    #[error("cache namespace `{0}` is not initialized")]
    NamespaceNotInitialized(String),

    /// A stored record violates the `next_update >= retrieved_at` invariant.
    #[error("cache record for {key} has next_update before retrieved_at")]
    InvalidRecord {
        /// Cache key of the record.
        key: String,
    },

    /// A lock guarding the store was poisoned by a panicking writer.
    #[error("cache store lock poisoned")]
    Poisoned,

    /// The blocking task running a store call panicked or was cancelled.
    #[error("cache store task failed: {0}")]
    Task(String),
}

impl CacheError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
