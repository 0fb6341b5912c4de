//! Error types for certificate parsing and key store loading.

use std::path::PathBuf;
use x509_parser::error::X509Error;

/// An error that may arise parsing X.509 certificates.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum CertificateError {
    /// Error returned by the X.509 parsing library.
    #[error("failed parsing X.509 certificate")]
    ParseX509Certificate(#[from] X509Error),

    /// Too many certificates in a single payload.
    #[error("too many certificates in payload (max {max})")]
    TooManyCertificates {
        /// Maximum number of certificates accepted from one payload.
        max: usize,
    },

    /// A PEM block could not be decoded.
    #[error("invalid PEM data: {0}")]
    Pem(String),

    /// A key store file could not be read.
    #[error("cannot read key store {path}: {source}")]
    KeyStoreIo {
        /// Key store location.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The key store contains no certificate.
    #[error("key store {0} contains no certificate")]
    EmptyKeyStore(PathBuf),
}

impl PartialEq for CertificateError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::ParseX509Certificate(a), Self::ParseX509Certificate(b)) => a == b,
            (Self::TooManyCertificates { max: a }, Self::TooManyCertificates { max: b }) => a == b,
            (Self::Pem(a), Self::Pem(b)) => a == b,
            (Self::KeyStoreIo { path: a, .. }, Self::KeyStoreIo { path: b, .. }) => a == b,
            (Self::EmptyKeyStore(a), Self::EmptyKeyStore(b)) => a == b,
            _ => false,
        }
    }
}
