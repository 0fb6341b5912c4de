//! Out-of-band trust anchors.
//!
//! The LOTL signer set is rooted in certificates published through an
//! authoritative channel (the Official Journal) and provisioned by hand. This
//! module loads them from a PEM bundle or a DER concatenation on disk.

use crate::cert::error::CertificateError;
use crate::cert::Certificate;
use std::collections::BTreeSet;
use std::path::Path;

/// A fixed set of certificates loaded from a key store file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyStoreCertificateSource {
    certificates: BTreeSet<Certificate>,
}

impl KeyStoreCertificateSource {
    /// Builds a source from certificates already in memory.
    pub fn new(certificates: impl IntoIterator<Item = Certificate>) -> Self {
        Self {
            certificates: certificates.into_iter().collect(),
        }
    }

    /// Loads every certificate from `path` (PEM bundle or concatenated DER).
    ///
    /// # Errors
    ///
    /// Returns [`CertificateError::KeyStoreIo`] if the file cannot be read,
    /// [`CertificateError::EmptyKeyStore`] if it contains no certificate, or a
    /// parsing error for malformed content.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, CertificateError> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|source| CertificateError::KeyStoreIo {
            path: path.to_path_buf(),
            source,
        })?;

        let certificates = Certificate::parse_many(&bytes)?;
        if certificates.is_empty() {
            return Err(CertificateError::EmptyKeyStore(path.to_path_buf()));
        }
        Ok(Self::new(certificates))
    }

    /// Returns `true` if `certificate` is one of the stored anchors.
    pub fn contains(&self, certificate: &Certificate) -> bool {
        self.certificates.contains(certificate)
    }

    /// Returns the stored certificates.
    pub fn certificates(&self) -> &BTreeSet<Certificate> {
        &self.certificates
    }

    /// Number of stored certificates.
    pub fn len(&self) -> usize {
        self.certificates.len()
    }

    /// Returns `true` if no certificate is stored.
    pub fn is_empty(&self) -> bool {
        self.certificates.is_empty()
    }
}
