//! `Certificate` type and helpers.
//!
//! A [`Certificate`] wraps DER-encoded bytes and is validated at construction
//! time. The fields trust-list processing needs (subject, issuer, validity,
//! public key) are extracted once; signer sets compare by DER equality.

use crate::cert::parsing::parse_der_encoded_bytes_as_x509_certificate;
use sha2::{Digest, Sha256};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use time::OffsetDateTime;
use x509_parser::certificate::X509Certificate;

pub mod error;
pub mod keystore;
pub(crate) mod parsing;

pub use error::CertificateError;
pub use keystore::KeyStoreCertificateSource;

/// A single DER-encoded X.509 certificate.
///
/// Invariant: instances are always validated as parseable DER-encoded X.509.
/// Equality, ordering and hashing only consider the DER bytes.
#[derive(Clone)]
pub struct Certificate {
    der: Vec<u8>,
    subject: String,
    issuer: String,
    validity: Validity,
    spki: Vec<u8>,
}

/// Validity window of a certificate.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub struct Validity {
    /// Start of the validity window.
    pub not_before: OffsetDateTime,
    /// End of the validity window.
    pub not_after: OffsetDateTime,
}

impl Validity {
    /// Returns `true` if `at` falls inside the window (bounds inclusive).
    pub fn contains(&self, at: OffsetDateTime) -> bool {
        self.not_before <= at && at <= self.not_after
    }
}

impl Certificate {
    fn from_parsed(x509: &X509Certificate<'_>, der: Vec<u8>) -> Self {
        Self {
            subject: x509.subject().to_string(),
            issuer: x509.issuer().to_string(),
            validity: Validity {
                not_before: x509.validity().not_before.to_datetime(),
                not_after: x509.validity().not_after.to_datetime(),
            },
            spki: x509.public_key().raw.to_vec(),
            der,
        }
    }

    /// Returns the certificate bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.der
    }

    /// Subject distinguished name, RFC 4514 style.
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Issuer distinguished name, RFC 4514 style.
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// DER-encoded `SubjectPublicKeyInfo`.
    pub fn public_key_der(&self) -> &[u8] {
        &self.spki
    }

    /// Validity window declared by the certificate.
    pub fn validity(&self) -> Validity {
        self.validity
    }

    /// Lowercase hex SHA-256 over the DER bytes.
    pub fn fingerprint(&self) -> String {
        hex::encode(Sha256::digest(&self.der))
    }

    /// Parses one or more certificates from a DER concatenation or a PEM bundle.
    ///
    /// # Errors
    ///
    /// Returns [`CertificateError`] if any certificate fails to parse or the
    /// payload holds more than the per-payload maximum.
    pub fn parse_many(bytes: &[u8]) -> Result<Vec<Self>, CertificateError> {
        if bytes.trim_ascii_start().starts_with(b"-----BEGIN") {
            parsing::pem_to_certificate_vec(bytes)
        } else {
            parsing::to_certificate_vec(bytes)
        }
    }
}

impl PartialEq for Certificate {
    fn eq(&self, other: &Self) -> bool {
        self.der == other.der
    }
}

impl Eq for Certificate {}

impl Hash for Certificate {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.der.hash(state);
    }
}

impl PartialOrd for Certificate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Certificate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.der.cmp(&other.der)
    }
}

impl fmt::Debug for Certificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Certificate")
            .field("subject", &self.subject)
            .field("sha256", &self.fingerprint())
            .finish()
    }
}

impl AsRef<[u8]> for Certificate {
    fn as_ref(&self) -> &[u8] {
        &self.der
    }
}

impl From<X509Certificate<'_>> for Certificate {
    fn from(cert: X509Certificate<'_>) -> Self {
        let der = cert.as_raw().to_vec();
        Self::from_parsed(&cert, der)
    }
}

impl TryFrom<&[u8]> for Certificate {
    type Error = CertificateError;

    fn try_from(der_bytes: &[u8]) -> Result<Self, Self::Error> {
        let x509 = parse_der_encoded_bytes_as_x509_certificate(der_bytes)?;
        Ok(Self::from_parsed(&x509, Vec::from(der_bytes)))
    }
}

impl TryFrom<Vec<u8>> for Certificate {
    type Error = CertificateError;

    fn try_from(der_bytes: Vec<u8>) -> Result<Self, Self::Error> {
        let cert = {
            let x509 = parse_der_encoded_bytes_as_x509_certificate(&der_bytes)?;
            Self::from_parsed(&x509, Vec::new())
        };
        Ok(Self {
            der: der_bytes,
            ..cert
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::mint_certificate;

    #[test]
    fn test_certificate_accessors() {
        let (cert, _) = mint_certificate("Accessor Test CA");

        assert!(cert.subject().contains("Accessor Test CA"));
        assert_eq!(cert.subject(), cert.issuer());
        assert!(!cert.public_key_der().is_empty());
        assert_eq!(cert.fingerprint().len(), 64);

        let validity = cert.validity();
        assert!(validity.not_before < validity.not_after);
        assert!(validity.contains(OffsetDateTime::now_utc()));
    }

    #[test]
    fn test_certificate_rejects_garbage() {
        let result = Certificate::try_from(&b"not a certificate"[..]);
        assert!(matches!(
            result,
            Err(CertificateError::ParseX509Certificate(..))
        ));
    }

    #[test]
    fn test_parse_many_der_and_pem() {
        let (a, _) = mint_certificate("A");
        let (b, _) = mint_certificate("B");

        let mut der = a.as_bytes().to_vec();
        der.extend_from_slice(b.as_bytes());
        assert_eq!(Certificate::parse_many(&der).unwrap(), vec![a.clone(), b.clone()]);

        let pem = crate::test_util::to_pem(&[&a, &b]);
        assert_eq!(Certificate::parse_many(pem.as_bytes()).unwrap(), vec![a, b]);
    }
}
