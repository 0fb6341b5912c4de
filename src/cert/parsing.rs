//! Internal parsing helpers.

use crate::cert::error::CertificateError;
use crate::cert::Certificate;
use x509_parser::certificate::X509Certificate;
use x509_parser::error::X509Error;
use x509_parser::nom::Err;
use x509_parser::pem::Pem;

/// Maximum number of certificates accepted from a single payload.
///
/// AIA responses carry one issuer (occasionally a short chain) and key stores
/// hold a handful of anchors. The bound keeps adversarial payloads from
/// forcing unbounded allocation.
pub(crate) const MAX_CERTIFICATES_PER_PAYLOAD: usize = 64;

/// Takes a concatenated list of DER-encoded certificates and parses it
/// into a `Vec<Certificate>`.
pub(crate) fn to_certificate_vec(der: &[u8]) -> Result<Vec<Certificate>, CertificateError> {
    let mut rest = der;
    let mut certs = Vec::new();

    while !rest.is_empty() {
        if certs.len() >= MAX_CERTIFICATES_PER_PAYLOAD {
            return Err(CertificateError::TooManyCertificates {
                max: MAX_CERTIFICATES_PER_PAYLOAD,
            });
        }

        let (new_rest, cert) = x509_parser::parse_x509_certificate(rest).map_err(map_nom)?;
        certs.push(Certificate::from(cert));

        rest = new_rest;
    }

    Ok(certs)
}

/// Parses every `CERTIFICATE` block of a PEM bundle. Other labels are skipped.
pub(crate) fn pem_to_certificate_vec(pem: &[u8]) -> Result<Vec<Certificate>, CertificateError> {
    let mut certs = Vec::new();
    for block in Pem::iter_from_buffer(pem) {
        let block = block.map_err(|e| CertificateError::Pem(e.to_string()))?;
        if block.label != "CERTIFICATE" {
            continue;
        }
        if certs.len() >= MAX_CERTIFICATES_PER_PAYLOAD {
            return Err(CertificateError::TooManyCertificates {
                max: MAX_CERTIFICATES_PER_PAYLOAD,
            });
        }
        certs.push(Certificate::try_from(block.contents)?);
    }
    Ok(certs)
}

/// Parses the given DER-encoded bytes as an X.509 certificate.
pub(crate) fn parse_der_encoded_bytes_as_x509_certificate(
    der_bytes: &[u8],
) -> Result<X509Certificate<'_>, CertificateError> {
    x509_parser::parse_x509_certificate(der_bytes)
        .map(|(_, cert)| cert)
        .map_err(map_nom)
}

fn map_nom(e: Err<X509Error>) -> CertificateError {
    match e {
        Err::Incomplete(_) => CertificateError::ParseX509Certificate(X509Error::InvalidCertificate),
        Err::Error(err) | Err::Failure(err) => CertificateError::ParseX509Certificate(err),
    }
}
