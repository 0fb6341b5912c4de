//! Detached signature verification against a signer certificate.
//!
//! The key algorithm is taken from the certificate's `SubjectPublicKeyInfo`;
//! the digest is fixed per algorithm.

use crate::cert::Certificate;
use crate::error::SignatureValidationError;
use ring::signature::{self, UnparsedPublicKey, VerificationAlgorithm};
use x509_parser::prelude::FromDer;
use x509_parser::x509::SubjectPublicKeyInfo;

const OID_ED25519: &str = "1.3.101.112";
const OID_EC_PUBLIC_KEY: &str = "1.2.840.10045.2.1";
const OID_RSA_ENCRYPTION: &str = "1.2.840.113549.1.1.1";
const OID_CURVE_P256: &str = "1.2.840.10045.3.1.7";
const OID_CURVE_P384: &str = "1.3.132.0.34";

/// Verifies `signature` over `message` with the public key of `signer`.
///
/// Supported keys: Ed25519, ECDSA P-256 (SHA-256), ECDSA P-384 (SHA-384) and
/// RSA PKCS#1 v1.5 (SHA-256, 2048 to 8192 bits).
///
/// # Errors
///
/// Returns [`SignatureValidationError::UnsupportedAlgorithm`] for other key
/// types and [`SignatureValidationError::SignatureMismatch`] if verification fails.
pub fn verify_signature(
    signer: &Certificate,
    message: &[u8],
    signature: &[u8],
) -> Result<(), SignatureValidationError> {
    let (_, spki) = SubjectPublicKeyInfo::from_der(signer.public_key_der())
        .map_err(|e| SignatureValidationError::UnsupportedAlgorithm(e.to_string()))?;

    let algorithm = select_algorithm(&spki)?;
    UnparsedPublicKey::new(algorithm, spki.subject_public_key.data.as_ref())
        .verify(message, signature)
        .map_err(|_| SignatureValidationError::SignatureMismatch)
}

fn select_algorithm(
    spki: &SubjectPublicKeyInfo<'_>,
) -> Result<&'static dyn VerificationAlgorithm, SignatureValidationError> {
    let key_oid = spki.algorithm.algorithm.to_id_string();
    match key_oid.as_str() {
        OID_ED25519 => Ok(&signature::ED25519),
        OID_RSA_ENCRYPTION => Ok(&signature::RSA_PKCS1_2048_8192_SHA256),
        OID_EC_PUBLIC_KEY => {
            let curve = spki
                .algorithm
                .parameters
                .as_ref()
                .and_then(|p| p.as_oid().ok())
                .map(|oid| oid.to_id_string());
            match curve.as_deref() {
                Some(OID_CURVE_P256) => Ok(&signature::ECDSA_P256_SHA256_ASN1),
                Some(OID_CURVE_P384) => Ok(&signature::ECDSA_P384_SHA384_ASN1),
                other => Err(SignatureValidationError::UnsupportedAlgorithm(format!(
                    "ecPublicKey on curve {}",
                    other.unwrap_or("<missing>")
                ))),
            }
        }
        _ => Err(SignatureValidationError::UnsupportedAlgorithm(key_oid)),
    }
}
