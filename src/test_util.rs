//! Fixtures shared by the unit tests: minted certificates, sealed trust lists
//! and an in-memory fetcher.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use crate::cert::Certificate;
use crate::error::FetchError;
use crate::fetch::{FetchFuture, Fetcher};
use crate::tsl::{Envelope, PointerContent, ServiceContent, TrustListContent, SERVICE_STATUS_GRANTED};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use bytes::Bytes;
use rcgen::{
    CertificateParams, CertificateRevocationListParams, DnType, KeyIdMethod, KeyPair, SerialNumber,
    PKCS_ED25519,
};
use ring::signature::Ed25519KeyPair;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use time::OffsetDateTime;
use url::Url;

pub(crate) const OJ_URL: &str = "https://eur-lex.example.org/oj/2019/C276/01";
pub(crate) const LOTL_SELF_URL: &str = "https://lotl.example.org/eu.json";

/// Self-signed Ed25519 certificate valid for a year, with its signing key.
pub(crate) fn mint_certificate(cn: &str) -> (Certificate, Ed25519KeyPair) {
    mint_certificate_valid_for(cn, time::Duration::days(365))
}

/// Self-signed Ed25519 certificate valid from yesterday until `now + valid_for`.
pub(crate) fn mint_certificate_valid_for(cn: &str, valid_for: time::Duration) -> (Certificate, Ed25519KeyPair) {
    let key = KeyPair::generate_for(&PKCS_ED25519).unwrap();
    let mut params = CertificateParams::new(Vec::<String>::new()).unwrap();
    params.distinguished_name.push(DnType::CommonName, cn);
    let now = OffsetDateTime::now_utc();
    params.not_before = now - time::Duration::days(1);
    params.not_after = now + valid_for;
    let cert = params.self_signed(&key).unwrap();

    let certificate = Certificate::try_from(cert.der().to_vec()).unwrap();
    let signing_key = Ed25519KeyPair::from_pkcs8_maybe_unchecked(&key.serialize_der()).unwrap();
    (certificate, signing_key)
}

/// DER CRL with no revoked entries, signed by a fresh CA, declaring `next_update`.
pub(crate) fn mint_crl(next_update: OffsetDateTime) -> Vec<u8> {
    let key = KeyPair::generate_for(&PKCS_ED25519).unwrap();
    let mut params = CertificateParams::new(Vec::<String>::new()).unwrap();
    params.distinguished_name.push(DnType::CommonName, "CRL Issuer");
    let issuer = params.self_signed(&key).unwrap();

    let crl = CertificateRevocationListParams {
        this_update: OffsetDateTime::now_utc() - time::Duration::hours(1),
        next_update,
        crl_number: SerialNumber::from(1u64),
        issuing_distribution_point: None,
        revoked_certs: Vec::new(),
        key_identifier_method: KeyIdMethod::Sha256,
    }
    .signed_by(&issuer, &key)
    .unwrap();
    crl.der().to_vec()
}

pub(crate) fn to_pem(certificates: &[&Certificate]) -> String {
    let mut pem = String::new();
    for certificate in certificates {
        pem.push_str("-----BEGIN CERTIFICATE-----\n");
        let encoded = STANDARD.encode(certificate.as_bytes());
        for line in encoded.as_bytes().chunks(64) {
            pem.push_str(std::str::from_utf8(line).unwrap());
            pem.push('\n');
        }
        pem.push_str("-----END CERTIFICATE-----\n");
    }
    pem
}

fn encode_all(certificates: &[&Certificate]) -> Vec<String> {
    certificates.iter().map(|c| STANDARD.encode(c.as_bytes())).collect()
}

/// EU top-level list announcing `announced` as its own signers, with one
/// pointer per `(territory, location, signer)` and the given pivots.
pub(crate) fn lotl_content(
    announced: &[&Certificate],
    pointers: &[(&str, &str, &Certificate)],
    pivots: &[&str],
) -> TrustListContent {
    let mut all = vec![PointerContent {
        territory: "EU".to_owned(),
        location: Url::parse(LOTL_SELF_URL).unwrap(),
        signing_certificates: encode_all(announced),
    }];
    all.extend(pointers.iter().map(|(territory, location, signer)| PointerContent {
        territory: (*territory).to_owned(),
        location: Url::parse(location).unwrap(),
        signing_certificates: encode_all(&[signer]),
    }));

    TrustListContent {
        territory: "EU".to_owned(),
        sequence_number: 1,
        issue_date: OffsetDateTime::now_utc(),
        next_update: Some(OffsetDateTime::now_utc() + time::Duration::days(180)),
        scheme_information_uris: vec![Url::parse(OJ_URL).unwrap()],
        pivots: pivots.iter().map(|p| Url::parse(p).unwrap()).collect(),
        pointers: all,
        services: Vec::new(),
    }
}

/// Member list with one granted CA/QC service carrying `certificates`.
pub(crate) fn tl_content(territory: &str, certificates: &[&Certificate]) -> TrustListContent {
    TrustListContent {
        territory: territory.to_owned(),
        sequence_number: 1,
        issue_date: OffsetDateTime::now_utc(),
        next_update: Some(OffsetDateTime::now_utc() + time::Duration::days(180)),
        scheme_information_uris: Vec::new(),
        pivots: Vec::new(),
        pointers: Vec::new(),
        services: vec![ServiceContent {
            name: format!("{territory} Qualified CA"),
            provider: format!("{territory} QTSP"),
            service_type: "http://uri.etsi.org/TrstSvc/Svctype/CA/QC".to_owned(),
            status: SERVICE_STATUS_GRANTED.to_owned(),
            certificates: encode_all(certificates),
        }],
    }
}

/// Serializes and signs `content`, returning envelope bytes.
pub(crate) fn seal(content: &TrustListContent, signer: &Certificate, key: &Ed25519KeyPair) -> Vec<u8> {
    let bytes = serde_json::to_vec(content).unwrap();
    let signature = key.sign(&bytes);
    Envelope::new(&bytes, signature.as_ref(), signer).to_bytes().unwrap()
}

/// In-memory fetcher. Unknown URLs answer 404; failed URLs time out.
#[derive(Debug, Default)]
pub(crate) struct StubFetcher {
    bodies: Mutex<HashMap<String, Option<Bytes>>>,
    delay: Mutex<Option<Duration>>,
    calls: AtomicUsize,
}

impl StubFetcher {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn serve(&self, url: &str, body: Bytes) {
        self.bodies.lock().unwrap().insert(url.to_owned(), Some(body));
    }

    pub(crate) fn fail(&self, url: &str) {
        self.bodies.lock().unwrap().insert(url.to_owned(), None);
    }

    /// Delays every subsequent response.
    pub(crate) fn delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Fetcher for StubFetcher {
    fn fetch<'a>(&'a self, url: &'a Url) -> FetchFuture<'a> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let delay = *self.delay.lock().unwrap();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            let body = self.bodies.lock().unwrap().get(url.as_str()).cloned();
            match body {
                Some(Some(body)) => Ok(body),
                Some(None) => Err(FetchError::Timeout { url: url.to_string() }),
                None => Err(FetchError::Status {
                    url: url.to_string(),
                    status: 404,
                }),
            }
        })
    }
}
