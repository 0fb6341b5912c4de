//! Fixtures for the integration tests: minted Ed25519 certificates, sealed
//! trust-list documents and an in-memory fetcher.

#![allow(dead_code)]

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use bytes::Bytes;
use rcgen::{CertificateParams, DnType, KeyPair, PKCS_ED25519};
use ring::signature::Ed25519KeyPair;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use time::OffsetDateTime;
use trustlist_registry::fetch::{FetchFuture, Fetcher};
use trustlist_registry::tsl::{
    Envelope, PointerContent, ServiceContent, TrustListContent, SERVICE_STATUS_GRANTED,
};
use trustlist_registry::{Certificate, FetchError};
use url::Url;

pub const LOTL_URL: &str = "https://lotl.example.org/eu-lotl.json";
pub const OJ_URL: &str = "https://eur-lex.example.org/oj/2019/C276/01";

pub struct Signer {
    pub certificate: Certificate,
    key: Ed25519KeyPair,
}

impl Signer {
    pub fn new(cn: &str) -> Self {
        let key = KeyPair::generate_for(&PKCS_ED25519).unwrap();
        let mut params = CertificateParams::new(Vec::<String>::new()).unwrap();
        params.distinguished_name.push(DnType::CommonName, cn);
        let now = OffsetDateTime::now_utc();
        params.not_before = now - time::Duration::days(1);
        params.not_after = now + time::Duration::days(365);
        let cert = params.self_signed(&key).unwrap();

        Self {
            certificate: Certificate::try_from(cert.der().to_vec()).unwrap(),
            key: Ed25519KeyPair::from_pkcs8_maybe_unchecked(&key.serialize_der()).unwrap(),
        }
    }

    pub fn seal(&self, content: &TrustListContent) -> Bytes {
        let bytes = serde_json::to_vec(content).unwrap();
        let signature = self.key.sign(&bytes);
        Bytes::from(
            Envelope::new(&bytes, signature.as_ref(), &self.certificate)
                .to_bytes()
                .unwrap(),
        )
    }
}

fn encode(certificates: &[&Certificate]) -> Vec<String> {
    certificates.iter().map(|c| STANDARD.encode(c.as_bytes())).collect()
}

/// EU LOTL announcing `announced`, pointing at `(territory, url, signer)`
/// members, with the given pivot URLs (newest first).
pub fn lotl(
    announced: &[&Certificate],
    members: &[(&str, &str, &Certificate)],
    pivots: &[&str],
    with_oj: bool,
) -> TrustListContent {
    let mut pointers = vec![PointerContent {
        territory: "EU".to_owned(),
        location: Url::parse(LOTL_URL).unwrap(),
        signing_certificates: encode(announced),
    }];
    pointers.extend(members.iter().map(|(territory, url, signer)| PointerContent {
        territory: (*territory).to_owned(),
        location: Url::parse(url).unwrap(),
        signing_certificates: encode(&[signer]),
    }));

    TrustListContent {
        territory: "EU".to_owned(),
        sequence_number: 42,
        issue_date: OffsetDateTime::now_utc(),
        next_update: Some(OffsetDateTime::now_utc() + time::Duration::days(180)),
        scheme_information_uris: if with_oj {
            vec![Url::parse(OJ_URL).unwrap()]
        } else {
            Vec::new()
        },
        pivots: pivots.iter().map(|p| Url::parse(p).unwrap()).collect(),
        pointers,
        services: Vec::new(),
    }
}

/// Member list with one granted service per certificate.
pub fn trust_list(territory: &str, certificates: &[&Certificate]) -> TrustListContent {
    TrustListContent {
        territory: territory.to_owned(),
        sequence_number: 7,
        issue_date: OffsetDateTime::now_utc(),
        next_update: Some(OffsetDateTime::now_utc() + time::Duration::days(180)),
        scheme_information_uris: Vec::new(),
        pivots: Vec::new(),
        pointers: Vec::new(),
        services: certificates
            .iter()
            .enumerate()
            .map(|(i, certificate)| ServiceContent {
                name: format!("{territory} QTSP service {i}"),
                provider: format!("{territory} QTSP"),
                service_type: "http://uri.etsi.org/TrstSvc/Svctype/CA/QC".to_owned(),
                status: SERVICE_STATUS_GRANTED.to_owned(),
                certificates: encode(&[certificate]),
            })
            .collect(),
    }
}

/// In-memory fetcher. Unknown URLs answer 404; failed URLs time out.
#[derive(Debug, Default)]
pub struct StubFetcher {
    bodies: Mutex<HashMap<String, Option<Bytes>>>,
    calls: AtomicUsize,
}

impl StubFetcher {
    pub fn serve(&self, url: &str, body: Bytes) {
        self.bodies.lock().unwrap().insert(url.to_owned(), Some(body));
    }

    pub fn fail(&self, url: &str) {
        self.bodies.lock().unwrap().insert(url.to_owned(), None);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Fetcher for StubFetcher {
    fn fetch<'a>(&'a self, url: &'a Url) -> FetchFuture<'a> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let body = self.bodies.lock().unwrap().get(url.as_str()).cloned();
        let url = url.to_string();
        Box::pin(async move {
            match body {
                Some(Some(body)) => Ok(body),
                Some(None) => Err(FetchError::Timeout { url }),
                None => Err(FetchError::Status { url, status: 404 }),
            }
        })
    }
}
