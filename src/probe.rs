//! Peer certificate probe.
//!
//! Some operators pin the TLS certificate of a trust-list host, or want to
//! inspect a server certificate that does not chain to any configured root.
//! [`PeerCertificateProbe`] connects with certificate validation **disabled**
//! and returns the leaf certificate presented by the server.
//!
//! The trust-all client never leaves this type: the probe does not implement
//! [`Fetcher`](crate::fetch::Fetcher) and exposes no response body, so it
//! cannot be wired into a loader or a revocation source.

use crate::cert::{Certificate, CertificateError};
use crate::fetch::{FetcherBuildError, FetcherConfig};
use crate::prelude::{debug, warn};
use reqwest::tls::TlsInfo;
use reqwest::Client;
use thiserror::Error;
use url::Url;

/// Errors returned by [`PeerCertificateProbe::peer_certificate`].
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ProbeError {
    /// Only `https` URLs carry a peer certificate.
    #[error("{url} is not an https URL")]
    NotHttps {
        /// Probed URL.
        url: Url,
    },

    /// The connection could not be established.
    #[error("probing {url} failed: {source}")]
    Transport {
        /// Probed URL.
        url: Url,
        /// Underlying client error.
        #[source]
        source: reqwest::Error,
    },

    /// The server did not present a certificate.
    #[error("{url} presented no peer certificate")]
    NoPeerCertificate {
        /// Probed URL.
        url: Url,
    },

    /// The presented certificate is not valid DER.
    #[error("peer certificate of {url} is invalid: {source}")]
    InvalidCertificate {
        /// Probed URL.
        url: Url,
        /// Parse error.
        #[source]
        source: CertificateError,
    },
}

/// Retrieves the certificate a TLS server presents, without validating it.
#[derive(Debug, Clone)]
pub struct PeerCertificateProbe {
    client: Client,
}

impl PeerCertificateProbe {
    /// Builds a probe with the timeouts and proxy of `config`.
    ///
    /// # Errors
    ///
    /// Returns [`FetcherBuildError`] if the proxy is invalid or the TLS
    /// backend cannot be initialized.
    pub fn new(config: &FetcherConfig) -> Result<Self, FetcherBuildError> {
        let client = config
            .apply(
                Client::builder()
                    .danger_accept_invalid_certs(true)
                    .tls_info(true),
            )?
            .build()
            .map_err(FetcherBuildError::Client)?;
        Ok(Self { client })
    }

    /// Connects to `url` and returns the leaf certificate the server presented.
    ///
    /// The certificate is not validated in any way; callers decide whether to trust it.
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError`] if the URL is not `https`, the connection fails,
    /// or the server presented no parseable certificate.
    pub async fn peer_certificate(&self, url: &Url) -> Result<Certificate, ProbeError> {
        if url.scheme() != "https" {
            return Err(ProbeError::NotHttps { url: url.clone() });
        }

        warn!("Probing peer certificate without TLS validation: url={}", url);
        let response = self
            .client
            .head(url.clone())
            .send()
            .await
            .map_err(|source| ProbeError::Transport {
                url: url.clone(),
                source,
            })?;

        let der = response
            .extensions()
            .get::<TlsInfo>()
            .and_then(TlsInfo::peer_certificate)
            .ok_or_else(|| ProbeError::NoPeerCertificate { url: url.clone() })?;

        let certificate = Certificate::try_from(der).map_err(|source| ProbeError::InvalidCertificate {
            url: url.clone(),
            source,
        })?;
        debug!(
            "Peer certificate retrieved: url={}, subject={}, fingerprint={}",
            url,
            certificate.subject(),
            certificate.fingerprint()
        );
        Ok(certificate)
    }
}
