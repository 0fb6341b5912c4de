//! Registry configuration.
//!
//! One TOML document with a table per component:
//!
//! ```toml
//! [fetcher]
//! connect_timeout_ms = 5000
//!
//! [cache]
//! database_path = "/var/lib/registry/cache.db"
//!
//! [file_cache]
//! directory = "/var/cache/registry/tl"
//!
//! [lotl]
//! url = "https://ec.europa.eu/tools/lotl/eu-lotl.json"
//! oj_url = "https://eur-lex.europa.eu/legal-content/EN/TXT/?uri=uriserv:OJ.C_.2019.276.01.0001.01.ENG"
//! keystore_path = "/etc/registry/oj-keystore.pem"
//!
//! [[trusted_lists]]
//! url = "https://tl.example.org/ch.json"
//! territory = "CH"
//! signing_certificates_path = "/etc/registry/ch-signers.pem"
//!
//! [job]
//! refresh_period_secs = 86400
//! ```
//!
//! Every field except the paths and URLs has a default.

use crate::cert::{Certificate, CertificateError, KeyStoreCertificateSource};
use crate::fetch::FetcherConfig;
use crate::revocation::{
    NextUpdatePolicy, DEFAULT_AIA_MAX_NEXT_UPDATE_DELAY, DEFAULT_CRL_MAX_NEXT_UPDATE_DELAY,
    DEFAULT_CRL_NEXT_UPDATE_DELAY,
};
use crate::tsl::{
    JobConfig, LotlDescriptor, RetryConfig, TrustListDescriptor, DEFAULT_LOTL_TERRITORY,
    DEFAULT_MAX_PIVOT_DEPTH,
};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Errors returned while loading a [`RegistryConfig`].
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("cannot read configuration {path}: {source}")]
    Io {
        /// Configuration file.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The document is not valid TOML or does not match the expected layout.
    #[error("invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// The document is well-formed but unusable.
    #[error("invalid configuration: {0}")]
    Invalid(String),

    /// A key store or signer certificate file could not be loaded.
    #[error(transparent)]
    Certificates(#[from] CertificateError),
}

/// Top-level configuration of the registry.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegistryConfig {
    /// HTTP transport shared by every fetcher.
    #[serde(default)]
    pub fetcher: FetcherConfig,
    /// Revocation cache store.
    pub cache: CacheConfig,
    /// Trust-list file cache.
    pub file_cache: FileCacheConfig,
    /// List of trusted lists.
    #[serde(default)]
    pub lotl: Option<LotlConfig>,
    /// Manually configured trust lists.
    #[serde(default)]
    pub trusted_lists: Vec<TrustedListConfig>,
    /// Validation job scheduling.
    #[serde(default)]
    pub job: JobSettings,
}

/// `[cache]`: durable revocation cache.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheConfig {
    /// SQLite database file.
    pub database_path: PathBuf,
    /// Refresh delay in seconds for payloads that declare no next update.
    #[serde(default = "default_crl_delay_secs")]
    pub crl_next_update_delay_secs: u64,
    /// Upper bound on how long a CRL is cached, in seconds.
    #[serde(default = "default_crl_max_secs")]
    pub crl_max_next_update_secs: u64,
    /// Upper bound on how long AIA certificates are cached, in seconds.
    #[serde(default = "default_aia_max_secs")]
    pub aia_max_next_update_secs: u64,
}

/// Cache delays above ten years are rejected.
const MAX_CACHE_DELAY_SECS: u64 = 10 * 365 * 24 * 60 * 60;

fn default_crl_delay_secs() -> u64 {
    DEFAULT_CRL_NEXT_UPDATE_DELAY.as_secs()
}

fn default_crl_max_secs() -> u64 {
    DEFAULT_CRL_MAX_NEXT_UPDATE_DELAY.as_secs()
}

fn default_aia_max_secs() -> u64 {
    DEFAULT_AIA_MAX_NEXT_UPDATE_DELAY.as_secs()
}

impl CacheConfig {
    /// Refresh policy of the CRL source.
    pub fn crl_policy(&self) -> NextUpdatePolicy {
        NextUpdatePolicy::CrlNextUpdate {
            default_delay: Duration::from_secs(self.crl_next_update_delay_secs),
            max_delay: Duration::from_secs(self.crl_max_next_update_secs),
        }
    }

    /// Refresh policy of the AIA source.
    pub fn aia_policy(&self) -> NextUpdatePolicy {
        NextUpdatePolicy::CertificateValidity {
            default_delay: Duration::from_secs(self.crl_next_update_delay_secs),
            max_delay: Duration::from_secs(self.aia_max_next_update_secs),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for (name, secs) in [
            ("crl_next_update_delay_secs", self.crl_next_update_delay_secs),
            ("crl_max_next_update_secs", self.crl_max_next_update_secs),
            ("aia_max_next_update_secs", self.aia_max_next_update_secs),
        ] {
            if secs > MAX_CACHE_DELAY_SECS {
                return Err(ConfigError::Invalid(format!(
                    "[cache] {name} = {secs} exceeds {MAX_CACHE_DELAY_SECS}"
                )));
            }
        }
        Ok(())
    }
}

/// `[file_cache]`: directory shared by the online and offline loaders.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileCacheConfig {
    /// Cache directory. Created on first write.
    pub directory: PathBuf,
}

/// `[lotl]`: the list of trusted lists and its out-of-band anchors.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LotlConfig {
    /// Location of the LOTL.
    pub url: Url,
    /// Territory code of the LOTL.
    #[serde(default = "default_lotl_territory")]
    pub territory: String,
    /// Official Journal publication announcing the anchors. When unset any
    /// announcement is accepted.
    #[serde(default)]
    pub oj_url: Option<Url>,
    /// PEM or DER file holding the anchor certificates.
    pub keystore_path: PathBuf,
    /// Follow pivot LOTLs when the current LOTL is not signed by an anchor.
    #[serde(default = "default_true")]
    pub pivot_support: bool,
}

fn default_lotl_territory() -> String {
    DEFAULT_LOTL_TERRITORY.to_owned()
}

fn default_true() -> bool {
    true
}

impl LotlConfig {
    /// Loads the key store and builds the descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Certificates`] if the key store cannot be loaded.
    pub fn descriptor(&self) -> Result<LotlDescriptor, ConfigError> {
        let anchors = KeyStoreCertificateSource::from_file(&self.keystore_path)?;
        let mut descriptor = LotlDescriptor::new(self.url.clone(), anchors)
            .with_territory(self.territory.clone())
            .with_pivot_support(self.pivot_support);
        if let Some(oj_url) = &self.oj_url {
            descriptor = descriptor.with_official_journal(oj_url.clone());
        }
        Ok(descriptor)
    }
}

/// `[[trusted_lists]]`: a list configured outside the LOTL.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TrustedListConfig {
    /// Location of the list.
    pub url: Url,
    /// Territory code the list must declare.
    pub territory: String,
    /// PEM or DER file holding the certificates allowed to sign the list.
    pub signing_certificates_path: PathBuf,
}

impl TrustedListConfig {
    /// Loads the signer certificates and builds the descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Certificates`] if the signer file cannot be loaded.
    pub fn descriptor(&self) -> Result<TrustListDescriptor, ConfigError> {
        let signers = KeyStoreCertificateSource::from_file(&self.signing_certificates_path)?;
        Ok(TrustListDescriptor::new(
            self.url.clone(),
            self.territory.clone(),
            signers.certificates().iter().cloned().collect::<Vec<Certificate>>(),
        ))
    }
}

/// `[job]`: validation job scheduling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct JobSettings {
    /// Interval between cycles, in seconds.
    pub refresh_period_secs: u64,
    /// Maximum number of pivots followed.
    pub max_pivot_depth: usize,
    /// Number of cycle results kept.
    pub history_size: usize,
    /// First retry delay after a failed cycle, in seconds.
    pub min_backoff_secs: u64,
    /// Maximum retry delay, in seconds.
    pub max_backoff_secs: u64,
    /// Shutdown timeout in seconds; `0` waits indefinitely.
    pub shutdown_timeout_secs: u64,
}

impl Default for JobSettings {
    fn default() -> Self {
        let job = JobConfig::default();
        Self {
            refresh_period_secs: job.refresh_period.as_secs(),
            max_pivot_depth: DEFAULT_MAX_PIVOT_DEPTH,
            history_size: job.history_size,
            min_backoff_secs: job.retry.min_backoff.as_secs(),
            max_backoff_secs: job.retry.max_backoff.as_secs(),
            shutdown_timeout_secs: job.shutdown_timeout.map_or(0, |t| t.as_secs()),
        }
    }
}

impl From<JobSettings> for JobConfig {
    fn from(settings: JobSettings) -> Self {
        JobConfig {
            refresh_period: Duration::from_secs(settings.refresh_period_secs),
            max_pivot_depth: settings.max_pivot_depth,
            history_size: settings.history_size,
            retry: RetryConfig {
                min_backoff: Duration::from_secs(settings.min_backoff_secs),
                max_backoff: Duration::from_secs(settings.max_backoff_secs),
            },
            shutdown_timeout: (settings.shutdown_timeout_secs > 0)
                .then(|| Duration::from_secs(settings.shutdown_timeout_secs)),
        }
    }
}

impl RegistryConfig {
    /// Reads and validates the configuration at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read, parsed or validated.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        text.parse()
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.lotl.is_none() && self.trusted_lists.is_empty() {
            return Err(ConfigError::Invalid(
                "neither [lotl] nor [[trusted_lists]] is configured".to_owned(),
            ));
        }
        if self.trusted_lists.iter().any(|tl| tl.territory.trim().is_empty()) {
            return Err(ConfigError::Invalid(
                "trusted list territory must not be empty".to_owned(),
            ));
        }
        self.cache.validate()
    }
}

impl FromStr for RegistryConfig {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }
}
