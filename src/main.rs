use anyhow::{bail, Context};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use trustlist_registry::fetch::HttpFetcher;
use trustlist_registry::revocation::RevocationKind;
use trustlist_registry::store::{CacheStore, SqliteCacheStore};
use trustlist_registry::{CachedRevocationSource, RegistryConfig, TlValidationJob};

/// Trust-list registry: keeps trusted certificates and revocation caches fresh.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(value_name = "CONFIG", env = "TRUSTLIST_REGISTRY_CONFIG")]
    config_path: PathBuf,

    /// Run a single validation cycle and exit
    #[arg(long)]
    once: bool,

    /// Drop the revocation cache namespaces on exit
    #[arg(long)]
    destroy_caches_on_exit: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = RegistryConfig::from_file(&cli.config_path)
        .with_context(|| format!("loading {}", cli.config_path.display()))?;
    info!(
        "Trust-list registry v{} starting: config={}",
        env!("CARGO_PKG_VERSION"),
        cli.config_path.display()
    );

    let fetcher = Arc::new(HttpFetcher::new(&config.fetcher).context("building HTTP client")?);
    let store: Arc<dyn CacheStore> = Arc::new(
        SqliteCacheStore::open(&config.cache.database_path).with_context(|| {
            format!("opening cache database {}", config.cache.database_path.display())
        })?,
    );

    // Cache initialization failures are fatal.
    let revocation_sources = [
        CachedRevocationSource::for_kind(RevocationKind::Crl, Arc::clone(&store), fetcher.clone())?
            .with_policy(config.cache.crl_policy()),
        CachedRevocationSource::for_kind(RevocationKind::Aia, Arc::clone(&store), fetcher.clone())?
            .with_policy(config.cache.aia_policy()),
    ];
    for source in &revocation_sources {
        source
            .initialize()
            .with_context(|| format!("initializing cache namespace {}", source.namespace()))?;
    }

    let mut builder = TlValidationJob::builder()
        .file_cache(config.file_cache.directory.clone(), fetcher)
        .config(config.job.into());
    if let Some(lotl) = &config.lotl {
        builder = builder.lotl(lotl.descriptor()?);
    }
    for trusted_list in &config.trusted_lists {
        builder = builder.trusted_list(trusted_list.descriptor()?);
    }
    let job = builder.build()?;

    let outcome = if cli.once {
        run_once(&job).await
    } else {
        run_until_interrupted(&job).await
    };

    if cli.destroy_caches_on_exit {
        for source in &revocation_sources {
            if let Err(e) = source.destroy() {
                error!("Failed to destroy cache namespace {}: {}", source.namespace(), e);
            }
        }
    }
    outcome
}

async fn run_once(job: &TlValidationJob) -> anyhow::Result<()> {
    let result = job.run_cycle().await?;
    for url in result.failed_lists() {
        warn!("Trust list excluded: {}", url);
    }
    if !result.is_published() {
        bail!("validation cycle failed closed: {:?}", result.status());
    }
    info!(
        "Published {} trusted certificates (version {})",
        job.aggregate().current_anchors().len(),
        result.aggregate_version()
    );
    Ok(())
}

async fn run_until_interrupted(job: &TlValidationJob) -> anyhow::Result<()> {
    job.spawn().await?;
    tokio::signal::ctrl_c()
        .await
        .context("waiting for Ctrl-C")?;
    info!("Shutdown requested");
    job.shutdown_configured().await?;
    Ok(())
}
