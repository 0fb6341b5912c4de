//! File-system cache in front of a [`Fetcher`], used to load trust lists.
//!
//! Cached files live in one directory and are named after the SHA-256 of the
//! URL. Two configurations are used together:
//!
//! - [`FileCacheLoader::online`] always refetches and keeps the previous file
//!   as a fallback when the network fails;
//! - [`FileCacheLoader::offline`] never touches the network and only serves
//!   what is already on disk.
//!
//! Pointing both at the same directory lets the offline loader serve what the
//! online one fetched last.

use crate::error::{CacheError, FetchError};
use crate::fetch::{Fetcher, NoOpFetcher};
use crate::prelude::{debug, warn};
use bytes::Bytes;
use sha2::{Digest, Sha256};
use std::fmt::Debug;
use std::future::Future;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use thiserror::Error;
use url::Url;

/// Errors returned by a [`FileLoader`].
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum LoaderError {
    /// The document could not be fetched and no cached copy exists.
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// The cache directory failed, or (offline) the document is not cached.
    #[error(transparent)]
    Cache(#[from] CacheError),
}

/// Future returned by [`FileLoader::get`].
pub type LoadFuture<'a> = Pin<Box<dyn Future<Output = Result<Bytes, LoaderError>> + Send + 'a>>;

/// Loads a document by URL.
pub trait FileLoader: Debug + Send + Sync + 'static {
    /// Returns the document at `url`.
    fn get<'a>(&'a self, url: &'a Url) -> LoadFuture<'a>;
}

/// A [`Fetcher`] backed by a directory of cached files.
#[derive(Debug, Clone)]
pub struct FileCacheLoader {
    directory: PathBuf,
    fetcher: Arc<dyn Fetcher>,
    // `None` never expires.
    lifetime: Option<Duration>,
}

impl FileCacheLoader {
    /// Loader that refetches on every call and falls back to the cached file.
    pub fn online(directory: impl Into<PathBuf>, fetcher: Arc<dyn Fetcher>) -> Self {
        Self::with_lifetime(directory, fetcher, Some(Duration::ZERO))
    }

    /// Loader that only reads cached files. A miss is a [`CacheError::Missing`].
    pub fn offline(directory: impl Into<PathBuf>) -> Self {
        Self::with_lifetime(directory, Arc::new(NoOpFetcher), None)
    }

    /// Loader whose files are reused while younger than `lifetime`.
    pub fn with_lifetime(
        directory: impl Into<PathBuf>,
        fetcher: Arc<dyn Fetcher>,
        lifetime: Option<Duration>,
    ) -> Self {
        Self {
            directory: directory.into(),
            fetcher,
            lifetime,
        }
    }

    /// The cache directory.
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Path of the file caching `url`.
    pub fn cache_path(&self, url: &Url) -> PathBuf {
        self.directory
            .join(hex::encode(Sha256::digest(url.as_str().as_bytes())))
    }

    /// Returns the document at `url`.
    ///
    /// # Errors
    ///
    /// - [`LoaderError::Cache`] with [`CacheError::Missing`] when nothing is
    ///   cached and network access is disabled;
    /// - [`LoaderError::Fetch`] when the fetch fails and nothing is cached;
    /// - [`LoaderError::Cache`] when the cache directory cannot be written.
    pub async fn get(&self, url: &Url) -> Result<Bytes, LoaderError> {
        let path = self.cache_path(url);

        if self.is_fresh(&path) {
            if let Some(cached) = read_cached(&path)? {
                debug!("Serving cached document: url={}", url);
                return Ok(cached);
            }
        }

        match self.fetcher.fetch(url).await {
            Ok(body) => {
                self.store(&path, &body)?;
                debug!("Fetched and cached document: url={}, bytes={}", url, body.len());
                Ok(body)
            }
            Err(FetchError::Disabled { .. }) => read_cached(&path)?.ok_or_else(|| {
                CacheError::Missing {
                    key: url.to_string(),
                }
                .into()
            }),
            Err(e) => match read_cached(&path)? {
                Some(cached) => {
                    warn!(
                        "Fetch failed; serving previously cached document: url={}, error={}",
                        url, e
                    );
                    Ok(cached)
                }
                None => Err(e.into()),
            },
        }
    }

    /// Deletes the cached copy of `url`. Removing an absent entry is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Io`] if the file exists but cannot be removed.
    pub fn remove(&self, url: &Url) -> Result<(), CacheError> {
        let path = self.cache_path(url);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CacheError::io(path, e)),
        }
    }

    fn is_fresh(&self, path: &Path) -> bool {
        let Some(lifetime) = self.lifetime else {
            return true;
        };
        if lifetime.is_zero() {
            return false;
        }
        std::fs::metadata(path)
            .and_then(|m| m.modified())
            .ok()
            .and_then(|modified| SystemTime::now().duration_since(modified).ok())
            .is_some_and(|age| age < lifetime)
    }

    // Temp file in the same directory, then rename: readers see the old file
    // or the new one, never a partial write.
    fn store(&self, path: &Path, body: &[u8]) -> Result<(), CacheError> {
        std::fs::create_dir_all(&self.directory)
            .map_err(|e| CacheError::io(&self.directory, e))?;

        let mut tmp = tempfile::NamedTempFile::new_in(&self.directory)
            .map_err(|e| CacheError::io(&self.directory, e))?;
        tmp.write_all(body).map_err(|e| CacheError::io(tmp.path(), e))?;
        tmp.as_file()
            .sync_all()
            .map_err(|e| CacheError::io(tmp.path(), e))?;
        tmp.persist(path)
            .map_err(|e| CacheError::io(path, e.error))?;
        Ok(())
    }
}

impl FileLoader for FileCacheLoader {
    fn get<'a>(&'a self, url: &'a Url) -> LoadFuture<'a> {
        Box::pin(FileCacheLoader::get(self, url))
    }
}

/// Tries `primary`, then `secondary` when the primary fails.
///
/// The validation job loads every list through an online loader backed by
/// an offline one.
#[derive(Debug, Clone)]
pub struct FallbackLoader {
    primary: Arc<dyn FileLoader>,
    secondary: Arc<dyn FileLoader>,
}

impl FallbackLoader {
    /// Chains two loaders.
    pub fn new(primary: Arc<dyn FileLoader>, secondary: Arc<dyn FileLoader>) -> Self {
        Self { primary, secondary }
    }
}

impl FileLoader for FallbackLoader {
    fn get<'a>(&'a self, url: &'a Url) -> LoadFuture<'a> {
        Box::pin(async move {
            match self.primary.get(url).await {
                Ok(body) => Ok(body),
                Err(e) => {
                    warn!("Primary loader failed; trying fallback: url={}, error={}", url, e);
                    self.secondary.get(url).await
                }
            }
        })
    }
}

fn read_cached(path: &Path) -> Result<Option<Bytes>, CacheError> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(Some(Bytes::from(bytes))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(CacheError::io(path, e)),
    }
}
