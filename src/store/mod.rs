//! Durable key-value store for cached revocation data.
//!
//! Records are grouped in namespaces (one per source type, e.g. `crl_cache`,
//! `aia_cache`). Writes always replace a whole record, so concurrent writers
//! for the same key resolve last-writer-wins and never leave a truncated
//! payload behind.

use crate::error::CacheError;
use bytes::Bytes;
use std::fmt;
use time::OffsetDateTime;

mod memory;
mod sqlite;

pub use memory::MemoryCacheStore;
pub use sqlite::SqliteCacheStore;

/// One cached resource.
///
/// Invariant: `next_update >= retrieved_at`. Timestamps are kept at
/// millisecond precision so every store round-trips them exactly.
#[derive(Clone, PartialEq, Eq)]
pub struct CacheRecord {
    key: String,
    payload: Bytes,
    retrieved_at: OffsetDateTime,
    next_update: OffsetDateTime,
}

impl CacheRecord {
    /// Creates a record. A `next_update` earlier than `retrieved_at` is
    /// clamped up to `retrieved_at`.
    pub fn new(
        key: impl Into<String>,
        payload: Bytes,
        retrieved_at: OffsetDateTime,
        next_update: OffsetDateTime,
    ) -> Self {
        let retrieved_at = truncate_to_millis(retrieved_at);
        let next_update = truncate_to_millis(next_update).max(retrieved_at);
        Self {
            key: key.into(),
            payload,
            retrieved_at,
            next_update,
        }
    }

    /// Rebuilds a record read back from storage, rejecting invariant violations.
    pub(crate) fn from_stored(
        key: impl Into<String>,
        payload: Bytes,
        retrieved_at_ms: i64,
        next_update_ms: i64,
    ) -> Result<Self, CacheError> {
        let key = key.into();
        if next_update_ms < retrieved_at_ms {
            return Err(CacheError::InvalidRecord { key });
        }
        let retrieved_at = from_unix_millis(retrieved_at_ms)
            .ok_or_else(|| CacheError::InvalidRecord { key: key.clone() })?;
        let next_update = from_unix_millis(next_update_ms)
            .ok_or_else(|| CacheError::InvalidRecord { key: key.clone() })?;
        Ok(Self {
            key,
            payload,
            retrieved_at,
            next_update,
        })
    }

    /// Identifier of the cached resource.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Cached bytes.
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// When the payload was fetched.
    pub fn retrieved_at(&self) -> OffsetDateTime {
        self.retrieved_at
    }

    /// When the payload must be refreshed.
    pub fn next_update(&self) -> OffsetDateTime {
        self.next_update
    }

    /// Returns `true` while `now` is strictly before `next_update`.
    pub fn is_fresh(&self, now: OffsetDateTime) -> bool {
        now < self.next_update
    }

    pub(crate) fn retrieved_at_ms(&self) -> i64 {
        unix_millis(self.retrieved_at)
    }

    pub(crate) fn next_update_ms(&self) -> i64 {
        unix_millis(self.next_update)
    }
}

impl fmt::Debug for CacheRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheRecord")
            .field("key", &self.key)
            .field("payload_len", &self.payload.len())
            .field("retrieved_at", &self.retrieved_at)
            .field("next_update", &self.next_update)
            .finish()
    }
}

/// A validated namespace name: ASCII letters, digits and `_`, not starting
/// with a digit, at most 63 characters. Names end up as SQL identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Namespace(String);

impl Namespace {
    /// Validates and wraps a namespace name.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::InvalidNamespace`] for names that are not plain identifiers.
    pub fn new(name: impl Into<String>) -> Result<Self, CacheError> {
        let name = name.into();
        let mut chars = name.chars();
        let valid_start = chars
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
        let valid_rest = chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !valid_start || !valid_rest || name.len() > 63 {
            return Err(CacheError::InvalidNamespace(name));
        }
        Ok(Self(name))
    }

    /// The namespace name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Backing store shared by the cached revocation sources.
///
/// Implementations must be safe for concurrent use by several sources, each
/// working in its own namespace. Calls may block (SQLite waits up to its busy
/// timeout under contention); [`CachedRevocationSource::get`] runs them on the
/// blocking thread pool.
///
/// [`CachedRevocationSource::get`]: crate::revocation::CachedRevocationSource::get
pub trait CacheStore: fmt::Debug + Send + Sync + 'static {
    /// Creates the namespace if absent. Idempotent.
    fn create_namespace(&self, namespace: &Namespace) -> Result<(), CacheError>;

    /// Drops the namespace and every record in it.
    fn drop_namespace(&self, namespace: &Namespace) -> Result<(), CacheError>;

    /// Reads the record stored under `key`, if any.
    fn get(&self, namespace: &Namespace, key: &str) -> Result<Option<CacheRecord>, CacheError>;

    /// Inserts or replaces the record stored under `record.key()`.
    fn put(&self, namespace: &Namespace, record: &CacheRecord) -> Result<(), CacheError>;
}

fn truncate_to_millis(ts: OffsetDateTime) -> OffsetDateTime {
    from_unix_millis(unix_millis(ts)).unwrap_or(ts)
}

// Millisecond timestamps fit in i64 for every date `time` can represent.
#[allow(clippy::cast_possible_truncation)]
fn unix_millis(ts: OffsetDateTime) -> i64 {
    (ts.unix_timestamp_nanos() / 1_000_000) as i64
}

fn from_unix_millis(ms: i64) -> Option<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(ms) * 1_000_000).ok()
}
