use super::{CacheRecord, CacheStore, Namespace};
use crate::error::CacheError;
use bytes::Bytes;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// How long a writer waits for another process holding the database lock.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite-backed [`CacheStore`]. One table per namespace.
///
/// The connection is guarded by a mutex inside the process; SQLite's own
/// file locking (WAL mode, busy timeout) covers other processes sharing the
/// database file.
#[derive(Debug)]
pub struct SqliteCacheStore {
    conn: Mutex<Connection>,
}

impl SqliteCacheStore {
    /// Opens (or creates) the database at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Store`] if the database cannot be opened.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CacheError> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
            row.get::<_, String>(0)
        })?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Opens a private in-memory database.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Store`] if SQLite cannot allocate the database.
    pub fn open_in_memory() -> Result<Self, CacheError> {
        Ok(Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, CacheError> {
        self.conn.lock().map_err(|_| CacheError::Poisoned)
    }
}

fn table_exists(conn: &Connection, namespace: &Namespace) -> Result<bool, CacheError> {
    let exists = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
            params![namespace.as_str()],
            |_| Ok(()),
        )
        .optional()?
        .is_some();
    Ok(exists)
}

impl CacheStore for SqliteCacheStore {
    fn create_namespace(&self, namespace: &Namespace) -> Result<(), CacheError> {
        // Namespace names are validated identifiers, safe to interpolate.
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS \"{namespace}\" (
                key          TEXT    PRIMARY KEY NOT NULL,
                payload      BLOB    NOT NULL,
                retrieved_at INTEGER NOT NULL,
                next_update  INTEGER NOT NULL,
                CHECK (next_update >= retrieved_at)
            )"
        );
        self.lock()?.execute_batch(&sql)?;
        Ok(())
    }

    fn drop_namespace(&self, namespace: &Namespace) -> Result<(), CacheError> {
        self.lock()?
            .execute_batch(&format!("DROP TABLE IF EXISTS \"{namespace}\""))?;
        Ok(())
    }

    fn get(&self, namespace: &Namespace, key: &str) -> Result<Option<CacheRecord>, CacheError> {
        let conn = self.lock()?;
        if !table_exists(&conn, namespace)? {
            return Err(CacheError::NamespaceNotInitialized(namespace.to_string()));
        }

        let row = conn
            .query_row(
                &format!(
                    "SELECT payload, retrieved_at, next_update FROM \"{namespace}\" WHERE key = ?1"
                ),
                params![key],
                |row| {
                    Ok((
                        row.get::<_, Vec<u8>>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, i64>(2)?,
                    ))
                },
            )
            .optional()?;

        row.map(|(payload, retrieved_at, next_update)| {
            CacheRecord::from_stored(key, Bytes::from(payload), retrieved_at, next_update)
        })
        .transpose()
    }

    fn put(&self, namespace: &Namespace, record: &CacheRecord) -> Result<(), CacheError> {
        let conn = self.lock()?;
        if !table_exists(&conn, namespace)? {
            return Err(CacheError::NamespaceNotInitialized(namespace.to_string()));
        }

        conn.execute(
            &format!(
                "INSERT INTO \"{namespace}\" (key, payload, retrieved_at, next_update)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(key) DO UPDATE SET
                    payload = excluded.payload,
                    retrieved_at = excluded.retrieved_at,
                    next_update = excluded.next_update"
            ),
            params![
                record.key(),
                record.payload().as_ref(),
                record.retrieved_at_ms(),
                record.next_update_ms()
            ],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::{Duration as TimeDuration, OffsetDateTime};

    fn ns(name: &str) -> Namespace {
        Namespace::new(name).unwrap()
    }

    #[test]
    fn test_create_namespace_is_idempotent() {
        let store = SqliteCacheStore::open_in_memory().unwrap();
        store.create_namespace(&ns("crl_cache")).unwrap();
        store.create_namespace(&ns("crl_cache")).unwrap();

        assert_eq!(store.get(&ns("crl_cache"), "missing").unwrap(), None);
    }

    #[test]
    fn test_put_replaces_whole_record() {
        let store = SqliteCacheStore::open_in_memory().unwrap();
        let namespace = ns("crl_cache");
        store.create_namespace(&namespace).unwrap();

        let now = OffsetDateTime::now_utc();
        let first = CacheRecord::new(
            "http://crl.example/ca.crl",
            Bytes::from_static(b"first"),
            now,
            now + TimeDuration::minutes(10),
        );
        store.put(&namespace, &first).unwrap();

        let later = now + TimeDuration::hours(1);
        let second = CacheRecord::new(
            "http://crl.example/ca.crl",
            Bytes::from_static(b"second-and-longer"),
            later,
            later + TimeDuration::minutes(10),
        );
        store.put(&namespace, &second).unwrap();

        let stored = store
            .get(&namespace, "http://crl.example/ca.crl")
            .unwrap()
            .unwrap();
        assert_eq!(stored, second);
        assert!(stored.next_update() >= stored.retrieved_at());
    }

    #[test]
    fn test_namespaces_are_disjoint() {
        let store = SqliteCacheStore::open_in_memory().unwrap();
        store.create_namespace(&ns("crl_cache")).unwrap();
        store.create_namespace(&ns("aia_cache")).unwrap();

        let now = OffsetDateTime::now_utc();
        let record = CacheRecord::new("same-key", Bytes::from_static(b"crl"), now, now);
        store.put(&ns("crl_cache"), &record).unwrap();

        assert!(store.get(&ns("crl_cache"), "same-key").unwrap().is_some());
        assert!(store.get(&ns("aia_cache"), "same-key").unwrap().is_none());
    }

    #[test]
    fn test_drop_namespace() {
        let store = SqliteCacheStore::open_in_memory().unwrap();
        let namespace = ns("aia_cache");
        store.create_namespace(&namespace).unwrap();
        store.drop_namespace(&namespace).unwrap();
        store.drop_namespace(&namespace).unwrap();

        assert!(matches!(
            store.get(&namespace, "k"),
            Err(CacheError::NamespaceNotInitialized(_))
        ));
    }

    #[test]
    fn test_check_constraint_rejects_inverted_rows() {
        let store = SqliteCacheStore::open_in_memory().unwrap();
        let namespace = ns("crl_cache");
        store.create_namespace(&namespace).unwrap();

        let conn = store.lock().unwrap();
        let result = conn.execute(
            "INSERT INTO crl_cache (key, payload, retrieved_at, next_update) VALUES ('k', x'00', 10, 5)",
            [],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_open_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.db");
        let namespace = ns("crl_cache");

        {
            let store = SqliteCacheStore::open(&path).unwrap();
            store.create_namespace(&namespace).unwrap();
            let now = OffsetDateTime::now_utc();
            store
                .put(
                    &namespace,
                    &CacheRecord::new("k", Bytes::from_static(b"v"), now, now),
                )
                .unwrap();
        }

        let reopened = SqliteCacheStore::open(&path).unwrap();
        let record = reopened.get(&namespace, "k").unwrap().unwrap();
        assert_eq!(record.payload().as_ref(), b"v");
    }
}
