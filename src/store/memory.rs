use super::{CacheRecord, CacheStore, Namespace};
use crate::error::CacheError;
use std::collections::HashMap;
use std::sync::Mutex;

/// Process-local [`CacheStore`] for tests and deployments without a database.
#[derive(Debug, Default)]
pub struct MemoryCacheStore {
    namespaces: Mutex<HashMap<Namespace, HashMap<String, CacheRecord>>>,
}

impl MemoryCacheStore {
    /// Creates an empty store with no namespace.
    pub fn new() -> Self {
        Self::default()
    }
}

impl CacheStore for MemoryCacheStore {
    fn create_namespace(&self, namespace: &Namespace) -> Result<(), CacheError> {
        self.namespaces
            .lock()
            .map_err(|_| CacheError::Poisoned)?
            .entry(namespace.clone())
            .or_default();
        Ok(())
    }

    fn drop_namespace(&self, namespace: &Namespace) -> Result<(), CacheError> {
        self.namespaces
            .lock()
            .map_err(|_| CacheError::Poisoned)?
            .remove(namespace);
        Ok(())
    }

    fn get(&self, namespace: &Namespace, key: &str) -> Result<Option<CacheRecord>, CacheError> {
        let guard = self.namespaces.lock().map_err(|_| CacheError::Poisoned)?;
        let records = guard
            .get(namespace)
            .ok_or_else(|| CacheError::NamespaceNotInitialized(namespace.to_string()))?;
        Ok(records.get(key).cloned())
    }

    fn put(&self, namespace: &Namespace, record: &CacheRecord) -> Result<(), CacheError> {
        let mut guard = self.namespaces.lock().map_err(|_| CacheError::Poisoned)?;
        let records = guard
            .get_mut(namespace)
            .ok_or_else(|| CacheError::NamespaceNotInitialized(namespace.to_string()))?;
        records.insert(record.key().to_owned(), record.clone());
        Ok(())
    }
}
