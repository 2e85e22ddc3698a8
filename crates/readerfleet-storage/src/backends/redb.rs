//! redb backend.
//!
//! All logical tables share one redb table; keys are `"<table>:<key>"`, so a
//! logical table scan is a single range scan. Reads go through an optional
//! LRU cache that every write path keeps current.

use lru::LruCache;
use parking_lot::Mutex;
use readerfleet_core::storage::{Result, StorageBackend, StorageError, UpdateFn};
use redb::{Database, ReadableTable, TableDefinition, WriteTransaction};
use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::Arc;

const DOCUMENTS: TableDefinition<&str, &[u8]> = TableDefinition::new("documents");

const DEFAULT_CACHE_CAPACITY: usize = 1024;

/// Options accepted by `create_backend("redb", ...)`.
#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
pub struct RedbBackendConfig {
    /// Database file; parent directories are created.
    pub path: String,

    /// Cached documents; 0 disables the cache.
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
}

fn default_cache_capacity() -> usize {
    DEFAULT_CACHE_CAPACITY
}

impl RedbBackendConfig {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            cache_capacity: DEFAULT_CACHE_CAPACITY,
        }
    }

    pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self
    }
}

fn document_key(table: &str, key: &str) -> String {
    format!("{}:{}", table, key)
}

fn backend_err(e: impl std::fmt::Display) -> StorageError {
    StorageError::Backend(e.to_string())
}

/// Single-file persistent backend.
pub struct RedbBackend {
    db: Arc<Database>,
    cache: Option<Mutex<LruCache<String, Vec<u8>>>>,
}

impl RedbBackend {
    pub fn new(config: RedbBackendConfig) -> Result<Self> {
        let path = Path::new(&config.path);
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        // Opens an existing file without truncating it.
        let db = Database::create(path).map_err(backend_err)?;

        // Create the table up front so read transactions never see it missing.
        let txn = db.begin_write().map_err(backend_err)?;
        txn.open_table(DOCUMENTS).map_err(backend_err)?;
        txn.commit().map_err(backend_err)?;

        let cache = NonZeroUsize::new(config.cache_capacity).map(|cap| Mutex::new(LruCache::new(cap)));

        tracing::debug!(path = %config.path, cache_capacity = config.cache_capacity, "redb backend opened");

        Ok(Self {
            db: Arc::new(db),
            cache,
        })
    }

    /// Open or create a database file with default options.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::new(RedbBackendConfig::new(path.as_ref().to_string_lossy()))
    }

    /// Commit `txn`, then apply `f` to the cache before any reader can fill
    /// a miss from a snapshot older than this commit.
    fn commit_cached<F>(&self, txn: WriteTransaction, f: F) -> Result<()>
    where
        F: FnOnce(&mut LruCache<String, Vec<u8>>),
    {
        match &self.cache {
            Some(cache) => {
                let mut guard = cache.lock();
                txn.commit().map_err(backend_err)?;
                f(&mut guard);
            }
            None => txn.commit().map_err(backend_err)?,
        }
        Ok(())
    }

    fn read_committed(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let txn = self.db.begin_read().map_err(backend_err)?;
        let t = txn.open_table(DOCUMENTS).map_err(backend_err)?;
        let value = t.get(key).map_err(backend_err)?.map(|v| v.value().to_vec());
        Ok(value)
    }
}

impl StorageBackend for RedbBackend {
    fn write(&self, table: &str, key: &str, value: &[u8]) -> Result<()> {
        let namespaced = document_key(table, key);

        let txn = self.db.begin_write().map_err(backend_err)?;
        {
            let mut t = txn.open_table(DOCUMENTS).map_err(backend_err)?;
            t.insert(namespaced.as_str(), value).map_err(backend_err)?;
        }
        self.commit_cached(txn, |cache| {
            cache.put(namespaced, value.to_vec());
        })
    }

    fn read(&self, table: &str, key: &str) -> Result<Option<Vec<u8>>> {
        let namespaced = document_key(table, key);

        let Some(cache) = &self.cache else {
            return self.read_committed(&namespaced);
        };

        // Writers commit under this lock, so the snapshot read here is the
        // latest one until the lock is released.
        let mut guard = cache.lock();
        if let Some(cached) = guard.get(&namespaced) {
            return Ok(Some(cached.clone()));
        }
        let value = self.read_committed(&namespaced)?;
        if let Some(data) = &value {
            guard.put(namespaced, data.clone());
        }
        Ok(value)
    }

    fn delete(&self, table: &str, key: &str) -> Result<bool> {
        let namespaced = document_key(table, key);

        let txn = self.db.begin_write().map_err(backend_err)?;
        let removed = {
            let mut t = txn.open_table(DOCUMENTS).map_err(backend_err)?;
            let removed = t.remove(namespaced.as_str()).map_err(backend_err)?.is_some();
            removed
        };
        self.commit_cached(txn, |cache| {
            cache.pop(&namespaced);
        })?;
        Ok(removed)
    }

    fn scan(&self, table: &str, prefix: &str) -> Result<Vec<(String, Vec<u8>)>> {
        let table_prefix = document_key(table, prefix);
        let table_prefix_len = table.len() + 1;

        let txn = self.db.begin_read().map_err(backend_err)?;
        let t = txn.open_table(DOCUMENTS).map_err(backend_err)?;

        let mut results = Vec::new();
        for item in t.range(table_prefix.as_str()..).map_err(backend_err)? {
            let (key, value) = item.map_err(backend_err)?;
            let key_str = key.value();
            if !key_str.starts_with(&table_prefix) {
                break;
            }
            if let Some(rest) = key_str.get(table_prefix_len..) {
                results.push((rest.to_string(), value.value().to_vec()));
            }
        }
        Ok(results)
    }

    fn write_batch(&self, table: &str, items: Vec<(String, Vec<u8>)>) -> Result<()> {
        let txn = self.db.begin_write().map_err(backend_err)?;
        let mut written = Vec::with_capacity(items.len());
        {
            let mut t = txn.open_table(DOCUMENTS).map_err(backend_err)?;
            for (key, value) in items {
                let namespaced = document_key(table, &key);
                t.insert(namespaced.as_str(), value.as_slice())
                    .map_err(backend_err)?;
                written.push((namespaced, value));
            }
        }
        self.commit_cached(txn, |cache| {
            for (key, value) in written {
                cache.put(key, value);
            }
        })
    }

    fn update(&self, table: &str, key: &str, f: &mut UpdateFn<'_>) -> Result<bool> {
        let namespaced = document_key(table, key);

        // redb serializes write transactions, so the read below cannot be
        // raced by another writer before commit. `f` runs without the cache
        // lock held.
        let txn = self.db.begin_write().map_err(backend_err)?;
        let next = {
            let mut t = txn.open_table(DOCUMENTS).map_err(backend_err)?;
            let current = t
                .get(namespaced.as_str())
                .map_err(backend_err)?
                .map(|v| v.value().to_vec());
            let next = f(current.as_deref())?;
            if let Some(value) = &next {
                t.insert(namespaced.as_str(), value.as_slice())
                    .map_err(backend_err)?;
            }
            next
        };

        match next {
            Some(value) => {
                self.commit_cached(txn, |cache| {
                    cache.put(namespaced, value);
                })?;
                Ok(true)
            }
            None => {
                txn.abort().map_err(backend_err)?;
                Ok(false)
            }
        }
    }

    fn is_persistent(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_key() {
        assert_eq!(document_key("commands", "123"), "commands:123");
    }

    #[test]
    fn test_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/deeper/fleet.redb");
        let backend = RedbBackend::open(&path).unwrap();
        assert!(path.exists());
        assert!(backend.is_persistent());
    }

    #[test]
    fn test_uncached_reads_hit_disk() {
        let dir = tempfile::tempdir().unwrap();
        let config = RedbBackendConfig::new(dir.path().join("fleet.redb").to_string_lossy()).with_cache_capacity(0);
        let backend = RedbBackend::new(config).unwrap();
        assert!(backend.cache.is_none());

        backend.write("devices", "R-1", b"{}").unwrap();
        assert_eq!(backend.read("devices", "R-1").unwrap(), Some(b"{}".to_vec()));
        assert!(backend.delete("devices", "R-1").unwrap());
        assert_eq!(backend.read("devices", "R-1").unwrap(), None);
    }
}
