//! Process-local backend for tests and throwaway deployments.

use parking_lot::RwLock;
use readerfleet_core::storage::{Result, StorageBackend, UpdateFn};
use std::collections::HashMap;

#[derive(Debug, Clone, Default, serde::Deserialize, serde::Serialize)]
pub struct MemoryBackendConfig {
    /// Number of tables to reserve room for.
    #[serde(default)]
    pub capacity: Option<usize>,
}

type Tables = HashMap<String, HashMap<String, Vec<u8>>>;

/// In-memory storage backend.
pub struct MemoryBackend {
    data: RwLock<Tables>,
}

impl MemoryBackend {
    /// Create a new in-memory backend.
    pub fn new(config: MemoryBackendConfig) -> Self {
        let data = match config.capacity {
            Some(capacity) => HashMap::with_capacity(capacity),
            None => HashMap::new(),
        };
        Self {
            data: RwLock::new(data),
        }
    }

    /// Get the number of entries in a table.
    pub fn count(&self, table: &str) -> usize {
        self.data.read().get(table).map(|t| t.len()).unwrap_or(0)
    }

    /// Clear all data.
    pub fn clear(&self) {
        self.data.write().clear();
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new(MemoryBackendConfig::default())
    }
}

impl StorageBackend for MemoryBackend {
    fn write(&self, table: &str, key: &str, value: &[u8]) -> Result<()> {
        let mut data = self.data.write();
        data.entry(table.to_string())
            .or_default()
            .insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn read(&self, table: &str, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.data.read().get(table).and_then(|t| t.get(key)).cloned())
    }

    fn delete(&self, table: &str, key: &str) -> Result<bool> {
        Ok(self
            .data
            .write()
            .get_mut(table)
            .and_then(|t| t.remove(key))
            .is_some())
    }

    fn scan(&self, table: &str, prefix: &str) -> Result<Vec<(String, Vec<u8>)>> {
        let data = self.data.read();
        let mut results: Vec<(String, Vec<u8>)> = data
            .get(table)
            .map(|t| {
                t.iter()
                    .filter(|(k, _)| k.starts_with(prefix))
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect()
            })
            .unwrap_or_default();
        // Match the key ordering of the redb backend.
        results.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(results)
    }

    fn write_batch(&self, table: &str, items: Vec<(String, Vec<u8>)>) -> Result<()> {
        let mut data = self.data.write();
        let table_data = data.entry(table.to_string()).or_default();
        for (key, value) in items {
            table_data.insert(key, value);
        }
        Ok(())
    }

    fn update(&self, table: &str, key: &str, f: &mut UpdateFn<'_>) -> Result<bool> {
        // Holding the write lock across the callback is what makes this atomic.
        let mut data = self.data.write();
        let current = data.get(table).and_then(|t| t.get(key)).map(|v| v.as_slice());
        match f(current)? {
            Some(next) => {
                data.entry(table.to_string())
                    .or_default()
                    .insert(key.to_string(), next);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn is_persistent(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_read_delete() {
        let backend = MemoryBackend::default();
        backend.write("devices", "R-1", b"one").unwrap();

        assert_eq!(backend.read("devices", "R-1").unwrap(), Some(b"one".to_vec()));
        assert_eq!(backend.count("devices"), 1);
        assert!(backend.delete("devices", "R-1").unwrap());
        assert!(!backend.delete("devices", "R-1").unwrap());
        assert!(backend.read("devices", "R-1").unwrap().is_none());
    }

    #[test]
    fn test_scan_is_sorted_and_prefixed() {
        let backend = MemoryBackend::default();
        backend
            .write_batch(
                "t",
                vec![
                    ("b:2".to_string(), vec![2]),
                    ("a:1".to_string(), vec![1]),
                    ("b:1".to_string(), vec![3]),
                ],
            )
            .unwrap();

        let keys: Vec<String> = backend
            .scan("t", "b:")
            .unwrap()
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(keys, vec!["b:1".to_string(), "b:2".to_string()]);
    }

    #[test]
    fn test_update_conditional() {
        let backend = MemoryBackend::default();
        backend.write("t", "k", b"pending").unwrap();

        let claimed = backend
            .update("t", "k", &mut |current| {
                Ok(match current {
                    Some(b"pending") => Some(b"processing".to_vec()),
                    _ => None,
                })
            })
            .unwrap();
        assert!(claimed);

        let claimed_again = backend
            .update("t", "k", &mut |current| {
                Ok(match current {
                    Some(b"pending") => Some(b"processing".to_vec()),
                    _ => None,
                })
            })
            .unwrap();
        assert!(!claimed_again);
        assert_eq!(backend.read("t", "k").unwrap(), Some(b"processing".to_vec()));
    }
}
