//! In-memory durable store.

use crate::error::{Result, StoreError};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use super::DurableStore;

/// Durable store backed by a hash map.
///
/// Counts writes and removals so callers can observe how much I/O a
/// container issued. [`MemoryStore::set_failing`] makes every subsequent
/// write and removal fail with [`StoreError::Backend`].
#[derive(Default)]
pub struct MemoryStore {
    items: RwLock<HashMap<String, Value>>,
    writes: AtomicU64,
    removals: AtomicU64,
    failing: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful `set_item` calls.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Number of successful `remove_item` calls.
    pub fn removal_count(&self) -> u64 {
        self.removals.load(Ordering::SeqCst)
    }

    /// Toggle fault injection.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }

    fn check_failing(&self, op: &str, key: &str) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Backend(format!("{} failed for key {}", op, key)));
        }
        Ok(())
    }
}

impl DurableStore for MemoryStore {
    fn get_item(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.items.read().get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &Value) -> Result<()> {
        self.check_failing("set_item", key)?;
        self.items.write().insert(key.to_string(), value.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<()> {
        self.check_failing("remove_item", key)?;
        self.items.write().remove(key);
        self.removals.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>> {
        let mut keys: Vec<String> = self.items.read().keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_set_get_remove() {
        let store = MemoryStore::new();
        store.set_item("a", &json!({"count": 1})).unwrap();

        assert_eq!(store.get_item("a").unwrap(), Some(json!({"count": 1})));
        assert_eq!(store.write_count(), 1);

        store.remove_item("a").unwrap();
        assert_eq!(store.get_item("a").unwrap(), None);
        assert_eq!(store.removal_count(), 1);
    }

    #[test]
    fn test_remove_missing_is_ok() {
        let store = MemoryStore::new();
        assert!(store.remove_item("missing").is_ok());
    }

    #[test]
    fn test_failing_mode() {
        let store = MemoryStore::new();
        store.set_failing(true);

        let result = store.set_item("a", &json!(1));
        assert!(matches!(result, Err(StoreError::Backend(_))));
        assert_eq!(store.write_count(), 0);
        assert!(store.is_empty());

        store.set_failing(false);
        store.set_item("a", &json!(1)).unwrap();
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_keys_sorted() {
        let store = MemoryStore::new();
        store.set_item("b", &json!(2)).unwrap();
        store.set_item("a", &json!(1)).unwrap();
        assert_eq!(store.keys().unwrap(), vec!["a".to_string(), "b".to_string()]);
    }
}
