//! Durable key-value stores.
//!
//! Containers persist their snapshots through the [`DurableStore`] trait.
//! One store is shared by every container in the process; records are
//! disambiguated solely by their persistence key.
//!
//! Two backends are provided:
//! - [`MemoryStore`]: a locked hash map, for tests and ephemeral sessions
//! - [`FileStore`]: one checksummed record file per key, sharded by the
//!   SHA-256 of the key (like Git objects)

mod file;
mod memory;

pub use file::{FileStore, FileStoreConfig};
pub use memory::MemoryStore;

use crate::error::{Result, StoreError};
use serde::de::DeserializeOwned;
use serde_json::Value;

/// A key-value store holding JSON documents.
pub trait DurableStore: Send + Sync {
    /// Read the document stored at `key`.
    fn get_item(&self, key: &str) -> Result<Option<Value>>;

    /// Write `value` at `key`, overwriting any previous document.
    fn set_item(&self, key: &str, value: &Value) -> Result<()>;

    /// Delete the document at `key`. Deleting a missing key is not an error.
    fn remove_item(&self, key: &str) -> Result<()>;

    /// All keys currently stored.
    fn keys(&self) -> Result<Vec<String>>;
}

/// Read and decode the document at `key`.
pub fn load_item<T: DeserializeOwned>(store: &dyn DurableStore, key: &str) -> Result<Option<T>> {
    match store.get_item(key)? {
        Some(value) => serde_json::from_value(value)
            .map(Some)
            .map_err(|e| StoreError::Deserialization(e.to_string())),
        None => Ok(None),
    }
}
