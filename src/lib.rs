//! # Persistent Store
//!
//! Flux-style state containers whose state is persisted to a durable
//! key-value store only when it actually changes.
//!
//! ## Core Concepts
//!
//! - **Containers**: own one state value, replace it wholesale on update,
//!   and notify listeners on every change
//! - **Durable stores**: key-value backends shared by all containers,
//!   in memory or on disk
//! - **Change gating**: a snapshot is written only when it differs from
//!   the last snapshot written
//! - **Dispatch**: actions fan out to every registered container
//! - **Change feed**: bounded channels for consumers on other threads
//!
//! ## Example
//!
//! ```ignore
//! use persistent_store::{FileStore, FileStoreConfig, PersistentStore};
//!
//! let durable = Arc::new(FileStore::open(FileStoreConfig {
//!     path: "./persisted".into(),
//!     ..Default::default()
//! })?);
//!
//! let mut store = PersistentStore::<Counter>::builder("counter", "counterData")
//!     .persist(true)
//!     .durable(durable)
//!     .restore()?;
//!
//! store.initialize(None);
//! store.update(|c| Counter { count: c.count + 1 })?; // written
//! store.emit_changed()?;                              // unchanged, skipped
//! ```

pub mod container;
pub mod dispatcher;
pub mod durable;
pub mod error;
pub mod subscriptions;
pub mod types;

// Re-exports
pub use container::{ListenerSet, PersistentStore, StoreBuilder};
pub use dispatcher::{ActionSink, DispatchToken, Dispatcher, SharedSink};
pub use durable::{load_item, DurableStore, FileStore, FileStoreConfig, MemoryStore};
pub use error::{Result, StoreError};
pub use subscriptions::{
    ChangeFeed, DropReason, StoreEvent, SubscriptionConfig, SubscriptionFilter,
    SubscriptionHandle, SubscriptionId,
};
pub use types::*;
