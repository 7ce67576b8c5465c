//! Persistent state containers.
//!
//! A container holds one domain state value, notifies listeners when it
//! changes, and writes snapshots to a [`DurableStore`](crate::DurableStore)
//! only when the value differs from the last snapshot written.
//!
//! # Example
//!
//! ```ignore
//! let durable: Arc<dyn DurableStore> = Arc::new(MemoryStore::new());
//!
//! let mut store = PersistentStore::<Counter, Action>::builder("counter", "counterData")
//!     .persist(true)
//!     .durable(durable)
//!     .on_action(|state, action| match action {
//!         Action::Increment => Some(Counter { count: state.count + 1 }),
//!         _ => None,
//!     })
//!     .restore()?;
//!
//! store.initialize(None);
//! store.add_changed_listener(|state| println!("count = {}", state.count));
//! store.handle_action(&Action::Increment)?;
//! ```

mod builder;
mod listeners;
mod store;

pub use builder::StoreBuilder;
pub use listeners::ListenerSet;
pub use store::PersistentStore;
