//! Change feed for downstream consumers on other threads.
//!
//! Listener callbacks registered on a container run synchronously inside
//! `emit_changed`. Consumers that live elsewhere (derived stores, UI
//! threads) subscribe to a shared [`ChangeFeed`] instead and receive
//! [`StoreEvent`]s over bounded channels.
//!
//! # Example
//!
//! ```ignore
//! let feed = Arc::new(ChangeFeed::new());
//! let handle = feed.subscribe(SubscriptionConfig {
//!     filter: SubscriptionFilter::stores(vec!["assessment".to_string()]),
//!     ..Default::default()
//! });
//!
//! loop {
//!     match handle.recv() {
//!         Ok(StoreEvent::Changed { store, .. }) => println!("{} changed", store),
//!         Ok(StoreEvent::Dropped { .. }) | Err(_) => break,
//!         Ok(_) => {}
//!     }
//! }
//! ```

mod manager;
mod types;

pub use manager::ChangeFeed;
pub use types::{
    DropReason, StoreEvent, SubscriptionConfig, SubscriptionFilter, SubscriptionHandle,
    SubscriptionId,
};
