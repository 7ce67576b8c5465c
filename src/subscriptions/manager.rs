//! Change feed broadcasting container events.

use crate::types::Timestamp;
use crossbeam_channel::{bounded, Sender};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use super::types::{
    DropReason, StoreEvent, SubscriptionConfig, SubscriptionHandle, SubscriptionId,
};

struct Subscription {
    config: SubscriptionConfig,
    sender: Sender<StoreEvent>,
}

impl Subscription {
    /// Returns false if the buffer is full or the receiver is gone.
    fn try_send(&self, event: StoreEvent) -> bool {
        self.sender.try_send(event).is_ok()
    }
}

/// Fan-out of store events to bounded subscriber channels.
///
/// Shared between containers (wrap in `Arc`). Slow subscribers are
/// dropped instead of blocking the emitting container.
pub struct ChangeFeed {
    subscriptions: RwLock<HashMap<SubscriptionId, Subscription>>,
    next_id: AtomicU64,
}

impl ChangeFeed {
    pub fn new() -> Self {
        Self {
            subscriptions: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn subscribe(&self, config: SubscriptionConfig) -> SubscriptionHandle {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let (sender, receiver) = bounded(config.buffer_size);

        self.subscriptions
            .write()
            .insert(id, Subscription { config, sender });

        SubscriptionHandle { id, receiver }
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        if let Some(sub) = self.subscriptions.write().remove(&id) {
            let _ = sub.sender.try_send(StoreEvent::Dropped {
                reason: DropReason::Unsubscribed,
            });
        }
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.read().len()
    }

    /// Broadcast that `store` emitted a change.
    pub fn broadcast_changed(&self, store: &str, persisted: bool) {
        let event = StoreEvent::Changed {
            store: store.to_string(),
            persisted,
            timestamp: Timestamp::now(),
        };
        self.broadcast(|sub| sub.config.filter.matches_store(store), event);
    }

    /// Broadcast that `store` deleted its durable record.
    pub fn broadcast_torn_down(&self, store: &str) {
        let event = StoreEvent::TornDown {
            store: store.to_string(),
        };
        self.broadcast(
            |sub| sub.config.filter.include_teardown && sub.config.filter.matches_store(store),
            event,
        );
    }

    fn broadcast<F>(&self, filter: F, event: StoreEvent)
    where
        F: Fn(&Subscription) -> bool,
    {
        let mut to_remove = Vec::new();

        {
            let subs = self.subscriptions.read();
            for (id, sub) in subs.iter() {
                if filter(sub) && !sub.try_send(event.clone()) {
                    to_remove.push(*id);
                }
            }
        }

        if !to_remove.is_empty() {
            let mut subs = self.subscriptions.write();
            for id in to_remove {
                if let Some(sub) = subs.remove(&id) {
                    tracing::warn!(subscription = id.0, "dropping slow change subscriber");
                    // Best effort; the buffer is usually still full.
                    let _ = sub.sender.try_send(StoreEvent::Dropped {
                        reason: DropReason::BufferOverflow,
                    });
                }
            }
        }
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subscriptions::SubscriptionFilter;
    use std::time::Duration;

    #[test]
    fn test_subscribe_unsubscribe() {
        let feed = ChangeFeed::new();

        let handle = feed.subscribe(SubscriptionConfig::default());
        assert_eq!(feed.subscription_count(), 1);

        feed.unsubscribe(handle.id);
        assert_eq!(feed.subscription_count(), 0);
        assert!(matches!(
            handle.recv_timeout(Duration::from_millis(100)).unwrap(),
            StoreEvent::Dropped { reason: DropReason::Unsubscribed }
        ));
    }

    #[test]
    fn test_store_filter() {
        let feed = ChangeFeed::new();
        let handle = feed.subscribe(SubscriptionConfig {
            filter: SubscriptionFilter::stores(vec!["tabStops".to_string()]),
            ..Default::default()
        });

        feed.broadcast_changed("assessment", true);
        feed.broadcast_changed("tabStops", false);

        match handle.recv_timeout(Duration::from_millis(100)).unwrap() {
            StoreEvent::Changed { store, persisted, .. } => {
                assert_eq!(store, "tabStops");
                assert!(!persisted);
            }
            other => panic!("Expected Changed event, got {:?}", other),
        }
        assert!(handle.recv_timeout(Duration::from_millis(50)).is_err());
    }

    #[test]
    fn test_teardown_needs_opt_in() {
        let feed = ChangeFeed::new();
        let quiet = feed.subscribe(SubscriptionConfig::default());
        let loud = feed.subscribe(SubscriptionConfig {
            filter: SubscriptionFilter::all(),
            ..Default::default()
        });

        feed.broadcast_torn_down("assessment");

        assert!(quiet.recv_timeout(Duration::from_millis(50)).is_err());
        assert!(matches!(
            loud.recv_timeout(Duration::from_millis(100)).unwrap(),
            StoreEvent::TornDown { .. }
        ));
    }

    #[test]
    fn test_drop_slow_subscriber() {
        let feed = ChangeFeed::new();
        let _handle = feed.subscribe(SubscriptionConfig {
            buffer_size: 2,
            ..Default::default()
        });

        for _ in 0..10 {
            feed.broadcast_changed("assessment", false);
        }

        assert_eq!(feed.subscription_count(), 0);
    }
}
