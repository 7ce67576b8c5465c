//! Change feed types.

use crate::types::Timestamp;
use serde::{Deserialize, Serialize};

/// Configuration for a subscription.
#[derive(Clone, Debug)]
pub struct SubscriptionConfig {
    /// Max buffered events before dropping subscriber.
    /// Default: 1000
    pub buffer_size: usize,

    /// Filter criteria.
    pub filter: SubscriptionFilter,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            buffer_size: 1000,
            filter: SubscriptionFilter::default(),
        }
    }
}

/// Filter criteria for subscriptions.
#[derive(Clone, Debug, Default)]
pub struct SubscriptionFilter {
    /// Only events from these stores (None = all stores).
    pub stores: Option<Vec<String>>,

    /// Include teardown events.
    pub include_teardown: bool,
}

impl SubscriptionFilter {
    /// Changes and teardowns of every store.
    pub fn all() -> Self {
        Self {
            stores: None,
            include_teardown: true,
        }
    }

    /// Changes of the named stores only.
    pub fn stores(names: Vec<String>) -> Self {
        Self {
            stores: Some(names),
            include_teardown: false,
        }
    }

    pub(crate) fn matches_store(&self, store: &str) -> bool {
        match self.stores {
            Some(ref names) => names.iter().any(|n| n == store),
            None => true,
        }
    }
}

/// Events emitted on the change feed.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StoreEvent {
    /// A container emitted a change.
    Changed {
        store: String,
        /// True if the change produced a durable write.
        persisted: bool,
        timestamp: Timestamp,
    },

    /// A container deleted its durable record.
    TornDown { store: String },

    /// Subscription was dropped.
    Dropped { reason: DropReason },
}

/// Why a subscription was dropped.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// Send buffer overflowed (slow consumer).
    BufferOverflow,
    /// Explicitly unsubscribed.
    Unsubscribed,
}

/// Unique identifier for a subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// Handle to receive events from a subscription.
pub struct SubscriptionHandle {
    pub id: SubscriptionId,
    pub receiver: crossbeam_channel::Receiver<StoreEvent>,
}

impl SubscriptionHandle {
    /// Receive the next event (blocking).
    pub fn recv(&self) -> Result<StoreEvent, crossbeam_channel::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive an event (non-blocking).
    pub fn try_recv(&self) -> Result<StoreEvent, crossbeam_channel::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Receive with timeout.
    pub fn recv_timeout(
        &self,
        timeout: std::time::Duration,
    ) -> Result<StoreEvent, crossbeam_channel::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }
}
