//! Container construction.

use crate::durable::{load_item, DurableStore};
use crate::error::Result;
use crate::subscriptions::ChangeFeed;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;

use super::listeners::ListenerSet;
use super::store::{DefaultStateFn, GenerateDefaultFn, PersistentStore, Reducer};

/// Builder for [`PersistentStore`].
///
/// Persistence is off unless [`persist`](Self::persist) is set. The
/// default-generation hook defaults to identity: persisted data is taken
/// as the live default unchanged.
pub struct StoreBuilder<T, A = ()> {
    name: String,
    key: String,
    persist: bool,
    durable: Option<Arc<dyn DurableStore>>,
    persisted_state: Option<T>,
    default_state: DefaultStateFn<T>,
    generate_default_state: GenerateDefaultFn<T>,
    reducers: Vec<Reducer<T, A>>,
    feed: Option<Arc<ChangeFeed>>,
}

impl<T, A> StoreBuilder<T, A>
where
    T: Clone + Serialize + Send + 'static,
    A: 'static,
{
    pub fn new(
        name: impl Into<String>,
        key: impl Into<String>,
        default_state: impl Fn() -> T + Send + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            key: key.into(),
            persist: false,
            durable: None,
            persisted_state: None,
            default_state: Box::new(default_state),
            generate_default_state: Box::new(|persisted| persisted),
            reducers: Vec::new(),
            feed: None,
        }
    }

    pub fn persist(mut self, persist: bool) -> Self {
        self.persist = persist;
        self
    }

    pub fn durable(mut self, durable: Arc<dyn DurableStore>) -> Self {
        self.durable = Some(durable);
        self
    }

    /// Data previously persisted under this container's key.
    pub fn persisted_state(mut self, persisted: T) -> Self {
        self.persisted_state = Some(persisted);
        self
    }

    /// Replace the container default (used when nothing else applies).
    pub fn default_state(mut self, default_state: impl Fn() -> T + Send + 'static) -> Self {
        self.default_state = Box::new(default_state);
        self
    }

    /// Reshape persisted data before it becomes the live default.
    ///
    /// Receives the persisted data (if any). Returning `None` falls back to
    /// the container default.
    pub fn generate_default_state(
        mut self,
        generate: impl Fn(Option<T>) -> Option<T> + Send + 'static,
    ) -> Self {
        self.generate_default_state = Box::new(generate);
        self
    }

    /// Add a reducer. Returning `Some` replaces the state.
    pub fn on_action(mut self, reducer: impl Fn(&T, &A) -> Option<T> + Send + 'static) -> Self {
        self.reducers.push(Box::new(reducer));
        self
    }

    /// Publish changes on a shared change feed.
    pub fn change_feed(mut self, feed: Arc<ChangeFeed>) -> Self {
        self.feed = Some(feed);
        self
    }

    pub fn build(self) -> PersistentStore<T, A> {
        PersistentStore {
            name: self.name,
            key: self.key,
            persist: self.persist,
            durable: self.durable,
            persisted_state: self.persisted_state,
            default_state: self.default_state,
            generate_default_state: self.generate_default_state,
            reducers: self.reducers,
            feed: self.feed,
            listening: false,
            state: None,
            previously_persisted: None,
            listeners: ListenerSet::new(),
        }
    }

    /// Build, reading persisted data from the durable store first.
    ///
    /// Explicit [`persisted_state`](Self::persisted_state) wins. Nothing is
    /// read when persistence is off or no durable store is attached.
    pub fn restore(mut self) -> Result<PersistentStore<T, A>>
    where
        T: DeserializeOwned,
    {
        if self.persist && self.persisted_state.is_none() {
            if let Some(ref durable) = self.durable {
                self.persisted_state = load_item(durable.as_ref(), &self.key)?;
                tracing::debug!(
                    store = %self.name,
                    key = %self.key,
                    found = self.persisted_state.is_some(),
                    "restored persisted data"
                );
            }
        }
        Ok(self.build())
    }
}
