//! The persistent state container.

use crate::durable::DurableStore;
use crate::error::{Result, StoreError};
use crate::subscriptions::ChangeFeed;
use crate::types::{ListenerId, PersistOutcome};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

use super::builder::StoreBuilder;
use super::listeners::ListenerSet;

pub(crate) type DefaultStateFn<T> = Box<dyn Fn() -> T + Send>;
pub(crate) type GenerateDefaultFn<T> = Box<dyn Fn(Option<T>) -> Option<T> + Send>;
pub(crate) type Reducer<T, A> = Box<dyn Fn(&T, &A) -> Option<T> + Send>;

/// A state container that persists its state when it changes.
///
/// The container owns one value of `T`, replaces it wholesale on every
/// update, and on [`emit_changed`](Self::emit_changed) writes a copy to
/// the durable store before notifying listeners. Writes are skipped when
/// the serialized value equals the last document written.
///
/// `A` is the action type the container reacts to through its reducers.
pub struct PersistentStore<T, A = ()> {
    pub(crate) name: String,
    pub(crate) key: String,
    pub(crate) persist: bool,
    pub(crate) durable: Option<Arc<dyn DurableStore>>,

    /// Data found in the durable store at startup.
    pub(crate) persisted_state: Option<T>,

    pub(crate) default_state: DefaultStateFn<T>,
    pub(crate) generate_default_state: GenerateDefaultFn<T>,
    pub(crate) reducers: Vec<Reducer<T, A>>,
    pub(crate) feed: Option<Arc<ChangeFeed>>,

    /// Reducers only run once the container is initialized.
    pub(crate) listening: bool,
    pub(crate) state: Option<T>,

    /// Last value successfully written to the durable store, with the
    /// document it was written as. Gating compares documents.
    pub(crate) previously_persisted: Option<(T, Value)>,
    pub(crate) listeners: ListenerSet<T>,
}

impl<T, A> PersistentStore<T, A>
where
    T: Clone + Serialize + Send + 'static,
    A: 'static,
{
    /// Start building a container whose default state is `T::default()`.
    pub fn builder(name: impl Into<String>, key: impl Into<String>) -> StoreBuilder<T, A>
    where
        T: Default,
    {
        StoreBuilder::new(name, key, T::default)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn is_persistent(&self) -> bool {
        self.persist
    }

    pub fn is_initialized(&self) -> bool {
        self.state.is_some()
    }

    /// Current state, or `None` before [`initialize`](Self::initialize).
    pub fn get_state(&self) -> Option<&T> {
        self.state.as_ref()
    }

    /// The comparison baseline for the next persist.
    pub fn persisted_snapshot(&self) -> Option<&T> {
        self.previously_persisted.as_ref().map(|(state, _)| state)
    }

    /// Set the initial state and start reacting to actions.
    ///
    /// Without persistence the state is `initial_state` or the container
    /// default. With persistence, the data found on disk is first passed
    /// through the default-generation hook; the state is then
    /// `initial_state`, else the generated default, else the container
    /// default.
    pub fn initialize(&mut self, initial_state: Option<T>) {
        let state = if self.persist {
            let generated = (self.generate_default_state)(self.persisted_state.clone());
            initial_state
                .or(generated)
                .unwrap_or_else(|| (self.default_state)())
        } else {
            initial_state.unwrap_or_else(|| (self.default_state)())
        };

        self.state = Some(state);
        self.add_action_listeners();
    }

    fn add_action_listeners(&mut self) {
        if !self.listening {
            tracing::debug!(
                store = %self.name,
                reducers = self.reducers.len(),
                "listening for actions"
            );
            self.listening = true;
        }
    }

    /// Write `candidate` to the durable store unless it equals the baseline.
    ///
    /// Equality is decided on the serialized document, which is what the
    /// durable store receives.
    ///
    /// On a failed write the error is returned and the baseline is left
    /// untouched, so the next attempt writes again.
    pub fn persist_data(&mut self, candidate: T) -> Result<PersistOutcome> {
        let durable = match self.durable {
            Some(ref durable) if self.persist => durable,
            _ => return Ok(PersistOutcome::Disabled),
        };

        let value = serde_json::to_value(&candidate)?;
        if matches!(self.previously_persisted, Some((_, ref written)) if *written == value) {
            tracing::trace!(store = %self.name, key = %self.key, "state unchanged, skipping write");
            return Ok(PersistOutcome::Unchanged);
        }

        if let Err(e) = durable.set_item(&self.key, &value) {
            tracing::warn!(
                store = %self.name,
                key = %self.key,
                error = %e,
                "failed to persist state"
            );
            return Err(e);
        }

        tracing::debug!(store = %self.name, key = %self.key, "persisted state");
        self.previously_persisted = Some((candidate, value));
        Ok(PersistOutcome::Written)
    }

    /// Persist the current state if needed, then notify every listener.
    ///
    /// The persist completes before any listener runs. If it fails, the
    /// error is returned and listeners are not notified for this call.
    pub fn emit_changed(&mut self) -> Result<()> {
        let state = self.state.as_ref().ok_or(StoreError::NotInitialized)?;

        let mut persisted = false;
        if self.persist && self.durable.is_some() {
            let snapshot = state.clone();
            persisted = self.persist_data(snapshot)?.wrote();
        }

        let state = self.state.as_ref().ok_or(StoreError::NotInitialized)?;
        self.listeners.notify(state);

        if let Some(ref feed) = self.feed {
            feed.broadcast_changed(&self.name, persisted);
        }
        Ok(())
    }

    /// Delete the durable record and reset the persistence baseline.
    pub fn teardown(&mut self) -> Result<()> {
        if !self.persist {
            return Ok(());
        }

        let removed = match self.durable {
            Some(ref durable) => {
                durable.remove_item(&self.key)?;
                true
            }
            None => false,
        };
        self.previously_persisted = None;

        if removed {
            tracing::info!(store = %self.name, key = %self.key, "tore down persisted state");
            if let Some(ref feed) = self.feed {
                feed.broadcast_torn_down(&self.name);
            }
        }
        Ok(())
    }

    /// Replace the state without emitting.
    pub fn set_state(&mut self, state: T) {
        self.state = Some(state);
    }

    /// Replace the state with `f(current)` and emit the change.
    pub fn update(&mut self, f: impl FnOnce(&T) -> T) -> Result<()> {
        let current = self.state.as_ref().ok_or(StoreError::NotInitialized)?;
        let next = f(current);
        self.state = Some(next);
        self.emit_changed()
    }

    /// Run the reducers against `action`.
    ///
    /// Reducers run in registration order, each seeing the output of the
    /// previous one that produced a new state. Returns true if the state
    /// was replaced (and the change emitted). Actions that arrive before
    /// initialization are ignored.
    pub fn handle_action(&mut self, action: &A) -> Result<bool> {
        if !self.listening {
            return Ok(false);
        }

        let current = self.state.as_ref().ok_or(StoreError::NotInitialized)?;
        let mut next: Option<T> = None;
        for reducer in &self.reducers {
            let base = next.as_ref().unwrap_or(current);
            if let Some(reduced) = reducer(base, action) {
                next = Some(reduced);
            }
        }

        match next {
            Some(state) => {
                self.state = Some(state);
                self.emit_changed()?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn add_changed_listener(&mut self, listener: impl Fn(&T) + Send + 'static) -> ListenerId {
        self.listeners.add(listener)
    }

    pub fn remove_changed_listener(&mut self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::durable::MemoryStore;
    use parking_lot::Mutex;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
    struct Counter {
        count: u32,
    }

    fn persistent(durable: &Arc<MemoryStore>) -> PersistentStore<Counter> {
        PersistentStore::builder("counter", "storeA")
            .persist(true)
            .durable(durable.clone())
            .build()
    }

    #[test]
    fn test_persist_data_skips_equal_values() {
        let durable = Arc::new(MemoryStore::new());
        let mut store = persistent(&durable);

        assert_eq!(store.persist_data(Counter { count: 1 }).unwrap(), PersistOutcome::Written);
        assert_eq!(store.persist_data(Counter { count: 1 }).unwrap(), PersistOutcome::Unchanged);
        assert_eq!(durable.write_count(), 1);

        assert_eq!(store.persist_data(Counter { count: 2 }).unwrap(), PersistOutcome::Written);
        assert_eq!(durable.write_count(), 2);
        assert_eq!(durable.get_item("storeA").unwrap(), Some(json!({"count": 2})));
    }

    #[test]
    fn test_persist_disabled() {
        let durable = Arc::new(MemoryStore::new());
        let mut store: PersistentStore<Counter> = PersistentStore::builder("counter", "storeA")
            .durable(durable.clone())
            .build();

        assert_eq!(store.persist_data(Counter { count: 1 }).unwrap(), PersistOutcome::Disabled);
        assert_eq!(durable.write_count(), 0);
    }

    #[test]
    fn test_failed_write_keeps_baseline() {
        let durable = Arc::new(MemoryStore::new());
        let mut store = persistent(&durable);

        store.persist_data(Counter { count: 1 }).unwrap();
        durable.set_failing(true);
        assert!(store.persist_data(Counter { count: 2 }).is_err());
        assert_eq!(store.persisted_snapshot(), Some(&Counter { count: 1 }));

        durable.set_failing(false);
        assert!(store.persist_data(Counter { count: 2 }).unwrap().wrote());
    }

    #[test]
    fn test_emit_changed_before_initialize() {
        let durable = Arc::new(MemoryStore::new());
        let mut store = persistent(&durable);
        assert!(matches!(store.emit_changed(), Err(StoreError::NotInitialized)));
    }

    #[test]
    fn test_emit_changed_persists_then_notifies() {
        let durable = Arc::new(MemoryStore::new());
        let mut store = persistent(&durable);
        store.initialize(Some(Counter { count: 3 }));

        let seen = Arc::new(Mutex::new(Vec::new()));
        {
            let seen = Arc::clone(&seen);
            let durable = Arc::clone(&durable);
            store.add_changed_listener(move |state: &Counter| {
                // The write has already happened when listeners run.
                seen.lock().push((state.count, durable.write_count()));
            });
        }

        store.emit_changed().unwrap();
        store.emit_changed().unwrap();
        assert_eq!(*seen.lock(), vec![(3, 1), (3, 1)]);
    }

    #[test]
    fn test_emit_changed_failure_skips_listeners() {
        let durable = Arc::new(MemoryStore::new());
        let mut store = persistent(&durable);
        store.initialize(None);

        let calls = Arc::new(Mutex::new(0));
        {
            let calls = Arc::clone(&calls);
            store.add_changed_listener(move |_| *calls.lock() += 1);
        }

        durable.set_failing(true);
        assert!(matches!(store.emit_changed(), Err(StoreError::Backend(_))));
        assert_eq!(*calls.lock(), 0);
    }

    #[test]
    fn test_update_replaces_and_emits() {
        let durable = Arc::new(MemoryStore::new());
        let mut store = persistent(&durable);
        store.initialize(None);

        store.update(|c| Counter { count: c.count + 5 }).unwrap();
        assert_eq!(store.get_state(), Some(&Counter { count: 5 }));
        assert_eq!(durable.get_item("storeA").unwrap(), Some(json!({"count": 5})));
    }

    #[test]
    fn test_actions_ignored_before_initialize() {
        let mut store: PersistentStore<Counter, u32> = PersistentStore::builder("counter", "storeA")
            .on_action(|c: &Counter, by: &u32| Some(Counter { count: c.count + by }))
            .build();

        assert!(!store.handle_action(&1).unwrap());
        store.initialize(None);
        assert!(store.handle_action(&2).unwrap());
        assert_eq!(store.get_state(), Some(&Counter { count: 2 }));
    }

    #[test]
    fn test_reducers_chain() {
        let mut store: PersistentStore<Counter, u32> = PersistentStore::builder("counter", "storeA")
            .on_action(|c: &Counter, by: &u32| Some(Counter { count: c.count + by }))
            .on_action(|c: &Counter, _: &u32| Some(Counter { count: c.count * 10 }))
            .on_action(|_: &Counter, by: &u32| {
                if *by == 0 {
                    Some(Counter::default())
                } else {
                    None
                }
            })
            .build();
        store.initialize(Some(Counter { count: 1 }));

        assert!(store.handle_action(&2).unwrap());
        assert_eq!(store.get_state(), Some(&Counter { count: 30 }));
    }
}
