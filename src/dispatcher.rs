//! Action dispatch to registered containers.
//!
//! A [`Dispatcher`] is the action source containers listen to. Actions
//! are delivered to every registered sink in registration order; each
//! sink reduces its own state and emits its own change.

use crate::container::PersistentStore;
use crate::error::Result;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Something that reacts to actions of type `A`.
pub trait ActionSink<A>: Send {
    fn sink_name(&self) -> &str;

    /// Returns true if the action changed the sink's state.
    fn handle_action(&mut self, action: &A) -> Result<bool>;
}

impl<T, A> ActionSink<A> for PersistentStore<T, A>
where
    T: Clone + Serialize + Send + 'static,
    A: 'static,
{
    fn sink_name(&self) -> &str {
        self.name()
    }

    fn handle_action(&mut self, action: &A) -> Result<bool> {
        PersistentStore::handle_action(self, action)
    }
}

/// A sink shared between the dispatcher and its owner.
pub type SharedSink<A> = Arc<Mutex<dyn ActionSink<A>>>;

/// Registration token returned by [`Dispatcher::register`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DispatchToken(pub u64);

/// Routes actions to registered sinks.
pub struct Dispatcher<A> {
    sinks: RwLock<Vec<(DispatchToken, SharedSink<A>)>>,
    next_token: AtomicU64,
}

impl<A: 'static> Dispatcher<A> {
    pub fn new() -> Self {
        Self {
            sinks: RwLock::new(Vec::new()),
            next_token: AtomicU64::new(1),
        }
    }

    pub fn register(&self, sink: SharedSink<A>) -> DispatchToken {
        let token = DispatchToken(self.next_token.fetch_add(1, Ordering::SeqCst));
        self.sinks.write().push((token, sink));
        token
    }

    /// Returns false if the token was not registered.
    pub fn unregister(&self, token: DispatchToken) -> bool {
        let mut sinks = self.sinks.write();
        let before = sinks.len();
        sinks.retain(|(t, _)| *t != token);
        sinks.len() != before
    }

    pub fn sink_count(&self) -> usize {
        self.sinks.read().len()
    }

    /// Deliver `action` to every sink. Returns how many sinks changed.
    ///
    /// The first sink error stops delivery and is returned; sinks after it
    /// do not see the action.
    pub fn dispatch(&self, action: &A) -> Result<usize> {
        // Snapshot so sinks may register or unregister while handling.
        let sinks: Vec<SharedSink<A>> = self
            .sinks
            .read()
            .iter()
            .map(|(_, sink)| Arc::clone(sink))
            .collect();

        let mut changed = 0;
        for sink in sinks {
            let mut sink = sink.lock();
            match sink.handle_action(action) {
                Ok(true) => changed += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(sink = sink.sink_name(), error = %e, "action handling failed");
                    return Err(e);
                }
            }
        }
        Ok(changed)
    }
}

impl<A: 'static> Default for Dispatcher<A> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;

    struct Recorder {
        name: String,
        seen: Arc<Mutex<Vec<String>>>,
        fail: bool,
    }

    impl ActionSink<u32> for Recorder {
        fn sink_name(&self) -> &str {
            &self.name
        }

        fn handle_action(&mut self, action: &u32) -> Result<bool> {
            if self.fail {
                return Err(StoreError::Backend("boom".into()));
            }
            self.seen.lock().push(format!("{}:{}", self.name, action));
            Ok(action % 2 == 0)
        }
    }

    fn recorder(name: &str, seen: &Arc<Mutex<Vec<String>>>, fail: bool) -> SharedSink<u32> {
        Arc::new(Mutex::new(Recorder {
            name: name.to_string(),
            seen: Arc::clone(seen),
            fail,
        }))
    }

    #[test]
    fn test_dispatch_in_registration_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let dispatcher = Dispatcher::new();
        dispatcher.register(recorder("a", &seen, false));
        dispatcher.register(recorder("b", &seen, false));

        assert_eq!(dispatcher.dispatch(&2).unwrap(), 2);
        assert_eq!(dispatcher.dispatch(&3).unwrap(), 0);
        assert_eq!(*seen.lock(), vec!["a:2", "b:2", "a:3", "b:3"]);
    }

    #[test]
    fn test_unregister() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let dispatcher = Dispatcher::new();
        let a = dispatcher.register(recorder("a", &seen, false));
        dispatcher.register(recorder("b", &seen, false));

        assert!(dispatcher.unregister(a));
        assert!(!dispatcher.unregister(a));
        dispatcher.dispatch(&1).unwrap();
        assert_eq!(*seen.lock(), vec!["b:1"]);
    }

    #[test]
    fn test_error_stops_dispatch() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let dispatcher = Dispatcher::new();
        dispatcher.register(recorder("a", &seen, false));
        dispatcher.register(recorder("bad", &seen, true));
        dispatcher.register(recorder("c", &seen, false));

        assert!(dispatcher.dispatch(&4).is_err());
        assert_eq!(*seen.lock(), vec!["a:4"]);
    }
}
