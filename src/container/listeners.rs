//! Ordered change-listener registry.

use crate::types::ListenerId;

type Listener<T> = Box<dyn Fn(&T) + Send>;

/// Callbacks invoked on every emitted change, in registration order.
pub struct ListenerSet<T> {
    listeners: Vec<(ListenerId, Listener<T>)>,
    next_id: u64,
}

impl<T> ListenerSet<T> {
    pub fn new() -> Self {
        Self {
            listeners: Vec::new(),
            next_id: 1,
        }
    }

    pub fn add(&mut self, listener: impl Fn(&T) + Send + 'static) -> ListenerId {
        let id = ListenerId(self.next_id);
        self.next_id += 1;
        self.listeners.push((id, Box::new(listener)));
        id
    }

    /// Returns false if no listener had this id.
    pub fn remove(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(lid, _)| *lid != id);
        self.listeners.len() != before
    }

    pub fn notify(&self, state: &T) {
        for (_, listener) in &self.listeners {
            listener(state);
        }
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }
}

impl<T> Default for ListenerSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[test]
    fn test_notify_in_registration_order() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut set = ListenerSet::new();

        for tag in ["first", "second", "third"] {
            let calls = Arc::clone(&calls);
            set.add(move |value: &u32| calls.lock().push((tag, *value)));
        }

        set.notify(&7);
        assert_eq!(
            *calls.lock(),
            vec![("first", 7), ("second", 7), ("third", 7)]
        );
    }

    #[test]
    fn test_remove() {
        let mut set: ListenerSet<u32> = ListenerSet::new();
        let a = set.add(|_| {});
        let b = set.add(|_| {});
        assert_ne!(a, b);

        assert!(set.remove(a));
        assert!(!set.remove(a));
        assert_eq!(set.len(), 1);
    }
}
