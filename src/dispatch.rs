//! Listener registry for engine notifications

use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Handle returned by a subscription, used to unsubscribe
pub type ListenerId = u64;

/// Listener callback type
pub type Listener<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// Subscriber-id to callback map with synchronous fan-out.
///
/// Listeners run in subscription order on the thread that emits. The map is
/// snapshotted before the fan-out, so a listener may subscribe or unsubscribe
/// (itself included) without deadlocking.
pub struct Listeners<E> {
    next_id: Arc<AtomicU64>,
    entries: RwLock<BTreeMap<ListenerId, Listener<E>>>,
}

impl<E> Listeners<E> {
    pub fn new() -> Self {
        Self::with_id_source(Arc::new(AtomicU64::new(1)))
    }

    /// Share id allocation with other registries so ids stay unique across them
    pub fn with_id_source(next_id: Arc<AtomicU64>) -> Self {
        Self {
            next_id,
            entries: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn subscribe<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries.write().insert(id, Arc::new(listener));
        id
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        self.entries.write().remove(&id).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn emit(&self, event: &E) {
        let snapshot: Vec<Listener<E>> = self.entries.read().values().cloned().collect();
        for listener in snapshot {
            listener(event);
        }
    }
}

impl<E> Default for Listeners<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn fan_out_in_subscription_order() {
        let listeners = Listeners::<u32>::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for tag in ["a", "b", "c"] {
            let seen = Arc::clone(&seen);
            listeners.subscribe(move |v: &u32| seen.lock().push(format!("{tag}{v}")));
        }

        listeners.emit(&1);
        listeners.emit(&2);

        assert_eq!(*seen.lock(), vec!["a1", "b1", "c1", "a2", "b2", "c2"]);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let listeners = Listeners::<u32>::new();
        let count = Arc::new(AtomicU64::new(0));

        let c = Arc::clone(&count);
        let id = listeners.subscribe(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        listeners.emit(&0);
        assert!(listeners.unsubscribe(id));
        assert!(!listeners.unsubscribe(id));
        listeners.emit(&0);

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(listeners.is_empty());
    }

    #[test]
    fn listener_can_unsubscribe_itself_during_emit() {
        let listeners = Arc::new(Listeners::<u32>::new());
        let own_id = Arc::new(AtomicU64::new(0));

        let registry = Arc::clone(&listeners);
        let id_slot = Arc::clone(&own_id);
        let id = listeners.subscribe(move |_| {
            registry.unsubscribe(id_slot.load(Ordering::SeqCst));
        });
        own_id.store(id, Ordering::SeqCst);

        listeners.emit(&7);
        assert_eq!(listeners.len(), 0);
    }

    #[test]
    fn shared_id_source_keeps_ids_unique() {
        let ids = Arc::new(AtomicU64::new(1));
        let a = Listeners::<u32>::with_id_source(Arc::clone(&ids));
        let b = Listeners::<String>::with_id_source(ids);

        let first = a.subscribe(|_| {});
        let second = b.subscribe(|_| {});
        assert_ne!(first, second);
        assert!(!a.unsubscribe(second));
    }
}
