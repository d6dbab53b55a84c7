use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Handle returned by [`EventBus::on`] and [`EventBus::one`], used to detach a listener
pub type ListenerId = u64;

type Callback<E> = Arc<dyn Fn(&E) + Send + Sync>;

struct Listener<E> {
    id: ListenerId,
    once: bool,
    callback: Callback<E>,
}

/// String-keyed publish/subscribe bus.
///
/// Listeners of a topic fire in registration order, synchronously inside
/// [`trigger`](Self::trigger). The internal lock is released before any listener runs,
/// so listeners may freely register, detach or trigger. One-shot listeners are detached
/// atomically with the trigger that fires them: of two racing triggers, only one sees them.
pub struct EventBus<E> {
    next_id: AtomicU64,
    topics: Mutex<HashMap<String, Vec<Listener<E>>>>,
}

impl<E> Default for EventBus<E> {
    fn default() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            topics: Mutex::new(HashMap::new()),
        }
    }
}

impl<E> EventBus<E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Persistent listener
    pub fn on<F>(&self, topic: impl Into<String>, callback: F) -> ListenerId
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        self.add(topic.into(), false, Arc::new(callback))
    }

    /// Listener removed after its first firing
    pub fn one<F>(&self, topic: impl Into<String>, callback: F) -> ListenerId
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        self.add(topic.into(), true, Arc::new(callback))
    }

    /// Detach a listener; returns false if it already fired or never existed
    pub fn off(&self, topic: &str, id: ListenerId) -> bool {
        let mut topics = self.topics.lock();
        let Some(listeners) = topics.get_mut(topic) else {
            return false;
        };
        let before = listeners.len();
        listeners.retain(|l| l.id != id);
        let removed = listeners.len() != before;
        if listeners.is_empty() {
            topics.remove(topic);
        }
        removed
    }

    /// Publish `event` to every listener of `topic`; returns how many ran
    pub fn trigger(&self, topic: &str, event: &E) -> usize {
        let callbacks: Vec<Callback<E>> = {
            let mut topics = self.topics.lock();
            let Some(listeners) = topics.get_mut(topic) else {
                return 0;
            };
            let callbacks = listeners.iter().map(|l| Arc::clone(&l.callback)).collect();
            listeners.retain(|l| !l.once);
            if listeners.is_empty() {
                topics.remove(topic);
            }
            callbacks
        };

        for callback in &callbacks {
            callback(event);
        }
        callbacks.len()
    }

    pub fn listener_count(&self, topic: &str) -> usize {
        self.topics.lock().get(topic).map_or(0, Vec::len)
    }

    fn add(&self, topic: String, once: bool, callback: Callback<E>) -> ListenerId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.topics
            .lock()
            .entry(topic)
            .or_default()
            .push(Listener { id, once, callback });
        id
    }
}
