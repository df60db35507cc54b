//! Listener registry for inbound frames and stream errors.
//!
//! Listeners run outside the registry lock on a snapshot of the listener set,
//! so a listener may subscribe or unsubscribe (itself included) while it is
//! being dispatched to. A listener returning `Err` or panicking is logged and
//! skipped; the remaining listeners still run.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tender_stream_shared::{StreamError, StreamMessage};

/// A subscriber callback.
pub type Listener<T> = Arc<dyn Fn(&T) -> anyhow::Result<()> + Send + Sync>;

/// What a subscription listens to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    Event(String),
    Error,
}

/// Token returned by `subscribe`; pass it back to unsubscribe.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    id: u64,
    topic: Topic,
}

impl SubscriptionHandle {
    pub(crate) fn new(id: u64, topic: Topic) -> Self {
        Self { id, topic }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    /// Event type for frame subscriptions, `None` for error subscriptions.
    pub fn event_type(&self) -> Option<&str> {
        match &self.topic {
            Topic::Event(event_type) => Some(event_type),
            Topic::Error => None,
        }
    }
}

/// Result of [`SubscriptionRegistry::unsubscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unsubscribed {
    /// Nothing was registered under that id.
    Missing,
    Removed,
    /// Removed the last listener of its event type.
    RemovedLast,
}

type ListenerMap<T> = BTreeMap<u64, Listener<T>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn invoke<T>(what: &str, id: u64, listener: &Listener<T>, value: &T) -> bool {
    match panic::catch_unwind(AssertUnwindSafe(|| listener(value))) {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            crate::log_error!("{what} listener #{id} failed: {e:#}");
            false
        }
        Err(_) => {
            crate::log_error!("{what} listener #{id} panicked");
            false
        }
    }
}

/// Event type -> listeners, in subscription order.
#[derive(Default)]
pub struct SubscriptionRegistry {
    listeners: Mutex<HashMap<String, ListenerMap<StreamMessage>>>,
}

impl std::fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let listeners = lock(&self.listeners);
        let counts: BTreeMap<_, _> = listeners.iter().map(|(k, v)| (k, v.len())).collect();
        f.debug_struct("SubscriptionRegistry")
            .field("listeners", &counts)
            .finish()
    }
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `listener` for `event_type`. Returns `true` when this is the
    /// first listener of that type and the transport has to start forwarding it.
    pub fn subscribe(&self, id: u64, event_type: &str, listener: Listener<StreamMessage>) -> bool {
        let mut listeners = lock(&self.listeners);
        let entry = listeners.entry(event_type.to_string()).or_default();
        let first = entry.is_empty();
        entry.insert(id, listener);
        first
    }

    /// Remove a listener. Calling it again for the same id is harmless.
    pub fn unsubscribe(&self, id: u64, event_type: &str) -> Unsubscribed {
        let mut listeners = lock(&self.listeners);
        let Some(entry) = listeners.get_mut(event_type) else {
            return Unsubscribed::Missing;
        };
        if entry.remove(&id).is_none() {
            return Unsubscribed::Missing;
        }
        if entry.is_empty() {
            listeners.remove(event_type);
            Unsubscribed::RemovedLast
        } else {
            Unsubscribed::Removed
        }
    }

    /// Deliver `message` to every listener of its event type. Returns how many
    /// listeners handled it without error.
    pub fn dispatch(&self, message: &StreamMessage) -> usize {
        let snapshot: Vec<(u64, Listener<StreamMessage>)> = {
            let listeners = lock(&self.listeners);
            match listeners.get(&message.event_type) {
                Some(entry) => entry.iter().map(|(id, l)| (*id, Arc::clone(l))).collect(),
                None => return 0,
            }
        };

        let what = format!("'{}'", message.event_type);
        snapshot
            .iter()
            .filter(|(id, listener)| invoke(&what, *id, listener, message))
            .count()
    }

    /// Drop every listener, returning the event types that were registered.
    pub fn clear(&self) -> Vec<String> {
        lock(&self.listeners).drain().map(|(event_type, _)| event_type).collect()
    }

    pub fn event_types(&self) -> HashSet<String> {
        lock(&self.listeners).keys().cloned().collect()
    }

    pub fn listener_count(&self, event_type: &str) -> usize {
        lock(&self.listeners).get(event_type).map_or(0, BTreeMap::len)
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.listeners).is_empty()
    }
}

/// Listeners for stream errors.
#[derive(Default)]
pub struct ErrorSubscribers {
    listeners: Mutex<ListenerMap<StreamError>>,
}

impl std::fmt::Debug for ErrorSubscribers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorSubscribers")
            .field("listeners", &lock(&self.listeners).len())
            .finish()
    }
}

impl ErrorSubscribers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, id: u64, listener: Listener<StreamError>) {
        lock(&self.listeners).insert(id, listener);
    }

    pub fn remove(&self, id: u64) -> bool {
        lock(&self.listeners).remove(&id).is_some()
    }

    pub fn notify(&self, error: &StreamError) -> usize {
        let snapshot: Vec<_> = lock(&self.listeners)
            .iter()
            .map(|(id, l)| (*id, Arc::clone(l)))
            .collect();
        snapshot
            .iter()
            .filter(|(id, listener)| invoke("error", *id, listener, error))
            .count()
    }

    pub fn clear(&self) {
        lock(&self.listeners).clear();
    }

    pub fn len(&self) -> usize {
        lock(&self.listeners).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
