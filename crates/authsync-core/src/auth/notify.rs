//! Ordered fan-out of change notifications.
//!
//! Every subscriber owns an unbounded queue, so values are delivered in emission order and
//! never dropped or coalesced while the subscription is alive. Dropping (or explicitly
//! unsubscribing) a `Subscription` removes it from the registry; values emitted afterwards
//! are not delivered to it.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

struct Registry<T> {
    next_id: u64,
    subscribers: BTreeMap<u64, UnboundedSender<T>>,
}

fn lock<T>(registry: &Mutex<Registry<T>>) -> MutexGuard<'_, Registry<T>> {
    // Registry state stays consistent even if a holder panicked
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct Notifier<T> {
    registry: Arc<Mutex<Registry<T>>>,
}

impl<T> Clone for Notifier<T> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
        }
    }
}

impl<T> Default for Notifier<T> {
    fn default() -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry {
                next_id: 0,
                subscribers: BTreeMap::new(),
            })),
        }
    }
}

impl<T: Clone> Notifier<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Subscription<T> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut registry = lock(&self.registry);
        let id = registry.next_id;
        registry.next_id += 1;
        registry.subscribers.insert(id, tx);
        Subscription {
            id,
            receiver: rx,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Deliver `value` to every live subscriber. Returns how many received it.
    pub fn emit(&self, value: T) -> usize {
        let mut registry = lock(&self.registry);
        registry
            .subscribers
            .retain(|_, tx| tx.send(value.clone()).is_ok());
        registry.subscribers.len()
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.registry).subscribers.len()
    }
}

/// A standing registration for change notifications.
pub struct Subscription<T> {
    id: u64,
    receiver: UnboundedReceiver<T>,
    registry: Weak<Mutex<Registry<T>>>,
}

impl<T> Subscription<T> {
    /// Wait for the next notification. `None` once the notifier is gone.
    pub async fn recv(&mut self) -> Option<T> {
        self.receiver.recv().await
    }

    /// Take a pending notification without waiting
    pub fn try_recv(&mut self) -> Option<T> {
        self.receiver.try_recv().ok()
    }

    /// Stop delivery. Pending notifications are discarded.
    pub fn unsubscribe(self) {
        drop(self);
    }

    fn detach(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            lock(&registry).subscribers.remove(&self.id);
        }
        self.receiver.close();
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.detach();
    }
}
