//! Observer registry with RAII subscriptions.
//!
//! DESIGN
//! ======
//! Every event source in this crate owns an `ObserverRegistry<E>`. Callers
//! get a `Subscription` back; dropping it removes the listener, so a
//! listener's lifetime is tied to whatever owns the guard. `detach` is the
//! explicit way to keep a listener for the registry's whole lifetime.
//!
//! `notify` snapshots the listener list before calling out, then re-checks
//! each listener right before invoking it. A listener removed by an earlier
//! listener in the same round is therefore not called.

use std::sync::{Arc, Mutex, Weak};

use crate::lock;

/// Shared listener callback.
pub type Listener<E> = Arc<dyn Fn(&E) + Send + Sync>;

type ListenerId = u64;

struct Slots<E> {
    next_id: ListenerId,
    listeners: Vec<(ListenerId, Listener<E>)>,
}

/// Ordered set of listeners for events of type `E`.
pub struct ObserverRegistry<E> {
    slots: Arc<Mutex<Slots<E>>>,
}

impl<E: 'static> ObserverRegistry<E> {
    #[must_use]
    pub fn new() -> Self {
        Self { slots: Arc::new(Mutex::new(Slots { next_id: 0, listeners: Vec::new() })) }
    }

    /// Register a listener. It stays registered until the returned guard drops.
    pub fn subscribe(&self, listener: impl Fn(&E) + Send + Sync + 'static) -> Subscription {
        self.subscribe_arc(Arc::new(listener))
    }

    /// Register an already shared listener.
    pub fn subscribe_arc(&self, listener: Listener<E>) -> Subscription {
        let id = {
            let mut slots = lock(&self.slots);
            let id = slots.next_id;
            slots.next_id += 1;
            slots.listeners.push((id, listener));
            id
        };

        let weak: Weak<Mutex<Slots<E>>> = Arc::downgrade(&self.slots);
        Subscription {
            cancel: Some(Box::new(move || {
                if let Some(slots) = weak.upgrade() {
                    lock(&slots).listeners.retain(|(lid, _)| *lid != id);
                }
            })),
        }
    }

    /// Call every registered listener with `event`, in registration order.
    pub fn notify(&self, event: &E) {
        let snapshot: Vec<(ListenerId, Listener<E>)> = lock(&self.slots).listeners.clone();
        for (id, listener) in snapshot {
            let still_registered = lock(&self.slots).listeners.iter().any(|(lid, _)| *lid == id);
            if still_registered {
                listener(event);
            }
        }
    }

    /// Number of live listeners.
    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.slots).listeners.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<E: 'static> Default for ObserverRegistry<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// Guard for a registered listener. Dropping it unsubscribes.
#[must_use = "dropping a Subscription immediately unsubscribes the listener"]
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    /// Remove the listener now.
    pub fn unsubscribe(self) {
        drop(self);
    }

    /// Keep the listener registered for as long as its registry lives.
    pub fn detach(mut self) {
        self.cancel = None;
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

#[cfg(test)]
#[path = "observer_test.rs"]
mod tests;
