//! Shared map contract and the in-memory replica.
//!
//! DESIGN
//! ======
//! `SharedMap` is the whole store surface the adapter relies on: point
//! reads, write-through `set`/`delete`, ordered iteration and a
//! value-changed event fired for every mutation regardless of origin.
//!
//! `MemoryMap` implements it in memory. Standalone, every write is final.
//! Linked to a sequencer through an `Outbox`, local writes apply
//! optimistically and are tracked as pending per key until the sequencer
//! echoes them back:
//!
//! - own sequenced op: ack, pending count drops, value untouched
//! - peer op on a key with pending local writes: ignored, because the
//!   local write is sequenced later and will overwrite it everywhere
//! - peer op otherwise: applied and announced as a remote change
//!
//! The result is last-writer-wins per key in sequencer order, and every
//! replica converges once all ops are delivered. There is no cross-key
//! atomicity: two writes to different keys are two independent ops.
//!
//! Iteration order is insertion order of first write; overwriting a key
//! keeps its position, deleting it shifts later keys down.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::error::StoreError;
use crate::lock;
use crate::observer::{Listener, ObserverRegistry, Subscription};
use crate::outbox::Outbox;

// =============================================================================
// TYPES
// =============================================================================

/// Identifier of one attached client (one replica).
pub type ClientId = Uuid;

/// Where a change came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Written through this replica.
    Local,
    /// Sequenced write from another client.
    Remote(ClientId),
    /// Reconciled from an attach snapshot.
    Snapshot,
}

/// Value-changed event. `value` is `None` when the key was deleted.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueChanged {
    pub key: String,
    pub previous: Option<Value>,
    pub value: Option<Value>,
    pub origin: Origin,
}

impl ValueChanged {
    #[must_use]
    pub fn is_local(&self) -> bool {
        self.origin == Origin::Local
    }
}

/// A single map write as it travels to and from the sequencer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum MapOp {
    Set { key: String, value: Value },
    Delete { key: String },
}

impl MapOp {
    #[must_use]
    pub fn key(&self) -> &str {
        match self {
            Self::Set { key, .. } | Self::Delete { key } => key,
        }
    }
}

/// A map op stamped with its position in the container's total order.
#[derive(Debug, Clone, PartialEq)]
pub struct SequencedOp {
    pub seq: u64,
    pub client_id: ClientId,
    pub op: MapOp,
}

// =============================================================================
// CONTRACT
// =============================================================================

/// Minimal keyed store contract.
pub trait SharedMap: Send + Sync {
    /// Current value, `None` for keys never written or deleted.
    fn get(&self, key: &str) -> Option<Value>;

    /// Write a value. Fire-and-forget: never waits for the sequencer.
    fn set(&self, key: &str, value: Value);

    /// Delete a key. Returns whether a value was present locally.
    fn delete(&self, key: &str) -> bool;

    /// Keys in insertion order of first write.
    fn keys(&self) -> Vec<String>;

    /// Entries in insertion order of first write.
    fn entries(&self) -> Vec<(String, Value)>;

    /// Register a listener fired after every change, local or remote.
    fn on_value_changed(&self, listener: Listener<ValueChanged>) -> Subscription;
}

/// Typed helpers over any `SharedMap`.
pub trait SharedMapExt: SharedMap {
    /// Deserialize the value at `key`.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Decode` if the stored value does not fit `T`.
    fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        self.get(key)
            .map(|value| {
                serde_json::from_value(value).map_err(|source| StoreError::Decode { key: key.to_owned(), source })
            })
            .transpose()
    }

    /// Serialize `value` and write it at `key`.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Encode` if `value` cannot be represented as JSON.
    fn set_as<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        let json = serde_json::to_value(value).map_err(|source| StoreError::Encode { key: key.to_owned(), source })?;
        self.set(key, json);
        Ok(())
    }

    /// Subscribe with a plain closure.
    fn on_change(&self, listener: impl Fn(&ValueChanged) + Send + Sync + 'static) -> Subscription {
        self.on_value_changed(Arc::new(listener))
    }
}

impl<M: SharedMap + ?Sized> SharedMapExt for M {}

// =============================================================================
// MEMORY MAP
// =============================================================================

struct Link {
    client_id: ClientId,
    outbox: Arc<dyn Outbox>,
}

#[derive(Default)]
struct Inner {
    entries: IndexMap<String, Value>,
    /// Local writes not yet echoed by the sequencer, per key.
    pending: HashMap<String, usize>,
}

/// In-memory replica of a shared map.
pub struct MemoryMap {
    inner: Mutex<Inner>,
    observers: ObserverRegistry<ValueChanged>,
    link: Option<Link>,
}

impl MemoryMap {
    /// Standalone map: every write is local and final.
    #[must_use]
    pub fn new() -> Self {
        Self { inner: Mutex::new(Inner::default()), observers: ObserverRegistry::new(), link: None }
    }

    /// Replica linked to a sequencer through `outbox`.
    #[must_use]
    pub fn connected(client_id: ClientId, outbox: Arc<dyn Outbox>) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            observers: ObserverRegistry::new(),
            link: Some(Link { client_id, outbox }),
        }
    }

    /// Client ID of a connected replica.
    #[must_use]
    pub fn client_id(&self) -> Option<ClientId> {
        self.link.as_ref().map(|link| link.client_id)
    }

    /// Whether any local write is still waiting for its sequencer echo.
    #[must_use]
    pub fn has_pending(&self) -> bool {
        !lock(&self.inner).pending.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.inner).entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Apply an op from the sequencer.
    pub fn apply_sequenced(&self, sequenced: &SequencedOp) {
        let key = sequenced.op.key();
        let is_own = self.client_id() == Some(sequenced.client_id);

        let event = {
            let mut inner = lock(&self.inner);
            if is_own {
                if let Some(count) = inner.pending.get_mut(key) {
                    *count -= 1;
                    if *count == 0 {
                        inner.pending.remove(key);
                    }
                }
                trace!(seq = sequenced.seq, key, "map: local op acknowledged");
                return;
            }
            if inner.pending.contains_key(key) {
                debug!(seq = sequenced.seq, key, "map: remote op shadowed by pending local write");
                return;
            }

            let previous = match &sequenced.op {
                MapOp::Set { key, value } => inner.entries.insert(key.clone(), value.clone()),
                MapOp::Delete { key } => inner.entries.shift_remove(key),
            };
            let value = match &sequenced.op {
                MapOp::Set { value, .. } => Some(value.clone()),
                MapOp::Delete { .. } => None,
            };
            if previous.is_none() && value.is_none() {
                return;
            }
            ValueChanged { key: key.to_owned(), previous, value, origin: Origin::Remote(sequenced.client_id) }
        };

        self.observers.notify(&event);
    }

    /// Replace contents with an attach snapshot. Pending writes are dropped,
    /// and a `Snapshot` event fires for every key whose value changed.
    pub fn load_snapshot(&self, snapshot: Vec<(String, Value)>) {
        let events = {
            let mut inner = lock(&self.inner);
            inner.pending.clear();
            let old = std::mem::take(&mut inner.entries);
            let mut events = Vec::new();

            for (key, value) in snapshot {
                let previous = old.get(&key).cloned();
                if previous.as_ref() != Some(&value) {
                    events.push(ValueChanged {
                        key: key.clone(),
                        previous,
                        value: Some(value.clone()),
                        origin: Origin::Snapshot,
                    });
                }
                inner.entries.insert(key, value);
            }
            for (key, value) in old {
                if !inner.entries.contains_key(&key) {
                    events.push(ValueChanged { key, previous: Some(value), value: None, origin: Origin::Snapshot });
                }
            }
            events
        };

        for event in &events {
            self.observers.notify(event);
        }
    }

    /// Forget one pending write on `key` that the sequencer refused. The
    /// optimistic local value stays until the next remote write to the key.
    pub fn reject(&self, key: &str) {
        let mut inner = lock(&self.inner);
        if let Some(count) = inner.pending.get_mut(key) {
            *count -= 1;
            if *count == 0 {
                inner.pending.remove(key);
            }
        }
        debug!(key, "map: local write rejected by sequencer");
    }

    fn track_pending(&self, inner: &mut Inner, op: &MapOp) {
        if self.link.is_some() {
            *inner.pending.entry(op.key().to_owned()).or_insert(0) += 1;
        }
    }

    fn forward(&self, op: MapOp) {
        if let Some(link) = &self.link {
            link.outbox.submit_op(op);
        }
    }
}

impl Default for MemoryMap {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedMap for MemoryMap {
    fn get(&self, key: &str) -> Option<Value> {
        lock(&self.inner).entries.get(key).cloned()
    }

    fn set(&self, key: &str, value: Value) {
        let op = MapOp::Set { key: key.to_owned(), value: value.clone() };
        let previous = {
            let mut inner = lock(&self.inner);
            self.track_pending(&mut inner, &op);
            inner.entries.insert(key.to_owned(), value.clone())
        };

        // Forward before notifying so ops nested inside listeners reach the
        // sequencer after this one.
        self.forward(op);
        self.observers
            .notify(&ValueChanged { key: key.to_owned(), previous, value: Some(value), origin: Origin::Local });
    }

    fn delete(&self, key: &str) -> bool {
        let op = MapOp::Delete { key: key.to_owned() };
        let previous = {
            let mut inner = lock(&self.inner);
            self.track_pending(&mut inner, &op);
            inner.entries.shift_remove(key)
        };

        self.forward(op);
        let existed = previous.is_some();
        if existed {
            self.observers
                .notify(&ValueChanged { key: key.to_owned(), previous, value: None, origin: Origin::Local });
        }
        existed
    }

    fn keys(&self) -> Vec<String> {
        lock(&self.inner).entries.keys().cloned().collect()
    }

    fn entries(&self) -> Vec<(String, Value)> {
        lock(&self.inner)
            .entries
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    fn on_value_changed(&self, listener: Listener<ValueChanged>) -> Subscription {
        self.observers.subscribe_arc(listener)
    }
}

#[cfg(test)]
#[path = "map_test.rs"]
mod tests;
