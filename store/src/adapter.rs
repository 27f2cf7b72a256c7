//! Shared-state adapter: local cache + change subscription over a `SharedMap`.
//!
//! DESIGN
//! ======
//! The adapter mirrors the map into an insertion-ordered cache, seeded from
//! `entries()` at construction and kept current by a map subscription that
//! the adapter owns. Dropping the adapter drops that subscription.
//!
//! Writes go straight to the map. The map's own change event then updates
//! the cache, so reads through the adapter always reflect what the map
//! announced, local or remote. Every map event is forwarded to adapter
//! subscribers exactly once, after the cache is updated. Nothing is
//! coalesced.
//!
//! Schema guards apply to values that arrive from elsewhere (remote ops,
//! snapshots, the seed). A rejected value is logged and never reaches the
//! cache; the cache keeps the last accepted value for that key and
//! subscribers are not told about the rejected write.

use std::sync::{Arc, Mutex, Weak};

use indexmap::IndexMap;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::StoreError;
use crate::lock;
use crate::map::{SharedMap, ValueChanged};
use crate::observer::{ObserverRegistry, Subscription};
use crate::projection;
use crate::schema::SchemaGuard;

struct AdapterShared {
    cache: Mutex<IndexMap<String, Value>>,
    guards: Vec<SchemaGuard>,
    observers: ObserverRegistry<ValueChanged>,
}

impl AdapterShared {
    fn accepts(&self, key: &str, value: &Value) -> bool {
        for guard in self.guards.iter().filter(|g| g.applies_to(key)) {
            if let Err(e) = guard.check(value) {
                warn!(key, prefix = guard.prefix(), error = %e, "adapter: discarding invalid incoming value");
                return false;
            }
        }
        true
    }

    fn apply(&self, event: &ValueChanged) {
        let changed = {
            let mut cache = lock(&self.cache);
            match &event.value {
                Some(value) => {
                    if !event.is_local() && !self.accepts(&event.key, value) {
                        false
                    } else {
                        cache.insert(event.key.clone(), value.clone());
                        true
                    }
                }
                None => {
                    cache.shift_remove(&event.key);
                    true
                }
            }
        };

        if changed {
            self.observers.notify(event);
        }
    }

    fn snapshot(&self) -> Vec<(String, Value)> {
        lock(&self.cache)
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

/// Typed, cached view over a shared map.
pub struct StateAdapter<M: SharedMap + ?Sized> {
    map: Arc<M>,
    shared: Arc<AdapterShared>,
    _map_subscription: Subscription,
}

impl<M: SharedMap + ?Sized> StateAdapter<M> {
    pub fn new(map: Arc<M>) -> Self {
        Self::with_guards(map, Vec::new())
    }

    /// Adapter whose incoming values are checked against `guards`.
    pub fn with_guards(map: Arc<M>, guards: Vec<SchemaGuard>) -> Self {
        let shared = Arc::new(AdapterShared {
            cache: Mutex::new(IndexMap::new()),
            guards,
            observers: ObserverRegistry::new(),
        });

        let weak: Weak<AdapterShared> = Arc::downgrade(&shared);
        let map_subscription = map.on_value_changed(Arc::new(move |event: &ValueChanged| {
            if let Some(shared) = weak.upgrade() {
                shared.apply(event);
            }
        }));

        let seed: IndexMap<String, Value> = map
            .entries()
            .into_iter()
            .filter(|(key, value)| shared.accepts(key, value))
            .collect();
        debug!(keys = seed.len(), guards = shared.guards.len(), "adapter: cache seeded");
        *lock(&shared.cache) = seed;

        Self { map, shared, _map_subscription: map_subscription }
    }

    /// The underlying map.
    pub fn map(&self) -> &Arc<M> {
        &self.map
    }

    /// Cached value for `key`.
    pub fn get(&self, key: &str) -> Option<Value> {
        lock(&self.shared.cache).get(key).cloned()
    }

    /// Decode the cached value for `key`.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Decode` if the value does not fit `T`.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        self.get(key)
            .map(|value| {
                serde_json::from_value(value).map_err(|source| StoreError::Decode { key: key.to_owned(), source })
            })
            .transpose()
    }

    pub fn set(&self, key: &str, value: Value) {
        self.map.set(key, value);
    }

    /// # Errors
    ///
    /// Returns `StoreError::Encode` if `value` cannot be represented as JSON.
    pub fn set_as<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        let json = serde_json::to_value(value).map_err(|source| StoreError::Encode { key: key.to_owned(), source })?;
        self.map.set(key, json);
        Ok(())
    }

    pub fn delete(&self, key: &str) -> bool {
        self.map.delete(key)
    }

    /// Called once per accepted change, after the cache reflects it.
    pub fn subscribe(&self, on_change: impl Fn(&ValueChanged) + Send + Sync + 'static) -> Subscription {
        self.shared.observers.subscribe(on_change)
    }

    pub fn keys(&self) -> Vec<String> {
        lock(&self.shared.cache).keys().cloned().collect()
    }

    pub fn entries(&self) -> Vec<(String, Value)> {
        self.shared.snapshot()
    }

    pub fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        lock(&self.shared.cache)
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect()
    }

    pub fn entries_with_prefix(&self, prefix: &str) -> Vec<(String, Value)> {
        let entries = self.shared.snapshot();
        projection::with_prefix(&entries, prefix)
            .into_iter()
            .map(|(k, v)| (k.to_owned(), v.clone()))
            .collect()
    }

    /// Count defined values under `prefix` that pass `predicate`.
    pub fn count_where(&self, prefix: &str, predicate: impl Fn(&str, &Value) -> bool) -> usize {
        projection::count_defined(&self.shared.snapshot(), prefix, predicate)
    }

    /// Derived state that is recomputed in full on every change.
    pub fn watch<T, F>(&self, projection: F) -> View<T>
    where
        T: Clone + Send + 'static,
        F: Fn(&[(String, Value)]) -> T + Send + Sync + 'static,
    {
        let state = Arc::new(ViewState {
            current: Mutex::new(projection(&self.shared.snapshot())),
            observers: ObserverRegistry::new(),
        });

        let source = Arc::downgrade(&self.shared);
        let target = Arc::downgrade(&state);
        let subscription = self.shared.observers.subscribe(move |_event| {
            let (Some(source), Some(target)) = (source.upgrade(), target.upgrade()) else {
                return;
            };
            let next = projection(&source.snapshot());
            *lock(&target.current) = next.clone();
            target.observers.notify(&next);
        });

        View { state, _subscription: subscription }
    }
}

struct ViewState<T> {
    current: Mutex<T>,
    observers: ObserverRegistry<T>,
}

/// A projection kept current by an adapter subscription.
///
/// The view stops updating once it is dropped or its adapter goes away.
pub struct View<T> {
    state: Arc<ViewState<T>>,
    _subscription: Subscription,
}

impl<T: Clone + Send + 'static> View<T> {
    #[must_use]
    pub fn current(&self) -> T {
        lock(&self.state.current).clone()
    }

    /// Called with the new value after every recomputation.
    pub fn subscribe(&self, listener: impl Fn(&T) + Send + Sync + 'static) -> Subscription {
        self.state.observers.subscribe(listener)
    }
}

#[cfg(test)]
#[path = "adapter_test.rs"]
mod tests;
