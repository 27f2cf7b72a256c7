//! Last-edit tracking driven by map change events.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use crate::map::{ClientId, Origin, SharedMap, SharedMapExt, ValueChanged};
use crate::observer::{ObserverRegistry, Subscription};
use crate::presence::{Member, PresenceFeed};
use crate::{lock, now_ms};

/// One attributed change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edit {
    pub key: String,
    pub client_id: ClientId,
    pub at_ms: i64,
}

#[derive(Default)]
struct Edits {
    last: Option<Edit>,
    per_key: HashMap<String, Edit>,
}

struct Shared {
    edits: Mutex<Edits>,
    observers: ObserverRegistry<Edit>,
}

/// Records who last changed the map, and which key.
///
/// Snapshot reconciliation is not attributed to anyone. Per-key entries go
/// away with their key; a delete still counts as the latest edit.
pub struct LastEdited {
    shared: Arc<Shared>,
    _subscription: Subscription,
}

impl LastEdited {
    /// Start tracking `map`. Local writes are attributed to `local`.
    pub fn track<M: SharedMap + ?Sized>(map: &M, local: ClientId) -> Self {
        let shared = Arc::new(Shared { edits: Mutex::new(Edits::default()), observers: ObserverRegistry::new() });
        let weak: Weak<Shared> = Arc::downgrade(&shared);
        let subscription = map.on_change(move |event: &ValueChanged| {
            let Some(shared) = weak.upgrade() else {
                return;
            };
            let client_id = match event.origin {
                Origin::Local => local,
                Origin::Remote(peer) => peer,
                Origin::Snapshot => {
                    if event.value.is_none() {
                        lock(&shared.edits).per_key.remove(&event.key);
                    }
                    return;
                }
            };
            let edit = Edit { key: event.key.clone(), client_id, at_ms: now_ms() };
            {
                let mut edits = lock(&shared.edits);
                if event.value.is_some() {
                    edits.per_key.insert(edit.key.clone(), edit.clone());
                } else {
                    edits.per_key.remove(&edit.key);
                }
                edits.last = Some(edit.clone());
            }
            shared.observers.notify(&edit);
        });
        Self { shared, _subscription: subscription }
    }

    #[must_use]
    pub fn last(&self) -> Option<Edit> {
        lock(&self.shared.edits).last.clone()
    }

    #[must_use]
    pub fn last_for(&self, key: &str) -> Option<Edit> {
        lock(&self.shared.edits).per_key.get(key).cloned()
    }

    /// Member behind the most recent edit, if still present.
    #[must_use]
    pub fn by(&self, presence: &PresenceFeed) -> Option<Member> {
        self.last().and_then(|edit| presence.member(edit.client_id))
    }

    pub fn subscribe(&self, listener: impl Fn(&Edit) + Send + Sync + 'static) -> Subscription {
        self.shared.observers.subscribe(listener)
    }
}

#[cfg(test)]
#[path = "activity_test.rs"]
mod tests;
