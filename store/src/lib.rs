//! Keyed shared-state adapter.
//!
//! SYSTEM CONTEXT
//! ==============
//! A shared store is a flat key -> JSON value map replicated across clients.
//! This crate holds everything that sits on the client side of that store:
//!
//! - [`map`]: the minimal store contract (`SharedMap`) and `MemoryMap`, an
//!   in-memory replica that can run standalone or linked to a sequencer.
//! - [`observer`]: explicit listener registry with RAII subscriptions.
//! - [`adapter`]: local cache + change subscription + typed get/set.
//! - [`projection`]: pure derivations over the key set (prefix scans,
//!   record completeness).
//! - [`notes`] / [`records`]: the prefix-encoded brainstorm layout and its
//!   structured one-value-per-record replacement.
//! - [`schema`]: runtime validators that drop malformed incoming values.
//! - [`presence`] / [`activity`]: membership, cursors, selection, drags and
//!   last-edit tracking.
//! - [`container`] / [`service`]: container ids and an in-process sequencer.
//!
//! DESIGN
//! ======
//! Single-threaded cooperative model: listeners run synchronously on the
//! thread that applies a change. Internal state sits behind short mutex
//! sections so every type is `Send + Sync`, and no listener is ever called
//! while one of those locks is held.

pub mod activity;
pub mod adapter;
pub mod container;
pub mod error;
pub mod map;
pub mod notes;
pub mod observer;
pub mod outbox;
pub mod presence;
pub mod projection;
pub mod records;
pub mod schema;
pub mod service;

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

pub use adapter::{StateAdapter, View};
pub use container::ContainerId;
pub use error::StoreError;
pub use map::{ClientId, MapOp, MemoryMap, Origin, SequencedOp, SharedMap, SharedMapExt, ValueChanged};
pub use observer::{ObserverRegistry, Subscription};
pub use outbox::Outbox;
pub use presence::{Identity, Member, PresenceEvent, PresenceFeed};

/// Lock a mutex, recovering the data if a listener panicked while holding it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Current time as milliseconds since Unix epoch.
pub(crate) fn now_ms() -> i64 {
    let Ok(dur) = SystemTime::now().duration_since(UNIX_EPOCH) else {
        return 0;
    };
    i64::try_from(dur.as_millis()).unwrap_or(0)
}
