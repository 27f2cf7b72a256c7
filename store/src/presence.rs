//! Membership and ephemeral per-client state.
//!
//! DESIGN
//! ======
//! Presence is not part of the shared map. Each connected client owns a set
//! of named channels (`cursor`, `selection`, `drag`, ...) holding one JSON
//! value each; the latest value per client and channel wins and nothing is
//! sequenced or persisted. A client's channels disappear when it leaves.
//!
//! The local member is always in the roster. `set_local` updates local state,
//! forwards it through the outbox when connected, then notifies listeners.
//! Remote updates for clients not in the roster are dropped: a `Joined` must
//! come first.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, trace};

use crate::error::StoreError;
use crate::lock;
use crate::map::ClientId;
use crate::observer::{ObserverRegistry, Subscription};
use crate::outbox::Outbox;

pub const CURSOR: &str = "cursor";
pub const SELECTION: &str = "selection";
pub const DRAG: &str = "drag";

/// A connected client and the identity it declared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub client_id: ClientId,
    pub user_id: String,
    pub name: String,
    pub color: String,
}

impl Member {
    #[must_use]
    pub fn from_identity(client_id: ClientId, identity: &Identity) -> Self {
        Self {
            client_id,
            user_id: identity.user_id.clone(),
            name: identity.name.clone(),
            color: identity.color.clone(),
        }
    }
}

const PALETTE: [&str; 6] = ["#ef4444", "#f59e0b", "#10b981", "#3b82f6", "#8b5cf6", "#ec4899"];

/// Self-declared user identity presented on attach.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: String,
    pub name: String,
    pub color: String,
}

impl Identity {
    /// Identity with a color picked deterministically from `user_id`.
    pub fn new(user_id: impl Into<String>, name: impl Into<String>) -> Self {
        let user_id = user_id.into();
        let slot = user_id.bytes().fold(0_usize, |acc, b| acc.wrapping_mul(31).wrapping_add(usize::from(b)));
        let color = PALETTE[slot % PALETTE.len()].to_owned();
        Self { user_id, name: name.into(), color }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PresenceEvent {
    Joined(Member),
    Left(Member),
    Updated { client_id: ClientId, channel: String, value: Value },
}

#[derive(Default)]
struct Roster {
    members: IndexMap<ClientId, Member>,
    states: HashMap<ClientId, IndexMap<String, Value>>,
}

/// Presence feed for one container, as seen by one client.
pub struct PresenceFeed {
    local: Member,
    roster: Mutex<Roster>,
    observers: ObserverRegistry<PresenceEvent>,
    outbox: Option<Arc<dyn Outbox>>,
}

impl PresenceFeed {
    /// Offline feed: local updates stay local.
    #[must_use]
    pub fn new(local: Member) -> Self {
        Self::build(local, None)
    }

    /// Feed whose local updates are forwarded through `outbox`.
    #[must_use]
    pub fn connected(local: Member, outbox: Arc<dyn Outbox>) -> Self {
        Self::build(local, Some(outbox))
    }

    fn build(local: Member, outbox: Option<Arc<dyn Outbox>>) -> Self {
        let mut roster = Roster::default();
        roster.members.insert(local.client_id, local.clone());
        Self { local, roster: Mutex::new(roster), observers: ObserverRegistry::new(), outbox }
    }

    #[must_use]
    pub fn local(&self) -> &Member {
        &self.local
    }

    /// Members in join order, local member included.
    #[must_use]
    pub fn members(&self) -> Vec<Member> {
        lock(&self.roster).members.values().cloned().collect()
    }

    #[must_use]
    pub fn member(&self, client_id: ClientId) -> Option<Member> {
        lock(&self.roster).members.get(&client_id).cloned()
    }

    /// Add a member. Returns `false` if it was already present.
    pub fn join(&self, member: Member) -> bool {
        {
            let mut roster = lock(&self.roster);
            if roster.members.contains_key(&member.client_id) {
                return false;
            }
            roster.members.insert(member.client_id, member.clone());
        }
        debug!(client_id = %member.client_id, user_id = %member.user_id, "presence: member joined");
        self.observers.notify(&PresenceEvent::Joined(member));
        true
    }

    /// Remove a member and all its channel state.
    pub fn leave(&self, client_id: ClientId) -> Option<Member> {
        if client_id == self.local.client_id {
            return None;
        }
        let member = {
            let mut roster = lock(&self.roster);
            roster.states.remove(&client_id);
            roster.members.shift_remove(&client_id)?
        };
        debug!(client_id = %member.client_id, "presence: member left");
        self.observers.notify(&PresenceEvent::Left(member.clone()));
        Some(member)
    }

    pub fn set_local(&self, channel: &str, value: Value) {
        self.store(self.local.client_id, channel, value.clone());
        if let Some(outbox) = &self.outbox {
            outbox.submit_presence(channel, value.clone());
        }
        self.observers
            .notify(&PresenceEvent::Updated { client_id: self.local.client_id, channel: channel.to_owned(), value });
    }

    /// # Errors
    ///
    /// `StoreError::Encode` if `value` cannot be serialized.
    pub fn set_local_as<T: Serialize + ?Sized>(&self, channel: &str, value: &T) -> Result<(), StoreError> {
        let json =
            serde_json::to_value(value).map_err(|source| StoreError::Encode { key: channel.to_owned(), source })?;
        self.set_local(channel, json);
        Ok(())
    }

    /// Apply a peer's channel update. Unknown clients are ignored.
    pub fn apply_remote(&self, client_id: ClientId, channel: &str, value: Value) {
        if self.member(client_id).is_none() {
            trace!(%client_id, channel, "presence: update from unknown client dropped");
            return;
        }
        self.store(client_id, channel, value.clone());
        self.observers
            .notify(&PresenceEvent::Updated { client_id, channel: channel.to_owned(), value });
    }

    #[must_use]
    pub fn state(&self, client_id: ClientId, channel: &str) -> Option<Value> {
        lock(&self.roster)
            .states
            .get(&client_id)
            .and_then(|channels| channels.get(channel))
            .cloned()
    }

    /// Every client's value on `channel`, in member order.
    #[must_use]
    pub fn states(&self, channel: &str) -> Vec<(ClientId, Value)> {
        let roster = lock(&self.roster);
        roster
            .members
            .keys()
            .filter_map(|id| {
                let value = roster.states.get(id)?.get(channel)?;
                Some((*id, value.clone()))
            })
            .collect()
    }

    /// Decoded peer values on `channel`. Values that do not decode are skipped.
    #[must_use]
    pub fn remote_states_as<T: DeserializeOwned>(&self, channel: &str) -> Vec<(Member, T)> {
        let states = self.states(channel);
        states
            .into_iter()
            .filter(|(id, _)| *id != self.local.client_id)
            .filter_map(|(id, value)| {
                let member = self.member(id)?;
                let decoded = serde_json::from_value(value).ok()?;
                Some((member, decoded))
            })
            .collect()
    }

    pub fn subscribe(&self, listener: impl Fn(&PresenceEvent) + Send + Sync + 'static) -> Subscription {
        self.observers.subscribe(listener)
    }

    /// Replace the roster with an attach snapshot.
    ///
    /// Members not seen before fire `Joined`, members that vanished fire
    /// `Left`. The local member is kept regardless.
    pub fn load(&self, members: Vec<Member>, states: Vec<(ClientId, String, Value)>) {
        let (joined, left) = {
            let mut roster = lock(&self.roster);
            let mut previous = std::mem::take(&mut roster.members);
            roster.states.retain(|id, _| *id == self.local.client_id);

            let local = previous
                .shift_remove(&self.local.client_id)
                .unwrap_or_else(|| self.local.clone());
            roster.members.insert(local.client_id, local);

            let mut joined = Vec::new();
            for member in members {
                if member.client_id == self.local.client_id {
                    continue;
                }
                if previous.shift_remove(&member.client_id).is_none() {
                    joined.push(member.clone());
                }
                roster.members.insert(member.client_id, member);
            }
            for (client_id, channel, value) in states {
                if client_id != self.local.client_id && roster.members.contains_key(&client_id) {
                    roster.states.entry(client_id).or_default().insert(channel, value);
                }
            }
            (joined, previous.into_values().collect::<Vec<_>>())
        };

        for member in joined {
            self.observers.notify(&PresenceEvent::Joined(member));
        }
        for member in left {
            self.observers.notify(&PresenceEvent::Left(member));
        }
    }

    fn store(&self, client_id: ClientId, channel: &str, value: Value) {
        lock(&self.roster)
            .states
            .entry(client_id)
            .or_default()
            .insert(channel.to_owned(), value);
    }
}

// =============================================================================
// CHANNELS
// =============================================================================

/// Pointer position on the `cursor` channel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Cursor {
    pub x: f64,
    pub y: f64,
}

/// Selected item ids on the `selection` channel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    pub ids: Vec<String>,
}

impl Selection {
    #[must_use]
    pub fn contains(&self, item_id: &str) -> bool {
        self.ids.iter().any(|id| id == item_id)
    }
}

/// In-progress drag on the `drag` channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Drag {
    pub id: String,
    pub x: f64,
    pub y: f64,
}

/// Who has an item selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Highlight {
    None,
    Local,
    Remote,
    Both,
}

impl Highlight {
    #[must_use]
    pub fn class_name(self) -> &'static str {
        match self {
            Self::None => "",
            Self::Local => "selected-local",
            Self::Remote => "selected-remote",
            Self::Both => "selected-both",
        }
    }
}

/// Highlight for `item_id` given every member's selection.
#[must_use]
pub fn highlight(feed: &PresenceFeed, item_id: &str) -> Highlight {
    let local = feed
        .state(feed.local().client_id, SELECTION)
        .and_then(|value| serde_json::from_value::<Selection>(value).ok())
        .is_some_and(|selection| selection.contains(item_id));
    let remote = feed
        .remote_states_as::<Selection>(SELECTION)
        .iter()
        .any(|(_, selection)| selection.contains(item_id));

    match (local, remote) {
        (false, false) => Highlight::None,
        (true, false) => Highlight::Local,
        (false, true) => Highlight::Remote,
        (true, true) => Highlight::Both,
    }
}

#[cfg(test)]
#[path = "presence_test.rs"]
mod tests;
