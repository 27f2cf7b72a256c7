//! In-process sequencer hosting containers.
//!
//! DESIGN
//! ======
//! `LocalService` plays the role the relay server plays over the network.
//! Every container has one FIFO queue. Replica outboxes append to it and
//! `process()` drains it: each op gets the next sequence number, is applied
//! to the container's authoritative entries, then is delivered to every
//! attached replica, the submitter included (as its ack). Presence updates
//! go to peers only.
//!
//! Nothing is delivered until `process()` runs, which lets tests interleave
//! writes from several replicas before any of them sees the others. The
//! service lock is never held while a replica applies a delivery, so
//! listeners may write back and those writes are drained in the same call.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, Weak};

use indexmap::IndexMap;
use serde_json::Value;
use tracing::{debug, info, trace};
use uuid::Uuid;

use crate::container::ContainerId;
use crate::lock;
use crate::map::{ClientId, MapOp, MemoryMap, SequencedOp};
use crate::outbox::Outbox;
use crate::presence::{Identity, Member, PresenceFeed};

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("container not found: {0}")]
    ContainerNotFound(ContainerId),
}

enum Message {
    Op(MapOp),
    Presence { channel: String, value: Value },
    Join(Member),
    Leave,
}

struct Queued {
    client_id: ClientId,
    message: Message,
}

struct Attached {
    map: Weak<MemoryMap>,
    presence: Weak<PresenceFeed>,
}

#[derive(Default)]
struct Hosted {
    entries: IndexMap<String, Value>,
    seq: u64,
    members: IndexMap<ClientId, Member>,
    presence: HashMap<ClientId, IndexMap<String, Value>>,
    replicas: HashMap<ClientId, Attached>,
    queue: VecDeque<Queued>,
}

impl Hosted {
    fn peer_feeds(&self, except: ClientId) -> Vec<Weak<PresenceFeed>> {
        self.replicas
            .iter()
            .filter(|(id, _)| **id != except)
            .map(|(_, attached)| attached.presence.clone())
            .collect()
    }
}

#[derive(Default)]
struct ServiceState {
    containers: IndexMap<ContainerId, Hosted>,
}

enum Delivery {
    Op { targets: Vec<Weak<MemoryMap>>, op: SequencedOp },
    Presence { targets: Vec<Weak<PresenceFeed>>, client_id: ClientId, channel: String, value: Value },
    Join { targets: Vec<Weak<PresenceFeed>>, member: Member },
    Leave { targets: Vec<Weak<PresenceFeed>>, client_id: ClientId },
}

/// In-process container host and sequencer.
#[derive(Clone, Default)]
pub struct LocalService {
    state: Arc<Mutex<ServiceState>>,
}

impl LocalService {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty container.
    pub fn create(&self) -> ContainerId {
        let id = ContainerId::generate();
        lock(&self.state).containers.insert(id.clone(), Hosted::default());
        info!(container_id = %id, "service: container created");
        id
    }

    #[must_use]
    pub fn containers(&self) -> Vec<ContainerId> {
        lock(&self.state).containers.keys().cloned().collect()
    }

    /// Attach a new replica, seeded with the container's sequenced state.
    ///
    /// # Errors
    ///
    /// `ServiceError::ContainerNotFound` for an unknown id.
    pub fn attach(&self, container_id: &ContainerId, identity: &Identity) -> Result<Replica, ServiceError> {
        let client_id = Uuid::new_v4();
        let member = Member::from_identity(client_id, identity);
        let outbox: Arc<dyn Outbox> = Arc::new(ServiceOutbox {
            state: Arc::downgrade(&self.state),
            container_id: container_id.clone(),
            client_id,
        });
        let map = Arc::new(MemoryMap::connected(client_id, Arc::clone(&outbox)));
        let presence = Arc::new(PresenceFeed::connected(member.clone(), outbox));

        let (entries, members, states) = {
            let mut state = lock(&self.state);
            let hosted = state
                .containers
                .get_mut(container_id)
                .ok_or_else(|| ServiceError::ContainerNotFound(container_id.clone()))?;

            let entries: Vec<(String, Value)> = hosted.entries.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
            let states: Vec<(ClientId, String, Value)> = hosted
                .presence
                .iter()
                .flat_map(|(id, channels)| channels.iter().map(|(c, v)| (*id, c.clone(), v.clone())))
                .collect();

            hosted.members.insert(client_id, member.clone());
            hosted.replicas.insert(
                client_id,
                Attached { map: Arc::downgrade(&map), presence: Arc::downgrade(&presence) },
            );
            hosted.queue.push_back(Queued { client_id, message: Message::Join(member) });
            let members: Vec<Member> = hosted.members.values().cloned().collect();
            (entries, members, states)
        };

        map.load_snapshot(entries);
        presence.load(members, states);
        debug!(container_id = %container_id, %client_id, "service: replica attached");

        Ok(Replica {
            container_id: container_id.clone(),
            client_id,
            map,
            presence,
            service: Arc::downgrade(&self.state),
        })
    }

    /// Sequenced entries of a container.
    ///
    /// # Errors
    ///
    /// `ServiceError::ContainerNotFound` for an unknown id.
    pub fn snapshot(&self, container_id: &ContainerId) -> Result<Vec<(String, Value)>, ServiceError> {
        let state = lock(&self.state);
        let hosted = state
            .containers
            .get(container_id)
            .ok_or_else(|| ServiceError::ContainerNotFound(container_id.clone()))?;
        Ok(hosted.entries.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
    }

    /// Messages waiting across all containers.
    #[must_use]
    pub fn pending(&self) -> usize {
        lock(&self.state).containers.values().map(|h| h.queue.len()).sum()
    }

    /// Deliver queued messages until every queue is empty. Returns how many
    /// were delivered.
    pub fn process(&self) -> usize {
        let mut delivered = 0;
        while let Some(delivery) = self.next_delivery() {
            deliver(delivery);
            delivered += 1;
        }
        delivered
    }

    fn next_delivery(&self) -> Option<Delivery> {
        let mut state = lock(&self.state);
        let hosted = state.containers.values_mut().find(|h| !h.queue.is_empty())?;
        let Queued { client_id, message } = hosted.queue.pop_front()?;

        let delivery = match message {
            Message::Op(op) => {
                hosted.seq += 1;
                match &op {
                    MapOp::Set { key, value } => {
                        hosted.entries.insert(key.clone(), value.clone());
                    }
                    MapOp::Delete { key } => {
                        hosted.entries.shift_remove(key);
                    }
                }
                trace!(seq = hosted.seq, %client_id, key = op.key(), "service: op sequenced");
                Delivery::Op {
                    targets: hosted.replicas.values().map(|a| a.map.clone()).collect(),
                    op: SequencedOp { seq: hosted.seq, client_id, op },
                }
            }
            Message::Presence { channel, value } => {
                let targets = if hosted.members.contains_key(&client_id) {
                    hosted
                        .presence
                        .entry(client_id)
                        .or_default()
                        .insert(channel.clone(), value.clone());
                    hosted.peer_feeds(client_id)
                } else {
                    Vec::new()
                };
                Delivery::Presence { targets, client_id, channel, value }
            }
            Message::Join(member) => Delivery::Join { targets: hosted.peer_feeds(client_id), member },
            Message::Leave => {
                hosted.replicas.remove(&client_id);
                hosted.members.shift_remove(&client_id);
                hosted.presence.remove(&client_id);
                debug!(%client_id, "service: replica detached");
                Delivery::Leave { targets: hosted.peer_feeds(client_id), client_id }
            }
        };
        Some(delivery)
    }
}

fn deliver(delivery: Delivery) {
    match delivery {
        Delivery::Op { targets, op } => {
            for map in targets.iter().filter_map(Weak::upgrade) {
                map.apply_sequenced(&op);
            }
        }
        Delivery::Presence { targets, client_id, channel, value } => {
            for feed in targets.iter().filter_map(Weak::upgrade) {
                feed.apply_remote(client_id, &channel, value.clone());
            }
        }
        Delivery::Join { targets, member } => {
            for feed in targets.iter().filter_map(Weak::upgrade) {
                feed.join(member.clone());
            }
        }
        Delivery::Leave { targets, client_id } => {
            for feed in targets.iter().filter_map(Weak::upgrade) {
                feed.leave(client_id);
            }
        }
    }
}

struct ServiceOutbox {
    state: Weak<Mutex<ServiceState>>,
    container_id: ContainerId,
    client_id: ClientId,
}

impl ServiceOutbox {
    fn enqueue(&self, message: Message) {
        let Some(state) = self.state.upgrade() else {
            return;
        };
        if let Some(hosted) = lock(&state).containers.get_mut(&self.container_id) {
            hosted.queue.push_back(Queued { client_id: self.client_id, message });
        }
    }
}

impl Outbox for ServiceOutbox {
    fn submit_op(&self, op: MapOp) {
        self.enqueue(Message::Op(op));
    }

    fn submit_presence(&self, channel: &str, value: Value) {
        self.enqueue(Message::Presence { channel: channel.to_owned(), value });
    }
}

/// One client's view of a hosted container. Dropping it detaches the client.
pub struct Replica {
    container_id: ContainerId,
    client_id: ClientId,
    map: Arc<MemoryMap>,
    presence: Arc<PresenceFeed>,
    service: Weak<Mutex<ServiceState>>,
}

impl Replica {
    #[must_use]
    pub fn container_id(&self) -> &ContainerId {
        &self.container_id
    }

    #[must_use]
    pub fn client_id(&self) -> ClientId {
        self.client_id
    }

    #[must_use]
    pub fn map(&self) -> &Arc<MemoryMap> {
        &self.map
    }

    #[must_use]
    pub fn presence(&self) -> &Arc<PresenceFeed> {
        &self.presence
    }
}

impl Drop for Replica {
    fn drop(&mut self) {
        let Some(state) = self.service.upgrade() else {
            return;
        };
        if let Some(hosted) = lock(&state).containers.get_mut(&self.container_id) {
            hosted.queue.push_back(Queued { client_id: self.client_id, message: Message::Leave });
        }
    }
}

#[cfg(test)]
#[path = "service_test.rs"]
mod tests;
