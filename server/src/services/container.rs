//! Container service: create, attach/detach, snapshots and broadcast.
//!
//! DESIGN
//! ======
//! A container is created empty and lives in memory. Attaching registers the
//! client's sender and takes the snapshot under the same write lock, so every
//! op the client later receives through its channel is sequenced after the
//! snapshot it was handed.
//!
//! Broadcast is best effort: a client whose channel is full misses the frame.

use frames::{ErrorCode, Frame};
use serde::Serialize;
use serde_json::Value;
use store::container::ContainerId;
use store::presence::Member;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::state::{AppState, ContainerState};

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ContainerError {
    #[error("container not found: {0}")]
    NotFound(ContainerId),
    #[error("not attached to a container")]
    NotAttached,
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("value for channel `{channel}` is {size} bytes, limit is {limit}")]
    ValueTooLarge { channel: String, size: usize, limit: usize },
}

impl ErrorCode for ContainerError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "E_CONTAINER_NOT_FOUND",
            Self::NotAttached => "E_NOT_ATTACHED",
            Self::BadRequest(_) => "E_BAD_REQUEST",
            Self::ValueTooLarge { .. } => "E_VALUE_TOO_LARGE",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Entry {
    pub key: String,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PresenceEntry {
    pub client_id: Uuid,
    pub channel: String,
    pub value: Value,
}

/// Full container state handed to an attaching client.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pub container_id: ContainerId,
    pub seq: u64,
    pub entries: Vec<Entry>,
    pub members: Vec<Member>,
    pub presence: Vec<PresenceEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContainerSummary {
    pub id: ContainerId,
    pub clients: usize,
    pub keys: usize,
    pub seq: u64,
}

// =============================================================================
// LIFECYCLE
// =============================================================================

/// Create an empty container with a fresh id.
pub async fn create_container(state: &AppState) -> ContainerId {
    let id = ContainerId::generate();
    state.containers.write().await.insert(id.clone(), ContainerState::new());
    info!(container_id = %id, "container created");
    id
}

/// Register a client on a container and return the state it starts from.
///
/// # Errors
///
/// `NotFound` if the container does not exist.
pub async fn attach(
    state: &AppState,
    container_id: &ContainerId,
    member: Member,
    tx: mpsc::Sender<Frame>,
) -> Result<Snapshot, ContainerError> {
    let mut containers = state.containers.write().await;
    let container = containers
        .get_mut(container_id)
        .ok_or_else(|| ContainerError::NotFound(container_id.clone()))?;

    let client_id = member.client_id;
    container.clients.insert(client_id, tx);
    container.members.insert(client_id, member);
    let snapshot = snapshot_of(container_id, container);

    info!(%container_id, %client_id, clients = container.clients.len(), seq = container.seq, "client attached");
    Ok(snapshot)
}

/// Remove a client from a container. Evicts the container when it becomes
/// empty and eviction is enabled.
pub async fn detach(state: &AppState, container_id: &ContainerId, client_id: Uuid) -> Option<Member> {
    let mut containers = state.containers.write().await;
    let container = containers.get_mut(container_id)?;

    let member = container.remove_client(client_id);
    info!(%container_id, %client_id, remaining = container.clients.len(), "client detached");

    if container.clients.is_empty() && state.config.evict_empty {
        containers.remove(container_id);
        info!(%container_id, "evicted empty container");
    }
    member
}

// =============================================================================
// QUERIES
// =============================================================================

/// # Errors
///
/// `NotFound` if the container does not exist.
pub async fn snapshot(state: &AppState, container_id: &ContainerId) -> Result<Snapshot, ContainerError> {
    let containers = state.containers.read().await;
    let container = containers
        .get(container_id)
        .ok_or_else(|| ContainerError::NotFound(container_id.clone()))?;
    Ok(snapshot_of(container_id, container))
}

/// Live containers ordered by id.
pub async fn list_containers(state: &AppState) -> Vec<ContainerSummary> {
    let containers = state.containers.read().await;
    let mut list: Vec<ContainerSummary> = containers
        .iter()
        .map(|(id, container)| ContainerSummary {
            id: id.clone(),
            clients: container.clients.len(),
            keys: container.entries.len(),
            seq: container.seq,
        })
        .collect();
    list.sort_by(|a, b| a.id.cmp(&b.id));
    list
}

fn snapshot_of(container_id: &ContainerId, container: &ContainerState) -> Snapshot {
    let entries = container
        .entries
        .iter()
        .map(|(key, value)| Entry { key: key.clone(), value: value.clone() })
        .collect();
    let members = container.members.values().cloned().collect();
    let presence = container
        .members
        .keys()
        .filter_map(|client_id| container.presence.get(client_id).map(|channels| (client_id, channels)))
        .flat_map(|(client_id, channels)| {
            channels.iter().map(|(channel, value)| PresenceEntry {
                client_id: *client_id,
                channel: channel.clone(),
                value: value.clone(),
            })
        })
        .collect();
    Snapshot { container_id: container_id.clone(), seq: container.seq, entries, members, presence }
}

// =============================================================================
// BROADCAST
// =============================================================================

/// Broadcast a frame to all clients of a container, optionally excluding one.
pub async fn broadcast(state: &AppState, container_id: &ContainerId, frame: &Frame, exclude: Option<Uuid>) {
    let containers = state.containers.read().await;
    let Some(container) = containers.get(container_id) else {
        return;
    };
    fan_out(container, frame, exclude);
}

/// Push a frame into every client channel. Callers hold the container lock.
pub(crate) fn fan_out(container: &ContainerState, frame: &Frame, exclude: Option<Uuid>) {
    for (client_id, tx) in &container.clients {
        if exclude == Some(*client_id) {
            continue;
        }
        send_to(*client_id, tx, frame.clone());
    }
}

pub(crate) fn send_to(client_id: Uuid, tx: &mpsc::Sender<Frame>, frame: Frame) {
    match tx.try_send(frame) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(frame)) => {
            warn!(%client_id, syscall = %frame.syscall, "client channel full, frame dropped");
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            debug!(%client_id, "client channel closed");
        }
    }
}

#[cfg(test)]
#[path = "container_test.rs"]
mod tests;
