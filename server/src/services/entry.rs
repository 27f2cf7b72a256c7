//! Entry service: sequencing of map writes.
//!
//! DESIGN
//! ======
//! Each write gets the container's next sequence number and is fanned out to
//! every attached client, sender included, while the container write lock is
//! held. Holding the lock across fan-out keeps every client channel in
//! sequence order, which is what lets replicas resolve conflicts by
//! last-writer-wins. The sender's copy is a `done` reply carrying
//! `parent_id` and doubles as the ack.

use frames::{ErrorCode, Frame};
use serde_json::{Map, Value};
use store::container::ContainerId;
use tracing::debug;
use uuid::Uuid;

use super::container::{fan_out, send_to};
use crate::state::AppState;

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum EntryError {
    #[error("container not found: {0}")]
    ContainerNotFound(ContainerId),
    #[error("value for `{key}` is {size} bytes, limit is {limit}")]
    ValueTooLarge { key: String, size: usize, limit: usize },
}

impl ErrorCode for EntryError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::ContainerNotFound(_) => "E_CONTAINER_NOT_FOUND",
            Self::ValueTooLarge { .. } => "E_VALUE_TOO_LARGE",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EntryOp {
    Set { key: String, value: Value },
    Delete { key: String },
}

impl EntryOp {
    #[must_use]
    pub fn key(&self) -> &str {
        match self {
            Self::Set { key, .. } | Self::Delete { key } => key,
        }
    }
}

// =============================================================================
// APPLY
// =============================================================================

/// Sequence one write from `client_id` and fan it out. Returns the
/// assigned sequence number.
///
/// Deleting a missing key is still sequenced so the sender gets its ack.
///
/// Size of `value` as JSON text, the unit `RELAY_MAX_VALUE_BYTES` limits.
pub(crate) fn serialized_len(value: &Value) -> usize {
    serde_json::to_vec(value).map_or(usize::MAX, |bytes| bytes.len())
}

/// # Errors
///
/// `ContainerNotFound` if the container is gone, `ValueTooLarge` if a set
/// value exceeds `RELAY_MAX_VALUE_BYTES` once serialized.
pub async fn apply(
    state: &AppState,
    container_id: &ContainerId,
    client_id: Uuid,
    req: &Frame,
    op: EntryOp,
) -> Result<u64, EntryError> {
    if let EntryOp::Set { key, value } = &op {
        let size = serialized_len(value);
        let limit = state.config.max_value_bytes;
        if size > limit {
            return Err(EntryError::ValueTooLarge { key: key.clone(), size, limit });
        }
    }

    let mut containers = state.containers.write().await;
    let container = containers
        .get_mut(container_id)
        .ok_or_else(|| EntryError::ContainerNotFound(container_id.clone()))?;

    container.seq += 1;
    let seq = container.seq;

    let mut data = Map::new();
    data.insert("seq".into(), Value::from(seq));
    data.insert("client_id".into(), Value::String(client_id.to_string()));
    data.insert("key".into(), Value::String(op.key().to_owned()));
    match op {
        EntryOp::Set { key, value } => {
            data.insert("value".into(), value.clone());
            container.entries.insert(key, value);
        }
        EntryOp::Delete { key } => {
            container.entries.shift_remove(&key);
        }
    }
    debug!(%container_id, %client_id, seq, syscall = %req.syscall, "entry sequenced");

    let peer_frame = Frame::request(req.syscall.clone(), data.clone()).with_container_id(container_id.to_string());
    fan_out(container, &peer_frame, Some(client_id));

    if let Some(tx) = container.clients.get(&client_id) {
        let ack = req.done_with(data).with_container_id(container_id.to_string());
        send_to(client_id, tx, ack);
    }
    Ok(seq)
}

#[cfg(test)]
#[path = "entry_test.rs"]
mod tests;
