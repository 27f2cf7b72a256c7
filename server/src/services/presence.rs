//! Presence service: latest-wins ephemeral state per client and channel.

use serde_json::Value;
use store::container::ContainerId;
use uuid::Uuid;

use super::container::ContainerError;
use super::entry::serialized_len;
use crate::state::AppState;

/// Store a presence value for `client_id` on `channel`, replacing the
/// previous one. Relaying it to peers is the caller's job.
///
/// # Errors
///
/// `BadRequest` for an empty channel, `ValueTooLarge` past
/// `RELAY_MAX_VALUE_BYTES`, `NotFound` if the container is gone,
/// `NotAttached` if the client is not a member of it.
pub async fn update(
    state: &AppState,
    container_id: &ContainerId,
    client_id: Uuid,
    channel: &str,
    value: Value,
) -> Result<(), ContainerError> {
    if channel.is_empty() {
        return Err(ContainerError::BadRequest("channel required".into()));
    }
    let size = serialized_len(&value);
    let limit = state.config.max_value_bytes;
    if size > limit {
        return Err(ContainerError::ValueTooLarge { channel: channel.to_owned(), size, limit });
    }
    let mut containers = state.containers.write().await;
    let container = containers
        .get_mut(container_id)
        .ok_or_else(|| ContainerError::NotFound(container_id.clone()))?;
    if !container.members.contains_key(&client_id) {
        return Err(ContainerError::NotAttached);
    }
    container.presence.entry(client_id).or_default().insert(channel.to_owned(), value);
    Ok(())
}

#[cfg(test)]
#[path = "presence_test.rs"]
mod tests;
