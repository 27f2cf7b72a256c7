//! Relay syscalls and payload shapes.
//!
//! Client -> relay requests:
//!
//! - `container:create {}` -> done `{container_id}`
//! - `container:attach {container_id}` -> done `{container_id, seq, entries,
//!   members, presence}`
//! - `container:detach {}` -> done `{}`
//! - `map:set {key, value}` / `map:delete {key}` -> no direct reply; the
//!   sequenced broadcast below doubles as the ack (`parent_id` = request id)
//! - `presence:update {channel, value}` -> fire-and-forget
//!
//! Relay -> client pushes:
//!
//! - `session:connected {client_id, user_id, name, color}`
//! - `map:set {seq, client_id, key, value}` / `map:delete {seq, client_id, key}`
//! - `presence:update {client_id, channel, value}`
//! - `container:join {member}` / `container:part {client_id}`

use frames::Frame;
use serde::Deserialize;
use serde_json::{Map, Value};
use store::map::{ClientId, MapOp, SequencedOp};
use store::presence::Member;
use uuid::Uuid;

use crate::error::ClientError;

pub const SESSION_CONNECTED: &str = "session:connected";
pub const CONTAINER_CREATE: &str = "container:create";
pub const CONTAINER_ATTACH: &str = "container:attach";
pub const CONTAINER_DETACH: &str = "container:detach";
pub const CONTAINER_JOIN: &str = "container:join";
pub const CONTAINER_PART: &str = "container:part";
pub const MAP_SET: &str = "map:set";
pub const MAP_DELETE: &str = "map:delete";
pub const PRESENCE_UPDATE: &str = "presence:update";

/// State handed over by `container:attach`.
#[derive(Debug, Clone, PartialEq)]
pub struct AttachSnapshot {
    pub seq: u64,
    pub entries: Vec<(String, Value)>,
    pub members: Vec<Member>,
    pub presence: Vec<(ClientId, String, Value)>,
}

#[derive(Deserialize)]
struct WireEntry {
    key: String,
    value: Value,
}

#[derive(Deserialize)]
struct WirePresence {
    client_id: ClientId,
    channel: String,
    value: Value,
}

#[derive(Deserialize)]
struct WireSnapshot {
    #[serde(default)]
    seq: u64,
    #[serde(default)]
    entries: Vec<WireEntry>,
    #[serde(default)]
    members: Vec<Member>,
    #[serde(default)]
    presence: Vec<WirePresence>,
}

#[must_use]
pub fn map_op_request(container_id: &str, op: &MapOp) -> Frame {
    let mut data = Map::new();
    let syscall = match op {
        MapOp::Set { key, value } => {
            data.insert("key".into(), Value::String(key.clone()));
            data.insert("value".into(), value.clone());
            MAP_SET
        }
        MapOp::Delete { key } => {
            data.insert("key".into(), Value::String(key.clone()));
            MAP_DELETE
        }
    };
    Frame::request(syscall, data).with_container_id(container_id)
}

#[must_use]
pub fn presence_request(container_id: &str, channel: &str, value: Value) -> Frame {
    let mut data = Map::new();
    data.insert("channel".into(), Value::String(channel.to_owned()));
    data.insert("value".into(), value);
    Frame::request(PRESENCE_UPDATE, data).with_container_id(container_id)
}

/// Parse a `client_id` field.
///
/// # Errors
///
/// `MissingField` if absent or not a UUID.
pub fn client_id_field(frame: &Frame) -> Result<ClientId, ClientError> {
    frame
        .str_field("client_id")
        .and_then(|s| Uuid::parse_str(s).ok())
        .ok_or(ClientError::MissingField("client_id"))
}

/// Parse a sequenced `map:set` / `map:delete` broadcast.
///
/// # Errors
///
/// `MissingField` for any absent field.
pub fn parse_sequenced(frame: &Frame) -> Result<SequencedOp, ClientError> {
    let seq = frame.field("seq").and_then(Value::as_u64).ok_or(ClientError::MissingField("seq"))?;
    let client_id = client_id_field(frame)?;
    let key = frame.str_field("key").ok_or(ClientError::MissingField("key"))?.to_owned();
    let op = if frame.syscall == MAP_DELETE {
        MapOp::Delete { key }
    } else {
        let value = frame.field("value").cloned().ok_or(ClientError::MissingField("value"))?;
        MapOp::Set { key, value }
    };
    Ok(SequencedOp { seq, client_id, op })
}

/// # Errors
///
/// `InvalidJson` if the payload does not match the snapshot shape.
pub fn parse_snapshot(frame: &Frame) -> Result<AttachSnapshot, ClientError> {
    let wire: WireSnapshot = serde_json::from_value(frame.data.clone())?;
    Ok(AttachSnapshot {
        seq: wire.seq,
        entries: wire.entries.into_iter().map(|e| (e.key, e.value)).collect(),
        members: wire.members,
        presence: wire.presence.into_iter().map(|p| (p.client_id, p.channel, p.value)).collect(),
    })
}

/// # Errors
///
/// `MissingField` or `InvalidJson` when `member` is absent or malformed.
pub fn parse_member(frame: &Frame) -> Result<Member, ClientError> {
    let value = frame.field("member").cloned().ok_or(ClientError::MissingField("member"))?;
    Ok(serde_json::from_value(value)?)
}

#[cfg(test)]
#[path = "protocol_test.rs"]
mod tests;
