//! WebSocket handler: bidirectional frame relay.
//!
//! DESIGN
//! ======
//! On upgrade, generates a client ID and enters a `select!` loop:
//! - Incoming client frames -> decode + dispatch by syscall prefix
//! - Frames queued on the client's channel by the container -> forward
//!
//! Handler functions validate, call a service, and return an `Outcome`. The
//! dispatch layer owns replies and peer broadcasts. Map writes are the
//! exception: the entry service fans them out itself while holding the
//! container lock, so handlers report `Outcome::Sequenced` and nothing else
//! is sent.
//!
//! LIFECYCLE
//! =========
//! 1. Upgrade -> send `session:connected` with `client_id` and identity
//! 2. `container:attach` -> snapshot reply, `container:join` to peers
//! 3. `map:*` -> sequenced to every client; `presence:update` -> peers only
//! 4. Close or `container:detach` -> `container:part` to peers -> cleanup

use std::collections::HashMap;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use frames::{ErrorCode, Frame, Status};
use serde::Serialize;
use serde_json::{Map, Value};
use store::container::ContainerId;
use store::presence::{Identity, Member};
use tokio::sync::mpsc;
use tracing::{info, trace, warn};
use uuid::Uuid;

use crate::services::container::{self, ContainerError};
use crate::services::entry::{self, EntryOp};
use crate::services::presence;
use crate::state::AppState;

type Data = Map<String, Value>;

pub const SESSION_CONNECTED: &str = "session:connected";
pub const CONTAINER_JOIN: &str = "container:join";
pub const CONTAINER_PART: &str = "container:part";

// =============================================================================
// OUTCOME
// =============================================================================

/// Result returned by handler functions. The dispatch layer uses this to
/// decide who receives what.
enum Outcome {
    /// Already delivered to every client, sender included, by the entry
    /// service.
    Sequenced,
    /// Send data to container peers EXCLUDING sender. No reply to sender.
    BroadcastExcludeSender { container_id: ContainerId, data: Data },
    /// Send done+data to sender only.
    Reply(Data),
    /// Reply to sender, and notify peers with a different syscall.
    ReplyAndBroadcast { container_id: ContainerId, syscall: &'static str, reply: Data, broadcast: Data },
    /// Nothing to send.
    Ignored,
}

/// Per-socket state owned by the connection loop.
struct Connection {
    client_id: Uuid,
    identity: Identity,
    tx: mpsc::Sender<Frame>,
    current: Option<ContainerId>,
}

impl Connection {
    fn member(&self) -> Member {
        Member::from_identity(self.client_id, &self.identity)
    }
}

// =============================================================================
// UPGRADE
// =============================================================================

pub async fn handle_ws(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    ws: WebSocketUpgrade,
) -> Response {
    let Some(user_id) = params.get("user_id").map(|s| s.trim()).filter(|s| !s.is_empty()) else {
        return (StatusCode::BAD_REQUEST, "user_id required").into_response();
    };

    let name = params
        .get("name")
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .unwrap_or(user_id);
    let mut identity = Identity::new(user_id, name);
    if let Some(color) = params.get("color").filter(|c| !c.is_empty()) {
        identity.color.clone_from(color);
    }

    ws.on_upgrade(move |socket| run_ws(socket, state, identity))
}

// =============================================================================
// CONNECTION
// =============================================================================

async fn run_ws(mut socket: WebSocket, state: AppState, identity: Identity) {
    let client_id = Uuid::new_v4();

    // Per-connection channel for frames pushed by containers.
    let (client_tx, mut client_rx) = mpsc::channel::<Frame>(state.config.client_channel_capacity);

    let welcome = Frame::request(SESSION_CONNECTED, Data::new())
        .with_data("client_id", client_id.to_string())
        .with_data("user_id", identity.user_id.clone())
        .with_data("name", identity.name.clone())
        .with_data("color", identity.color.clone());
    if send_frame(&mut socket, &welcome).await.is_err() {
        return;
    }

    info!(%client_id, user_id = %identity.user_id, "ws: client connected");
    let mut conn = Connection { client_id, identity, tx: client_tx, current: None };

    'conn: loop {
        tokio::select! {
            msg = socket.recv() => {
                let Some(Ok(msg)) = msg else { break };
                let replies = match msg {
                    Message::Binary(bytes) => process_inbound_bytes(&state, &mut conn, &bytes).await,
                    Message::Text(_) => vec![gateway_error("binary protobuf frames required")],
                    Message::Close(_) => break,
                    _ => continue,
                };
                for frame in &replies {
                    if send_frame(&mut socket, frame).await.is_err() {
                        break 'conn;
                    }
                }
            }
            Some(frame) = client_rx.recv() => {
                if send_frame(&mut socket, &frame).await.is_err() {
                    break;
                }
            }
        }
    }

    leave_current(&state, &mut conn).await;
    info!(%client_id, "ws: client disconnected");
}

// =============================================================================
// FRAME DISPATCH
// =============================================================================

/// Decode and process one inbound frame and return frames for the sender.
///
/// Transport concerns stay in `run_ws`, so tests can drive dispatch with
/// plain channels.
async fn process_inbound_bytes(state: &AppState, conn: &mut Connection, bytes: &[u8]) -> Vec<Frame> {
    let mut req = match frames::decode_frame(bytes) {
        Ok(frame) => frame,
        Err(e) => {
            warn!(client_id = %conn.client_id, error = %e, "ws: invalid inbound frame");
            return vec![gateway_error(&format!("invalid frame: {e}"))];
        }
    };

    // Stamp the declared user_id as `from`.
    req.from = Some(conn.identity.user_id.clone());

    let prefix = req.prefix();
    if prefix == "presence" {
        trace!(client_id = %conn.client_id, syscall = %req.syscall, "ws: recv frame");
    } else {
        info!(client_id = %conn.client_id, id = %req.id, syscall = %req.syscall, "ws: recv frame");
    }

    let result = match prefix {
        "container" => handle_container(state, conn, &req).await,
        "map" => handle_map(state, conn, &req).await,
        "presence" => handle_presence(state, conn, &req).await,
        _ => Err(req.error(format!("unknown prefix: {prefix}"))),
    };

    match result {
        Ok(Outcome::Sequenced | Outcome::Ignored) => vec![],
        Ok(Outcome::BroadcastExcludeSender { container_id, data }) => {
            let frame = Frame::request(req.syscall.clone(), data).with_container_id(container_id.to_string());
            container::broadcast(state, &container_id, &frame, Some(conn.client_id)).await;
            vec![]
        }
        Ok(Outcome::Reply(data)) => vec![req.done_with(data)],
        Ok(Outcome::ReplyAndBroadcast { container_id, syscall, reply, broadcast }) => {
            let notification = Frame::request(syscall, broadcast).with_container_id(container_id.to_string());
            container::broadcast(state, &container_id, &notification, Some(conn.client_id)).await;
            vec![req.done_with(reply).with_container_id(container_id.to_string())]
        }
        Err(err_frame) => vec![err_frame],
    }
}

// =============================================================================
// CONTAINER HANDLERS
// =============================================================================

async fn handle_container(state: &AppState, conn: &mut Connection, req: &Frame) -> Result<Outcome, Frame> {
    match req.op() {
        "create" => {
            let id = container::create_container(state).await;
            let mut data = Data::new();
            data.insert("container_id".into(), Value::String(id.to_string()));
            Ok(Outcome::Reply(data))
        }
        "attach" => {
            let Some(raw) = req.str_field("container_id").or(req.container_id.as_deref()) else {
                return Err(req.error_from(&ContainerError::BadRequest("container_id required".into())));
            };
            let id: ContainerId = raw
                .parse()
                .map_err(|e: store::container::ContainerIdError| {
                    req.error_from(&ContainerError::BadRequest(e.to_string()))
                })?;

            leave_current(state, conn).await;
            let member = conn.member();
            let snapshot = container::attach(state, &id, member.clone(), conn.tx.clone())
                .await
                .map_err(|e| req.error_from(&e))?;
            conn.current = Some(id.clone());

            let mut broadcast = Data::new();
            broadcast.insert("member".into(), serde_json::to_value(&member).unwrap_or_default());
            Ok(Outcome::ReplyAndBroadcast { container_id: id, syscall: CONTAINER_JOIN, reply: to_data(&snapshot), broadcast })
        }
        "detach" => {
            let Some(id) = conn.current.take() else {
                return Err(req.error_from(&ContainerError::NotAttached));
            };
            container::detach(state, &id, conn.client_id).await;
            Ok(Outcome::ReplyAndBroadcast {
                container_id: id,
                syscall: CONTAINER_PART,
                reply: Data::new(),
                broadcast: part_data(conn.client_id),
            })
        }
        op => Err(req.error(format!("unknown container op: {op}"))),
    }
}

// =============================================================================
// MAP HANDLERS
// =============================================================================

async fn handle_map(state: &AppState, conn: &Connection, req: &Frame) -> Result<Outcome, Frame> {
    let Some(key) = req.str_field("key") else {
        return Err(req.error_from(&ContainerError::BadRequest("key required".into())));
    };
    // Errors echo the key so the client can release its pending write.
    let reject = |err: &dyn ErrorCode| req.error_from(err).with_data("key", key);

    let Some(id) = conn.current.clone() else {
        return Err(reject(&ContainerError::NotAttached));
    };
    if req.container_id.as_deref().is_some_and(|target| target != id.as_str()) {
        return Err(reject(&ContainerError::NotAttached));
    }

    let op = match req.op() {
        "set" => {
            let Some(value) = req.field("value").cloned() else {
                return Err(reject(&ContainerError::BadRequest("value required".into())));
            };
            EntryOp::Set { key: key.to_owned(), value }
        }
        "delete" => EntryOp::Delete { key: key.to_owned() },
        op => return Err(req.error(format!("unknown map op: {op}")).with_data("key", key)),
    };

    entry::apply(state, &id, conn.client_id, req, op)
        .await
        .map_err(|e| reject(&e))?;
    Ok(Outcome::Sequenced)
}

// =============================================================================
// PRESENCE HANDLER
// =============================================================================

async fn handle_presence(state: &AppState, conn: &Connection, req: &Frame) -> Result<Outcome, Frame> {
    let Some(id) = conn.current.clone() else {
        // Presence before attach is dropped quietly.
        return Ok(Outcome::Ignored);
    };
    if req.op() != "update" {
        return Err(req.error(format!("unknown presence op: {}", req.op())));
    }

    let channel = req.str_field("channel").unwrap_or_default();
    let value = req.field("value").cloned().unwrap_or(Value::Null);
    presence::update(state, &id, conn.client_id, channel, value.clone())
        .await
        .map_err(|e| req.error_from(&e))?;

    let mut data = Data::new();
    data.insert("client_id".into(), Value::String(conn.client_id.to_string()));
    data.insert("channel".into(), Value::String(channel.to_owned()));
    data.insert("value".into(), value);
    Ok(Outcome::BroadcastExcludeSender { container_id: id, data })
}

// =============================================================================
// HELPERS
// =============================================================================

/// Detach from the current container, if any, and tell the peers.
async fn leave_current(state: &AppState, conn: &mut Connection) {
    let Some(id) = conn.current.take() else {
        return;
    };
    container::detach(state, &id, conn.client_id).await;
    let part = Frame::request(CONTAINER_PART, part_data(conn.client_id)).with_container_id(id.to_string());
    container::broadcast(state, &id, &part, Some(conn.client_id)).await;
}

fn part_data(client_id: Uuid) -> Data {
    let mut data = Data::new();
    data.insert("client_id".into(), Value::String(client_id.to_string()));
    data
}

fn to_data(value: &impl Serialize) -> Data {
    match serde_json::to_value(value) {
        Ok(Value::Object(map)) => map,
        _ => Data::new(),
    }
}

fn gateway_error(message: &str) -> Frame {
    Frame::request("gateway:error", Data::new()).with_data("message", message)
}

async fn send_frame(socket: &mut WebSocket, frame: &Frame) -> Result<(), axum::Error> {
    if frame.status == Status::Error {
        let code = frame.str_field(frames::FRAME_CODE).unwrap_or("-");
        let message = frame.error_message().unwrap_or("-");
        warn!(id = %frame.id, syscall = %frame.syscall, code, message, "ws: send frame status=Error");
    } else if frame.prefix() == "presence" {
        trace!(syscall = %frame.syscall, "ws: send frame");
    } else {
        info!(id = %frame.id, syscall = %frame.syscall, status = ?frame.status, "ws: send frame");
    }
    socket.send(Message::Binary(frames::encode_frame(frame).into())).await
}

#[cfg(test)]
#[path = "ws_test.rs"]
mod tests;
