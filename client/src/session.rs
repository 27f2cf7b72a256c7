//! Websocket session against the relay.
//!
//! DESIGN
//! ======
//! Writes never wait. `WsOutbox` pushes request frames into an unbounded
//! channel and a writer task encodes them onto the socket, so `set` on the
//! replica stays synchronous and fire-and-forget.
//!
//! Reads happen on the caller's task. `next_event` awaits one inbound frame
//! and applies it to the attached replica before returning, which keeps the
//! single-threaded listener model: every change callback runs inside
//! `next_event`, `run_for` or a request helper, never on a background task.

use std::sync::Arc;
use std::time::Duration;

use frames::{Frame, Status};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::{Map, Value};
use store::container::ContainerId;
use store::map::{ClientId, MapOp, MemoryMap};
use store::outbox::Outbox;
use store::presence::{Identity, Member, PresenceFeed};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, trace, warn};

use crate::error::ClientError;
use crate::protocol::{self, AttachSnapshot};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const REPLY_TIMEOUT: Duration = Duration::from_secs(15);
const CLOSE_GRACE: Duration = Duration::from_millis(500);

/// Build the relay websocket URL from an HTTP base URL.
///
/// # Errors
///
/// `InvalidBaseUrl` unless the base URL is `http://` or `https://`.
pub fn ws_url(base_url: &str, identity: &Identity) -> Result<url::Url, ClientError> {
    let mut url = url::Url::parse(base_url).map_err(|_| ClientError::InvalidBaseUrl(base_url.to_owned()))?;
    let scheme = match url.scheme() {
        "http" => "ws",
        "https" => "wss",
        _ => return Err(ClientError::InvalidBaseUrl(base_url.to_owned())),
    };
    url.set_scheme(scheme)
        .map_err(|()| ClientError::InvalidBaseUrl(base_url.to_owned()))?;
    url.set_path("/api/ws");
    url.query_pairs_mut()
        .clear()
        .append_pair("user_id", &identity.user_id)
        .append_pair("name", &identity.name)
        .append_pair("color", &identity.color);
    Ok(url)
}

/// Outbox that forwards replica writes to the relay writer task.
pub struct WsOutbox {
    container_id: String,
    tx: mpsc::UnboundedSender<Frame>,
}

impl WsOutbox {
    fn send(&self, frame: Frame) {
        if self.tx.send(frame).is_err() {
            warn!(container_id = %self.container_id, "client: writer gone, dropping outbound frame");
        }
    }
}

impl Outbox for WsOutbox {
    fn submit_op(&self, op: MapOp) {
        self.send(protocol::map_op_request(&self.container_id, &op));
    }

    fn submit_presence(&self, channel: &str, value: Value) {
        self.send(protocol::presence_request(&self.container_id, channel, value));
    }
}

/// A replica attached through this session.
#[derive(Clone)]
pub struct Attachment {
    container_id: ContainerId,
    map: Arc<MemoryMap>,
    presence: Arc<PresenceFeed>,
}

impl Attachment {
    #[must_use]
    pub fn container_id(&self) -> &ContainerId {
        &self.container_id
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

/// One websocket connection to the relay.
pub struct Session {
    identity: Identity,
    client_id: ClientId,
    reader: SplitStream<WsStream>,
    outgoing: mpsc::UnboundedSender<Frame>,
    shutdown: oneshot::Sender<()>,
    writer: JoinHandle<()>,
    attached: Option<Attachment>,
}

impl Session {
    /// Connect and wait for `session:connected`.
    ///
    /// # Errors
    ///
    /// Fails on a bad URL, a failed handshake, or no greeting within the
    /// connect timeout.
    pub async fn connect(base_url: &str, identity: Identity) -> Result<Self, ClientError> {
        let url = ws_url(base_url, &identity)?;
        let (stream, _) = connect_async(url.as_str()).await?;
        let (sink, reader) = stream.split();

        let (outgoing, rx) = mpsc::unbounded_channel();
        let (shutdown, stop) = oneshot::channel();
        let writer = tokio::spawn(write_loop(sink, rx, stop));

        let mut session =
            Self { identity, client_id: ClientId::nil(), reader, outgoing, shutdown, writer, attached: None };
        let greeting = tokio::time::timeout(CONNECT_TIMEOUT, async {
            loop {
                let frame = session.recv_frame().await?;
                if frame.syscall == protocol::SESSION_CONNECTED {
                    return Ok::<Frame, ClientError>(frame);
                }
            }
        })
        .await
        .map_err(|_| ClientError::Timeout)??;

        session.client_id = protocol::client_id_field(&greeting)?;
        info!(client_id = %session.client_id, user_id = %session.identity.user_id, "client: session connected");
        Ok(session)
    }

    #[must_use]
    pub fn client_id(&self) -> ClientId {
        self.client_id
    }

    #[must_use]
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    #[must_use]
    pub fn attachment(&self) -> Option<&Attachment> {
        self.attached.as_ref()
    }

    /// # Errors
    ///
    /// Relay error or missing `container_id` in the reply.
    pub async fn create_container(&mut self) -> Result<ContainerId, ClientError> {
        let reply = self.request(Frame::request(protocol::CONTAINER_CREATE, Map::new())).await?;
        let id = reply.str_field("container_id").ok_or(ClientError::MissingField("container_id"))?;
        Ok(id.parse()?)
    }

    /// Attach to a container and seed a fresh replica from its snapshot.
    /// A previous attachment is detached first.
    ///
    /// # Errors
    ///
    /// Relay error (e.g. unknown container) or a malformed snapshot. A
    /// failed attach leaves the session detached.
    pub async fn attach(&mut self, container_id: &ContainerId) -> Result<Attachment, ClientError> {
        if self.attached.is_some() {
            self.detach().await?;
        }

        let outbox: Arc<dyn Outbox> =
            Arc::new(WsOutbox { container_id: container_id.to_string(), tx: self.outgoing.clone() });
        let local = Member::from_identity(self.client_id, &self.identity);
        let map = Arc::new(MemoryMap::connected(self.client_id, Arc::clone(&outbox)));
        let presence = Arc::new(PresenceFeed::connected(local, outbox));

        let mut data = Map::new();
        data.insert("container_id".into(), Value::String(container_id.to_string()));
        let reply = self.request(Frame::request(protocol::CONTAINER_ATTACH, data)).await?;
        let AttachSnapshot { seq, entries, members, presence: states } = protocol::parse_snapshot(&reply)?;

        map.load_snapshot(entries);
        presence.load(members, states);
        debug!(container_id = %container_id, seq, keys = map.len(), "client: attached");

        let attachment = Attachment { container_id: container_id.clone(), map, presence };
        self.attached = Some(attachment.clone());
        Ok(attachment)
    }

    /// # Errors
    ///
    /// `NotAttached` if there is nothing to detach, or a relay error.
    pub async fn detach(&mut self) -> Result<(), ClientError> {
        let attachment = self.attached.take().ok_or(ClientError::NotAttached)?;
        let frame = Frame::request(protocol::CONTAINER_DETACH, Map::new())
            .with_container_id(attachment.container_id.to_string());
        self.request(frame).await?;
        debug!(container_id = %attachment.container_id, "client: detached");
        Ok(())
    }

    /// Await one inbound frame, apply it, and return it.
    ///
    /// # Errors
    ///
    /// `WsClosed` when the relay goes away, or a decode failure.
    pub async fn next_event(&mut self) -> Result<Frame, ClientError> {
        let frame = self.recv_frame().await?;
        self.dispatch(&frame);
        Ok(frame)
    }

    /// Apply inbound frames until `duration` elapses. Returns how many were
    /// applied.
    ///
    /// # Errors
    ///
    /// Propagates `next_event` failures.
    pub async fn run_for(&mut self, duration: Duration) -> Result<usize, ClientError> {
        let deadline = tokio::time::Instant::now() + duration;
        let mut applied = 0;
        loop {
            match tokio::time::timeout_at(deadline, self.next_event()).await {
                Ok(result) => {
                    result?;
                    applied += 1;
                }
                Err(_) => return Ok(applied),
            }
        }
    }

    /// Pump inbound frames until every local write has been acknowledged.
    ///
    /// # Errors
    ///
    /// `Timeout` if acks do not arrive in time, `NotAttached` without a
    /// replica.
    pub async fn sync(&mut self, timeout: Duration) -> Result<(), ClientError> {
        let map = Arc::clone(self.attached.as_ref().ok_or(ClientError::NotAttached)?.map());
        tokio::time::timeout(timeout, async {
            while map.has_pending() {
                self.next_event().await?;
            }
            Ok::<(), ClientError>(())
        })
        .await
        .map_err(|_| ClientError::Timeout)?
    }

    /// Close the socket after flushing queued frames.
    ///
    /// The writer is told to stop even while replicas held elsewhere still
    /// own outbox senders; their later writes are dropped with a warning.
    pub async fn close(self) {
        let Self { outgoing, shutdown, writer, attached, .. } = self;
        drop(attached);
        drop(outgoing);
        let _ = shutdown.send(());
        if tokio::time::timeout(CLOSE_GRACE, writer).await.is_err() {
            warn!("client: writer did not finish closing in time");
        }
    }

    async fn request(&mut self, frame: Frame) -> Result<Frame, ClientError> {
        let request_id = frame.id.clone();
        let syscall = frame.syscall.clone();
        self.outgoing.send(frame).map_err(|_| ClientError::WsClosed)?;

        tokio::time::timeout(REPLY_TIMEOUT, async {
            loop {
                let frame = self.recv_frame().await?;
                if frame.parent_id.as_deref() != Some(request_id.as_str()) || !frame.status.is_terminal() {
                    self.dispatch(&frame);
                    continue;
                }
                if frame.status == Status::Error {
                    return Err(ClientError::ServerError {
                        syscall,
                        message: frame.error_message().unwrap_or("unknown relay error").to_owned(),
                    });
                }
                return Ok(frame);
            }
        })
        .await
        .map_err(|_| ClientError::Timeout)?
    }

    async fn recv_frame(&mut self) -> Result<Frame, ClientError> {
        loop {
            let Some(message) = self.reader.next().await else {
                return Err(ClientError::WsClosed);
            };
            match message? {
                Message::Binary(bytes) => return Ok(frames::decode_frame(&bytes)?),
                Message::Close(_) => return Err(ClientError::WsClosed),
                _ => {}
            }
        }
    }

    fn dispatch(&self, frame: &Frame) {
        let Some(attachment) = &self.attached else {
            trace!(syscall = %frame.syscall, "client: frame ignored while detached");
            return;
        };
        if frame.container_id.as_deref() != Some(attachment.container_id.as_str()) {
            trace!(syscall = %frame.syscall, "client: frame for another container ignored");
            return;
        }
        if frame.status == Status::Error {
            warn!(syscall = %frame.syscall, message = ?frame.error_message(), "client: relay rejected request");
            if let Some(key) = frame.str_field("key") {
                attachment.map.reject(key);
            }
            return;
        }

        let applied = match frame.syscall.as_str() {
            protocol::MAP_SET | protocol::MAP_DELETE => {
                protocol::parse_sequenced(frame).map(|op| attachment.map.apply_sequenced(&op))
            }
            protocol::PRESENCE_UPDATE => protocol::client_id_field(frame).map(|client_id| {
                let channel = frame.str_field("channel").unwrap_or_default();
                let value = frame.field("value").cloned().unwrap_or(Value::Null);
                attachment.presence.apply_remote(client_id, channel, value);
            }),
            protocol::CONTAINER_JOIN => protocol::parse_member(frame).map(|member| {
                attachment.presence.join(member);
            }),
            protocol::CONTAINER_PART => protocol::client_id_field(frame).map(|client_id| {
                attachment.presence.leave(client_id);
            }),
            _ => Ok(()),
        };
        if let Err(e) = applied {
            warn!(syscall = %frame.syscall, error = %e, "client: malformed relay frame dropped");
        }
    }
}

/// Send queued frames until the queue closes or a stop arrives. Frames
/// already queued go out before the stop is honored; a dropped `Session`
/// counts as a stop.
async fn write_loop(
    mut sink: SplitSink<WsStream, Message>,
    mut rx: mpsc::UnboundedReceiver<Frame>,
    mut stop: oneshot::Receiver<()>,
) {
    loop {
        let frame = tokio::select! {
            biased;
            frame = rx.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
            _ = &mut stop => break,
        };
        trace!(syscall = %frame.syscall, id = %frame.id, "client: sending frame");
        if let Err(e) = sink.send(Message::Binary(frames::encode_frame(&frame).into())).await {
            warn!(error = %e, "client: websocket send failed");
            break;
        }
    }
    let _ = sink.close().await;
}

#[cfg(test)]
#[path = "session_test.rs"]
mod tests;
