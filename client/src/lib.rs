//! Websocket-backed replica for the relay.
//!
//! SYSTEM CONTEXT
//! ==============
//! The relay hosts containers and sequences their map ops. A `Session`
//! connects once, attaches to one container at a time, and exposes the
//! attached state as a `store::MemoryMap` plus a `store::PresenceFeed`, so
//! everything built on the store crate (adapter, notes, records) runs
//! unchanged over the network.

pub mod error;
pub mod protocol;
pub mod session;

pub use error::ClientError;
pub use session::{Attachment, Session, WsOutbox, ws_url};
