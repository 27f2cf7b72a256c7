//! Domain services used by websocket and HTTP routes.
//!
//! ARCHITECTURE
//! ============
//! Service modules own container state transitions so route handlers can
//! stay focused on protocol translation.

pub mod container;
pub mod entry;
pub mod presence;
