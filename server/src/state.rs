//! Shared application state.
//!
//! DESIGN
//! ======
//! `AppState` is injected into Axum handlers via the `State` extractor.
//! It holds the relay config and a map of live containers. Each container
//! owns its ordered entries, its sequence counter, connected client senders,
//! member identities and the latest presence value per client and channel.
//!
//! Everything lives in memory. A container survives its last client unless
//! `RELAY_EVICT_EMPTY` is set.

use std::collections::HashMap;
use std::sync::Arc;

use frames::Frame;
use indexmap::IndexMap;
use serde_json::Value;
use store::container::ContainerId;
use store::presence::Member;
use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

use crate::config::RelayConfig;

// =============================================================================
// CONTAINER STATE
// =============================================================================

/// Live state of one container.
pub struct ContainerState {
    /// Current values in insertion order of first write.
    pub entries: IndexMap<String, Value>,
    /// Sequence number of the last applied op. Zero before any op.
    pub seq: u64,
    /// Connected clients: `client_id` -> sender for outgoing frames.
    pub clients: HashMap<Uuid, mpsc::Sender<Frame>>,
    /// Attached members in attach order.
    pub members: IndexMap<Uuid, Member>,
    /// Latest presence value per client, per channel.
    pub presence: HashMap<Uuid, IndexMap<String, Value>>,
}

impl ContainerState {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: IndexMap::new(),
            seq: 0,
            clients: HashMap::new(),
            members: IndexMap::new(),
            presence: HashMap::new(),
        }
    }

    /// Drop a client and everything it owned.
    pub fn remove_client(&mut self, client_id: Uuid) -> Option<Member> {
        self.clients.remove(&client_id);
        self.presence.remove(&client_id);
        self.members.shift_remove(&client_id)
    }
}

impl Default for ContainerState {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// APP STATE
// =============================================================================

/// Shared application state, injected into Axum handlers via State extractor.
/// Clone is required by Axum; all inner fields are Arc-wrapped.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<RelayConfig>,
    pub containers: Arc<RwLock<HashMap<ContainerId, ContainerState>>>,
}

impl AppState {
    #[must_use]
    pub fn new(config: RelayConfig) -> Self {
        Self { config: Arc::new(config), containers: Arc::new(RwLock::new(HashMap::new())) }
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================

#[cfg(test)]
#[path = "state_helpers_test.rs"]
pub mod test_helpers;

#[cfg(test)]
#[path = "state_test.rs"]
mod tests;
