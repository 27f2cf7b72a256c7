//! Outbound link from a replica to its sequencer.

use serde_json::Value;

use crate::map::MapOp;

/// Where a connected replica sends its local writes.
///
/// Implementations must not block and must not call back into the replica
/// synchronously; delivery of the sequenced result happens later through
/// `MemoryMap::apply_sequenced` and `PresenceFeed::apply_remote`.
pub trait Outbox: Send + Sync {
    /// Forward a map write for sequencing.
    fn submit_op(&self, op: MapOp);

    /// Forward an ephemeral presence update to peers.
    fn submit_presence(&self, channel: &str, value: Value);
}
