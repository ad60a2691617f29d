//! Seam to the peer replication transport.

use roster_core::{ActionType, InstanceInfo};

/// Receives every self-originated registry action that peers must mirror.
///
/// Called after the registry has applied the action and released its
/// locks. Implementations should hand the event off (queue, batch) rather
/// than perform network I/O inline.
pub trait PeerReplicator: Send + Sync {
    fn replicate(&self, action: ActionType, instance: &InstanceInfo);
}
