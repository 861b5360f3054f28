use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::connection::Connection;
use crate::signaling::PeerId;

pub type SharedConnection = Arc<dyn Connection>;

/// Identity allocation and identity -> connection lookup.
///
/// Identities come from a monotonic counter and are never recycled, so a late
/// message addressed to a departed client can never reach a newcomer.
pub struct SessionRegistry {
    next_id: AtomicU64,
    connections: DashMap<PeerId, SharedConnection>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            connections: DashMap::new(),
        }
    }

    pub fn register(&self, connection: SharedConnection) -> PeerId {
        let id = PeerId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.connections.insert(id, connection);
        id
    }

    pub fn lookup(&self, id: PeerId) -> Option<SharedConnection> {
        // Clone out so no shard guard outlives this call.
        self.connections.get(&id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn remove(&self, id: PeerId) -> Option<SharedConnection> {
        self.connections.remove(&id).map(|(_, conn)| conn)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
