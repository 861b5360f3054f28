use std::collections::HashMap;

use crate::signaling::PeerId;

/// Symmetric record of who is paired with whom. Absence means unpaired.
#[derive(Debug, Default)]
pub struct PeerDirectory {
    peers: HashMap<PeerId, PeerId>,
}

impl PeerDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `a <-> b`. Returns false and changes nothing if either side is
    /// already paired or `a == b`.
    pub fn link(&mut self, a: PeerId, b: PeerId) -> bool {
        if a == b || self.peers.contains_key(&a) || self.peers.contains_key(&b) {
            return false;
        }
        self.peers.insert(a, b);
        self.peers.insert(b, a);
        true
    }

    pub fn peer_of(&self, id: PeerId) -> Option<PeerId> {
        self.peers.get(&id).copied()
    }

    /// Remove both halves of whatever pairing `id` is in, returning the
    /// former peer.
    pub fn unlink(&mut self, id: PeerId) -> Option<PeerId> {
        let peer = self.peers.remove(&id)?;
        if self.peers.get(&peer) == Some(&id) {
            self.peers.remove(&peer);
        }
        Some(peer)
    }

    pub fn is_paired(&self, id: PeerId) -> bool {
        self.peers.contains_key(&id)
    }

    /// Number of live pairs.
    pub fn pairs(&self) -> usize {
        self.peers.len() / 2
    }
}
