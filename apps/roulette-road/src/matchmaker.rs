use metrics::{counter, gauge};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::directory::PeerDirectory;
use crate::queue::{Pair, PairingQueue, WaitTimer};
use crate::registry::{SessionRegistry, SharedConnection};
use crate::signaling::{ClientMessage, PeerId, ServerMessage};

const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Clone)]
pub struct MatchConfig {
    /// How long an identity may wait in the queue before it is dropped.
    pub wait_timeout: Duration,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            wait_timeout: DEFAULT_WAIT_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Waiting,
    Paired(PeerId),
    Gone,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RelayError {
    #[error("no peer available")]
    NoPeer,
    #[error("{0} cannot be relayed")]
    NotRelayable(&'static str),
    #[error("peer {0} is unreachable")]
    PeerUnreachable(PeerId),
    #[error("peer {0} is paired but not registered")]
    Desync(PeerId),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RepairError {
    #[error("not paired with anyone")]
    NotPaired,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct LobbyStats {
    pub connected: usize,
    pub waiting: usize,
    pub pairs: usize,
}

/// Pairing state shared by every connection task.
///
/// Queue and directory sit behind one lock so that cascades and matching are
/// atomic with respect to each other. The lock is never held across an await.
#[derive(Clone)]
pub struct Matchmaker {
    inner: Arc<MatchmakerInner>,
}

struct MatchmakerInner {
    registry: SessionRegistry,
    lobby: Mutex<Lobby>,
    config: MatchConfig,
}

#[derive(Default)]
struct Lobby {
    queue: PairingQueue,
    directory: PeerDirectory,
}

impl Matchmaker {
    pub fn new(config: MatchConfig) -> Self {
        Self {
            inner: Arc::new(MatchmakerInner {
                registry: SessionRegistry::new(),
                lobby: Mutex::new(Lobby::default()),
                config,
            }),
        }
    }

    /// Admit a connection: assign its identity, announce it, queue it and
    /// pair whoever can be paired. Must run inside a tokio runtime since the
    /// wait timer is a spawned task.
    pub fn register(&self, connection: SharedConnection) -> PeerId {
        let id = self.inner.registry.register(Arc::clone(&connection));
        counter!("roulette_connections_total").increment(1);
        info!(peer_id = %id, "peer connected");

        if connection.send(ServerMessage::ConnectData { id }).is_err() {
            warn!(peer_id = %id, "connection closed before identity was delivered");
            self.disconnect(id);
            return id;
        }

        let unreachable = {
            let mut lobby = self.inner.lobby.lock();
            self.enqueue_locked(&mut lobby, id, None);
            self.match_locked(&mut lobby)
        };
        self.reap(unreachable);
        id
    }

    pub fn lookup(&self, id: PeerId) -> Option<SharedConnection> {
        self.inner.registry.lookup(id)
    }

    pub fn state_of(&self, id: PeerId) -> SessionState {
        let lobby = self.inner.lobby.lock();
        if let Some(peer) = lobby.directory.peer_of(id) {
            SessionState::Paired(peer)
        } else if lobby.queue.contains(id) {
            SessionState::Waiting
        } else {
            SessionState::Gone
        }
    }

    pub fn peer_of(&self, id: PeerId) -> Option<PeerId> {
        self.inner.lobby.lock().directory.peer_of(id)
    }

    pub fn stats(&self) -> LobbyStats {
        let lobby = self.inner.lobby.lock();
        LobbyStats {
            connected: self.inner.registry.len(),
            waiting: lobby.queue.len(),
            pairs: lobby.directory.pairs(),
        }
    }

    /// Hand `message` to `id`'s connection. Returns false if `id` is not
    /// registered or its outbox is gone.
    pub fn send_to(&self, id: PeerId, message: ServerMessage) -> bool {
        match self.inner.registry.lookup(id) {
            Some(conn) => conn.send(message).is_ok(),
            None => false,
        }
    }

    /// Forward a signal or chat message from `from` to its current peer.
    /// A failed hand-off is treated as the peer disconnecting.
    pub fn relay(&self, from: PeerId, message: ClientMessage) -> Result<PeerId, RelayError> {
        let kind = message.kind();
        let outbound = message
            .relayed(from)
            .ok_or(RelayError::NotRelayable(kind))?;

        let result = {
            let lobby = self.inner.lobby.lock();
            let peer = lobby.directory.peer_of(from).ok_or(RelayError::NoPeer)?;
            match self.inner.registry.lookup(peer) {
                Some(conn) => conn
                    .send(outbound)
                    .map(|_| peer)
                    .map_err(|_| RelayError::PeerUnreachable(peer)),
                None => Err(RelayError::Desync(peer)),
            }
        };

        match result {
            Ok(peer) => {
                counter!("roulette_messages_relayed_total", "kind" => kind).increment(1);
                debug!(from = %from, to = %peer, kind, "relayed message");
            }
            Err(RelayError::PeerUnreachable(peer)) => {
                warn!(from = %from, peer_id = %peer, kind, "forward failed; dropping peer");
                self.disconnect(peer);
            }
            Err(RelayError::Desync(peer)) => {
                error!(
                    from = %from,
                    peer_id = %peer,
                    "directory names a peer the registry does not know; tearing down pairing"
                );
                self.disconnect(peer);
            }
            Err(_) => {}
        }
        result
    }

    /// Disconnect cascade: leave the queue, hand the peer back to the queue
    /// with a notice, then drop and close the connection. Idempotent.
    pub fn disconnect(&self, id: PeerId) {
        let (peer, unreachable) = {
            let mut lobby = self.inner.lobby.lock();
            lobby.queue.dequeue_if_present(id);
            let peer = lobby.directory.unlink(id);
            let mut unreachable = Vec::new();
            if let Some(peer) = peer {
                if self.send_to(peer, ServerMessage::peer_disconnected()) {
                    self.enqueue_locked(&mut lobby, peer, None);
                } else {
                    unreachable.push(peer);
                }
            }
            unreachable.extend(self.match_locked(&mut lobby));
            (peer, unreachable)
        };

        if let Some(conn) = self.inner.registry.remove(id) {
            conn.close();
            match peer {
                Some(peer) => info!(peer_id = %id, former_peer = %peer, "peer disconnected"),
                None => info!(peer_id = %id, "peer disconnected while unpaired"),
            }
        }
        self.reap(unreachable);
    }

    /// Re-pair cascade: drop the current peer and send both sides back to the
    /// queue. The former peer keeps the earlier spot, and the two are never
    /// matched with each other again during these stays.
    pub fn repair(&self, id: PeerId) -> Result<PeerId, RepairError> {
        let (peer, unreachable) = {
            let mut lobby = self.inner.lobby.lock();
            let peer = lobby.directory.unlink(id).ok_or(RepairError::NotPaired)?;
            let mut unreachable = Vec::new();
            if self.send_to(peer, ServerMessage::peer_disconnected()) {
                self.enqueue_locked(&mut lobby, peer, Some(id));
            } else {
                unreachable.push(peer);
            }
            self.enqueue_locked(&mut lobby, id, Some(peer));
            unreachable.extend(self.match_locked(&mut lobby));
            (peer, unreachable)
        };

        info!(peer_id = %id, former_peer = %peer, "peer asked for next");
        self.reap(unreachable);
        Ok(peer)
    }

    fn enqueue_locked(&self, lobby: &mut Lobby, id: PeerId, avoid: Option<PeerId>) {
        if lobby.directory.is_paired(id) {
            error!(peer_id = %id, "refusing to queue an identity that is still paired");
            return;
        }
        let ticket = lobby.queue.next_ticket();
        let matchmaker = self.clone();
        let wait = self.inner.config.wait_timeout;
        let timer = tokio::spawn(async move {
            tokio::time::sleep(wait).await;
            matchmaker.expire(id, ticket);
        });
        if lobby
            .queue
            .enqueue(id, avoid, WaitTimer::new(ticket, timer.abort_handle()))
        {
            debug!(peer_id = %id, waiting = lobby.queue.len(), "queued");
        } else {
            warn!(peer_id = %id, "identity already queued");
        }
    }

    /// Form every possible pair and announce it. Returns identities whose
    /// connection could not take the announcement.
    fn match_locked(&self, lobby: &mut Lobby) -> Vec<PeerId> {
        let pairs = lobby.queue.try_match(&mut lobby.directory);
        let mut unreachable = Vec::new();
        for Pair { first, second } in pairs {
            counter!("roulette_pairs_formed_total").increment(1);
            info!(first = %first, second = %second, "paired");
            if !self.send_to(first, ServerMessage::start_call(second, true)) {
                unreachable.push(first);
            }
            if !self.send_to(second, ServerMessage::start_call(first, false)) {
                unreachable.push(second);
            }
        }
        self.record_waiting(lobby);
        unreachable
    }

    fn expire(&self, id: PeerId, ticket: u64) {
        let expired = {
            let mut lobby = self.inner.lobby.lock();
            let expired = lobby.queue.expire(id, ticket);
            self.record_waiting(&lobby);
            expired
        };
        if !expired {
            return;
        }

        counter!("roulette_queue_timeouts_total").increment(1);
        info!(peer_id = %id, "wait timeout elapsed; closing connection");
        if let Some(conn) = self.inner.registry.remove(id) {
            let _ = conn.send(ServerMessage::queue_timeout());
            conn.close();
        }
    }

    fn reap(&self, unreachable: Vec<PeerId>) {
        for id in unreachable {
            debug!(peer_id = %id, "connection unreachable; running disconnect");
            self.disconnect(id);
        }
    }

    fn record_waiting(&self, lobby: &Lobby) {
        gauge!("roulette_waiting").set(lobby.queue.len() as f64);
    }
}
