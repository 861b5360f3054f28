use futures::{Stream, StreamExt};
use std::pin::pin;
use tracing::{debug, warn};

use crate::matchmaker::{Matchmaker, RelayError};
use crate::registry::SharedConnection;
use crate::signaling::{ClientMessage, DecodeError, PeerId, ServerMessage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

/// Interprets inbound messages for each connection and drives the cascades.
#[derive(Clone)]
pub struct SignalRouter {
    matchmaker: Matchmaker,
}

impl SignalRouter {
    pub fn new(matchmaker: Matchmaker) -> Self {
        Self { matchmaker }
    }

    pub fn matchmaker(&self) -> &Matchmaker {
        &self.matchmaker
    }

    pub fn connect(&self, connection: SharedConnection) -> PeerId {
        self.matchmaker.register(connection)
    }

    /// Receive loop for one connection. Ends when the stream ends (the
    /// channel closed), the client exits, or the session was unregistered by
    /// its wait timeout; the disconnect cascade runs in every case.
    pub async fn run<S>(&self, id: PeerId, inbound: S)
    where
        S: Stream<Item = String>,
    {
        let mut inbound = pin!(inbound);
        while let Some(text) = inbound.next().await {
            if self.matchmaker.lookup(id).is_none() {
                debug!(peer_id = %id, "dropping frame for unregistered session");
                break;
            }
            if self.handle_text(id, &text) == Flow::Exit {
                break;
            }
        }
        self.matchmaker.disconnect(id);
    }

    pub fn handle_text(&self, id: PeerId, text: &str) -> Flow {
        match ClientMessage::decode(text) {
            Ok(message) => self.handle(id, message),
            Err(err) => {
                warn!(peer_id = %id, error = %err, "rejected client message");
                self.reply(id, decode_error_reply(&err));
                Flow::Continue
            }
        }
    }

    pub fn handle(&self, id: PeerId, message: ClientMessage) -> Flow {
        match message {
            ClientMessage::Exit => {
                debug!(peer_id = %id, "client exit");
                self.matchmaker.disconnect(id);
                Flow::Exit
            }
            ClientMessage::Ping => {
                self.reply(id, ServerMessage::Pong);
                Flow::Continue
            }
            ClientMessage::Next => {
                if self.matchmaker.repair(id).is_err() {
                    self.reply(
                        id,
                        ServerMessage::error(Some("next"), "You are not paired with anyone"),
                    );
                }
                Flow::Continue
            }
            signal => {
                let kind = signal.kind();
                match self.matchmaker.relay(id, signal) {
                    Ok(_) => {}
                    Err(RelayError::NoPeer) => {
                        warn!(peer_id = %id, kind, "no peer for message");
                        self.reply(id, no_peer_reply(kind));
                    }
                    // The peer is being torn down and the sender re-queued;
                    // the sender learns about it through peer-disconnected.
                    Err(err) => debug!(peer_id = %id, kind, error = %err, "relay failed"),
                }
                Flow::Continue
            }
        }
    }

    fn reply(&self, id: PeerId, message: ServerMessage) {
        if !self.matchmaker.send_to(id, message) {
            debug!(peer_id = %id, "reply dropped; connection is closing");
        }
    }
}

fn decode_error_reply(err: &DecodeError) -> ServerMessage {
    match err {
        DecodeError::UnknownKind(kind) => {
            ServerMessage::error(Some(kind.as_str()), "Unknown message type")
        }
        other => ServerMessage::error(other.kind(), other.to_string()),
    }
}

fn no_peer_reply(kind: &str) -> ServerMessage {
    let what = match kind {
        "ice-candidate" => "ICE candidate",
        "chat" => "message",
        other => other,
    };
    ServerMessage::error(
        Some(kind),
        format!("No peer available to process your {what}"),
    )
}
