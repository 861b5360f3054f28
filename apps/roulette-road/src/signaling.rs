use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Process-unique handle for one connected client, rendered as `user-<n>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct PeerId(u64);

impl PeerId {
    const PREFIX: &'static str = "user-";

    pub fn new(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", Self::PREFIX, self.0)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid peer id: {0}")]
pub struct InvalidPeerId(String);

impl FromStr for PeerId {
    type Err = InvalidPeerId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.strip_prefix(Self::PREFIX)
            .and_then(|n| n.parse().ok())
            .map(PeerId)
            .ok_or_else(|| InvalidPeerId(s.to_string()))
    }
}

impl From<PeerId> for String {
    fn from(id: PeerId) -> Self {
        id.to_string()
    }
}

impl TryFrom<String> for PeerId {
    type Error = InvalidPeerId;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Messages sent from client to signaling server
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    /// WebRTC session description offer, relayed opaquely
    Offer { data: Value },
    /// WebRTC session description answer, relayed opaquely
    Answer { data: Value },
    /// Trickled ICE candidate, relayed opaquely
    IceCandidate { data: Value },
    /// Chat line for the current peer
    Chat { text: String },
    /// Leave the current peer and go back to the queue
    Next,
    /// Leave the service
    Exit,
    /// Heartbeat
    Ping,
}

impl ClientMessage {
    pub const KINDS: [&'static str; 7] = [
        "offer",
        "answer",
        "ice-candidate",
        "chat",
        "next",
        "exit",
        "ping",
    ];

    /// Decode one text frame. Unknown kinds are told apart from known kinds
    /// with a bad payload so the client gets a precise error.
    pub fn decode(text: &str) -> Result<Self, DecodeError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| DecodeError::Malformed(e.to_string()))?;
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or(DecodeError::MissingKind)?
            .to_string();
        if !Self::KINDS.contains(&kind.as_str()) {
            return Err(DecodeError::UnknownKind(kind));
        }
        serde_json::from_value(value).map_err(|e| DecodeError::InvalidPayload {
            kind,
            reason: e.to_string(),
        })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::Offer { .. } => "offer",
            ClientMessage::Answer { .. } => "answer",
            ClientMessage::IceCandidate { .. } => "ice-candidate",
            ClientMessage::Chat { .. } => "chat",
            ClientMessage::Next => "next",
            ClientMessage::Exit => "exit",
            ClientMessage::Ping => "ping",
        }
    }

    /// The message the peer receives when this one is relayed, or `None` for
    /// control messages that are never forwarded.
    pub fn relayed(self, from: PeerId) -> Option<ServerMessage> {
        match self {
            ClientMessage::Offer { data } => Some(ServerMessage::Offer { data, from }),
            ClientMessage::Answer { data } => Some(ServerMessage::Answer { data, from }),
            ClientMessage::IceCandidate { data } => {
                Some(ServerMessage::IceCandidate { data, from })
            }
            ClientMessage::Chat { text } => Some(ServerMessage::Chat { text, from }),
            ClientMessage::Next | ClientMessage::Exit | ClientMessage::Ping => None,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("invalid message format: {0}")]
    Malformed(String),
    #[error("message has no type field")]
    MissingKind,
    #[error("unknown message kind: {0}")]
    UnknownKind(String),
    #[error("invalid {kind} message: {reason}")]
    InvalidPayload { kind: String, reason: String },
}

impl DecodeError {
    /// The kind the client declared, if it got that far.
    pub fn kind(&self) -> Option<&str> {
        match self {
            DecodeError::UnknownKind(kind) | DecodeError::InvalidPayload { kind, .. } => {
                Some(kind)
            }
            DecodeError::Malformed(_) | DecodeError::MissingKind => None,
        }
    }
}

pub const START_CALL_MESSAGE: &str = "Start your call now!";
pub const PEER_DISCONNECTED_MESSAGE: &str = "Your peer disconnected.";
pub const QUEUE_TIMEOUT_MESSAGE: &str = "No peer found in time, please reconnect.";

/// Messages sent from signaling server to client
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    /// Identity assigned on connect
    ConnectData { id: PeerId },
    /// A peer was found. The initiator creates the WebRTC offer.
    StartCall {
        message: String,
        peer: PeerId,
        initiator: bool,
    },
    Offer { data: Value, from: PeerId },
    Answer { data: Value, from: PeerId },
    IceCandidate { data: Value, from: PeerId },
    Chat { text: String, from: PeerId },
    /// The current peer left; the receiver is back in the queue
    PeerDisconnected { message: String },
    /// Nobody was matched before the wait deadline
    QueueTimeout { message: String },
    Pong,
    Error {
        #[serde(default)]
        kind: Option<String>,
        message: String,
    },
}

impl ServerMessage {
    pub fn start_call(peer: PeerId, initiator: bool) -> Self {
        ServerMessage::StartCall {
            message: START_CALL_MESSAGE.to_string(),
            peer,
            initiator,
        }
    }

    pub fn peer_disconnected() -> Self {
        ServerMessage::PeerDisconnected {
            message: PEER_DISCONNECTED_MESSAGE.to_string(),
        }
    }

    pub fn queue_timeout() -> Self {
        ServerMessage::QueueTimeout {
            message: QUEUE_TIMEOUT_MESSAGE.to_string(),
        }
    }

    pub fn error(kind: Option<&str>, message: impl Into<String>) -> Self {
        ServerMessage::Error {
            kind: kind.map(str::to_string),
            message: message.into(),
        }
    }
}
