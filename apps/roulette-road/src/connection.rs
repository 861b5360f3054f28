use thiserror::Error;
use tokio::sync::mpsc;

use crate::signaling::ServerMessage;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("connection closed")]
pub struct ConnectionClosed;

/// Outbound half of one client's duplex channel.
///
/// `send` must not block: implementations hand the message to whatever task
/// owns the socket. The matchmaker relies on this to deliver notifications
/// in order while holding its lock.
pub trait Connection: Send + Sync {
    fn send(&self, message: ServerMessage) -> Result<(), ConnectionClosed>;

    /// Ask the transport to close the channel. Safe to call more than once.
    fn close(&self);
}

/// Frames queued for a connection's writer task.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Message(ServerMessage),
    Close,
}

/// Connection backed by an unbounded outbox drained by a writer task.
/// Once the writer stops (socket write failed or closed) every send fails.
#[derive(Debug, Clone)]
pub struct ChannelConnection {
    tx: mpsc::UnboundedSender<Outbound>,
}

impl ChannelConnection {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Connection for ChannelConnection {
    fn send(&self, message: ServerMessage) -> Result<(), ConnectionClosed> {
        self.tx
            .send(Outbound::Message(message))
            .map_err(|_| ConnectionClosed)
    }

    fn close(&self) {
        let _ = self.tx.send(Outbound::Close);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_timeout::timeout]
    fn send_fails_once_writer_is_gone() {
        let (conn, mut rx) = ChannelConnection::new();
        conn.send(ServerMessage::Pong).unwrap();
        assert_eq!(rx.try_recv().unwrap(), Outbound::Message(ServerMessage::Pong));

        drop(rx);
        assert_eq!(conn.send(ServerMessage::Pong), Err(ConnectionClosed));
        conn.close();
    }

    #[test_timeout::timeout]
    fn close_is_queued_after_pending_messages() {
        let (conn, mut rx) = ChannelConnection::new();
        conn.send(ServerMessage::peer_disconnected()).unwrap();
        conn.close();
        assert!(matches!(rx.try_recv().unwrap(), Outbound::Message(_)));
        assert_eq!(rx.try_recv().unwrap(), Outbound::Close);
    }
}
