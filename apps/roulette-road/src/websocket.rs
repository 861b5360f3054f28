use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::future;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

use crate::connection::{ChannelConnection, Outbound};
use crate::handlers::AppState;

const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// WebSocket upgrade handler
pub async fn websocket_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle a WebSocket connection
async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, receiver) = socket.split();
    let (connection, mut outbox) = ChannelConnection::new();

    // Writer task: the only place that touches the socket's send half.
    let writer = tokio::spawn(async move {
        while let Some(frame) = outbox.recv().await {
            match frame {
                Outbound::Message(msg) => {
                    let json = match serde_json::to_string(&msg) {
                        Ok(json) => json,
                        Err(e) => {
                            error!("Failed to encode outbound message: {}", e);
                            continue;
                        }
                    };
                    if sender.send(Message::Text(json)).await.is_err() {
                        break;
                    }
                }
                Outbound::Close => {
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
            }
        }
    });

    let peer_id = state.router.connect(Arc::new(connection));
    debug!(peer_id = %peer_id, "WebSocket connected");

    let inbound = receiver
        .take_while(move |frame| {
            let open = match frame {
                Ok(Message::Close(_)) => {
                    debug!(peer_id = %peer_id, "received close frame");
                    false
                }
                Ok(_) => true,
                Err(e) => {
                    warn!(peer_id = %peer_id, error = %e, "WebSocket receive error");
                    false
                }
            };
            future::ready(open)
        })
        .filter_map(move |frame| {
            let text = match frame {
                Ok(Message::Text(text)) => Some(text),
                // Also accept Binary frames carrying JSON, for compatibility
                Ok(Message::Binary(data)) => match String::from_utf8(data) {
                    Ok(text) => Some(text),
                    Err(_) => {
                        debug!(peer_id = %peer_id, "ignoring non-UTF8 binary frame");
                        None
                    }
                },
                _ => None,
            };
            future::ready(text)
        });

    state.router.run(peer_id, inbound).await;

    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, writer).await.is_err() {
        warn!(peer_id = %peer_id, "writer did not drain in time");
    }
    debug!(peer_id = %peer_id, "WebSocket disconnected");
}

#[cfg(test)]
mod tests {
    use crate::handlers::AppState;
    use crate::matchmaker::{MatchConfig, Matchmaker};
    use crate::router::SignalRouter;
    use crate::signaling::{ClientMessage, ServerMessage};
    use futures_util::{SinkExt, StreamExt};
    use serde_json::json;
    use tokio::net::TcpStream;
    use tokio_tungstenite::{
        connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream,
    };

    type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

    async fn serve() -> (String, AppState) {
        let state = AppState {
            router: SignalRouter::new(Matchmaker::new(MatchConfig::default())),
            metrics: None,
        };
        let app = crate::build_router(state.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("ws://{addr}/ws"), state)
    }

    async fn next_message(client: &mut Client) -> ServerMessage {
        loop {
            match client.next().await.expect("stream ended").unwrap() {
                Message::Text(text) => return serde_json::from_str(text.as_str()).unwrap(),
                _ => continue,
            }
        }
    }

    async fn send(client: &mut Client, message: &ClientMessage) {
        let text = serde_json::to_string(message).unwrap();
        client.send(Message::Text(text.into())).await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn pairs_and_relays_over_websocket() {
        let (url, state) = serve().await;

        let (mut a, _) = connect_async(url.as_str()).await.unwrap();
        let ServerMessage::ConnectData { id: a_id } = next_message(&mut a).await else {
            panic!("expected connect-data");
        };
        let (mut b, _) = connect_async(url.as_str()).await.unwrap();
        let ServerMessage::ConnectData { id: b_id } = next_message(&mut b).await else {
            panic!("expected connect-data");
        };

        assert_eq!(next_message(&mut a).await, ServerMessage::start_call(b_id, true));
        assert_eq!(next_message(&mut b).await, ServerMessage::start_call(a_id, false));

        send(
            &mut a,
            &ClientMessage::Offer {
                data: json!({"sdp": "v=0"}),
            },
        )
        .await;
        assert_eq!(
            next_message(&mut b).await,
            ServerMessage::Offer {
                data: json!({"sdp": "v=0"}),
                from: a_id
            }
        );

        // Raw unknown kind straight off the wire.
        b.send(Message::Text(r#"{"type":"wave"}"#.into())).await.unwrap();
        assert_eq!(
            next_message(&mut b).await,
            ServerMessage::error(Some("wave"), "Unknown message type")
        );

        send(&mut b, &ClientMessage::Exit).await;
        assert_eq!(next_message(&mut a).await, ServerMessage::peer_disconnected());

        // b's socket is closed by the server after exit.
        loop {
            match b.next().await {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => continue,
            }
        }
        let stats = state.router.matchmaker().stats();
        assert_eq!((stats.waiting, stats.pairs), (1, 0));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn dropped_socket_requeues_peer() {
        let (url, _state) = serve().await;
        let (mut a, _) = connect_async(url.as_str()).await.unwrap();
        let (b, _) = connect_async(url.as_str()).await.unwrap();
        next_message(&mut a).await;
        assert!(matches!(
            next_message(&mut a).await,
            ServerMessage::StartCall { .. }
        ));

        drop(b);
        assert_eq!(next_message(&mut a).await, ServerMessage::peer_disconnected());
    }
}
