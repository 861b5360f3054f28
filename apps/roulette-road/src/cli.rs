use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use futures_util::{Sink, SinkExt, StreamExt};
use tokio::time::{timeout, Duration, Instant};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error};

use crate::signaling::{ClientMessage, PeerId, ServerMessage};

#[derive(Parser, Debug)]
#[command(name = "roulette-road")]
#[command(about = "Random chat pairing and WebRTC signaling server")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Port to listen on (overrides SERVER_PORT)
    #[arg(long)]
    pub port: Option<u16>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Connect as a client, wait for a peer and print relayed traffic
    Probe {
        /// Signaling endpoint (e.g., ws://localhost:5000/ws)
        #[arg(short, long, default_value = "ws://localhost:5000/ws")]
        url: String,

        /// Chat line to send once paired
        #[arg(short, long)]
        say: Option<String>,

        /// Seconds to wait for a peer
        #[arg(long, default_value_t = 30)]
        wait: u64,

        /// Seconds to stay paired before sending exit
        #[arg(long, default_value_t = 10)]
        linger: u64,
    },
}

pub async fn run_probe(url: String, say: Option<String>, wait: u64, linger: u64) -> Result<()> {
    debug!("Connecting to {}", url);

    let (ws_stream, _) = match timeout(Duration::from_secs(5), connect_async(url.as_str())).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => {
            error!("Failed to connect to {}: {}", url, e);
            return Err(anyhow!("Connection failed: {}", e));
        }
        Err(_) => {
            error!("Connection timeout after 5 seconds");
            return Err(anyhow!("Connection timeout - is the signaling server running?"));
        }
    };
    let (mut write, mut read) = ws_stream.split();

    let mut me: Option<PeerId> = None;
    let pairing = timeout(Duration::from_secs(wait), async {
        while let Some(msg) = read.next().await {
            let Message::Text(text) = msg? else { continue };
            match serde_json::from_str::<ServerMessage>(text.as_str())? {
                ServerMessage::ConnectData { id } => {
                    println!("connected as {id}");
                    me = Some(id);
                }
                ServerMessage::StartCall {
                    peer, initiator, ..
                } => return Ok::<_, anyhow::Error>((peer, initiator)),
                ServerMessage::QueueTimeout { message } => {
                    return Err(anyhow!("Queue timeout: {}", message));
                }
                other => debug!("Ignoring {:?} while waiting", other),
            }
        }
        Err(anyhow!("Connection closed before a peer was found"))
    })
    .await;

    let (peer, initiator) = match pairing {
        Ok(result) => result?,
        Err(_) => {
            let _ = send(&mut write, &ClientMessage::Exit).await;
            return Err(anyhow!("No peer found within {} seconds", wait));
        }
    };
    println!(
        "{} paired with {peer}{}",
        me.map(|id| id.to_string()).unwrap_or_default(),
        if initiator { " (initiator)" } else { "" }
    );

    if let Some(text) = say {
        send(&mut write, &ClientMessage::Chat { text }).await?;
    }

    let deadline = Instant::now() + Duration::from_secs(linger);
    loop {
        let msg = match tokio::time::timeout_at(deadline, read.next()).await {
            Ok(Some(msg)) => msg?,
            Ok(None) => return Err(anyhow!("Connection closed by server")),
            Err(_) => break,
        };
        let Message::Text(text) = msg else { continue };
        match serde_json::from_str::<ServerMessage>(text.as_str())? {
            ServerMessage::Chat { text, from } => println!("{from}: {text}"),
            ServerMessage::Offer { from, .. }
            | ServerMessage::Answer { from, .. }
            | ServerMessage::IceCandidate { from, .. } => println!("signal from {from}"),
            ServerMessage::PeerDisconnected { message } => {
                println!("{message}");
                break;
            }
            ServerMessage::Error { kind, message } => {
                eprintln!("error ({}): {}", kind.unwrap_or_default(), message);
            }
            other => debug!("Ignoring {:?}", other),
        }
    }

    send(&mut write, &ClientMessage::Exit).await?;
    // The server closes after exit; our close frame may race it.
    let _ = write.send(Message::Close(None)).await;
    Ok(())
}

async fn send<S>(write: &mut S, message: &ClientMessage) -> Result<()>
where
    S: Sink<Message> + Unpin,
    S::Error: std::error::Error + Send + Sync + 'static,
{
    let text = serde_json::to_string(message)?;
    write.send(Message::Text(text.into())).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_timeout::timeout]
    fn no_subcommand_runs_server() {
        let cli = Cli::try_parse_from(["roulette-road", "--port", "6000"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.port, Some(6000));
    }

    #[test_timeout::timeout]
    fn probe_defaults() {
        let cli = Cli::try_parse_from(["roulette-road", "probe", "--say", "hi"]).unwrap();
        match cli.command {
            Some(Commands::Probe {
                url,
                say,
                wait,
                linger,
            }) => {
                assert_eq!(url, "ws://localhost:5000/ws");
                assert_eq!(say.as_deref(), Some("hi"));
                assert_eq!((wait, linger), (30, 10));
            }
            None => panic!("expected probe subcommand"),
        }
    }
}
