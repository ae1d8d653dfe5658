//! WebSocket listener using tokio-tungstenite.
//!
//! Each accepted socket completes the HTTP upgrade in its own task so a slow
//! handshake never holds up the accept loop.

use super::{accept_backoff, Accepted, Inbound, WireSink, WireSource};
use chathub_core::{HubError, HubResult};
use futures_util::stream::SplitStream;
use futures_util::StreamExt;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::error::Error as WsError;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Maximum accepted message size (1 MiB).
pub const MAX_WS_FRAME_SIZE: usize = 1_048_576;

/// Upgrades that have not completed by then are dropped.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Server-side limits: tungstenite rejects a frame or message over
/// [`MAX_WS_FRAME_SIZE`] while reading it instead of after buffering.
fn ws_config() -> WebSocketConfig {
    let mut config = WebSocketConfig::default();
    config.max_message_size = Some(MAX_WS_FRAME_SIZE);
    config.max_frame_size = Some(MAX_WS_FRAME_SIZE);
    config
}

/// Split an upgraded WebSocket into frame-wire halves.
pub fn split(ws_stream: WebSocketStream<TcpStream>) -> (WireSink, WireSource) {
    let (sink, stream) = ws_stream.split();
    (WireSink::WebSocket(sink), WireSource::WebSocket(stream))
}

/// Start the WebSocket listener.
///
/// Returns the bound address and a receiver that yields upgraded
/// connections until `shutdown` fires.
pub async fn start_listener(
    bind_addr: SocketAddr,
    shutdown: CancellationToken,
) -> HubResult<(SocketAddr, mpsc::Receiver<Accepted>)> {
    let tcp_listener = TcpListener::bind(bind_addr)
        .await
        .map_err(|e| HubError::Transport(format!("WS bind failed: {e}")))?;
    let local_addr = tcp_listener.local_addr()?;

    info!(addr = %local_addr, "WebSocket listener started");

    let (tx, rx) = mpsc::channel::<Accepted>(64);

    tokio::spawn(async move {
        loop {
            let accepted = tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = tcp_listener.accept() => accepted,
            };
            match accepted {
                Ok((stream, peer)) => {
                    let tx = tx.clone();
                    tokio::spawn(async move {
                        let handshake =
                            tokio_tungstenite::accept_async_with_config(stream, Some(ws_config()));
                        let upgrade = tokio::time::timeout(HANDSHAKE_TIMEOUT, handshake).await;
                        match upgrade {
                            Ok(Ok(ws_stream)) => {
                                debug!(remote = %peer, "WebSocket connection accepted");
                                let (sink, source) = split(ws_stream);
                                if tx.send(Accepted { peer, sink, source }).await.is_err() {
                                    warn!("WebSocket connection channel closed");
                                }
                            }
                            Ok(Err(e)) => {
                                warn!(remote = %peer, error = %e, "WebSocket handshake failed");
                            }
                            Err(_) => {
                                warn!(remote = %peer, "WebSocket handshake timed out");
                            }
                        }
                    });
                }
                Err(e) => {
                    if !accept_backoff(&e, &shutdown).await {
                        break;
                    }
                }
            }
        }
        debug!(addr = %local_addr, "WebSocket listener stopped");
    });

    Ok((local_addr, rx))
}

/// Receive the next inbound unit from a WebSocket.
///
/// Returns `None` once the peer closed. Binary messages are accepted when
/// they hold UTF-8. Messages larger than 1 MiB are a protocol error and end
/// the stream.
pub async fn next_inbound(
    stream: &mut SplitStream<WebSocketStream<TcpStream>>,
) -> Option<HubResult<Inbound>> {
    loop {
        match stream.next().await? {
            Ok(Message::Text(text)) => return Some(Ok(Inbound::Text(text.to_string()))),
            Ok(Message::Binary(data)) => {
                return Some(Ok(match String::from_utf8(data.to_vec()) {
                    Ok(text) => Inbound::Text(text),
                    Err(_) => Inbound::Malformed,
                }));
            }
            // tungstenite queues the pong reply for pings on its own
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => return Some(Ok(Inbound::Pong)),
            Ok(Message::Close(_)) => return None,
            Ok(Message::Frame(_)) => continue,
            Err(WsError::Capacity(e)) => {
                return Some(Err(HubError::Protocol(format!("WS message too large: {e}"))));
            }
            Err(e) => {
                return Some(Err(HubError::Transport(format!("WS recv failed: {e}"))));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_config_caps_message_and_frame() {
        let config = ws_config();
        assert_eq!(config.max_message_size, Some(MAX_WS_FRAME_SIZE));
        assert_eq!(config.max_frame_size, Some(MAX_WS_FRAME_SIZE));
    }
}
