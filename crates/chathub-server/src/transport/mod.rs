//! Transport halves for the two wire variants.
//!
//! Every accepted socket is split into a [`WireSink`] (owned by the
//! connection's writer) and a [`WireSource`] (owned by its reader). The set
//! of transports is closed, so both halves are plain enums.

pub mod line;
pub mod websocket;

use chathub_core::{HubError, HubResult, WireKind};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tokio_util::sync::CancellationToken;
use tracing::error;

/// Pause after a failed `accept` (EMFILE and friends persist until
/// descriptors free up).
pub(crate) const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Log a failed accept and wait [`ACCEPT_BACKOFF`] before the next one.
///
/// Returns `false` if `shutdown` fired while waiting.
pub(crate) async fn accept_backoff(
    error: &std::io::Error,
    shutdown: &CancellationToken,
) -> bool {
    error!(error = %error, "TCP accept failed");
    tokio::select! {
        _ = shutdown.cancelled() => false,
        _ = tokio::time::sleep(ACCEPT_BACKOFF) => true,
    }
}

/// A transport accepted by a listener, ready to be served.
pub struct Accepted {
    pub peer: SocketAddr,
    pub sink: WireSink,
    pub source: WireSource,
}

/// One unit read from a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// A line or a text frame.
    Text(String),
    /// A frame that cannot carry a command (e.g. non-UTF-8 binary).
    Malformed,
    /// Control traffic proving the peer is alive.
    Pong,
}

/// Write half of a connection.
pub enum WireSink {
    Line(OwnedWriteHalf),
    WebSocket(SplitSink<WebSocketStream<TcpStream>, Message>),
}

impl WireSink {
    /// Write one rendered payload verbatim.
    pub async fn send(&mut self, payload: &str) -> HubResult<()> {
        match self {
            WireSink::Line(half) => half
                .write_all(payload.as_bytes())
                .await
                .map_err(|e| HubError::Transport(format!("line write failed: {e}"))),
            WireSink::WebSocket(sink) => sink
                .send(Message::Text(payload.to_string().into()))
                .await
                .map_err(|e| HubError::Transport(format!("WS send failed: {e}"))),
        }
    }

    /// Send a liveness probe. The line wire has no probe frame.
    pub async fn probe(&mut self) -> HubResult<()> {
        match self {
            WireSink::Line(_) => Ok(()),
            WireSink::WebSocket(sink) => sink
                .send(Message::Ping(Vec::new().into()))
                .await
                .map_err(|e| HubError::Transport(format!("WS ping failed: {e}"))),
        }
    }

    /// Send the transport's teardown: a WS close frame or a TCP write shutdown.
    pub async fn close(&mut self) -> HubResult<()> {
        match self {
            WireSink::Line(half) => half
                .shutdown()
                .await
                .map_err(|e| HubError::Transport(format!("line shutdown failed: {e}"))),
            WireSink::WebSocket(sink) => sink
                .close()
                .await
                .map_err(|e| HubError::Transport(format!("WS close failed: {e}"))),
        }
    }
}

/// Read half of a connection.
pub enum WireSource {
    Line(FramedRead<OwnedReadHalf, LinesCodec>),
    WebSocket(SplitStream<WebSocketStream<TcpStream>>),
}

impl WireSource {
    pub fn wire(&self) -> WireKind {
        match self {
            WireSource::Line(_) => WireKind::Line,
            WireSource::WebSocket(_) => WireKind::Frame,
        }
    }

    /// Next inbound unit; `None` once the peer has closed the transport.
    pub async fn next(&mut self) -> Option<HubResult<Inbound>> {
        match self {
            WireSource::Line(lines) => match lines.next().await? {
                Ok(text) => Some(Ok(Inbound::Text(text))),
                Err(LinesCodecError::MaxLineLengthExceeded) => Some(Err(HubError::Protocol(
                    format!("line longer than {} bytes", chathub_core::line::MAX_LINE_LENGTH),
                ))),
                Err(LinesCodecError::Io(e)) => {
                    Some(Err(HubError::Transport(format!("line read failed: {e}"))))
                }
            },
            WireSource::WebSocket(stream) => websocket::next_inbound(stream).await,
        }
    }
}
