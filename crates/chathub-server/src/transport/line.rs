//! Raw TCP listener for the newline-delimited wire.

use super::{accept_backoff, Accepted, WireSink, WireSource};
use chathub_core::line::MAX_LINE_LENGTH;
use chathub_core::{HubError, HubResult};
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, LinesCodec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Split a TCP stream into line-wire halves.
pub fn split(stream: TcpStream) -> (WireSink, WireSource) {
    let (read_half, write_half) = stream.into_split();
    let lines = FramedRead::new(read_half, LinesCodec::new_with_max_length(MAX_LINE_LENGTH));
    (WireSink::Line(write_half), WireSource::Line(lines))
}

/// Start the line listener.
///
/// Returns the bound address and a receiver that yields accepted
/// connections until `shutdown` fires.
pub async fn start_listener(
    bind_addr: SocketAddr,
    shutdown: CancellationToken,
) -> HubResult<(SocketAddr, mpsc::Receiver<Accepted>)> {
    let listener = TcpListener::bind(bind_addr)
        .await
        .map_err(|e| HubError::Transport(format!("line bind failed: {e}")))?;
    let local_addr = listener.local_addr()?;

    info!(addr = %local_addr, "line listener started");

    let (tx, rx) = mpsc::channel::<Accepted>(64);

    tokio::spawn(async move {
        loop {
            let accepted = tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => accepted,
            };
            match accepted {
                Ok((stream, peer)) => {
                    if let Err(e) = stream.set_nodelay(true) {
                        debug!(remote = %peer, error = %e, "could not set TCP_NODELAY");
                    }
                    let (sink, source) = split(stream);
                    debug!(remote = %peer, "line connection accepted");
                    if tx.send(Accepted { peer, sink, source }).await.is_err() {
                        warn!("line connection channel closed");
                        break;
                    }
                }
                Err(e) => {
                    if !accept_backoff(&e, &shutdown).await {
                        break;
                    }
                }
            }
        }
        debug!(addr = %local_addr, "line listener stopped");
    });

    Ok((local_addr, rx))
}
