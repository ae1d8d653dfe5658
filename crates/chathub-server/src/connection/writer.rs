//! Outbound half of a connection.

use super::{ConnId, ConnectionState, DisconnectReason, Lifecycle, Payload};
use crate::hub::Event;
use crate::transport::WireSink;
use chathub_core::{HubError, HubResult};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

pub(crate) struct WriterParts {
    pub id: ConnId,
    pub sink: WireSink,
    pub queue: mpsc::Receiver<Payload>,
    pub closer: CancellationToken,
    pub lifecycle: Arc<Lifecycle>,
    pub events: mpsc::Sender<Event>,
    pub probe_interval: Duration,
}

pub(crate) async fn run(parts: WriterParts) {
    let WriterParts {
        id,
        mut sink,
        mut queue,
        closer,
        lifecycle,
        events,
        probe_interval,
    } = parts;

    let mut probe = tokio::time::interval(probe_interval);
    probe.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    probe.tick().await;

    let failure = loop {
        tokio::select! {
            biased;
            _ = closer.cancelled() => break None,
            payload = queue.recv() => match payload {
                Some(payload) => {
                    if let Err(e) = guarded(&closer, sink.send(&payload)).await {
                        break Some(e);
                    }
                }
                None => {
                    trace!(conn = %id, "queue closed, sending close frame");
                    if let Err(e) = guarded(&closer, sink.close()).await {
                        debug!(conn = %id, error = %e, "close frame failed");
                    }
                    break None;
                }
            },
            _ = probe.tick() => {
                if let Err(e) = guarded(&closer, sink.probe()).await {
                    break Some(e);
                }
            }
        }
    };

    // Stops the reader too.
    closer.cancel();

    if let Some(e) = failure {
        debug!(conn = %id, error = %e, "write failed");
        lifecycle.set_state(ConnectionState::Disconnecting);
        let _ = events
            .send(Event::Disconnect {
                conn: id,
                reason: DisconnectReason::WriteFailed,
            })
            .await;
    }
    debug!(conn = %id, "writer finished");
}

/// Run a transport write unless the connection is torn down first.
async fn guarded<F>(closer: &CancellationToken, write: F) -> HubResult<()>
where
    F: Future<Output = HubResult<()>>,
{
    tokio::select! {
        biased;
        _ = closer.cancelled() => Err(HubError::Transport("connection cancelled".into())),
        result = write => result,
    }
}
