//! One accepted transport: its handle, its lifecycle, and the task pair
//! (reader and writer) bound to it.

pub mod reader;
pub mod writer;

use crate::auth::IdentityVerifier;
use crate::hub::Event;
use crate::store::MessageStore;
use crate::transport::Accepted;
use chathub_core::{HubError, HubResult, WireKind};
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Process-unique connection id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnId(pub u64);

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// A rendered outbound payload, shared by every queue it was pushed to.
pub type Payload = Arc<str>;

/// Connection lifecycle. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Connecting = 0,
    Registered = 1,
    Active = 2,
    Disconnecting = 3,
    Closed = 4,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ConnectionState::Connecting,
            1 => ConnectionState::Registered,
            2 => ConnectionState::Active,
            3 => ConnectionState::Disconnecting,
            _ => ConnectionState::Closed,
        }
    }
}

/// Why a connection left the hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    Logout,
    ReadClosed,
    ReadFailed,
    WriteFailed,
    /// The connection token was cancelled (eviction, rejection or shutdown).
    Closed,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DisconnectReason::Logout => "logout",
            DisconnectReason::ReadClosed => "read closed",
            DisconnectReason::ReadFailed => "read failed",
            DisconnectReason::WriteFailed => "write failed",
            DisconnectReason::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// State shared between a connection's tasks and the dispatcher.
#[derive(Debug)]
pub struct Lifecycle {
    state: AtomicU8,
    born: Instant,
    /// Milliseconds after `born` of the last inbound traffic.
    last_seen: AtomicU64,
}

impl Lifecycle {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(ConnectionState::Connecting as u8),
            born: Instant::now(),
            last_seen: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Move to `next`. A closed connection stays closed.
    pub fn set_state(&self, next: ConnectionState) {
        let _ = self
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                if current == ConnectionState::Closed as u8 {
                    None
                } else {
                    Some(next as u8)
                }
            });
    }

    /// Record inbound traffic.
    pub fn touch(&self) {
        let elapsed = self.born.elapsed().as_millis() as u64;
        self.last_seen.store(elapsed, Ordering::Release);
    }

    /// Time since the last inbound traffic (or since accept).
    pub fn idle_for(&self) -> Duration {
        let now = self.born.elapsed().as_millis() as u64;
        let seen = self.last_seen.load(Ordering::Acquire);
        Duration::from_millis(now.saturating_sub(seen))
    }
}

/// The dispatcher's handle to a live connection.
///
/// It is the only holder of the outbound queue's sender: dropping the handle
/// closes the queue, and the writer then drains what is left and sends the
/// transport's close frame.
pub struct ConnectionHandle {
    id: ConnId,
    wire: WireKind,
    peer: SocketAddr,
    queue: mpsc::Sender<Payload>,
    closer: CancellationToken,
    lifecycle: Arc<Lifecycle>,
}

impl ConnectionHandle {
    /// Create a handle and the receiving end of its outbound queue.
    ///
    /// The connection token is a child of `force`, so cancelling `force`
    /// tears down every connection at once.
    pub fn new(
        id: ConnId,
        wire: WireKind,
        peer: SocketAddr,
        capacity: usize,
        force: &CancellationToken,
    ) -> (Self, mpsc::Receiver<Payload>) {
        let (queue, rx) = mpsc::channel(capacity.max(1));
        let handle = Self {
            id,
            wire,
            peer,
            queue,
            closer: force.child_token(),
            lifecycle: Arc::new(Lifecycle::new()),
        };
        (handle, rx)
    }

    pub fn id(&self) -> ConnId {
        self.id
    }

    pub fn wire(&self) -> WireKind {
        self.wire
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn closer(&self) -> &CancellationToken {
        &self.closer
    }

    pub fn lifecycle(&self) -> &Arc<Lifecycle> {
        &self.lifecycle
    }

    pub fn state(&self) -> ConnectionState {
        self.lifecycle.state()
    }

    pub fn set_state(&self, next: ConnectionState) {
        self.lifecycle.set_state(next);
    }

    pub fn idle_for(&self) -> Duration {
        self.lifecycle.idle_for()
    }

    /// Push a payload without waiting.
    ///
    /// A full queue is `Capacity`; a queue whose writer is gone is
    /// `Transport`.
    pub fn try_enqueue(&self, payload: Payload) -> HubResult<()> {
        match self.queue.try_send(payload) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(HubError::Capacity(format!(
                "outbound queue of {} is full",
                self.id
            ))),
            Err(TrySendError::Closed(_)) => Err(HubError::Transport(format!(
                "outbound queue of {} is closed",
                self.id
            ))),
        }
    }

    /// Tear the connection down without draining its queue.
    pub fn close_now(&self) {
        self.set_state(ConnectionState::Disconnecting);
        self.closer.cancel();
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id)
            .field("wire", &self.wire)
            .field("peer", &self.peer)
            .field("state", &self.state())
            .finish()
    }
}

/// Everything a connection's tasks need from the hub.
#[derive(Clone)]
pub struct ConnectionContext {
    pub events: mpsc::Sender<Event>,
    pub verifier: Arc<dyn IdentityVerifier>,
    pub store: Arc<dyn MessageStore>,
    pub queue_capacity: usize,
    pub probe_interval: Duration,
    pub force: CancellationToken,
}

/// Serve one accepted transport until both of its tasks have ended.
pub async fn serve(id: ConnId, accepted: Accepted, ctx: ConnectionContext) {
    let Accepted { peer, sink, source } = accepted;
    let wire = source.wire();
    let (handle, queue) = ConnectionHandle::new(id, wire, peer, ctx.queue_capacity, &ctx.force);
    let closer = handle.closer().clone();
    let lifecycle = Arc::clone(handle.lifecycle());

    if ctx.events.send(Event::Accept(handle)).await.is_err() {
        debug!(conn = %id, "dispatcher gone, dropping connection");
        return;
    }
    debug!(conn = %id, remote = %peer, wire = %wire, "connection accepted");

    let reader = tokio::spawn(reader::run(reader::ReaderParts {
        id,
        source,
        closer: closer.clone(),
        lifecycle: Arc::clone(&lifecycle),
        events: ctx.events.clone(),
        verifier: Arc::clone(&ctx.verifier),
        store: Arc::clone(&ctx.store),
    }));
    let writer = tokio::spawn(writer::run(writer::WriterParts {
        id,
        sink,
        queue,
        closer,
        lifecycle: Arc::clone(&lifecycle),
        events: ctx.events,
        probe_interval: ctx.probe_interval,
    }));

    let _ = tokio::join!(reader, writer);
    lifecycle.set_state(ConnectionState::Disconnecting);
    lifecycle.set_state(ConnectionState::Closed);
    debug!(conn = %id, remote = %peer, "connection closed");
}
