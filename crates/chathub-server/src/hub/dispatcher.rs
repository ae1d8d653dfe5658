//! The dispatcher: single owner of the registry and of every outbound queue.
//!
//! Events are handled one at a time and without awaiting, so the loop only
//! ever suspends on the next event. Delivery never blocks: a peer whose
//! queue is full or closed is evicted on the spot, and the resulting
//! `offline` notices are delivered through a work list so that evictions
//! they cause in turn are handled without recursion.

use super::registry::{Registry, RegistrySize};
use crate::connection::{ConnId, ConnectionHandle, ConnectionState, DisconnectReason, Payload};
use chathub_core::{ChatMessage, HubError, Notice, Rejection, Status, WireKind};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Input to the dispatcher.
#[derive(Debug)]
pub enum Event {
    /// A transport was accepted; its handle waits for a login.
    Accept(ConnectionHandle),
    /// A connection asks to bind `identity`. `ack` learns the outcome.
    Connect {
        conn: ConnId,
        identity: String,
        ack: Option<oneshot::Sender<bool>>,
    },
    /// A chat message from `conn`; no target means broadcast.
    Inbound {
        conn: ConnId,
        target: Option<String>,
        message: ChatMessage,
    },
    /// A protocol error to be answered on `conn` only.
    Reply { conn: ConnId, rejection: Rejection },
    /// `conn` is gone. Idempotent.
    Disconnect {
        conn: ConnId,
        reason: DisconnectReason,
    },
}

/// An identity came online or went offline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceEvent {
    pub identity: String,
    pub status: Status,
}

/// Renders a notice at most once per wire during a fan-out.
struct Rendered<'a> {
    notice: &'a Notice,
    line: Option<Payload>,
    frame: Option<Payload>,
}

impl<'a> Rendered<'a> {
    fn new(notice: &'a Notice) -> Self {
        Self {
            notice,
            line: None,
            frame: None,
        }
    }

    fn get(&mut self, wire: WireKind) -> Payload {
        let notice = self.notice;
        let slot = match wire {
            WireKind::Line => &mut self.line,
            WireKind::Frame => &mut self.frame,
        };
        Arc::clone(slot.get_or_insert_with(|| Arc::from(notice.render(wire))))
    }
}

pub struct Dispatcher {
    registry: Registry,
    /// Accepted connections without an identity yet.
    pending: HashMap<ConnId, ConnectionHandle>,
    /// Identity of every registered connection.
    bound: HashMap<ConnId, String>,
    presence: broadcast::Sender<PresenceEvent>,
    self_echo: bool,
    idle_timeout: Option<Duration>,
}

impl Dispatcher {
    pub fn new(presence: broadcast::Sender<PresenceEvent>) -> Self {
        Self {
            registry: Registry::new(),
            pending: HashMap::new(),
            bound: HashMap::new(),
            presence,
            self_echo: false,
            idle_timeout: None,
        }
    }

    /// Also deliver broadcasts back to their sender.
    pub fn with_self_echo(mut self, self_echo: bool) -> Self {
        self.self_echo = self_echo;
        self
    }

    /// Evict connections silent for longer than `timeout`.
    pub fn with_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn registry_size(&self) -> RegistrySize {
        self.registry.size()
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Run until `shutdown` fires or every event sender is gone, then close
    /// all connections gracefully.
    pub async fn run(mut self, mut events: mpsc::Receiver<Event>, shutdown: CancellationToken) {
        let mut sweep = self.idle_timeout.map(|timeout| {
            let period = (timeout / 2).max(Duration::from_millis(100));
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => self.handle(event),
                    None => break,
                },
                _ = next_tick(&mut sweep) => self.sweep(),
            }
        }

        self.close_all();
        debug!("dispatcher stopped");
    }

    /// Handle one event to completion.
    pub fn handle(&mut self, event: Event) {
        match event {
            Event::Accept(conn) => {
                debug!(conn = %conn.id(), remote = %conn.peer(), "connection pending login");
                self.pending.insert(conn.id(), conn);
            }
            Event::Connect {
                conn,
                identity,
                ack,
            } => {
                let accepted = self.connect(conn, identity);
                if let Some(ack) = ack {
                    let _ = ack.send(accepted);
                }
            }
            Event::Inbound {
                conn,
                target,
                message,
            } => self.inbound(conn, target, message),
            Event::Reply { conn, rejection } => {
                self.send_to(conn, &Notice::Rejected(rejection));
            }
            Event::Disconnect { conn, reason } => self.disconnect(conn, reason),
        }
    }

    fn connect(&mut self, conn: ConnId, identity: String) -> bool {
        if self.bound.contains_key(&conn) {
            self.send_to(conn, &Notice::Rejected(Rejection::AlreadyLoggedIn));
            return false;
        }
        let Some(handle) = self.pending.remove(&conn) else {
            debug!(conn = %conn, identity = %identity, "login from unknown connection");
            return false;
        };

        match self.registry.register(&identity, handle) {
            Err(handle) => {
                info!(conn = %conn, identity = %identity, "identity already taken");
                let reply = Notice::Rejected(Rejection::UsernameTaken).render(handle.wire());
                if let Err(e) = handle.try_enqueue(Arc::from(reply)) {
                    debug!(conn = %conn, error = %e, "could not queue rejection");
                }
                handle.set_state(ConnectionState::Disconnecting);
                // Dropping the handle closes the queue; the writer flushes the reply.
                drop(handle);
                false
            }
            Ok(()) => {
                self.bound.insert(conn, identity.clone());
                if let Some(handle) = self.registry.lookup(&identity) {
                    handle.set_state(ConnectionState::Registered);
                }
                let _ = self.presence.send(PresenceEvent {
                    identity: identity.clone(),
                    status: Status::Online,
                });

                let mut departures = VecDeque::new();
                self.deliver(
                    &identity,
                    &Notice::LoginOk {
                        identity: identity.clone(),
                    },
                    &mut departures,
                );
                let online = Notice::Status {
                    identity: identity.clone(),
                    status: Status::Online,
                };
                self.fan_out(&online, Some(identity.as_str()), &mut departures);
                self.settle(departures);
                true
            }
        }
    }

    fn inbound(&mut self, conn: ConnId, target: Option<String>, mut message: ChatMessage) {
        let Some(identity) = self.bound.get(&conn).cloned() else {
            self.send_to(conn, &Notice::Rejected(Rejection::NotLoggedIn));
            return;
        };
        message.sender = identity.clone();
        if let Some(handle) = self.registry.lookup(&identity) {
            if handle.state() == ConnectionState::Registered {
                handle.set_state(ConnectionState::Active);
            }
        }

        let mut departures = VecDeque::new();
        match target {
            None => {
                let notice = Notice::Chat {
                    message,
                    private: false,
                };
                let exclude = (!self.self_echo).then_some(identity.as_str());
                self.fan_out(&notice, exclude, &mut departures);
            }
            Some(target) => {
                if self.registry.lookup(&target).is_none() {
                    let miss = HubError::NotFound(target);
                    debug!(sender = %identity, error = %miss, "targeted delivery missed");
                    self.send_to(conn, &Notice::Rejected(Rejection::UserNotFound));
                    return;
                }
                let notice = Notice::Chat {
                    message,
                    private: true,
                };
                self.deliver(&target, &notice, &mut departures);
            }
        }
        self.settle(departures);
    }

    fn disconnect(&mut self, conn: ConnId, reason: DisconnectReason) {
        if let Some(handle) = self.pending.remove(&conn) {
            debug!(conn = %conn, reason = %reason, "pending connection left");
            handle.set_state(ConnectionState::Disconnecting);
            return;
        }
        let Some(identity) = self.bound.remove(&conn) else {
            return;
        };
        if let Some(handle) = self.registry.unregister(&identity) {
            handle.set_state(ConnectionState::Disconnecting);
        }
        info!(identity = %identity, conn = %conn, reason = %reason, "identity disconnected");
        self.settle(VecDeque::from([identity]));
    }

    /// Answer a single connection, registered or not.
    fn send_to(&mut self, conn: ConnId, notice: &Notice) {
        if let Some(identity) = self.bound.get(&conn).cloned() {
            let mut departures = VecDeque::new();
            self.deliver(&identity, notice, &mut departures);
            self.settle(departures);
            return;
        }
        if let Some(handle) = self.pending.get(&conn) {
            let payload = Arc::from(notice.render(handle.wire()));
            if let Err(e) = handle.try_enqueue(payload) {
                warn!(conn = %conn, error = %e, "dropping unresponsive pending connection");
                if let Some(handle) = self.pending.remove(&conn) {
                    handle.close_now();
                }
            }
        }
    }

    /// Queue `notice` for one identity, evicting it if its queue refuses.
    fn deliver(&mut self, identity: &str, notice: &Notice, departures: &mut VecDeque<String>) {
        let mut rendered = Rendered::new(notice);
        self.push(identity, &mut rendered, departures);
    }

    /// Queue `notice` for every registered identity except `exclude`.
    fn fan_out(
        &mut self,
        notice: &Notice,
        exclude: Option<&str>,
        departures: &mut VecDeque<String>,
    ) {
        let mut rendered = Rendered::new(notice);
        for (identity, _) in self.registry.snapshot() {
            if exclude == Some(identity.as_str()) {
                continue;
            }
            self.push(&identity, &mut rendered, departures);
        }
    }

    fn push(&mut self, identity: &str, rendered: &mut Rendered<'_>, departures: &mut VecDeque<String>) {
        // Entries evicted earlier in this fan-out are skipped.
        let Some(handle) = self.registry.lookup(identity) else {
            return;
        };
        if let Err(e) = handle.try_enqueue(rendered.get(handle.wire())) {
            self.evict(identity, &e);
            departures.push_back(identity.to_string());
        }
    }

    fn evict(&mut self, identity: &str, reason: &HubError) {
        if let Some(handle) = self.registry.unregister(identity) {
            warn!(identity = %identity, conn = %handle.id(), error = %reason, "evicting connection");
            self.bound.remove(&handle.id());
            handle.close_now();
        }
    }

    /// Announce each departed identity, including any evicted while doing so.
    fn settle(&mut self, mut departures: VecDeque<String>) {
        while let Some(identity) = departures.pop_front() {
            let _ = self.presence.send(PresenceEvent {
                identity: identity.clone(),
                status: Status::Offline,
            });
            let offline = Notice::Status {
                identity,
                status: Status::Offline,
            };
            self.fan_out(&offline, None, &mut departures);
        }
    }

    /// Evict connections that have been silent for too long.
    pub fn sweep(&mut self) {
        let Some(timeout) = self.idle_timeout else {
            return;
        };
        let stale: Vec<ConnId> = self
            .pending
            .iter()
            .filter(|(_, conn)| conn.idle_for() > timeout)
            .map(|(id, _)| *id)
            .collect();
        for id in stale {
            if let Some(conn) = self.pending.remove(&id) {
                debug!(conn = %id, "closing idle pending connection");
                conn.close_now();
            }
        }

        let mut departures = VecDeque::new();
        for identity in self.registry.idle(timeout) {
            let err = HubError::Transport(format!("idle for more than {timeout:?}"));
            self.evict(&identity, &err);
            departures.push_back(identity);
        }
        self.settle(departures);
    }

    /// Close every connection gracefully: queues are dropped so writers
    /// flush and send their close frames.
    pub fn close_all(&mut self) {
        for (_, conn) in self.pending.drain() {
            conn.set_state(ConnectionState::Disconnecting);
        }
        self.bound.clear();
        let drained = self.registry.drain();
        if !drained.is_empty() {
            info!(count = drained.len(), "closing registered connections");
        }
        for (identity, conn) in drained {
            conn.set_state(ConnectionState::Disconnecting);
            let _ = self.presence.send(PresenceEvent {
                identity,
                status: Status::Offline,
            });
        }
    }
}

async fn next_tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
