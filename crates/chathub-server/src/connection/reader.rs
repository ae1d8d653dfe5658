//! Inbound half of a connection.
//!
//! Decodes one unit at a time and turns it into dispatcher events. Protocol
//! errors are answered on the same connection and reading continues.

use super::{ConnId, ConnectionState, DisconnectReason, Lifecycle};
use crate::auth::IdentityVerifier;
use crate::hub::Event;
use crate::store::MessageStore;
use crate::transport::{Inbound, WireSource};
use chathub_core::{ChatMessage, Command, Rejection};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub(crate) struct ReaderParts {
    pub id: ConnId,
    pub source: WireSource,
    pub closer: CancellationToken,
    pub lifecycle: Arc<Lifecycle>,
    pub events: mpsc::Sender<Event>,
    pub verifier: Arc<dyn IdentityVerifier>,
    pub store: Arc<dyn MessageStore>,
}

/// What to do after handling one unit.
enum Flow {
    Continue,
    Stop(DisconnectReason),
}

struct Reader {
    id: ConnId,
    closer: CancellationToken,
    events: mpsc::Sender<Event>,
    verifier: Arc<dyn IdentityVerifier>,
    store: Arc<dyn MessageStore>,
    /// Set once the dispatcher acknowledged our login.
    identity: Option<String>,
}

pub(crate) async fn run(parts: ReaderParts) {
    let ReaderParts {
        id,
        mut source,
        closer,
        lifecycle,
        events,
        verifier,
        store,
    } = parts;
    let wire = source.wire();
    let mut reader = Reader {
        id,
        closer: closer.clone(),
        events,
        verifier,
        store,
        identity: None,
    };

    let reason = loop {
        let next = tokio::select! {
            biased;
            _ = closer.cancelled() => break DisconnectReason::Closed,
            next = source.next() => next,
        };

        let flow = match next {
            None => Flow::Stop(DisconnectReason::ReadClosed),
            Some(Err(e)) => {
                debug!(conn = %id, error = %e, "read failed");
                Flow::Stop(DisconnectReason::ReadFailed)
            }
            Some(Ok(Inbound::Pong)) => {
                lifecycle.touch();
                Flow::Continue
            }
            Some(Ok(Inbound::Malformed)) => {
                lifecycle.touch();
                reader.reply(Rejection::MalformedFrame).await
            }
            Some(Ok(Inbound::Text(text))) => {
                lifecycle.touch();
                if text.trim().is_empty() {
                    Flow::Continue
                } else {
                    match Command::decode(wire, &text) {
                        Ok(command) => reader.handle(command).await,
                        Err(rejection) => reader.reply(rejection).await,
                    }
                }
            }
        };

        if let Flow::Stop(reason) = flow {
            break reason;
        }
    };

    if reason != DisconnectReason::Closed {
        lifecycle.set_state(ConnectionState::Disconnecting);
    }
    debug!(conn = %id, reason = %reason, "reader finished");
    let _ = reader
        .events
        .send(Event::Disconnect { conn: id, reason })
        .await;
}

impl Reader {
    async fn handle(&mut self, command: Command) -> Flow {
        match command {
            Command::Login { identity } => self.login(identity).await,
            Command::Auth { token } => match self.verifier.verify(&token) {
                Ok(identity) => self.login(identity).await,
                Err(e) => {
                    debug!(conn = %self.id, error = %e, "token rejected");
                    self.reply(Rejection::InvalidToken).await
                }
            },
            Command::Chat {
                target,
                room,
                content,
                time,
            } => {
                let Some(sender) = self.identity.clone() else {
                    return self.reply(Rejection::NotLoggedIn).await;
                };
                let message = ChatMessage {
                    room,
                    sender,
                    content,
                    time,
                };
                if let Err(e) = self.store.save(&message).await {
                    warn!(conn = %self.id, error = %e, "failed to store message, dropping it");
                    return Flow::Continue;
                }
                self.emit(Event::Inbound {
                    conn: self.id,
                    target,
                    message,
                })
                .await
            }
            Command::Logout => Flow::Stop(DisconnectReason::Logout),
        }
    }

    /// Ask the dispatcher to bind `identity` and wait for its answer.
    async fn login(&mut self, identity: String) -> Flow {
        if self.identity.is_some() {
            return self.reply(Rejection::AlreadyLoggedIn).await;
        }
        let (ack, answer) = oneshot::channel();
        if let Flow::Stop(reason) = self
            .emit(Event::Connect {
                conn: self.id,
                identity: identity.clone(),
                ack: Some(ack),
            })
            .await
        {
            return Flow::Stop(reason);
        }

        let accepted = tokio::select! {
            _ = self.closer.cancelled() => return Flow::Stop(DisconnectReason::Closed),
            answer = answer => answer,
        };
        match accepted {
            Ok(true) => {
                self.identity = Some(identity);
                Flow::Continue
            }
            // Rejected: the dispatcher already queued the reply and closes us.
            Ok(false) => Flow::Continue,
            Err(_) => Flow::Stop(DisconnectReason::Closed),
        }
    }

    async fn reply(&self, rejection: Rejection) -> Flow {
        self.emit(Event::Reply {
            conn: self.id,
            rejection,
        })
        .await
    }

    async fn emit(&self, event: Event) -> Flow {
        match self.events.send(event).await {
            Ok(()) => Flow::Continue,
            Err(_) => Flow::Stop(DisconnectReason::Closed),
        }
    }
}
