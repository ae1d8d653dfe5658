//! Hub-level message model and the notices the hub pushes to connections.
//!
//! A [`Notice`] is transport-neutral; [`Notice::render`] turns it into the
//! exact text written on a given wire.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{frame, line};

/// The two wire variants a connection can speak.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WireKind {
    /// Newline-delimited text commands over a raw TCP stream.
    Line,
    /// JSON frames over a WebSocket.
    Frame,
}

impl fmt::Display for WireKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireKind::Line => write!(f, "line"),
            WireKind::Frame => write!(f, "frame"),
        }
    }
}

/// A chat message as routed by the hub.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub room: String,
    pub sender: String,
    pub content: String,
    pub time: DateTime<Utc>,
}

impl ChatMessage {
    pub fn new(room: impl Into<String>, sender: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            room: room.into(),
            sender: sender.into(),
            content: content.into(),
            time: Utc::now(),
        }
    }

    /// RFC 3339 timestamp as emitted on the wire.
    pub fn time_rfc3339(&self) -> String {
        self.time.to_rfc3339_opts(SecondsFormat::AutoSi, true)
    }
}

/// Presence of an identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Online,
    Offline,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Online => "online",
            Status::Offline => "offline",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reasons the hub answers a single connection with an error indication.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    UsernameTaken,
    InvalidName,
    UserNotFound,
    UnknownCommand,
    InvalidPrivateMessage,
    NotLoggedIn,
    AlreadyLoggedIn,
    InvalidToken,
    MalformedFrame,
    InvalidTime,
}

impl Rejection {
    pub fn text(&self) -> &'static str {
        match self {
            Rejection::UsernameTaken => "Username already taken",
            Rejection::InvalidName => "Invalid username",
            Rejection::UserNotFound => "User not found",
            Rejection::UnknownCommand => "Unknown command",
            Rejection::InvalidPrivateMessage => "Invalid private message format",
            Rejection::NotLoggedIn => "Please login first",
            Rejection::AlreadyLoggedIn => "Already logged in",
            Rejection::InvalidToken => "Invalid token",
            Rejection::MalformedFrame => "Malformed frame",
            Rejection::InvalidTime => "Invalid message time",
        }
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.text())
    }
}

/// Something the hub delivers to one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// Acknowledges a successful login to the connection that logged in.
    LoginOk { identity: String },
    /// A chat message; `private` marks targeted delivery.
    Chat { message: ChatMessage, private: bool },
    /// Another identity came online or went offline.
    Status { identity: String, status: Status },
    /// Error indication for the receiving connection only.
    Rejected(Rejection),
}

impl Notice {
    /// Render this notice as the exact text to write on `wire`.
    ///
    /// Line output carries its trailing newline; frame output is one JSON
    /// document per WebSocket text message.
    pub fn render(&self, wire: WireKind) -> String {
        match wire {
            WireKind::Line => line::encode(self),
            WireKind::Frame => frame::encode(self),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_strings() {
        assert_eq!(Status::Online.to_string(), "online");
        assert_eq!(Status::Offline.as_str(), "offline");
    }

    #[test]
    fn rfc3339_uses_zulu() {
        let mut msg = ChatMessage::new("lobby", "alice", "hi");
        msg.time = DateTime::parse_from_rfc3339("2024-05-01T10:20:30+02:00")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(msg.time_rfc3339(), "2024-05-01T08:20:30Z");
    }

    #[test]
    fn render_dispatches_on_wire() {
        let notice = Notice::Rejected(Rejection::UserNotFound);
        assert_eq!(notice.render(WireKind::Line), "User not found\n");
        assert!(notice.render(WireKind::Frame).contains("\"type\":\"error\""));
    }
}
