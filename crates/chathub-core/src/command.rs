//! Decoded client commands, common to both wire variants.

use chrono::{DateTime, Utc};

use crate::message::{Rejection, WireKind};
use crate::{frame, line};

/// One well-formed command read from a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Claim a name directly (line wire).
    Login { identity: String },
    /// Present a token whose verified subject becomes the identity (frame wire).
    Auth { token: String },
    /// Send a chat message; `target` absent means broadcast.
    Chat {
        target: Option<String>,
        room: String,
        content: String,
        time: DateTime<Utc>,
    },
    Logout,
}

impl Command {
    /// Decode one inbound unit (a line or a text frame) for `wire`.
    pub fn decode(wire: WireKind, text: &str) -> Result<Self, Rejection> {
        match wire {
            WireKind::Line => line::decode(text),
            WireKind::Frame => frame::decode(text),
        }
    }
}
