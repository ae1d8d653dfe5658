//! Newline-delimited text protocol spoken over raw TCP.
//!
//! ```text
//! LOGIN:<name>
//! MSG_ALL:<text>
//! MSG_USER:<name>:<text>
//! LOGOUT
//! ```
//!
//! The transport strips the line terminator; [`decode`] sees one line.

use chrono::Utc;

use crate::command::Command;
use crate::message::{Notice, Rejection};

/// Room assigned to messages that arrive over the line wire.
pub const LINE_ROOM: &str = "lobby";

/// Longest accepted line, terminator excluded.
pub const MAX_LINE_LENGTH: usize = 64 * 1024;

const LOGIN: &str = "LOGIN:";
const MSG_ALL: &str = "MSG_ALL:";
const MSG_USER: &str = "MSG_USER:";
const LOGOUT: &str = "LOGOUT";

/// Decode one line into a command.
pub fn decode(line: &str) -> Result<Command, Rejection> {
    let line = line.trim();

    if let Some(name) = line.strip_prefix(LOGIN) {
        let identity = name.trim();
        if !valid_identity(identity) {
            return Err(Rejection::InvalidName);
        }
        return Ok(Command::Login {
            identity: identity.to_string(),
        });
    }

    if let Some(text) = line.strip_prefix(MSG_ALL) {
        return Ok(Command::Chat {
            target: None,
            room: LINE_ROOM.to_string(),
            content: text.to_string(),
            time: Utc::now(),
        });
    }

    if let Some(rest) = line.strip_prefix(MSG_USER) {
        let (recipient, text) = rest
            .split_once(':')
            .ok_or(Rejection::InvalidPrivateMessage)?;
        return Ok(Command::Chat {
            target: Some(recipient.trim().to_string()),
            room: LINE_ROOM.to_string(),
            content: text.trim().to_string(),
            time: Utc::now(),
        });
    }

    if line == LOGOUT {
        return Ok(Command::Logout);
    }

    Err(Rejection::UnknownCommand)
}

/// Names are non-empty and cannot contain the field separator.
pub fn valid_identity(identity: &str) -> bool {
    !identity.is_empty() && !identity.contains(':')
}

/// Render a notice for a line client, terminator included.
pub fn encode(notice: &Notice) -> String {
    match notice {
        Notice::LoginOk { .. } => "Login successful\n".to_string(),
        Notice::Chat {
            message,
            private: false,
        } => format!("{}: {}\n", message.sender, message.content),
        Notice::Chat {
            message,
            private: true,
        } => format!("(Private) {}: {}\n", message.sender, message.content),
        Notice::Status { identity, status } => format!("STATUS:{identity}:{status}\n"),
        Notice::Rejected(rejection) => format!("{}\n", rejection.text()),
    }
}
