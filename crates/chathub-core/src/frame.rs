//! JSON frames spoken over WebSocket, discriminated by a `type` field.
//!
//! Inbound: `auth`, `message`, `logout`.
//! Outbound: `message`, `userStatus`, `error`.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::command::Command;
use crate::message::{Notice, Rejection, Status};

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
enum ClientFrame {
    Auth {
        token: String,
    },
    Message {
        #[serde(default)]
        room: String,
        content: String,
        #[serde(default)]
        time: Option<String>,
        #[serde(default)]
        to: Option<String>,
    },
    Logout,
}

const CLIENT_TYPES: [&str; 3] = ["auth", "message", "logout"];

/// Decode one text frame into a command.
///
/// Any client-supplied `sender` field is ignored; the hub attributes
/// messages to the authenticated identity.
pub fn decode(text: &str) -> Result<Command, Rejection> {
    let value: Value = serde_json::from_str(text).map_err(|_| Rejection::MalformedFrame)?;

    match value.get("type").and_then(Value::as_str) {
        Some(kind) if CLIENT_TYPES.contains(&kind) => {}
        _ => return Err(Rejection::UnknownCommand),
    }

    let frame: ClientFrame = serde_json::from_value(value).map_err(|_| Rejection::MalformedFrame)?;

    match frame {
        ClientFrame::Auth { token } => Ok(Command::Auth { token }),
        ClientFrame::Message {
            room,
            content,
            time,
            to,
        } => {
            let time = match time {
                Some(raw) => DateTime::parse_from_rfc3339(&raw)
                    .map_err(|_| Rejection::InvalidTime)?
                    .with_timezone(&Utc),
                None => Utc::now(),
            };
            Ok(Command::Chat {
                target: to.filter(|t| !t.is_empty()),
                room,
                content,
                time,
            })
        }
        ClientFrame::Logout => Ok(Command::Logout),
    }
}

fn user_status(identity: &str, status: Status) -> Value {
    json!({
        "type": "userStatus",
        "username": identity,
        "status": status,
    })
}

/// Render a notice as one JSON text frame.
pub fn encode(notice: &Notice) -> String {
    let value = match notice {
        Notice::LoginOk { identity } => user_status(identity, Status::Online),
        Notice::Chat { message, private } => {
            let mut value = json!({
                "type": "message",
                "room": message.room,
                "sender": message.sender,
                "content": message.content,
                "time": message.time_rfc3339(),
            });
            if *private {
                value["private"] = Value::Bool(true);
            }
            value
        }
        Notice::Status { identity, status } => user_status(identity, *status),
        Notice::Rejected(rejection) => json!({
            "type": "error",
            "message": rejection.text(),
        }),
    };
    value.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::ChatMessage;

    #[test]
    fn decodes_auth_and_logout() {
        assert_eq!(
            decode(r#"{"type":"auth","token":"abc"}"#).unwrap(),
            Command::Auth {
                token: "abc".into()
            }
        );
        assert_eq!(decode(r#"{"type":"logout"}"#).unwrap(), Command::Logout);
    }

    #[test]
    fn decodes_message_with_time() {
        let cmd = decode(
            r#"{"type":"message","room":"r1","sender":"mallory","content":"hi","time":"2024-01-02T03:04:05Z"}"#,
        )
        .unwrap();
        match cmd {
            Command::Chat {
                target,
                room,
                content,
                time,
            } => {
                assert_eq!(target, None);
                assert_eq!(room, "r1");
                assert_eq!(content, "hi");
                assert_eq!(time.to_rfc3339(), "2024-01-02T03:04:05+00:00");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn targeted_message_uses_to() {
        match decode(r#"{"type":"message","room":"r","content":"psst","to":"bob"}"#).unwrap() {
            Command::Chat { target, .. } => assert_eq!(target.as_deref(), Some("bob")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn rejects_bad_input() {
        assert_eq!(decode("not json").unwrap_err(), Rejection::MalformedFrame);
        assert_eq!(
            decode(r#"{"type":"dance"}"#).unwrap_err(),
            Rejection::UnknownCommand
        );
        assert_eq!(decode(r#"{"token":"x"}"#).unwrap_err(), Rejection::UnknownCommand);
        assert_eq!(
            decode(r#"{"type":"auth"}"#).unwrap_err(),
            Rejection::MalformedFrame
        );
        assert_eq!(
            decode(r#"{"type":"message","content":"x","time":"yesterday"}"#).unwrap_err(),
            Rejection::InvalidTime
        );
    }

    #[test]
    fn encodes_message_frame() {
        let mut message = ChatMessage::new("r1", "alice", "hi");
        message.time = DateTime::parse_from_rfc3339("2024-01-02T03:04:05Z")
            .unwrap()
            .with_timezone(&Utc);
        let text = encode(&Notice::Chat {
            message,
            private: false,
        });
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["type"], "message");
        assert_eq!(value["room"], "r1");
        assert_eq!(value["sender"], "alice");
        assert_eq!(value["content"], "hi");
        assert_eq!(value["time"], "2024-01-02T03:04:05Z");
        assert!(value.get("private").is_none());
    }

    #[test]
    fn login_ack_is_own_online_status() {
        let value: Value = serde_json::from_str(&encode(&Notice::LoginOk {
            identity: "alice".into(),
        }))
        .unwrap();
        assert_eq!(value, json!({"type":"userStatus","username":"alice","status":"online"}));
    }
}
