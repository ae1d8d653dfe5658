//! chathub-core: Shared protocol library for the chat connection hub.
//!
//! Provides the line and JSON frame codecs, the transport-neutral notice
//! model, HMAC identity tokens, and the hub error type.

pub mod command;
pub mod error;
pub mod frame;
pub mod line;
pub mod message;
pub mod token;

// Re-export commonly used items at crate root.
pub use command::Command;
pub use error::{HubError, HubResult};
pub use message::{ChatMessage, Notice, Rejection, Status, WireKind};
pub use token::{generate_secret, issue_token, verify_token, Claims};
