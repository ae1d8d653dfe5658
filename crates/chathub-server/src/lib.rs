//! chathub-server: the connection hub.
//!
//! Accepts line (raw TCP) and WebSocket clients, binds each to a unique
//! identity, and fans out broadcast and targeted messages through a single
//! dispatcher that owns every outbound queue.

pub mod auth;
pub mod config;
pub mod connection;
pub mod hub;
pub mod monitor;
pub mod store;
pub mod transport;

pub use auth::{HmacVerifier, IdentityVerifier};
pub use connection::{ConnId, ConnectionState, DisconnectReason};
pub use hub::{Hub, HubConfig, HubHandle, PresenceEvent};
pub use store::{DiscardStore, MessageStore};
