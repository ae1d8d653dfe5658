//! Message persistence boundary.
//!
//! Readers hand every chat message to the store before it reaches the
//! dispatcher. A failed save drops the message for everyone.

use chathub_core::{ChatMessage, HubResult};
use std::future::Future;
use std::pin::Pin;

/// Persists chat messages on behalf of the hub.
pub trait MessageStore: Send + Sync {
    fn save<'a>(
        &'a self,
        message: &'a ChatMessage,
    ) -> Pin<Box<dyn Future<Output = HubResult<()>> + Send + 'a>>;
}

/// Keeps nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiscardStore;

impl MessageStore for DiscardStore {
    fn save<'a>(
        &'a self,
        _message: &'a ChatMessage,
    ) -> Pin<Box<dyn Future<Output = HubResult<()>> + Send + 'a>> {
        Box::pin(async { Ok(()) })
    }
}
