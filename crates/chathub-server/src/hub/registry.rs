//! Identity registry for live connections.
//!
//! Maps each bound identity to its connection handle. Owned and mutated by
//! the dispatcher alone, so it needs no lock; the live count is mirrored in
//! a shared gauge for observers.

use crate::connection::{ConnId, ConnectionHandle};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Read-only view of the registry size.
#[derive(Debug, Clone, Default)]
pub struct RegistrySize(Arc<AtomicUsize>);

impl RegistrySize {
    pub fn get(&self) -> usize {
        self.0.load(Ordering::Relaxed)
    }

    fn set(&self, value: usize) {
        self.0.store(value, Ordering::Relaxed);
    }
}

/// Registry of identified connections.
#[derive(Debug, Default)]
pub struct Registry {
    /// Handles indexed by identity.
    entries: HashMap<String, ConnectionHandle>,
    size: RegistrySize,
}

impl Registry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared gauge tracking `len()`.
    pub fn size(&self) -> RegistrySize {
        self.size.clone()
    }

    /// Bind `identity` to `conn`.
    ///
    /// If the identity is already live the registry is left untouched and
    /// the connection is handed back so the caller can answer it.
    pub fn register(
        &mut self,
        identity: &str,
        conn: ConnectionHandle,
    ) -> Result<(), ConnectionHandle> {
        if self.entries.contains_key(identity) {
            return Err(conn);
        }
        info!(identity = %identity, conn = %conn.id(), remote = %conn.peer(), "identity registered");
        self.entries.insert(identity.to_string(), conn);
        self.size.set(self.entries.len());
        Ok(())
    }

    /// Remove an identity. Idempotent.
    pub fn unregister(&mut self, identity: &str) -> Option<ConnectionHandle> {
        let removed = self.entries.remove(identity);
        if let Some(conn) = &removed {
            self.size.set(self.entries.len());
            debug!(identity = %identity, conn = %conn.id(), "identity unregistered");
        }
        removed
    }

    pub fn lookup(&self, identity: &str) -> Option<&ConnectionHandle> {
        self.entries.get(identity)
    }

    /// Point-in-time copy of the registered identities, for fan-out.
    pub fn snapshot(&self) -> Vec<(String, ConnId)> {
        self.entries
            .iter()
            .map(|(identity, conn)| (identity.clone(), conn.id()))
            .collect()
    }

    /// Identities whose connections have been silent longer than `max_idle`.
    pub fn idle(&self, max_idle: Duration) -> Vec<String> {
        self.entries
            .iter()
            .filter(|(_, conn)| conn.idle_for() > max_idle)
            .map(|(identity, _)| identity.clone())
            .collect()
    }

    /// Remove and return every entry.
    pub fn drain(&mut self) -> Vec<(String, ConnectionHandle)> {
        let drained: Vec<_> = self.entries.drain().collect();
        self.size.set(0);
        drained
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chathub_core::WireKind;
    use tokio_util::sync::CancellationToken;

    fn conn(id: u64) -> ConnectionHandle {
        let force = CancellationToken::new();
        let (handle, _rx) = ConnectionHandle::new(
            ConnId(id),
            WireKind::Line,
            "127.0.0.1:9".parse().unwrap(),
            4,
            &force,
        );
        handle
    }

    #[test]
    fn register_and_lookup() {
        let mut registry = Registry::new();
        assert!(registry.register("alice", conn(1)).is_ok());
        assert_eq!(registry.lookup("alice").map(|c| c.id()), Some(ConnId(1)));
        assert!(registry.lookup("bob").is_none());
    }

    #[test]
    fn duplicate_identity_is_handed_back() {
        let mut registry = Registry::new();
        registry.register("alice", conn(1)).unwrap();
        let rejected = registry.register("alice", conn(2)).unwrap_err();
        assert_eq!(rejected.id(), ConnId(2));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.lookup("alice").map(|c| c.id()), Some(ConnId(1)));
    }

    #[test]
    fn unregister_is_idempotent() {
        let mut registry = Registry::new();
        registry.register("alice", conn(1)).unwrap();
        assert!(registry.unregister("alice").is_some());
        assert!(registry.unregister("alice").is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn gauge_follows_len() {
        let mut registry = Registry::new();
        let size = registry.size();
        registry.register("alice", conn(1)).unwrap();
        registry.register("bob", conn(2)).unwrap();
        assert_eq!(size.get(), 2);
        registry.unregister("alice");
        assert_eq!(size.get(), 1);
        registry.drain();
        assert_eq!(size.get(), 0);
    }

    #[test]
    fn snapshot_is_a_copy() {
        let mut registry = Registry::new();
        registry.register("alice", conn(1)).unwrap();
        registry.register("bob", conn(2)).unwrap();
        let snapshot = registry.snapshot();
        registry.unregister("bob");
        assert_eq!(snapshot.len(), 2);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn fresh_connections_are_not_idle() {
        let mut registry = Registry::new();
        registry.register("alice", conn(1)).unwrap();
        assert!(registry.idle(Duration::from_secs(60)).is_empty());
    }
}
