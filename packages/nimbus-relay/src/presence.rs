//! Presence registry.
//!
//! Process-wide map of identity → live connection. The registry is an
//! explicit value handed to the relay layer at startup rather than a
//! module-level global, so it can be shared with the HTTP surface and
//! replaced wholesale in tests.
//!
//! Single-writer discipline: only a connection's own handler task mutates
//! its entry. An identity holds at most one connection — registering a
//! second one replaces the first, and the connection id guard keeps the
//! replaced handler's cleanup from deregistering its successor.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;

use crate::protocol::ServerEvent;

/// Outbox channel for one connected client.
pub type ClientSender = mpsc::UnboundedSender<ServerEvent>;

/// A live relay connection bound to an identity.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    /// Monotonic id, unique per accepted connection.
    pub id: u64,
    pub sender: ClientSender,
}

/// Identity → connection map with broadcast support.
#[derive(Clone, Default)]
pub struct PresenceRegistry {
    connections: Arc<DashMap<String, ConnectionHandle>>,
    next_connection_id: Arc<AtomicU64>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate an id for a freshly accepted connection.
    pub fn next_connection_id(&self) -> u64 {
        self.next_connection_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Bind an identity to a connection. Returns the replaced connection,
    /// if the identity was already online, so the caller can close it.
    pub fn register(&self, identity: &str, handle: ConnectionHandle) -> Option<ConnectionHandle> {
        tracing::info!(identity = identity, connection_id = handle.id, "Client registered");
        self.connections.insert(identity.to_string(), handle)
    }

    /// Remove an identity's entry, but only if it still belongs to the
    /// given connection. A stale handler cleaning up after being replaced
    /// leaves the successor's entry alone.
    pub fn deregister(&self, identity: &str, connection_id: u64) -> bool {
        let removed = self
            .connections
            .remove_if(identity, |_, handle| handle.id == connection_id)
            .is_some();
        if removed {
            tracing::info!(identity = identity, connection_id = connection_id, "Client deregistered");
        }
        removed
    }

    pub fn is_reachable(&self, identity: &str) -> bool {
        self.connections.contains_key(identity)
    }

    /// All currently reachable identities, sorted for a deterministic view.
    pub fn list(&self) -> Vec<String> {
        let mut identities: Vec<String> = self
            .connections
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        identities.sort();
        identities
    }

    pub fn connected_count(&self) -> usize {
        self.connections.len()
    }

    /// Push an event to one identity. Routing to an absent identity is a
    /// silent no-op: the return value says "delivered locally", nothing more.
    pub fn send_to(&self, identity: &str, event: ServerEvent) -> bool {
        match self.connections.get(identity) {
            Some(handle) => handle.sender.send(event).is_ok(),
            None => false,
        }
    }

    /// Push an event to every connected client.
    pub fn broadcast(&self, event: ServerEvent) {
        for entry in self.connections.iter() {
            let _ = entry.value().sender.send(event.clone());
        }
    }

    /// Broadcast the full reachable set to everyone. Called after every
    /// register and deregister; the full list (not a diff) keeps late
    /// joiners consistent.
    pub fn broadcast_presence(&self) {
        let identities = self.list();
        tracing::debug!(count = identities.len(), "Broadcasting presence update");
        self.broadcast(ServerEvent::PresenceUpdate { identities });
    }
}
