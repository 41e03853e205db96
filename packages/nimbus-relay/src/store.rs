//! Persistence interface.
//!
//! The relay treats storage as an external collaborator reachable by key:
//! records come back, or "not found". The traits below are that contract;
//! `MemoryStore` is the bundled implementation used by the single-process
//! deployment and by tests. A database-backed store plugs in behind the
//! same traits.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use crate::protocol::WireMessage;

/// A persisted friend request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FriendRequest {
    pub from: String,
    pub to: String,
    pub created_at: DateTime<Utc>,
}

/// Message persistence, keyed by message id.
pub trait MessageStore: Send + Sync {
    /// Persist a new message and return the stored record.
    fn create(&self, from: &str, to: &str, text: &str) -> WireMessage;

    /// Fetch one message by id.
    fn get(&self, id: &str) -> Option<WireMessage>;

    /// Delete one message by id. Returns false if it was absent.
    fn delete(&self, id: &str) -> bool;

    /// All messages between the pair, in creation order.
    fn history(&self, a: &str, b: &str) -> Vec<WireMessage>;
}

/// Friend-relationship persistence.
pub trait FriendStore: Send + Sync {
    /// Record a friend request. Returns false if an identical pending
    /// request already exists.
    fn create_request(&self, from: &str, to: &str) -> bool;

    /// Identities with a pending request addressed to `to`.
    fn pending_for(&self, to: &str) -> Vec<FriendRequest>;
}

/// In-memory store backing the single-process deployment.
#[derive(Default)]
pub struct MemoryStore {
    messages: DashMap<String, WireMessage>,
    // Insertion counter gives a stable creation order even when two
    // messages land within the same timestamp tick.
    order: DashMap<String, u64>,
    next_seq: std::sync::atomic::AtomicU64,
    requests: DashMap<String, Vec<FriendRequest>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn message_count(&self) -> usize {
        self.messages.len()
    }
}

impl MessageStore for MemoryStore {
    fn create(&self, from: &str, to: &str, text: &str) -> WireMessage {
        let message = WireMessage {
            id: Uuid::new_v4().to_string(),
            from: from.to_string(),
            to: to.to_string(),
            text: text.to_string(),
            created_at: Utc::now(),
        };
        let seq = self
            .next_seq
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        self.order.insert(message.id.clone(), seq);
        self.messages.insert(message.id.clone(), message.clone());
        message
    }

    fn get(&self, id: &str) -> Option<WireMessage> {
        self.messages.get(id).map(|entry| entry.value().clone())
    }

    fn delete(&self, id: &str) -> bool {
        self.order.remove(id);
        self.messages.remove(id).is_some()
    }

    fn history(&self, a: &str, b: &str) -> Vec<WireMessage> {
        let mut pair: Vec<(u64, WireMessage)> = self
            .messages
            .iter()
            .filter(|entry| {
                let m = entry.value();
                (m.from == a && m.to == b) || (m.from == b && m.to == a)
            })
            .map(|entry| {
                let seq = self
                    .order
                    .get(entry.key())
                    .map(|s| *s.value())
                    .unwrap_or(u64::MAX);
                (seq, entry.value().clone())
            })
            .collect();
        pair.sort_by_key(|(seq, _)| *seq);
        pair.into_iter().map(|(_, m)| m).collect()
    }
}

impl FriendStore for MemoryStore {
    fn create_request(&self, from: &str, to: &str) -> bool {
        let mut pending = self.requests.entry(to.to_string()).or_default();
        if pending.iter().any(|r| r.from == from) {
            return false;
        }
        pending.push(FriendRequest {
            from: from.to_string(),
            to: to.to_string(),
            created_at: Utc::now(),
        });
        true
    }

    fn pending_for(&self, to: &str) -> Vec<FriendRequest> {
        self.requests
            .get(to)
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }
}
