//! # Client Session Store
//!
//! Read-only snapshots of what the UI renders: the current presence set,
//! the active call status, and the ordered message list for the one open
//! conversation. Relay events are applied idempotently — the relay may
//! deliver late or duplicate events and the store must shrug them off.
//!
//! Only events scoped to the open conversation are kept; switching
//! conversations silently drops everything addressed to the old one, so
//! no state leaks across conversations.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::call::{CallStatus, ReachabilityView};
use crate::relay::WireMessage;

struct SessionStoreInner {
    presence: Vec<String>,
    open_conversation: Option<String>,
    messages: Vec<WireMessage>,
    call_status: CallStatus,
}

/// Shared, snapshot-read store of client session state.
#[derive(Clone)]
pub struct SessionStore {
    local_identity: String,
    inner: Arc<RwLock<SessionStoreInner>>,
}

impl SessionStore {
    pub fn new(local_identity: impl Into<String>) -> Self {
        Self {
            local_identity: local_identity.into(),
            inner: Arc::new(RwLock::new(SessionStoreInner {
                presence: Vec::new(),
                open_conversation: None,
                messages: Vec::new(),
                call_status: CallStatus::Idle,
            })),
        }
    }

    // ── Snapshots ─────────────────────────────────────────────────────────

    /// The reachable identities as of the last presence update.
    pub fn presence(&self) -> Vec<String> {
        self.inner.read().presence.clone()
    }

    pub fn call_status(&self) -> CallStatus {
        self.inner.read().call_status
    }

    pub fn open_conversation(&self) -> Option<String> {
        self.inner.read().open_conversation.clone()
    }

    /// Messages of the open conversation, oldest first.
    pub fn messages(&self) -> Vec<WireMessage> {
        self.inner.read().messages.clone()
    }

    // ── Mutations (driven by the event loop) ──────────────────────────────

    /// Replace the presence set with the relay's full broadcast list.
    pub fn set_presence(&self, identities: Vec<String>) {
        self.inner.write().presence = identities;
    }

    pub fn set_call_status(&self, status: CallStatus) {
        self.inner.write().call_status = status;
    }

    /// Open a conversation with `peer`, dropping everything from the
    /// previous one. History is loaded separately via the HTTP surface.
    pub fn switch_conversation(&self, peer: impl Into<String>) {
        let mut inner = self.inner.write();
        inner.open_conversation = Some(peer.into());
        inner.messages.clear();
    }

    pub fn close_conversation(&self) {
        let mut inner = self.inner.write();
        inner.open_conversation = None;
        inner.messages.clear();
    }

    /// Seed the open conversation with persisted history.
    pub fn load_history(&self, messages: Vec<WireMessage>) {
        let mut inner = self.inner.write();
        inner.messages = messages;
    }

    /// Apply a `message-posted` event. Messages outside the open
    /// conversation are dropped; re-delivery of a known id is a no-op.
    pub fn apply_posted(&self, message: WireMessage) {
        let mut inner = self.inner.write();

        let peer = match inner.open_conversation.as_deref() {
            Some(peer) => peer,
            None => return,
        };
        let in_scope = (message.from == peer && message.to == self.local_identity)
            || (message.from == self.local_identity && message.to == peer);
        if !in_scope {
            return;
        }

        if inner.messages.iter().any(|m| m.id == message.id) {
            return;
        }
        inner.messages.push(message);
    }

    /// Apply a `message-deleted` event. Unknown ids are tolerated.
    pub fn apply_deleted(&self, id: &str) {
        self.inner.write().messages.retain(|m| m.id != id);
    }
}

impl ReachabilityView for SessionStore {
    fn is_reachable(&self, identity: &str) -> bool {
        self.inner.read().presence.iter().any(|p| p == identity)
    }
}
