//! Relay protocol event definitions.
//!
//! The relay speaks JSON-over-WebSocket. Every frame is an internally
//! tagged event; chat delivery, call signaling, and presence updates all
//! share the one channel per identity, which is what gives per-pair FIFO
//! ordering.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Shared payload types ──────────────────────────────────────────────────────

/// A negotiation description (offer or answer) exchanged between two peers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    /// "offer" or "answer"
    pub sdp_type: String,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: "offer".to_string(),
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: "answer".to_string(),
            sdp: sdp.into(),
        }
    }
}

/// One proposed network path for direct-session establishment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,
    pub sdp_mid: Option<String>,
    pub sdp_m_line_index: Option<u16>,
}

/// A chat message as it travels over the relay and the HTTP surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireMessage {
    pub id: String,
    pub from: String,
    pub to: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

// ── Client → Relay ────────────────────────────────────────────────────────────

/// Events sent from a client to the relay server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientEvent {
    /// Bind this connection to an identity. Must be the first frame; the
    /// token was issued by the auth collaborator and is verified here.
    Register { token: String },

    /// Start a call: deliver the offer to the callee.
    CallInitiate {
        to: String,
        offer: SessionDescription,
    },

    /// Accept a call: deliver the answer back to the caller.
    CallAccept {
        to: String,
        answer: SessionDescription,
    },

    /// Forward one network candidate to the other participant.
    CallCandidate { to: String, candidate: IceCandidate },

    /// Tear the call down (hangup, reject, busy).
    CallTerminate { to: String },

    /// Keep-alive.
    Ping,
}

// ── Relay → Client ────────────────────────────────────────────────────────────

/// Events pushed from the relay server to a client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerEvent {
    /// Registration succeeded; the connection is now addressable.
    Registered { identity: String },

    /// The full set of currently reachable identities. Always the complete
    /// list, never a diff, so late joiners get a consistent view.
    PresenceUpdate { identities: Vec<String> },

    /// A message was persisted and the recipient is reachable.
    MessagePosted { message: WireMessage },

    /// A message tombstone; the persisted record is already gone.
    MessageDeleted { id: String },

    /// An incoming call offer.
    CallInitiate {
        from: String,
        offer: SessionDescription,
    },

    /// The callee accepted; install this answer.
    CallAccept { answer: SessionDescription },

    /// One network candidate from the other participant.
    CallCandidate { candidate: IceCandidate },

    /// The other side ended the call. Receivers never echo this back.
    CallTerminate,

    /// Someone sent the recipient a friend request. Informational only.
    FriendRequestCreated { from: String },

    /// Keep-alive response.
    Pong,

    /// Protocol-level failure on this connection.
    Error { message: String },
}
