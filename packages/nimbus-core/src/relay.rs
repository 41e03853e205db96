//! # Relay Protocol
//!
//! Client-side mirror of the relay server's wire protocol.
//! Must match the relay's `ClientEvent` / `ServerEvent` enums.
//!
//! Everything rides one JSON-over-WebSocket channel per identity, which is
//! what gives per sender→target FIFO ordering. There is no ordering
//! guarantee across different pairs, and a presence update can race a
//! same-tick call event — consumers must tolerate a `call-initiate` that
//! lands just before the presence update announcing its sender.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Shared payload types ──────────────────────────────────────────────────────

/// A negotiation description (offer or answer) exchanged between peers.
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

/// A chat message as delivered over the relay and the HTTP surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireMessage {
    pub id: String,
    pub from: String,
    pub to: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

// ── Client → Relay ────────────────────────────────────────────────────────────

/// Events sent from this client to the relay server.
/// Must match the relay server's `ClientEvent` enum.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum RelayClientEvent {
    Register { token: String },
    CallInitiate {
        to: String,
        offer: SessionDescription,
    },
    CallAccept {
        to: String,
        answer: SessionDescription,
    },
    CallCandidate { to: String, candidate: IceCandidate },
    CallTerminate { to: String },
    Ping,
}

// ── Relay → Client ────────────────────────────────────────────────────────────

/// Events received from the relay server.
/// Must match the relay server's `ServerEvent` enum.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum RelayServerEvent {
    Registered { identity: String },
    PresenceUpdate { identities: Vec<String> },
    MessagePosted { message: WireMessage },
    MessageDeleted { id: String },
    CallInitiate {
        from: String,
        offer: SessionDescription,
    },
    CallAccept { answer: SessionDescription },
    CallCandidate { candidate: IceCandidate },
    CallTerminate,
    FriendRequestCreated { from: String },
    Pong,
    Error { message: String },
}

/// Relay connection status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayStatus {
    Disconnected,
    Connecting,
    Connected,
    Registered,
    Error(String),
}
