//! Session token verification.
//!
//! Authentication itself lives upstream: something issues an opaque token
//! bound to a user id, and the relay only ever asks "whose token is this?".
//! `TokenIssuer` is that contract. `MemoryTokenIssuer` backs the bundled
//! deployment: `POST /api/session` issues a token, the WebSocket handshake
//! and every HTTP call verify it.

use std::sync::Arc;

use dashmap::DashMap;
use rand::RngCore;

/// Verifies opaque session tokens. Issuance is only on the in-memory
/// implementation; an external identity provider would implement `verify`
/// against its own session records.
pub trait TokenVerifier: Send + Sync {
    /// Resolve a token to the identity it was issued for.
    fn verify(&self, token: &str) -> Option<String>;
}

/// In-memory token issuance and verification.
#[derive(Default)]
pub struct MemoryTokenIssuer {
    tokens: DashMap<String, String>,
}

impl MemoryTokenIssuer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Issue a fresh token for an identity. Tokens are 32 random bytes,
    /// hex-encoded; the raw value is the only copy.
    pub fn issue(&self, identity: &str) -> String {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        let token = hex::encode(bytes);
        self.tokens.insert(token.clone(), identity.to_string());
        tracing::debug!(identity = identity, "Issued session token");
        token
    }

    pub fn revoke(&self, token: &str) -> bool {
        self.tokens.remove(token).is_some()
    }
}

impl TokenVerifier for MemoryTokenIssuer {
    fn verify(&self, token: &str) -> Option<String> {
        self.tokens.get(token).map(|entry| entry.value().clone())
    }
}
