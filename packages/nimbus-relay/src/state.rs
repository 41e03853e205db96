//! Server state.
//!
//! Wires the presence registry, delivery channel, stores, token issuer,
//! and list cache into one cloneable handle shared by the WebSocket and
//! HTTP surfaces. Everything here is injected at startup — there are no
//! module-level globals, so tests can stand up a whole relay in-process.

use std::sync::Arc;
use std::time::Duration;

use crate::auth::MemoryTokenIssuer;
use crate::cache::ListCache;
use crate::delivery::DeliveryChannel;
use crate::presence::PresenceRegistry;
use crate::store::{FriendStore, MemoryStore, MessageStore};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub port: u16,
    /// TTL for memoized friend-list reads.
    pub friend_cache_ttl_secs: u64,
    /// How often the cache sweep task runs.
    pub cache_sweep_interval_secs: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            friend_cache_ttl_secs: 300,
            cache_sweep_interval_secs: 300,
        }
    }
}

/// Shared server state.
#[derive(Clone)]
pub struct RelayState {
    pub presence: PresenceRegistry,
    pub delivery: DeliveryChannel,
    pub friends: Arc<dyn FriendStore>,
    pub tokens: Arc<MemoryTokenIssuer>,
    pub friend_cache: Arc<ListCache>,
    pub config: RelayConfig,
}

impl RelayState {
    /// Build a relay backed by the bundled in-memory store and issuer.
    pub fn new(config: RelayConfig) -> Self {
        let store = MemoryStore::shared();
        Self::with_store(config, store.clone() as Arc<dyn MessageStore>, store)
    }

    /// Build a relay around externally provided stores.
    pub fn with_store(
        config: RelayConfig,
        messages: Arc<dyn MessageStore>,
        friends: Arc<dyn FriendStore>,
    ) -> Self {
        let presence = PresenceRegistry::new();
        let delivery = DeliveryChannel::new(messages, presence.clone());
        let friend_cache = Arc::new(ListCache::new(Duration::from_secs(
            config.friend_cache_ttl_secs,
        )));

        Self {
            presence,
            delivery,
            friends,
            tokens: MemoryTokenIssuer::shared(),
            friend_cache,
            config,
        }
    }
}
