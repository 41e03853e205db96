//! Point-to-point chat delivery.
//!
//! `post` and `remove` write to the store first and relay second, so a
//! client that queries storage never sees a relayed event referring to a
//! record that does not exist. Relay delivery is best-effort: the persisted
//! record is authoritative, the push is a hint.

use std::sync::Arc;

use thiserror::Error;

use crate::presence::PresenceRegistry;
use crate::protocol::{ServerEvent, WireMessage};
use crate::store::MessageStore;

/// Failures surfaced by the delivery channel. Unreachable targets are not
/// among them: an offline recipient just means no push happens.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("Message text is required.")]
    EmptyText,

    #[error("Message not found.")]
    NotFound,

    #[error("Only the sender of a message can delete it.")]
    Forbidden,
}

/// Chat delivery over store + relay.
#[derive(Clone)]
pub struct DeliveryChannel {
    store: Arc<dyn MessageStore>,
    presence: PresenceRegistry,
}

impl DeliveryChannel {
    pub fn new(store: Arc<dyn MessageStore>, presence: PresenceRegistry) -> Self {
        Self { store, presence }
    }

    /// Persist a message, then push it to the recipient if reachable.
    pub fn post(&self, from: &str, to: &str, text: &str) -> Result<WireMessage, DeliveryError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(DeliveryError::EmptyText);
        }

        let message = self.store.create(from, to, text);

        let delivered = self.presence.send_to(
            to,
            ServerEvent::MessagePosted {
                message: message.clone(),
            },
        );
        tracing::debug!(
            id = message.id.as_str(),
            from = from,
            to = to,
            delivered = delivered,
            "Posted message"
        );

        Ok(message)
    }

    /// Delete a message. Only its creator may; the other participant gets
    /// a tombstone notice if reachable.
    pub fn remove(&self, id: &str, requester: &str) -> Result<(), DeliveryError> {
        let message = self.store.get(id).ok_or(DeliveryError::NotFound)?;

        if message.from != requester {
            return Err(DeliveryError::Forbidden);
        }

        self.store.delete(id);

        let delivered = self.presence.send_to(
            &message.to,
            ServerEvent::MessageDeleted { id: id.to_string() },
        );
        tracing::debug!(
            id = id,
            requester = requester,
            delivered = delivered,
            "Deleted message"
        );

        Ok(())
    }

    /// Conversation history for a pair, in creation order.
    pub fn history(&self, a: &str, b: &str) -> Vec<WireMessage> {
        self.store.history(a, b)
    }
}
