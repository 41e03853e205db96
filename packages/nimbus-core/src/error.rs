//! # Error Handling
//!
//! Error types for Nimbus Core, categorized by domain. Every user-visible
//! failure carries a distinct, human-readable message; infrastructure
//! failures are caught at their boundary and degrade gracefully rather
//! than tearing down the relay connection.

use thiserror::Error;

/// Result type alias for Nimbus Core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for Nimbus Core
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Relay / Transport Errors
    // ========================================================================

    /// Not connected to the relay
    #[error("Not connected to the relay server.")]
    NotConnected,

    /// The relay connection failed
    #[error("Relay connection failed: {0}")]
    ConnectionFailed(String),

    /// The target identity has no open relay connection
    #[error("{0} is unreachable right now.")]
    Unreachable(String),

    // ========================================================================
    // Message Errors
    // ========================================================================

    /// Message text was empty after trimming
    #[error("Message text is required.")]
    EmptyMessage,

    /// Referenced message does not exist
    #[error("Message not found.")]
    MessageNotFound,

    /// Actor does not own the resource
    #[error("You can only delete your own messages.")]
    Forbidden,

    // ========================================================================
    // Call Errors
    // ========================================================================

    /// Local capture device denied or unavailable
    #[error("Cannot access camera/microphone: {0}")]
    MediaUnavailable(String),

    /// Underlying connectivity establishment failed or dropped
    #[error("Call connection failed: {0}")]
    NegotiationFailed(String),

    /// A call session already exists for this identity
    #[error("Another call is already in progress.")]
    CallBusy,

    /// The requested transition is not valid from the current call state
    #[error("Invalid call state: {0}")]
    InvalidCallState(String),

    // ========================================================================
    // Internal Errors
    // ========================================================================

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Internal error (should not happen in normal operation)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether retrying (or user action like reconnecting) can resolve this.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::NotConnected
                | Error::ConnectionFailed(_)
                | Error::Unreachable(_)
                | Error::NegotiationFailed(_)
                | Error::CallBusy
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_visible_messages_are_distinct() {
        let errors = [
            Error::Unreachable("bob".into()).to_string(),
            Error::Forbidden.to_string(),
            Error::MediaUnavailable("permission denied".into()).to_string(),
            Error::NegotiationFailed("ice failed".into()).to_string(),
        ];
        for (i, a) in errors.iter().enumerate() {
            for b in errors.iter().skip(i + 1) {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn test_unreachable_names_the_target() {
        let err = Error::Unreachable("bob".into());
        assert!(err.to_string().contains("bob"));
    }

    #[test]
    fn test_recoverable_errors() {
        assert!(Error::Unreachable("bob".into()).is_recoverable());
        assert!(Error::CallBusy.is_recoverable());
        assert!(!Error::Forbidden.is_recoverable());
        assert!(!Error::MediaUnavailable("denied".into()).is_recoverable());
    }
}
