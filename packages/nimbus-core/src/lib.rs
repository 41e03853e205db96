//! # Nimbus Core
//!
//! Client core library for the Nimbus messenger. The relay server tracks
//! who is reachable and forwards events between identities; this crate
//! holds everything that runs on the client side of that channel:
//!
//! - **Call state machine** ([`call`]): one-to-one audio/video negotiation,
//!   including the candidate-before-description buffering and idempotent
//!   teardown that make it survive network races.
//! - **Session store** ([`session`]): snapshot reads of presence, call
//!   status, and the open conversation's messages, applied idempotently.
//! - **Relay protocol** ([`relay`]): client-side mirror of the relay's
//!   wire events.
//! - **Relay client** ([`client`]): the WebSocket connection and the
//!   event loop gluing the pieces together.
//!
//! The negotiation resource and local media capture sit behind traits
//! ([`call::NegotiationHandle`], [`call::MediaSource`]), so the state
//! machine never touches a platform API directly and is fully unit
//! testable with fakes.

pub mod call;
pub mod client;
pub mod error;
pub mod relay;
pub mod session;

pub use call::{CallConfig, CallEvent, CallManager, CallStatus, NegotiationRole};
pub use client::{RelayConnection, SessionDriver};
pub use error::{Error, Result};
pub use relay::{IceCandidate, RelayClientEvent, RelayServerEvent, SessionDescription, WireMessage};
pub use session::SessionStore;
