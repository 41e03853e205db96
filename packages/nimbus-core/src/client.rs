//! # Relay Client
//!
//! Owns the WebSocket connection to the relay and the event loop that
//! feeds the session store and the call state machine. One connection per
//! identity; all event types multiplex over it, so events from one sender
//! arrive in send order.

use std::time::{Duration, Instant};

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};

use crate::call::CallManager;
use crate::error::{Error, Result};
use crate::relay::{RelayClientEvent, RelayServerEvent};
use crate::session::SessionStore;

/// A live connection to the relay server.
///
/// `outbound` accepts events to push to the relay; `inbound` yields events
/// the relay pushed to us. When the socket dies, the inbound channel
/// closes — that closure is the disconnect signal the session driver
/// turns into call teardown.
pub struct RelayConnection {
    pub outbound: mpsc::UnboundedSender<RelayClientEvent>,
    pub inbound: mpsc::UnboundedReceiver<RelayServerEvent>,
}

impl RelayConnection {
    /// Connect to the relay and register with a session token. The
    /// `registered` confirmation arrives as the first inbound event.
    pub async fn connect(url: &str, token: &str) -> Result<Self> {
        let (ws_stream, _) = connect_async(url)
            .await
            .map_err(|e| Error::ConnectionFailed(e.to_string()))?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        let register = RelayClientEvent::Register {
            token: token.to_string(),
        };
        let register_json = serde_json::to_string(&register)?;
        ws_sender
            .send(WsMessage::Text(register_json.into()))
            .await
            .map_err(|e| Error::ConnectionFailed(e.to_string()))?;

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<RelayClientEvent>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<RelayServerEvent>();

        // Sender task: drain the outbox onto the socket.
        tokio::spawn(async move {
            while let Some(event) = out_rx.recv().await {
                match serde_json::to_string(&event) {
                    Ok(json) => {
                        if ws_sender.send(WsMessage::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::error!("Failed to serialize client event: {}", e);
                    }
                }
            }
        });

        // Receiver task: parse inbound frames until the socket closes.
        // Dropping `in_tx` closes the inbound channel, which is how the
        // driver learns the relay is gone.
        tokio::spawn(async move {
            while let Some(result) = ws_receiver.next().await {
                match result {
                    Ok(WsMessage::Text(text)) => {
                        match serde_json::from_str::<RelayServerEvent>(&text) {
                            Ok(event) => {
                                if in_tx.send(event).is_err() {
                                    break;
                                }
                            }
                            Err(e) => {
                                tracing::warn!(error = %e, "Failed to parse relay event");
                            }
                        }
                    }
                    Ok(WsMessage::Close(_)) => {
                        tracing::info!("Relay sent close frame");
                        break;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Relay WebSocket error");
                        break;
                    }
                    _ => {}
                }
            }
        });

        Ok(Self {
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}

/// Routes relay events into the session store and the call machine, and
/// ticks the ring-timeout sweep. Runs until the inbound channel closes.
pub struct SessionDriver {
    store: SessionStore,
    calls: CallManager,
}

impl SessionDriver {
    pub fn new(store: SessionStore, calls: CallManager) -> Self {
        Self { store, calls }
    }

    /// Drive the session until the relay connection closes. On closure,
    /// every call session bound to this identity is forced to `ended`.
    pub async fn run(mut self, mut inbound: mpsc::UnboundedReceiver<RelayServerEvent>) {
        let mut ring_tick = tokio::time::interval(Duration::from_secs(1));
        ring_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                event = inbound.recv() => match event {
                    Some(event) => self.dispatch(event).await,
                    None => {
                        tracing::info!("Relay connection closed");
                        self.calls.handle_relay_disconnected().await;
                        self.store.set_call_status(self.calls.status());
                        break;
                    }
                },
                _ = ring_tick.tick() => {
                    self.calls.check_ring_timeout(Instant::now()).await;
                    self.store.set_call_status(self.calls.status());
                }
            }
        }
    }

    /// Apply one relay event.
    pub async fn dispatch(&mut self, event: RelayServerEvent) {
        match event {
            RelayServerEvent::Registered { identity } => {
                tracing::info!(identity = identity.as_str(), "Registered with relay");
            }

            RelayServerEvent::PresenceUpdate { identities } => {
                self.store.set_presence(identities);
            }

            RelayServerEvent::MessagePosted { message } => {
                self.store.apply_posted(message);
            }

            RelayServerEvent::MessageDeleted { id } => {
                self.store.apply_deleted(&id);
            }

            RelayServerEvent::CallInitiate { from, offer } => {
                // Errors here (media denied) already surfaced as call
                // events; the relay loop keeps running regardless.
                if let Err(err) = self.calls.handle_incoming(&from, offer).await {
                    tracing::warn!(error = %err, "Incoming call failed");
                }
            }

            RelayServerEvent::CallAccept { answer } => {
                if let Err(err) = self.calls.handle_accept(answer).await {
                    tracing::warn!(error = %err, "Call accept failed");
                }
            }

            RelayServerEvent::CallCandidate { candidate } => {
                if let Err(err) = self.calls.handle_candidate(candidate).await {
                    tracing::warn!(error = %err, "Candidate handling failed");
                }
            }

            RelayServerEvent::CallTerminate => {
                self.calls.handle_terminate().await;
            }

            RelayServerEvent::FriendRequestCreated { from } => {
                tracing::info!(from = from.as_str(), "Friend request received");
            }

            RelayServerEvent::Pong => {}

            RelayServerEvent::Error { message } => {
                tracing::warn!(message = message.as_str(), "Relay error");
            }
        }

        self.store.set_call_status(self.calls.status());
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub fn calls(&mut self) -> &mut CallManager {
        &mut self.calls
    }
}
