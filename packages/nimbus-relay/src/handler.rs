//! WebSocket connection handler.
//!
//! One task per connection: wait for registration, spawn the outbox
//! sender, route inbound events, clean up on disconnect. Signaling events
//! are point-to-point forwards; an unreachable target drops the event
//! silently — the sender's own presence view is what tells it whether a
//! peer is dialable.

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::auth::TokenVerifier;
use crate::presence::ConnectionHandle;
use crate::protocol::{ClientEvent, ServerEvent};
use crate::state::RelayState;

/// Handle a single WebSocket connection for its whole lifetime:
///
/// 1. Wait for a `register` event and verify its token
/// 2. Install the connection in the presence registry and broadcast the
///    updated reachable set to everyone
/// 3. Spawn a sender task draining the outbox channel
/// 4. Route inbound events until the connection closes
/// 5. Deregister and re-broadcast presence
pub async fn handle_websocket(socket: WebSocket, state: RelayState) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    // ── Step 1: Wait for Registration ─────────────────────────────────────

    let identity = loop {
        match ws_receiver.next().await {
            Some(Ok(Message::Text(text))) => {
                match serde_json::from_str::<ClientEvent>(&text) {
                    Ok(ClientEvent::Register { token }) => {
                        match state.tokens.verify(&token) {
                            Some(identity) => {
                                let ack = ServerEvent::Registered {
                                    identity: identity.clone(),
                                };
                                if ws_sender
                                    .send(Message::Text(serde_json::to_string(&ack).unwrap()))
                                    .await
                                    .is_err()
                                {
                                    return; // Connection closed
                                }
                                break identity;
                            }
                            None => {
                                let err = ServerEvent::Error {
                                    message: "Invalid or expired session token".to_string(),
                                };
                                let _ = ws_sender
                                    .send(Message::Text(serde_json::to_string(&err).unwrap()))
                                    .await;
                            }
                        }
                    }
                    Ok(ClientEvent::Ping) => {
                        let pong = ServerEvent::Pong;
                        let _ = ws_sender
                            .send(Message::Text(serde_json::to_string(&pong).unwrap()))
                            .await;
                    }
                    Ok(_) => {
                        let err = ServerEvent::Error {
                            message: "Must register before sending other events".to_string(),
                        };
                        let _ = ws_sender
                            .send(Message::Text(serde_json::to_string(&err).unwrap()))
                            .await;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to parse client event");
                        let err = ServerEvent::Error {
                            message: format!("Invalid event format: {}", e),
                        };
                        let _ = ws_sender
                            .send(Message::Text(serde_json::to_string(&err).unwrap()))
                            .await;
                    }
                }
            }
            Some(Ok(Message::Ping(data))) => {
                let _ = ws_sender.send(Message::Pong(data)).await;
            }
            Some(Ok(Message::Close(_))) | None => {
                return; // Connection closed before registration
            }
            _ => continue,
        }
    };

    // ── Step 2: Register in the Presence Registry ─────────────────────────

    let (tx, mut rx) = mpsc::unbounded_channel::<ServerEvent>();
    let connection_id = state.presence.next_connection_id();

    let replaced = state.presence.register(
        &identity,
        ConnectionHandle {
            id: connection_id,
            sender: tx,
        },
    );
    if let Some(old) = replaced {
        // One connection per identity: tell the previous session it lost
        // the slot. Its handler's cleanup is id-guarded, so it cannot
        // deregister us.
        let _ = old.sender.send(ServerEvent::Error {
            message: "Connection replaced by a newer session".to_string(),
        });
        tracing::info!(
            identity = identity.as_str(),
            replaced_connection = old.id,
            "Replaced existing connection"
        );
    }

    state.presence.broadcast_presence();
    tracing::info!(identity = identity.as_str(), "WebSocket registered");

    // ── Step 3: Spawn Sender Task ─────────────────────────────────────────

    let sender_task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match serde_json::to_string(&event) {
                Ok(json) => {
                    if ws_sender.send(Message::Text(json)).await.is_err() {
                        break; // Connection closed
                    }
                }
                Err(e) => {
                    tracing::error!("Failed to serialize server event: {}", e);
                }
            }
        }
    });

    // ── Step 4: Route Events ──────────────────────────────────────────────

    while let Some(result) = ws_receiver.next().await {
        match result {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientEvent>(&text) {
                Ok(event) => {
                    handle_client_event(&state, &identity, event);
                }
                Err(e) => {
                    tracing::warn!(
                        identity = identity.as_str(),
                        error = %e,
                        "Failed to parse client event"
                    );
                    state.presence.send_to(
                        &identity,
                        ServerEvent::Error {
                            message: format!("Invalid event format: {}", e),
                        },
                    );
                }
            },
            Ok(Message::Ping(_)) => {
                state.presence.send_to(&identity, ServerEvent::Pong);
            }
            Ok(Message::Close(_)) => {
                tracing::info!(identity = identity.as_str(), "Client sent close frame");
                break;
            }
            Err(e) => {
                tracing::warn!(identity = identity.as_str(), error = %e, "WebSocket error");
                break;
            }
            _ => {} // Binary, Pong — ignore
        }
    }

    // ── Step 5: Cleanup ───────────────────────────────────────────────────

    if state.presence.deregister(&identity, connection_id) {
        state.presence.broadcast_presence();
    }
    sender_task.abort();
    tracing::info!(identity = identity.as_str(), "WebSocket disconnected");
}

/// Route one parsed client event. Call signaling is a plain point-to-point
/// forward; the relay takes no part in the negotiation itself.
fn handle_client_event(state: &RelayState, from: &str, event: ClientEvent) {
    match event {
        ClientEvent::Register { .. } => {
            state.presence.send_to(
                from,
                ServerEvent::Error {
                    message: "Already registered".to_string(),
                },
            );
        }

        ClientEvent::CallInitiate { to, offer } => {
            let delivered = state.presence.send_to(
                &to,
                ServerEvent::CallInitiate {
                    from: from.to_string(),
                    offer,
                },
            );
            tracing::debug!(from = from, to = to.as_str(), delivered = delivered, "Forwarded call-initiate");
        }

        ClientEvent::CallAccept { to, answer } => {
            let delivered = state
                .presence
                .send_to(&to, ServerEvent::CallAccept { answer });
            tracing::debug!(from = from, to = to.as_str(), delivered = delivered, "Forwarded call-accept");
        }

        ClientEvent::CallCandidate { to, candidate } => {
            let delivered = state
                .presence
                .send_to(&to, ServerEvent::CallCandidate { candidate });
            tracing::trace!(from = from, to = to.as_str(), delivered = delivered, "Forwarded call-candidate");
        }

        ClientEvent::CallTerminate { to } => {
            let delivered = state.presence.send_to(&to, ServerEvent::CallTerminate);
            tracing::debug!(from = from, to = to.as_str(), delivered = delivered, "Forwarded call-terminate");
        }

        ClientEvent::Ping => {
            state.presence.send_to(from, ServerEvent::Pong);
        }
    }
}
