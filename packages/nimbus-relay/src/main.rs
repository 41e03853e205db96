//! Nimbus Relay Server
//!
//! A WebSocket relay for the Nimbus messenger:
//!
//! 1. **Presence**: every connected identity is broadcast to every peer as
//!    a full reachable list, on each connect and disconnect.
//!
//! 2. **Chat delivery**: messages persist first, then push to the
//!    recipient in real time if they are online.
//!
//! 3. **Call signaling**: offers, answers, network candidates, and
//!    teardown notices forwarded point-to-point between two peers.
//!
//! The relay holds no call state: negotiation lives entirely in the
//! clients, the server only routes events between identities.

mod api;
mod auth;
mod cache;
mod delivery;
mod handler;
mod presence;
mod protocol;
mod state;
mod store;

use std::time::Duration;

use axum::{
    extract::{State, WebSocketUpgrade},
    http::Method,
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use clap::Parser;
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use state::{RelayConfig, RelayState};

// ── CLI Arguments ─────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "nimbus-relay", version, about = "Nimbus presence and signaling relay")]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value_t = 8080, env = "RELAY_PORT")]
    port: u16,

    /// Friend-list cache TTL in seconds
    #[arg(long, default_value_t = 300, env = "FRIEND_CACHE_TTL_SECS")]
    friend_cache_ttl_secs: u64,

    /// Cache sweep interval in seconds
    #[arg(long, default_value_t = 300, env = "CACHE_SWEEP_INTERVAL_SECS")]
    cache_sweep_interval_secs: u64,
}

// ── Entry Point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "nimbus_relay=info,tower_http=info".into()),
        )
        .init();

    let args = Args::parse();

    let config = RelayConfig {
        port: args.port,
        friend_cache_ttl_secs: args.friend_cache_ttl_secs,
        cache_sweep_interval_secs: args.cache_sweep_interval_secs,
    };

    let state = RelayState::new(config);

    // Periodic cache sweep
    let sweep_state = state.clone();
    let sweep_interval = state.config.cache_sweep_interval_secs;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(sweep_interval));
        loop {
            interval.tick().await;
            sweep_state.friend_cache.sweep();
        }
    });

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers(Any);

    let app = Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .route("/stats", get(stats_handler))
        .route("/api/session", post(api::create_session))
        .route("/api/chat/messages/:id", delete(api::delete_message))
        .route("/api/chat/:peer", post(api::post_message).get(api::get_history))
        .route("/api/friends/:to/request", post(api::create_friend_request))
        .route("/api/friends/requests", get(api::get_friend_requests))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = format!("0.0.0.0:{}", args.port);
    tracing::info!("Nimbus relay server starting on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind address");

    axum::serve(listener, app).await.expect("Server error");
}

// ── Route Handlers ────────────────────────────────────────────────────────────

/// WebSocket upgrade handler for client connections.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<RelayState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handler::handle_websocket(socket, state))
}

/// Health check endpoint.
async fn health_handler() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "nimbus-relay",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Statistics endpoint.
async fn stats_handler(State(state): State<RelayState>) -> impl IntoResponse {
    Json(json!({
        "online_clients": state.presence.connected_count(),
        "cached_lists": state.friend_cache.len(),
    }))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
