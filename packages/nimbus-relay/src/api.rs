//! HTTP API endpoints.
//!
//! Thin REST surface over the delivery channel and friend store. The
//! relayed push is always best-effort; these endpoints own the
//! authoritative reads and writes.

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::json;

use crate::auth::TokenVerifier;
use crate::delivery::DeliveryError;
use crate::protocol::ServerEvent;
use crate::state::RelayState;

/// Resolve the Bearer token on a request to an identity.
fn authenticate(state: &RelayState, headers: &HeaderMap) -> Result<String, StatusCode> {
    let token = headers
        .get("authorization")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or(StatusCode::UNAUTHORIZED)?;

    state.tokens.verify(token).ok_or(StatusCode::UNAUTHORIZED)
}

fn delivery_error_response(err: DeliveryError) -> axum::response::Response {
    let status = match err {
        DeliveryError::EmptyText => StatusCode::BAD_REQUEST,
        DeliveryError::NotFound => StatusCode::NOT_FOUND,
        DeliveryError::Forbidden => StatusCode::FORBIDDEN,
    };
    (status, Json(json!({ "error": err.to_string() }))).into_response()
}

// ── Session ───────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    pub user_id: String,
}

/// Issue a session token for an upstream-authenticated user id.
///
/// POST /api/session
/// Body: { "user_id": "alice" }
pub async fn create_session(
    State(state): State<RelayState>,
    Json(request): Json<CreateSessionRequest>,
) -> impl IntoResponse {
    if request.user_id.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "user_id is required" })),
        )
            .into_response();
    }

    let token = state.tokens.issue(request.user_id.trim());
    (
        StatusCode::CREATED,
        Json(json!({ "identity": request.user_id.trim(), "token": token })),
    )
        .into_response()
}

// ── Chat ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct PostMessageRequest {
    pub text: String,
}

/// Send a message to another user.
///
/// POST /api/chat/:to
/// Body: { "text": "hi" }
pub async fn post_message(
    State(state): State<RelayState>,
    Path(to): Path<String>,
    headers: HeaderMap,
    Json(request): Json<PostMessageRequest>,
) -> impl IntoResponse {
    let from = match authenticate(&state, &headers) {
        Ok(identity) => identity,
        Err(status) => return status.into_response(),
    };

    match state.delivery.post(&from, &to, &request.text) {
        Ok(message) => (StatusCode::CREATED, Json(message)).into_response(),
        Err(err) => delivery_error_response(err),
    }
}

/// Conversation history with another user, oldest first.
///
/// GET /api/chat/:with
pub async fn get_history(
    State(state): State<RelayState>,
    Path(with): Path<String>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let me = match authenticate(&state, &headers) {
        Ok(identity) => identity,
        Err(status) => return status.into_response(),
    };

    Json(state.delivery.history(&me, &with)).into_response()
}

/// Delete one of your own messages.
///
/// DELETE /api/chat/messages/:id
pub async fn delete_message(
    State(state): State<RelayState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let me = match authenticate(&state, &headers) {
        Ok(identity) => identity,
        Err(status) => return status.into_response(),
    };

    match state.delivery.remove(&id, &me) {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({ "message": "Message deleted successfully" })),
        )
            .into_response(),
        Err(err) => delivery_error_response(err),
    }
}

// ── Friends ───────────────────────────────────────────────────────────────────

/// Send a friend request. The recipient gets a relay notice if reachable.
///
/// POST /api/friends/:to/request
pub async fn create_friend_request(
    State(state): State<RelayState>,
    Path(to): Path<String>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let from = match authenticate(&state, &headers) {
        Ok(identity) => identity,
        Err(status) => return status.into_response(),
    };

    if from == to {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "Cannot send a friend request to yourself" })),
        )
            .into_response();
    }

    if !state.friends.create_request(&from, &to) {
        return (
            StatusCode::CONFLICT,
            Json(json!({ "error": "A friend request is already pending" })),
        )
            .into_response();
    }

    // The write changed the recipient's pending list; drop the memoized read.
    state.friend_cache.invalidate(&friend_requests_key(&to));

    let delivered = state
        .presence
        .send_to(&to, ServerEvent::FriendRequestCreated { from: from.clone() });
    tracing::debug!(from = from.as_str(), to = to.as_str(), delivered = delivered, "Friend request created");

    (StatusCode::CREATED, Json(json!({ "from": from, "to": to }))).into_response()
}

/// Pending friend requests addressed to the caller. Cache-backed read.
///
/// GET /api/friends/requests
pub async fn get_friend_requests(
    State(state): State<RelayState>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let me = match authenticate(&state, &headers) {
        Ok(identity) => identity,
        Err(status) => return status.into_response(),
    };

    let key = friend_requests_key(&me);
    if let Some(cached) = state.friend_cache.get(&key) {
        return Json(cached).into_response();
    }

    let pending: Vec<serde_json::Value> = state
        .friends
        .pending_for(&me)
        .into_iter()
        .map(|request| {
            json!({
                "from": request.from,
                "created_at": request.created_at,
            })
        })
        .collect();
    let value = serde_json::Value::Array(pending);

    state.friend_cache.put(&key, value.clone());
    Json(value).into_response()
}

fn friend_requests_key(identity: &str) -> String {
    format!("friend-requests:{}", identity)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::RelayConfig;

    fn bearer(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", format!("Bearer {}", token).parse().unwrap());
        headers
    }

    #[test]
    fn test_authenticate_accepts_valid_bearer_token() {
        let state = RelayState::new(RelayConfig::default());
        let token = state.tokens.issue("alice");

        assert_eq!(authenticate(&state, &bearer(&token)).unwrap(), "alice");
    }

    #[test]
    fn test_authenticate_rejects_missing_header() {
        let state = RelayState::new(RelayConfig::default());
        assert_eq!(
            authenticate(&state, &HeaderMap::new()),
            Err(StatusCode::UNAUTHORIZED)
        );
    }

    #[test]
    fn test_authenticate_rejects_unknown_token() {
        let state = RelayState::new(RelayConfig::default());
        assert_eq!(
            authenticate(&state, &bearer("bogus")),
            Err(StatusCode::UNAUTHORIZED)
        );
    }

    #[test]
    fn test_friend_request_invalidates_cached_list() {
        let state = RelayState::new(RelayConfig::default());
        let key = friend_requests_key("bob");
        state.friend_cache.put(&key, json!([]));

        assert!(state.friends.create_request("alice", "bob"));
        state.friend_cache.invalidate(&key);

        assert!(state.friend_cache.get(&key).is_none());
        assert_eq!(state.friends.pending_for("bob").len(), 1);
    }
}
