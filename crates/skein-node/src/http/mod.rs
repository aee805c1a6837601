// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! The HTTP surface of an agent.
//!
//! Two route groups share one listener:
//!
//! - the **message surface** (`/mesh/msg`, `/mesh/ask`, `/mesh/response`,
//!   `/mesh/health`) — see [`message`],
//! - the **bootstrap surface** (`/mesh/bootstrap/*`) — see [`bootstrap`].
//!
//! Everything except `/mesh/health` and `/mesh/bootstrap/join` sits behind
//! bearer auth: the presented token must equal the base64 transport secret,
//! compared in constant time. Join authenticates with the invite token in
//! its body instead; health is public by design so a peer can probe
//! liveness without holding the secret.

use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, Request, State},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use ed25519_dalek::VerifyingKey;
use serde_json::json;
use subtle::ConstantTimeEq;

use skein_trust::manifest::{ManifestStore, SecurityParams};

use crate::ask::AskRegistry;
use crate::nonce::NonceCache;
use crate::observer::MeshObserver;
use crate::queue::MessageQueue;

pub mod bootstrap;
pub mod message;

pub use bootstrap::{InviteLedger, MemoryLedger, OpenLedger};

/// Everything the handlers need, shared behind an `Arc`.
pub struct AppState {
    /// This agent's name — messages with a different `to` are refused.
    pub agent: String,
    pub mesh: String,
    /// Raw 32-byte transport secret, for the message MAC.
    pub secret: Vec<u8>,
    /// base64 of the secret — the expected bearer token.
    pub bearer: String,
    pub security: SecurityParams,
    pub nonces: Arc<NonceCache>,
    pub queue: Arc<MessageQueue>,
    pub asks: AskRegistry,
    pub observer: Arc<dyn MeshObserver>,
    /// Advertised base URL of this agent, if registered; used to build the
    /// sync pointers in bootstrap responses.
    pub self_url: Option<String>,
    /// Pinned root public key. `None` means this host cannot answer joins.
    pub root_pub: Option<VerifyingKey>,
    pub manifests: ManifestStore,
    pub ledger: Arc<dyn InviteLedger>,
}

/// Build the complete router for one agent.
pub fn router(state: Arc<AppState>) -> Router {
    // Exact-size messages must reach the handler; give axum's own limit
    // some slack and enforce the real cap in the auth pipeline.
    let body_limit = state.security.max_message_size_bytes + 4096;

    let authed = Router::new()
        .route("/mesh/msg", post(message::deliver))
        .route("/mesh/ask", post(message::ask))
        .route("/mesh/response", post(message::response))
        .route("/mesh/bootstrap/head", get(bootstrap::head))
        .route("/mesh/bootstrap/manifest/:version", get(bootstrap::manifest))
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            require_bearer,
        ));

    Router::new()
        .route("/mesh/health", get(message::health))
        .route("/mesh/bootstrap/join", post(bootstrap::join))
        .merge(authed)
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

// ── Bearer auth ───────────────────────────────────────────────────────────────

async fn require_bearer(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Response {
    let presented = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    match presented {
        Some(token) if token_matches(token, &state.bearer) => next.run(req).await,
        _ => ApiError::Unauthorized.into_response(),
    }
}

fn token_matches(presented: &str, expected: &str) -> bool {
    let a = presented.as_bytes();
    let b = expected.as_bytes();
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}

// ── Error adapter ─────────────────────────────────────────────────────────────

/// HTTP-visible errors, one variant per taxonomy kind. Each renders as
/// `{"error": "<human string>"}` with the matching status.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    /// Duplicate nonce inside the replay window. Always 400, and the body
    /// always contains the word "replay".
    Replay,
    Unauthorized,
    Forbidden(String),
    NotFound(String),
    Conflict(String),
    PayloadTooLarge,
    PreconditionFailed(String),
    Unavailable(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) | ApiError::Replay => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::PreconditionFailed(_) => StatusCode::PRECONDITION_FAILED,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    fn message(&self) -> String {
        match self {
            ApiError::BadRequest(m)
            | ApiError::Forbidden(m)
            | ApiError::NotFound(m)
            | ApiError::Conflict(m)
            | ApiError::PreconditionFailed(m)
            | ApiError::Unavailable(m) => m.clone(),
            ApiError::Replay => "replay detected".to_string(),
            ApiError::Unauthorized => "invalid bearer token".to_string(),
            ApiError::PayloadTooLarge => "message exceeds size limit".to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({ "error": self.message() }));
        (self.status(), body).into_response()
    }
}

// ── Unit tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_match_requires_exact_value() {
        assert!(token_matches("abc123", "abc123"));
        assert!(!token_matches("abc124", "abc123"));
        assert!(!token_matches("abc1230", "abc123"));
        assert!(!token_matches("", "abc123"));
    }

    #[test]
    fn replay_error_mentions_replay() {
        assert!(ApiError::Replay.message().contains("replay"));
        assert_eq!(ApiError::Replay.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn status_mapping_follows_taxonomy() {
        assert_eq!(ApiError::Unauthorized.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            ApiError::Forbidden("x".into()).status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ApiError::NotFound("x".into()).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(ApiError::Conflict("x".into()).status(), StatusCode::CONFLICT);
        assert_eq!(
            ApiError::PayloadTooLarge.status(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
        assert_eq!(
            ApiError::PreconditionFailed("x".into()).status(),
            StatusCode::PRECONDITION_FAILED
        );
        assert_eq!(
            ApiError::Unavailable("x".into()).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
