// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! The message surface: deliver, ask, reply and health.
//!
//! # Auth pipeline
//!
//! Bearer auth already ran in middleware. For each POST body the pipeline
//! continues, in order:
//!
//! 1. size ≤ `maxMessageSizeBytes`, else 413
//! 2. body parses and carries id/nonce/timestamp/mac, else 400
//! 3. `|now − timestamp| ≤ replayWindowSeconds` (inclusive edge), else 400
//! 4. nonce unseen inside the window, else 400 `replay`
//! 5. MAC verifies over `(id, type, payload, timestamp, nonce)`, else 400
//!
//! Only then does the handler look at routing (`to` must name this agent)
//! and queue or resolve.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    response::Json,
};
use chrono::Utc;
use serde_json::{json, Value};
use tracing::{debug, info};

use skein_wire::{IncomingKind, IncomingMessage, MeshMessage};

use super::{ApiError, AppState};

/// The post-bearer stages of the auth pipeline, in the order above.
fn authenticate(state: &AppState, body: &Bytes) -> Result<MeshMessage, ApiError> {
    if body.len() > state.security.max_message_size_bytes {
        return Err(ApiError::PayloadTooLarge);
    }

    let msg: MeshMessage = serde_json::from_slice(body)
        .map_err(|e| ApiError::BadRequest(format!("invalid message: {e}")))?;

    let now = Utc::now().timestamp_millis();
    let window_ms = state.security.replay_window_seconds as i64 * 1000;
    if (now - msg.timestamp).abs() > window_ms {
        return Err(ApiError::BadRequest(
            "timestamp outside replay window".to_string(),
        ));
    }

    if !state.nonces.check(&msg.nonce.to_string(), now) {
        return Err(ApiError::Replay);
    }

    if !msg.verify(&state.secret) {
        return Err(ApiError::BadRequest("mac verification failed".to_string()));
    }

    Ok(msg)
}

fn require_local(state: &AppState, msg: &MeshMessage) -> Result<(), ApiError> {
    if msg.to != state.agent {
        return Err(ApiError::NotFound(format!(
            "agent {:?} is not served here",
            msg.to
        )));
    }
    Ok(())
}

/// `POST /mesh/msg` — fire-and-forget delivery.
pub async fn deliver(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let msg = authenticate(&state, &body)?;
    require_local(&state, &msg)?;

    state
        .queue
        .enqueue(IncomingMessage::from_wire(&msg, IncomingKind::Deliver));
    state.observer.on_message(&msg.from, msg.id, &msg.payload);
    info!(from = %msg.from, id = %msg.id, "message queued");

    Ok(Json(json!({ "delivered": true, "messageId": msg.id })))
}

/// `POST /mesh/ask` — request half of a logical RPC. No blocking here: the
/// receiver queues the ask and later POSTs `/mesh/response` back to the
/// asker.
pub async fn ask(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let msg = authenticate(&state, &body)?;
    require_local(&state, &msg)?;

    state
        .queue
        .enqueue(IncomingMessage::from_wire(&msg, IncomingKind::Ask));
    state.observer.on_ask(&msg.from, msg.id, &msg.payload);
    info!(from = %msg.from, id = %msg.id, "ask queued");

    Ok(Json(json!({ "received": true, "messageId": msg.id })))
}

/// `POST /mesh/response` — reply delivery. A reply whose ask already timed
/// out is not an error; the sender just learns `resolved: false`.
pub async fn response(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let msg = authenticate(&state, &body)?;

    let Some(reply_to) = msg.reply_to else {
        return Err(ApiError::BadRequest(
            "replyTo is required for replies".to_string(),
        ));
    };

    let resolved = state.asks.resolve(reply_to, msg.payload.clone());
    debug!(from = %msg.from, %reply_to, resolved, "reply received");

    Ok(Json(json!({ "received": true, "resolved": resolved })))
}

/// `GET /mesh/health` — unauthenticated liveness probe.
pub async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "agent": state.agent,
        "status": "online",
        "timestamp": Utc::now().timestamp_millis(),
    }))
}
