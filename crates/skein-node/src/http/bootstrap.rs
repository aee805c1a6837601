// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! The bootstrap surface: how new hosts join and existing hosts stay current.
//!
//! `join` is unauthenticated at the transport level — the invite token in
//! the body **is** the credential. Its checks run in a fixed order so every
//! failure maps to one unambiguous status:
//!
//! | check                                | status |
//! |--------------------------------------|--------|
//! | no pinned root key / no manifest     | 503    |
//! | token malformed / wrong shape        | 400    |
//! | signature invalid                    | 401    |
//! | mesh or node-key mismatch, window, revoked | 403 |
//! | local manifest older than `minManifestVersion` | 412 |
//! | `jti` already consumed (strict mode) | 409    |
//!
//! `head` and `manifest/:version` are bearer-authenticated GETs. Historical
//! manifest versions are not retained: anything but `latest` or the current
//! version is 404.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use axum::{
    extract::{Path, State},
    response::Json,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};
use uuid::Uuid;

use skein_trust::invite::decode_invite;
use skein_trust::manifest::{decode_manifest, manifest_hash, ManifestPayload};
use skein_trust::{Envelope, TrustError};

use super::{ApiError, AppState};

/// How often joined hosts are told to poll for manifest updates.
pub const SYNC_INTERVAL_SECONDS: u64 = 300;

// ── Invite consumption ────────────────────────────────────────────────────────

/// Single-use enforcement for invite `jti`s.
///
/// Strictness is a deployment decision, so the surface only consults this
/// predicate. The default [`OpenLedger`] remembers nothing and reports
/// nothing consumed; [`MemoryLedger`] gives strict single-use per process.
pub trait InviteLedger: Send + Sync {
    fn is_consumed(&self, jti: &Uuid) -> bool;
    fn consume(&self, jti: &Uuid);
}

/// Default ledger: every invite is usable any number of times until expiry.
#[derive(Debug, Default, Clone, Copy)]
pub struct OpenLedger;

impl InviteLedger for OpenLedger {
    fn is_consumed(&self, _jti: &Uuid) -> bool {
        false
    }
    fn consume(&self, _jti: &Uuid) {}
}

/// Strict in-process ledger: each `jti` joins once per agent lifetime.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    consumed: Mutex<HashSet<Uuid>>,
}

impl InviteLedger for MemoryLedger {
    fn is_consumed(&self, jti: &Uuid) -> bool {
        self.consumed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(jti)
    }

    fn consume(&self, jti: &Uuid) {
        self.consumed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(*jti);
    }
}

// ── Join ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRequest {
    pub token: String,
    /// base64 of the joining host's enrollment public key; must match the
    /// key the invite was bound to.
    pub node_pub_key: String,
}

/// `POST /mesh/bootstrap/join`.
pub async fn join(
    State(state): State<Arc<AppState>>,
    body: axum::body::Bytes,
) -> Result<Json<Value>, ApiError> {
    let req: JoinRequest = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("invalid join request: {e}")))?;

    let Some(root_pub) = state.root_pub else {
        return Err(ApiError::Unavailable(
            "trust root not configured on this host".to_string(),
        ));
    };

    let invite = match decode_invite(&root_pub, &req.token) {
        Ok(invite) => invite,
        Err(TrustError::BadSignature) => return Err(ApiError::Unauthorized),
        Err(e) => return Err(ApiError::BadRequest(e.to_string())),
    };

    if invite.mesh != state.mesh {
        warn!(token_mesh = %invite.mesh, "join refused: invite is for a different mesh");
        return Err(ApiError::Forbidden(
            "invite is for a different mesh".to_string(),
        ));
    }
    if invite.node_pub_key != req.node_pub_key {
        warn!(agent = %invite.agent, "join refused: node key does not match invite");
        return Err(ApiError::Forbidden(
            "node key does not match invite".to_string(),
        ));
    }

    let now = Utc::now().timestamp_millis();
    invite
        .check_window(now)
        .map_err(|e| ApiError::Forbidden(e.to_string()))?;

    // Revocations and min-version need the local manifest; load it once.
    let current = load_current(&state)?;

    if let Some((_, payload)) = &current {
        if payload
            .revocations
            .invite_jti
            .contains(&invite.jti.to_string())
        {
            return Err(ApiError::Forbidden("invite has been revoked".to_string()));
        }
        if payload.revocations.agents.contains(&invite.agent) {
            return Err(ApiError::Forbidden(format!(
                "agent {:?} has been revoked",
                invite.agent
            )));
        }
    }

    if let Some(min) = invite.min_manifest_version {
        let local = current.as_ref().map(|(_, p)| p.version).unwrap_or(0);
        if local < min {
            return Err(ApiError::PreconditionFailed(format!(
                "local manifest v{local} is older than required v{min}"
            )));
        }
    }

    if state.ledger.is_consumed(&invite.jti) {
        return Err(ApiError::Conflict("invite has already been used".to_string()));
    }
    state.ledger.consume(&invite.jti);

    let Some((envelope, payload)) = current else {
        return Err(ApiError::Unavailable(
            "no manifest available on this host".to_string(),
        ));
    };

    let base = state.self_url.clone().unwrap_or_default();
    info!(agent = %invite.agent, jti = %invite.jti, version = payload.version, "join accepted");

    Ok(Json(json!({
        "ok": true,
        "mesh": state.mesh,
        "agent": invite.agent,
        "now": now,
        "manifest": envelope,
        "sync": {
            "headUrl": format!("{base}/mesh/bootstrap/head"),
            "manifestUrlTemplate": format!("{base}/mesh/bootstrap/manifest/{{version}}"),
            "intervalSeconds": SYNC_INTERVAL_SECONDS,
        },
    })))
}

// ── Head / fetch ──────────────────────────────────────────────────────────────

/// `GET /mesh/bootstrap/head` — version pointer for cheap polling.
pub async fn head(State(state): State<Arc<AppState>>) -> Result<Json<Value>, ApiError> {
    let Some((envelope, payload)) = load_current(&state)? else {
        return Err(ApiError::Unavailable(
            "no manifest available on this host".to_string(),
        ));
    };

    Ok(Json(json!({
        "mesh": payload.mesh,
        "version": payload.version,
        "manifestHash": manifest_hash(&envelope),
        "issuedAt": payload.issued_at,
    })))
}

/// `GET /mesh/bootstrap/manifest/:version` — only `latest` (or the exact
/// current version) is served; history is not retained.
pub async fn manifest(
    State(state): State<Arc<AppState>>,
    Path(version): Path<String>,
) -> Result<Json<Envelope>, ApiError> {
    let Some((envelope, payload)) = load_current(&state)? else {
        return Err(ApiError::Unavailable(
            "no manifest available on this host".to_string(),
        ));
    };

    if version == "latest" {
        return Ok(Json(envelope));
    }

    let requested: u64 = version
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("invalid manifest version {version:?}")))?;

    if requested == payload.version {
        Ok(Json(envelope))
    } else {
        Err(ApiError::NotFound(format!(
            "manifest version {requested} is not retained"
        )))
    }
}

fn load_current(state: &AppState) -> Result<Option<(Envelope, ManifestPayload)>, ApiError> {
    let envelope = state
        .manifests
        .load()
        .map_err(|e| ApiError::Unavailable(format!("manifest store unreadable: {e}")))?;
    match envelope {
        Some(env) => {
            let payload = decode_manifest(&env)
                .map_err(|e| ApiError::Unavailable(format!("stored manifest invalid: {e}")))?;
            Ok(Some((env, payload)))
        }
        None => Ok(None),
    }
}

// ── Unit tests ────────────────────────────────────────────────────────────────
