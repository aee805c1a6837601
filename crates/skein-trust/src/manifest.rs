// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Signed manifests — the versioned source of truth for a mesh.
//!
//! A manifest snapshot carries everything a host needs to participate: the
//! transport secret, the peer roster, the security parameters and the
//! revocation lists. It travels inside a signed [`Envelope`]; hosts pin the
//! root public key and only ever adopt manifests that verify against it and
//! name their own mesh.
//!
//! Versions are plain monotonically increasing integers — there is no
//! consensus here. A single admin re-signs a new version whenever the peer
//! set or security parameters change; [`ManifestStore`] guarantees the
//! on-disk copy is replaced atomically and never regresses by accident.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use ed25519_dalek::{SigningKey, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::envelope::{b64url_decode, sign_envelope, verify_envelope, Envelope};
use crate::error::TrustError;
use crate::paths::write_atomic;

pub const MANIFEST_SCHEMA_VERSION: u32 = 1;

/// Message timestamps older or newer than this are rejected (seconds).
pub const DEFAULT_REPLAY_WINDOW_SECONDS: u64 = 60;

/// Per-message body cap.
pub const DEFAULT_MAX_MESSAGE_SIZE_BYTES: usize = 1024 * 1024;

/// One agent as seen by its peers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerEntry {
    pub name: String,
    /// Normalized base URL, `scheme://host:port`.
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Mesh-wide security parameters, distributed via the manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityParams {
    pub replay_window_seconds: u64,
    pub max_message_size_bytes: usize,
}

impl Default for SecurityParams {
    fn default() -> Self {
        Self {
            replay_window_seconds: DEFAULT_REPLAY_WINDOW_SECONDS,
            max_message_size_bytes: DEFAULT_MAX_MESSAGE_SIZE_BYTES,
        }
    }
}

/// Transport material distributed via the manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportParams {
    /// base64 (standard) of the 32-byte shared transport secret.
    pub mesh_key: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Revocations {
    /// Invite `jti`s that must no longer be honored.
    #[serde(default)]
    pub invite_jti: Vec<String>,
    /// Agent names evicted from the mesh.
    #[serde(default)]
    pub agents: Vec<String>,
}

impl Revocations {
    pub fn is_empty(&self) -> bool {
        self.invite_jti.is_empty() && self.agents.is_empty()
    }
}

/// The signed content of a manifest envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestPayload {
    pub schema_version: u32,
    pub mesh: String,
    pub version: u64,
    pub issued_at: DateTime<Utc>,
    pub security: SecurityParams,
    pub transport: TransportParams,
    pub agents: BTreeMap<String, PeerEntry>,
    #[serde(default)]
    pub revocations: Revocations,
}

impl ManifestPayload {
    /// First manifest of a fresh mesh: version 1, no peers.
    pub fn initial(mesh: impl Into<String>, mesh_key_b64: impl Into<String>) -> Self {
        Self {
            schema_version: MANIFEST_SCHEMA_VERSION,
            mesh: mesh.into(),
            version: 1,
            issued_at: Utc::now(),
            security: SecurityParams::default(),
            transport: TransportParams {
                mesh_key: mesh_key_b64.into(),
            },
            agents: BTreeMap::new(),
            revocations: Revocations::default(),
        }
    }
}

/// Key id derived from the issue date when no previous manifest exists.
pub fn derive_kid(now: DateTime<Utc>) -> String {
    format!("root-{}", now.format("%Y-%m-%d"))
}

/// Sign a manifest payload into an envelope.
pub fn sign_manifest(
    key: &SigningKey,
    kid: &str,
    payload: &ManifestPayload,
) -> Result<Envelope, TrustError> {
    let value = serde_json::to_value(payload)?;
    sign_envelope(key, kid, &value)
}

/// Parse a manifest payload out of an envelope **without** checking the
/// signature. Only for envelopes read back from our own store.
pub fn decode_manifest(env: &Envelope) -> Result<ManifestPayload, TrustError> {
    let bytes = b64url_decode(&env.payload).ok_or(TrustError::MalformedEnvelope)?;
    serde_json::from_slice(&bytes).map_err(|e| TrustError::PayloadShape(e.to_string()))
}

/// Verify an envelope received from a peer and check it names our mesh.
pub fn verify_manifest(
    key: &VerifyingKey,
    env: &Envelope,
    expected_mesh: &str,
) -> Result<ManifestPayload, TrustError> {
    let value = verify_envelope(key, env)?;
    let payload: ManifestPayload =
        serde_json::from_value(value).map_err(|e| TrustError::PayloadShape(e.to_string()))?;
    if payload.mesh != expected_mesh {
        return Err(TrustError::MeshMismatch {
            expected: expected_mesh.to_string(),
            actual: payload.mesh,
        });
    }
    Ok(payload)
}

/// Content address served by the bootstrap head endpoint:
/// `sha256:<hex>` over the base64url payload string bytes.
pub fn manifest_hash(env: &Envelope) -> String {
    let digest = Sha256::digest(env.payload.as_bytes());
    format!("sha256:{}", hex::encode(digest))
}

// ── Store ─────────────────────────────────────────────────────────────────────

/// Durable home of the latest manifest envelope.
///
/// `save` is write-then-rename, so a crashed writer can never leave a
/// half-written manifest behind. Historical versions are not retained.
#[derive(Debug, Clone)]
pub struct ManifestStore {
    path: PathBuf,
}

impl ManifestStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the stored envelope. A missing file is `None`, not an error.
    pub fn load(&self) -> Result<Option<Envelope>, TrustError> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_str(&text)?))
    }

    /// Atomically replace the stored envelope.
    pub fn save(&self, env: &Envelope) -> Result<(), TrustError> {
        let text = serde_json::to_string_pretty(env)?;
        write_atomic(&self.path, text.as_bytes())?;
        Ok(())
    }

    /// Version of the stored manifest, if any.
    pub fn current_version(&self) -> Result<Option<u64>, TrustError> {
        match self.load()? {
            Some(env) => Ok(Some(decode_manifest(&env)?.version)),
            None => Ok(None),
        }
    }

    /// `(currentVersion ?? 0) + 1`.
    pub fn next_version(&self) -> Result<u64, TrustError> {
        Ok(self.current_version()?.unwrap_or(0) + 1)
    }

    /// The `kid` of the stored manifest, if any — reused when re-signing.
    pub fn current_kid(&self) -> Result<Option<String>, TrustError> {
        Ok(self.load()?.map(|env| env.kid))
    }
}

// ── Unit tests ────────────────────────────────────────────────────────────────
