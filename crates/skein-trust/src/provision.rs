// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Admin-side provisioning: create a mesh, issue invites, re-sign manifests.
//!
//! These operations need the root **private** key, so they only work on the
//! admin host (the one holding `<admin>/<mesh>/root.key`). Everything they
//! produce — `mesh.key`, `root.pub`, `manifest.json`, invite tokens — is
//! what ordinary hosts consume.

use std::time::Duration;

use chrono::Utc;
use tracing::info;

use crate::config::MeshConfig;
use crate::envelope::Envelope;
use crate::error::TrustError;
use crate::invite::{encode_invite, InvitePayload, MAX_INVITE_TTL};
use crate::keys;
use crate::manifest::{derive_kid, sign_manifest, ManifestPayload, ManifestStore};
use crate::paths::MeshPaths;

/// Create a fresh mesh: transport secret, root keypair, config, manifest v1.
///
/// Fails if the mesh directory already holds a config — init is not an
/// overwrite operation.
pub fn init_mesh(paths: &MeshPaths, mesh: &str) -> Result<Envelope, TrustError> {
    if paths.config_file().exists() {
        return Err(TrustError::AlreadyInitialized(mesh.to_string()));
    }

    let secret = keys::generate_transport_secret();
    keys::save_transport_secret(&paths.mesh_key_file(), &secret)?;

    let root = keys::generate_keypair();
    keys::save_signing_key(&paths.root_key_file(), &root)?;
    keys::save_verifying_key(&paths.root_pub_file(), &root.verifying_key())?;

    MeshConfig::new(mesh).save(&paths.config_file())?;

    let mesh_key_b64 = {
        use base64::Engine;
        base64::engine::general_purpose::STANDARD.encode(secret)
    };
    let payload = ManifestPayload::initial(mesh, mesh_key_b64);
    let envelope = sign_manifest(&root, &derive_kid(Utc::now()), &payload)?;
    ManifestStore::new(paths.manifest_file()).save(&envelope)?;

    info!(mesh, dir = %paths.mesh_dir().display(), "mesh initialized");
    Ok(envelope)
}

/// Sign an invite for `agent`, bound to the joining host's enrollment key.
pub fn issue_invite(
    paths: &MeshPaths,
    mesh: &str,
    agent: &str,
    node_pub_key_b64: &str,
    ttl: Duration,
    min_manifest_version: Option<u64>,
) -> Result<String, TrustError> {
    if ttl > MAX_INVITE_TTL {
        return Err(TrustError::TtlTooLong(format!("{}s", ttl.as_secs())));
    }
    // Round-trip the key so a typo fails here, not at join time.
    keys::verifying_key_from_b64(node_pub_key_b64)?;

    let root = keys::load_signing_key(&paths.root_key_file())?;
    let mut payload = InvitePayload::new(mesh, agent, node_pub_key_b64, ttl);
    payload.min_manifest_version = min_manifest_version;

    let token = encode_invite(&root, &payload)?;
    info!(mesh, agent, jti = %payload.jti, exp = payload.exp, "invite issued");
    Ok(token)
}

/// Re-sign a manifest from the current config: copies the peer set and
/// security parameters, embeds the transport secret, bumps the version and
/// reuses the previous `kid` (or derives one on first signing).
///
/// Revocation lists are carried over from the previous manifest.
pub fn publish_manifest(paths: &MeshPaths) -> Result<Envelope, TrustError> {
    let config = MeshConfig::load(&paths.config_file())?;
    let secret = keys::load_transport_secret(&paths.mesh_key_file())?;
    let root = keys::load_signing_key(&paths.root_key_file())?;
    let store = ManifestStore::new(paths.manifest_file());

    let previous = match store.load()? {
        Some(env) => Some(crate::manifest::decode_manifest(&env)?),
        None => None,
    };

    let kid = store
        .current_kid()?
        .unwrap_or_else(|| derive_kid(Utc::now()));

    let mesh_key_b64 = {
        use base64::Engine;
        base64::engine::general_purpose::STANDARD.encode(&secret)
    };

    let payload = ManifestPayload {
        schema_version: crate::manifest::MANIFEST_SCHEMA_VERSION,
        mesh: config.mesh.clone(),
        version: store.next_version()?,
        issued_at: Utc::now(),
        security: config.security,
        transport: crate::manifest::TransportParams {
            mesh_key: mesh_key_b64,
        },
        agents: config.agents.clone(),
        revocations: previous.map(|p| p.revocations).unwrap_or_default(),
    };

    let envelope = sign_manifest(&root, &kid, &payload)?;
    store.save(&envelope)?;
    info!(
        mesh = %config.mesh,
        version = payload.version,
        peers = payload.agents.len(),
        "manifest published"
    );
    Ok(envelope)
}

// ── Unit tests ────────────────────────────────────────────────────────────────
