// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Bootstrap client side: joining a mesh and staying current afterwards.
//!
//! [`join_mesh`] presents an invite to a seed peer, verifies the returned
//! manifest against the pinned root key, and adopts it — writing the
//! transport secret, peer roster, security parameters and manifest to the
//! local state directory in one pass.
//!
//! [`run_sync_loop`] then polls the seed's `head` endpoint at the interval
//! the join response suggested. Adoption is strictly monotonic: a manifest
//! whose version does not exceed the local one is ignored, whatever the
//! seed claims, so local state never regresses.

use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use ed25519_dalek::VerifyingKey;
use serde::Deserialize;
use tracing::{info, warn};

use skein_trust::config::SyncSettings;
use skein_trust::keys;
use skein_trust::manifest::{verify_manifest, ManifestPayload, ManifestStore};
use skein_trust::{Envelope, MeshConfig, MeshPaths};

use crate::error::NodeError;

/// Result of a successful join.
#[derive(Debug)]
pub struct JoinOutcome {
    pub mesh: String,
    pub agent: String,
    pub version: u64,
    pub peers: usize,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JoinResponse {
    #[allow(dead_code)]
    ok: bool,
    agent: String,
    manifest: Envelope,
    sync: SyncInfo,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SyncInfo {
    #[allow(dead_code)]
    head_url: String,
    #[allow(dead_code)]
    manifest_url_template: String,
    interval_seconds: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HeadResponse {
    version: u64,
    #[allow(dead_code)]
    manifest_hash: String,
}

/// Join `mesh` through `seed_url` using an invite token.
///
/// The host's enrollment keypair is created on first use; its public half
/// must be the key the invite was bound to. The returned manifest is
/// verified against `root_pub` before anything touches disk, and the root
/// key itself is pinned alongside the adopted state.
pub async fn join_mesh(
    paths: &MeshPaths,
    mesh: &str,
    seed_url: &str,
    token: &str,
    root_pub: &VerifyingKey,
) -> Result<JoinOutcome, NodeError> {
    let node_key = if paths.node_key_file().exists() {
        keys::load_signing_key(&paths.node_key_file())?
    } else {
        let key = keys::generate_keypair();
        keys::save_signing_key(&paths.node_key_file(), &key)?;
        keys::save_verifying_key(&paths.node_pub_file(), &key.verifying_key())?;
        info!(path = %paths.node_key_file().display(), "generated host enrollment keypair");
        key
    };
    let node_pub_b64 = keys::verifying_key_b64(&node_key.verifying_key());

    let client = reqwest::Client::new();
    let resp = client
        .post(format!("{seed_url}/mesh/bootstrap/join"))
        .json(&serde_json::json!({ "token": token, "nodePubKey": node_pub_b64 }))
        .send()
        .await?;

    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(NodeError::PeerStatus {
            status: status.as_u16(),
            body,
        });
    }
    let join: JoinResponse = resp.json().await?;

    let payload = verify_manifest(root_pub, &join.manifest, mesh)?;

    // Pin the root key next to the adopted state.
    if !paths.root_pub_file().exists() {
        keys::save_verifying_key(&paths.root_pub_file(), root_pub)?;
    }

    adopt_manifest(
        paths,
        &join.manifest,
        &payload,
        Some(SyncSettings {
            seed_url: seed_url.to_string(),
            interval_seconds: join.sync.interval_seconds,
        }),
    )?;

    info!(
        mesh = %payload.mesh,
        agent = %join.agent,
        version = payload.version,
        peers = payload.agents.len(),
        "joined mesh"
    );

    Ok(JoinOutcome {
        mesh: payload.mesh.clone(),
        agent: join.agent,
        version: payload.version,
        peers: payload.agents.len(),
    })
}

/// Write an already-verified manifest into local state.
///
/// Refuses to regress: adopting a version ≤ the locally stored one is an
/// error here (the poller filters that case out before calling).
pub fn adopt_manifest(
    paths: &MeshPaths,
    envelope: &Envelope,
    payload: &ManifestPayload,
    sync: Option<SyncSettings>,
) -> Result<(), NodeError> {
    let store = ManifestStore::new(paths.manifest_file());
    if let Some(local) = store.current_version()? {
        if payload.version <= local {
            return Err(NodeError::ManifestRegression {
                local,
                offered: payload.version,
            });
        }
    }

    let secret = STANDARD
        .decode(&payload.transport.mesh_key)
        .map_err(|e| NodeError::Http(format!("manifest meshKey is not valid base64: {e}")))?;
    keys::save_transport_secret(&paths.mesh_key_file(), &secret)?;

    store.save(envelope)?;

    let mut config = MeshConfig::load(&paths.config_file())
        .unwrap_or_else(|_| MeshConfig::new(payload.mesh.clone()));
    config.mesh = payload.mesh.clone();
    config.security = payload.security;
    config.agents = payload.agents.clone();
    // Revoked agents drop out of the roster even if the snapshot still
    // carried them.
    for revoked in &payload.revocations.agents {
        config.agents.remove(revoked);
    }
    if sync.is_some() {
        config.sync = sync;
    }
    config.save(&paths.config_file())?;

    info!(version = payload.version, "manifest adopted");
    Ok(())
}

/// One poll cycle: head → compare → fetch → verify → adopt.
///
/// Returns `true` when a newer manifest was adopted.
pub async fn sync_once(
    paths: &MeshPaths,
    mesh: &str,
    root_pub: &VerifyingKey,
    client: &reqwest::Client,
    seed_url: &str,
) -> Result<bool, NodeError> {
    let bearer = STANDARD.encode(keys::load_transport_secret(&paths.mesh_key_file())?);

    let resp = client
        .get(format!("{seed_url}/mesh/bootstrap/head"))
        .bearer_auth(&bearer)
        .send()
        .await?;
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(NodeError::PeerStatus {
            status: status.as_u16(),
            body,
        });
    }
    let head: HeadResponse = resp.json().await?;

    let store = ManifestStore::new(paths.manifest_file());
    let local = store.current_version()?.unwrap_or(0);
    if head.version <= local {
        return Ok(false);
    }

    let resp = client
        .get(format!("{seed_url}/mesh/bootstrap/manifest/latest"))
        .bearer_auth(&bearer)
        .send()
        .await?;
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(NodeError::PeerStatus {
            status: status.as_u16(),
            body,
        });
    }
    let envelope: Envelope = resp.json().await?;

    let payload = verify_manifest(root_pub, &envelope, mesh)?;
    if payload.version <= local {
        // The head lied; never adopt a non-advancing manifest.
        return Ok(false);
    }

    adopt_manifest(paths, &envelope, &payload, None)?;
    Ok(true)
}

/// Poll `seed_url` until `stop` flips. Errors are logged and retried on the
/// next tick — a flaky seed must not kill the agent.
pub async fn run_sync_loop(
    paths: MeshPaths,
    mesh: String,
    root_pub: VerifyingKey,
    settings: SyncSettings,
    mut stop: tokio::sync::watch::Receiver<bool>,
) {
    let client = reqwest::Client::new();
    let interval = Duration::from_secs(settings.interval_seconds.max(1));
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match sync_once(&paths, &mesh, &root_pub, &client, &settings.seed_url).await {
                    Ok(true) => info!("manifest updated from {}", settings.seed_url),
                    Ok(false) => {}
                    Err(e) => warn!("manifest sync failed: {e}"),
                }
            }
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    break;
                }
            }
        }
    }
}

// ── Unit tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use skein_trust::manifest::{decode_manifest, sign_manifest};

    fn signed(version: u64, key: &ed25519_dalek::SigningKey) -> (Envelope, ManifestPayload) {
        let mut payload = ManifestPayload::initial("prod", STANDARD.encode([7u8; 32]));
        payload.version = version;
        let env = sign_manifest(key, "root-2026-08-01", &payload).unwrap();
        (env, payload)
    }

    #[test]
    fn adopt_writes_secret_config_and_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let paths = MeshPaths::under(dir.path(), "prod");
        let key = keys::generate_keypair();
        let (env, payload) = signed(1, &key);

        adopt_manifest(&paths, &env, &payload, None).unwrap();

        assert_eq!(
            keys::load_transport_secret(&paths.mesh_key_file()).unwrap(),
            vec![7u8; 32]
        );
        let stored = ManifestStore::new(paths.manifest_file())
            .load()
            .unwrap()
            .unwrap();
        assert_eq!(decode_manifest(&stored).unwrap().version, 1);
        let config = MeshConfig::load(&paths.config_file()).unwrap();
        assert_eq!(config.mesh, "prod");
    }

    #[test]
    fn adopt_refuses_version_regression() {
        let dir = tempfile::tempdir().unwrap();
        let paths = MeshPaths::under(dir.path(), "prod");
        let key = keys::generate_keypair();

        let (v2, p2) = signed(2, &key);
        adopt_manifest(&paths, &v2, &p2, None).unwrap();

        let (v1, p1) = signed(1, &key);
        assert!(matches!(
            adopt_manifest(&paths, &v1, &p1, None),
            Err(NodeError::ManifestRegression { local: 2, offered: 1 })
        ));

        let (v2b, p2b) = signed(2, &key);
        assert!(adopt_manifest(&paths, &v2b, &p2b, None).is_err());
    }

    #[test]
    fn adopt_drops_revoked_agents_from_roster() {
        let dir = tempfile::tempdir().unwrap();
        let paths = MeshPaths::under(dir.path(), "prod");
        let key = keys::generate_keypair();

        let mut payload = ManifestPayload::initial("prod", STANDARD.encode([7u8; 32]));
        payload.agents.insert(
            "mallory".into(),
            skein_trust::PeerEntry {
                name: "mallory".into(),
                url: "http://mallory:1".into(),
                description: None,
            },
        );
        payload.revocations.agents.push("mallory".into());
        let env = sign_manifest(&key, "k", &payload).unwrap();

        adopt_manifest(&paths, &env, &payload, None).unwrap();
        let config = MeshConfig::load(&paths.config_file()).unwrap();
        assert!(!config.agents.contains_key("mallory"));
    }

    #[test]
    fn adopt_preserves_local_tls_settings() {
        let dir = tempfile::tempdir().unwrap();
        let paths = MeshPaths::under(dir.path(), "prod");
        let key = keys::generate_keypair();

        let mut config = MeshConfig::new("prod");
        config.tls = Some(skein_trust::TlsSettings {
            cert: "/etc/skein/cert.pem".into(),
            key: "/etc/skein/key.pem".into(),
        });
        config.save(&paths.config_file()).unwrap();

        let (env, payload) = signed(1, &key);
        adopt_manifest(&paths, &env, &payload, None).unwrap();

        let after = MeshConfig::load(&paths.config_file()).unwrap();
        assert!(after.tls.is_some(), "TLS settings are local, not mesh state");
    }
}
