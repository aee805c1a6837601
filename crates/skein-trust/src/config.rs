// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Per-mesh host configuration (`config.json`).
//!
//! This is the host's working copy of mesh state: the peer roster, the
//! security parameters and optional local-only settings (TLS material,
//! manifest sync source). The roster and security sections mirror whatever
//! manifest the host last adopted; the admin's copy is additionally the
//! input from which new manifests are signed.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::TrustError;
use crate::manifest::{PeerEntry, SecurityParams};
use crate::paths::write_atomic;

/// TLS material for the agent listener. Provisioning the files is the
/// operator's business; when set, the listener serves HTTPS.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TlsSettings {
    pub cert: PathBuf,
    pub key: PathBuf,
}

/// Where this host polls for manifest updates — written by `join` from the
/// bootstrap response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncSettings {
    pub seed_url: String,
    pub interval_seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeshConfig {
    pub mesh: String,
    #[serde(default)]
    pub agents: BTreeMap<String, PeerEntry>,
    #[serde(default)]
    pub security: SecurityParams,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsSettings>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync: Option<SyncSettings>,
}

impl MeshConfig {
    pub fn new(mesh: impl Into<String>) -> Self {
        Self {
            mesh: mesh.into(),
            agents: BTreeMap::new(),
            security: SecurityParams::default(),
            tls: None,
            sync: None,
        }
    }

    pub fn load(path: &Path) -> Result<Self, TrustError> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Atomic save — concurrent agent starts re-read before writing, so the
    /// window for lost updates stays small.
    pub fn save(&self, path: &Path) -> Result<(), TrustError> {
        let text = serde_json::to_string_pretty(self)?;
        write_atomic(path, text.as_bytes())?;
        Ok(())
    }
}

// ── Unit tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_preserves_peers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let mut config = MeshConfig::new("prod");
        config.agents.insert(
            "alice".into(),
            PeerEntry {
                name: "alice".into(),
                url: "http://alice:18790".into(),
                description: Some("build agent".into()),
            },
        );
        config.save(&path).unwrap();

        let back = MeshConfig::load(&path).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn defaults_apply_for_missing_sections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"mesh":"prod"}"#).unwrap();
        let config = MeshConfig::load(&path).unwrap();
        assert!(config.agents.is_empty());
        assert_eq!(config.security, SecurityParams::default());
        assert!(config.tls.is_none());
    }

    #[test]
    fn json_uses_camel_case() {
        let mut config = MeshConfig::new("prod");
        config.sync = Some(SyncSettings {
            seed_url: "http://seed:1".into(),
            interval_seconds: 300,
        });
        let v = serde_json::to_value(&config).unwrap();
        assert!(v["security"].get("replayWindowSeconds").is_some());
        assert!(v["sync"].get("seedUrl").is_some());
    }
}
