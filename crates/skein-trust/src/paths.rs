// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! On-disk layout of mesh state.
//!
//! Everything lives under a per-user state root (`$SKEIN_STATE_DIR`, or
//! `~/.config/skein`), one directory per mesh:
//!
//! ```text
//! <root>/<mesh>/config.json            peer set, security params, optional TLS
//! <root>/<mesh>/mesh.key               transport secret (base64, 0600)
//! <root>/<mesh>/root.pub               pinned root public key (PEM)
//! <root>/<mesh>/manifest.json          latest signed envelope
//! <root>/<mesh>/node.key, node.pub     host enrollment keypair (private 0600)
//! <root>/<mesh>/queues/<agent>/queue.json   durable queue mirror
//! <root>/<mesh>/run/<agent>.pid        daemon PID file
//! <root>/admin/<mesh>/root.key         root private key (0600, admin-only)
//! ```

use std::path::{Path, PathBuf};

/// Per-user state root.
pub fn state_root() -> PathBuf {
    if let Some(dir) = std::env::var_os("SKEIN_STATE_DIR") {
        return PathBuf::from(dir);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config/skein")
}

/// Resolved file locations for one mesh.
#[derive(Debug, Clone)]
pub struct MeshPaths {
    mesh_dir: PathBuf,
    admin_dir: PathBuf,
}

impl MeshPaths {
    /// Paths under the default (or `$SKEIN_STATE_DIR`) state root.
    pub fn new(mesh: &str) -> Self {
        Self::under(&state_root(), mesh)
    }

    /// Paths under an explicit root — tests point this at a tempdir.
    pub fn under(root: &Path, mesh: &str) -> Self {
        Self {
            mesh_dir: root.join(mesh),
            admin_dir: root.join("admin").join(mesh),
        }
    }

    pub fn mesh_dir(&self) -> &Path {
        &self.mesh_dir
    }

    pub fn admin_dir(&self) -> &Path {
        &self.admin_dir
    }

    pub fn config_file(&self) -> PathBuf {
        self.mesh_dir.join("config.json")
    }

    pub fn mesh_key_file(&self) -> PathBuf {
        self.mesh_dir.join("mesh.key")
    }

    pub fn root_pub_file(&self) -> PathBuf {
        self.mesh_dir.join("root.pub")
    }

    pub fn manifest_file(&self) -> PathBuf {
        self.mesh_dir.join("manifest.json")
    }

    pub fn node_key_file(&self) -> PathBuf {
        self.mesh_dir.join("node.key")
    }

    pub fn node_pub_file(&self) -> PathBuf {
        self.mesh_dir.join("node.pub")
    }

    pub fn queue_file(&self, agent: &str) -> PathBuf {
        self.mesh_dir.join("queues").join(agent).join("queue.json")
    }

    pub fn pid_file(&self, agent: &str) -> PathBuf {
        self.mesh_dir.join("run").join(format!("{agent}.pid"))
    }

    /// Root private key — admin-only location.
    pub fn root_key_file(&self) -> PathBuf {
        self.admin_dir.join("root.key")
    }
}

// ── File helpers ──────────────────────────────────────────────────────────────

/// Write-then-rename: a reader never observes a partially written file.
pub fn write_atomic(path: &Path, data: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, data)?;
    std::fs::rename(&tmp, path)
}

/// Write `data` to `path` with mode 0o600 on Unix (owner read/write only).
pub fn write_secret_file(path: &Path, data: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    #[cfg(unix)]
    {
        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;
        let mut f = std::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)?;
        f.write_all(data)?;
    }
    #[cfg(not(unix))]
    {
        std::fs::write(path, data)?;
    }
    Ok(())
}

/// Plain write with parent creation — for non-secret files.
pub fn write_plain(path: &Path, data: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, data)
}

// ── Unit tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_matches_documented_tree() {
        let paths = MeshPaths::under(Path::new("/state"), "prod");
        assert_eq!(paths.config_file(), Path::new("/state/prod/config.json"));
        assert_eq!(paths.mesh_key_file(), Path::new("/state/prod/mesh.key"));
        assert_eq!(paths.root_pub_file(), Path::new("/state/prod/root.pub"));
        assert_eq!(paths.manifest_file(), Path::new("/state/prod/manifest.json"));
        assert_eq!(
            paths.queue_file("alice"),
            Path::new("/state/prod/queues/alice/queue.json")
        );
        assert_eq!(
            paths.pid_file("alice"),
            Path::new("/state/prod/run/alice.pid")
        );
        assert_eq!(
            paths.root_key_file(),
            Path::new("/state/admin/prod/root.key")
        );
    }

    #[test]
    fn write_atomic_replaces_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/file.json");
        write_atomic(&path, b"one").unwrap();
        write_atomic(&path, b"two").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"two");
        assert!(!path.with_extension("tmp").exists());
    }
}
