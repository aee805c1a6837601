// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! The trust plane of a skein mesh.
//!
//! A mesh is rooted in one offline Ed25519 keypair. The private half signs
//! two kinds of artifacts:
//!
//! - **Manifests** ([`manifest`]) — versioned snapshots of mesh state
//!   (transport secret, peer roster, security parameters), wrapped in a
//!   signed [`Envelope`]. Hosts pin the public half and refuse any manifest
//!   that does not verify against it.
//! - **Invite tokens** ([`invite`]) — short-lived capabilities that let one
//!   new host join once, bound to that host's own enrollment key.
//!
//! [`keys`] persists all key material (root, host enrollment, transport
//! secret) in the on-disk layout described by [`paths`]; private material is
//! always written with mode `0o600`.

pub mod config;
pub mod envelope;
pub mod error;
pub mod invite;
pub mod keys;
pub mod manifest;
pub mod paths;
pub mod provision;

pub use config::{MeshConfig, SyncSettings, TlsSettings};
pub use envelope::{sign_envelope, verify_envelope, Envelope};
pub use error::TrustError;
pub use invite::{decode_invite, encode_invite, parse_ttl, InvitePayload};
pub use manifest::{
    decode_manifest, derive_kid, manifest_hash, sign_manifest, verify_manifest, ManifestPayload,
    ManifestStore, PeerEntry, Revocations, SecurityParams, TransportParams,
};
pub use paths::MeshPaths;
pub use provision::{init_mesh, issue_invite, publish_manifest};
