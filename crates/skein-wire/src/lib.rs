// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Wire-level primitives shared by every skein component.
//!
//! This crate is deliberately small and synchronous: everything in it is a
//! pure function over bytes or a plain serde type. The HTTP surfaces, the
//! peer client and the trust plane all build on these primitives, so they
//! live below both in the dependency graph.
//!
//! - [`canonical`] — deterministic JSON encoding used for every signature
//!   in the mesh (envelopes, invite tokens).
//! - [`mac`] — the shared-secret HMAC that authenticates each message.
//! - [`message`] — the wire message and the queued (post-delivery) form.
//! - [`url`] — peer URL normalization.

pub mod canonical;
pub mod error;
pub mod mac;
pub mod message;
pub mod url;

pub use canonical::{canonical_json, canonical_json_bytes};
pub use error::WireError;
pub use mac::{sign_mac, verify_mac};
pub use message::{IncomingKind, IncomingMessage, MeshMessage, MessageKind};
pub use url::normalize_peer_url;
