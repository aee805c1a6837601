// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Per-message shared-secret authentication.
//!
//! Every message between agents carries an HMAC-SHA-256 over the tuple
//! `(id, type, payload, timestamp, nonce)`, fields joined by a single `|`.
//! The timestamp is rendered as its decimal millisecond value, so sender and
//! receiver agree on the exact byte sequence without any canonicalization
//! step.
//!
//! Verification compares with [`subtle::ConstantTimeEq`] — no timing oracle.
//! Inputs of the wrong length fail immediately; the constant-time property
//! only matters between equal-length candidates.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Field separator inside the MAC input.
const DELIMITER: &[u8] = b"|";

/// Compute the message authenticator: 64 chars of lowercase hex.
pub fn sign_mac(
    secret: &[u8],
    id: &str,
    kind: &str,
    payload: &str,
    timestamp_ms: i64,
    nonce: &str,
) -> String {
    // HMAC accepts keys of any length; new_from_slice cannot fail.
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts keys of any length");
    mac.update(id.as_bytes());
    mac.update(DELIMITER);
    mac.update(kind.as_bytes());
    mac.update(DELIMITER);
    mac.update(payload.as_bytes());
    mac.update(DELIMITER);
    mac.update(timestamp_ms.to_string().as_bytes());
    mac.update(DELIMITER);
    mac.update(nonce.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Verify a provided authenticator in constant time.
///
/// Returns `false` on any mismatch, including a length mismatch — the
/// length check itself leaks nothing useful since the expected length is
/// public (64 hex chars).
pub fn verify_mac(
    secret: &[u8],
    id: &str,
    kind: &str,
    payload: &str,
    timestamp_ms: i64,
    nonce: &str,
    provided: &str,
) -> bool {
    let expected = sign_mac(secret, id, kind, payload, timestamp_ms, nonce);
    let a = expected.as_bytes();
    let b = provided.as_bytes();
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}

// ── Unit tests ────────────────────────────────────────────────────────────────
