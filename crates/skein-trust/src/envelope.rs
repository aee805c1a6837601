// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Signed envelopes — the asymmetric counterpart of the message MAC.
//!
//! An envelope carries the canonical JSON bytes of its payload (base64url,
//! unpadded) plus a detached Ed25519 signature over exactly those bytes.
//! Verification recovers the payload value only after the signature checks
//! out, so a consumer never parses attacker-controlled structure from an
//! unverified envelope.
//!
//! All failure modes are typed [`TrustError`] variants; nothing in this
//! module panics on untrusted input.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use skein_wire::canonical_json_bytes;

use crate::error::TrustError;

/// The only algorithm this mesh knows.
pub const ENVELOPE_ALG: &str = "Ed25519";

/// A signed, self-describing payload container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Always `"Ed25519"`.
    pub alg: String,
    /// Key identifier, e.g. `root-2026-08-01`.
    pub kid: String,
    /// base64url (unpadded) of the canonical JSON payload bytes.
    pub payload: String,
    /// base64url (unpadded) of the detached signature.
    pub sig: String,
}

/// Sign `payload` under `key`, producing an envelope tagged with `kid`.
pub fn sign_envelope(key: &SigningKey, kid: &str, payload: &Value) -> Result<Envelope, TrustError> {
    let bytes = canonical_json_bytes(payload)?;
    let sig = key.sign(&bytes);
    Ok(Envelope {
        alg: ENVELOPE_ALG.to_string(),
        kid: kid.to_string(),
        payload: b64url_encode(&bytes),
        sig: b64url_encode(&sig.to_bytes()),
    })
}

/// Verify an envelope and return its payload value.
///
/// Fails with [`TrustError::UnsupportedAlgorithm`], [`TrustError::MalformedEnvelope`],
/// [`TrustError::BadSignature`] or [`TrustError::PayloadShape`] — each
/// distinguishable so surfaces can map them to the right status.
pub fn verify_envelope(key: &VerifyingKey, env: &Envelope) -> Result<Value, TrustError> {
    if env.alg != ENVELOPE_ALG {
        return Err(TrustError::UnsupportedAlgorithm(env.alg.clone()));
    }

    let payload = b64url_decode(&env.payload).ok_or(TrustError::MalformedEnvelope)?;
    let sig_bytes = b64url_decode(&env.sig).ok_or(TrustError::MalformedEnvelope)?;
    let sig = Signature::from_slice(&sig_bytes).map_err(|_| TrustError::MalformedEnvelope)?;

    key.verify(&payload, &sig)
        .map_err(|_| TrustError::BadSignature)?;

    serde_json::from_slice(&payload).map_err(|e| TrustError::PayloadShape(e.to_string()))
}

pub(crate) fn b64url_encode(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

pub(crate) fn b64url_decode(text: &str) -> Option<Vec<u8>> {
    URL_SAFE_NO_PAD.decode(text).ok()
}

// ── Unit tests ────────────────────────────────────────────────────────────────
