// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Invite tokens — short-lived, signed join capabilities.
//!
//! A token is two unpadded-base64url parts joined by a dot: the canonical
//! JSON payload and a detached Ed25519 signature over exactly those payload
//! bytes. There is no header part; the algorithm is fixed, so there is
//! nothing an attacker can downgrade.
//!
//! The payload binds the invite to one mesh, one agent name and one host
//! enrollment key (`nodePubKey`), and carries an `nbf`/`exp` validity window.
//! The bootstrap endpoint checks that window with a fixed ±60 s clock skew
//! allowance — independent of the message replay window.

use chrono::Utc;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use skein_wire::canonical_json_bytes;

use crate::envelope::{b64url_decode, b64url_encode};
use crate::error::TrustError;

pub const INVITE_SCHEMA_VERSION: u32 = 1;

/// Default invite lifetime.
pub const DEFAULT_INVITE_TTL: Duration = Duration::from_secs(15 * 60);

/// Longest lifetime `skein invite` will issue.
pub const MAX_INVITE_TTL: Duration = Duration::from_secs(60 * 60);

/// Clock skew tolerated on both sides of `nbf`/`exp`.
pub const INVITE_CLOCK_SKEW_MS: i64 = 60_000;

/// The signed content of an invite token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvitePayload {
    pub schema_version: u32,
    pub mesh: String,
    /// Agent name the joining host will run.
    pub agent: String,
    /// base64 (standard) of the joining host's Ed25519 enrollment public key.
    pub node_pub_key: String,
    /// Unique token id; single-use enforcement keys off this.
    pub jti: Uuid,
    pub iat: i64,
    pub nbf: i64,
    pub exp: i64,
    /// Refuse to join through a peer serving an older manifest than this.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_manifest_version: Option<u64>,
    /// Peer URLs the joining host may try besides the one it was given.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed_hints: Option<Vec<String>>,
}

impl InvitePayload {
    /// Build a payload valid from now for `ttl`.
    pub fn new(
        mesh: impl Into<String>,
        agent: impl Into<String>,
        node_pub_key: impl Into<String>,
        ttl: Duration,
    ) -> Self {
        let now = Utc::now().timestamp_millis();
        Self {
            schema_version: INVITE_SCHEMA_VERSION,
            mesh: mesh.into(),
            agent: agent.into(),
            node_pub_key: node_pub_key.into(),
            jti: Uuid::new_v4(),
            iat: now,
            nbf: now,
            exp: now + ttl.as_millis() as i64,
            min_manifest_version: None,
            seed_hints: None,
        }
    }

    /// Check `now` against the validity window with the fixed skew allowance.
    pub fn check_window(&self, now_ms: i64) -> Result<(), TrustError> {
        if now_ms + INVITE_CLOCK_SKEW_MS < self.nbf {
            return Err(TrustError::NotYetValid);
        }
        if now_ms - INVITE_CLOCK_SKEW_MS > self.exp {
            return Err(TrustError::Expired);
        }
        Ok(())
    }
}

/// Encode and sign an invite token.
pub fn encode_invite(key: &SigningKey, payload: &InvitePayload) -> Result<String, TrustError> {
    let value = serde_json::to_value(payload)?;
    let bytes = canonical_json_bytes(&value)?;
    let sig = key.sign(&bytes);
    Ok(format!(
        "{}.{}",
        b64url_encode(&bytes),
        b64url_encode(&sig.to_bytes())
    ))
}

/// Decode a token, verify its signature, and validate the payload shape.
///
/// The three failure classes stay distinguishable:
/// [`TrustError::MalformedToken`] (format), [`TrustError::BadSignature`]
/// (crypto), [`TrustError::PayloadShape`] (schema).
pub fn decode_invite(key: &VerifyingKey, token: &str) -> Result<InvitePayload, TrustError> {
    let parts: Vec<&str> = token.split('.').collect();
    let &[payload_b64, sig_b64] = parts.as_slice() else {
        return Err(TrustError::MalformedToken);
    };

    let payload = b64url_decode(payload_b64).ok_or(TrustError::MalformedToken)?;
    let sig_bytes = b64url_decode(sig_b64).ok_or(TrustError::MalformedToken)?;
    let sig = Signature::from_slice(&sig_bytes).map_err(|_| TrustError::MalformedToken)?;

    key.verify(&payload, &sig)
        .map_err(|_| TrustError::BadSignature)?;

    let decoded: InvitePayload =
        serde_json::from_slice(&payload).map_err(|e| TrustError::PayloadShape(e.to_string()))?;
    if decoded.schema_version != INVITE_SCHEMA_VERSION {
        return Err(TrustError::PayloadShape(format!(
            "unsupported schemaVersion {}",
            decoded.schema_version
        )));
    }
    Ok(decoded)
}

/// Parse a human TTL such as `30s`, `15m` or `2h`.
pub fn parse_ttl(text: &str) -> Result<Duration, TrustError> {
    let trimmed = text.trim();
    let split = trimmed
        .find(|c: char| !c.is_ascii_digit())
        .filter(|&i| i > 0)
        .ok_or_else(|| TrustError::DurationUnit(trimmed.to_string()))?;
    let (digits, unit) = trimmed.split_at(split);
    let n: u64 = digits
        .parse()
        .map_err(|_| TrustError::DurationUnit(trimmed.to_string()))?;
    let secs = match unit {
        "s" => n,
        "m" => n * 60,
        "h" => n * 3600,
        _ => return Err(TrustError::DurationUnit(trimmed.to_string())),
    };
    Ok(Duration::from_secs(secs))
}

// ── Unit tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn keypair() -> (SigningKey, VerifyingKey) {
        let sk = SigningKey::generate(&mut rand::rngs::OsRng);
        let vk = sk.verifying_key();
        (sk, vk)
    }

    #[test]
    fn encode_decode_round_trip() {
        let (sk, vk) = keypair();
        let payload = InvitePayload::new("prod", "qa", "cHVia2V5", DEFAULT_INVITE_TTL);
        let token = encode_invite(&sk, &payload).unwrap();
        let back = decode_invite(&vk, &token).unwrap();
        assert_eq!(back, payload);
    }

    #[test]
    fn token_has_exactly_two_parts() {
        let (sk, _) = keypair();
        let payload = InvitePayload::new("prod", "qa", "k", DEFAULT_INVITE_TTL);
        let token = encode_invite(&sk, &payload).unwrap();
        assert_eq!(token.split('.').count(), 2);
    }

    #[test]
    fn wrong_part_count_is_malformed() {
        let (_, vk) = keypair();
        assert!(matches!(
            decode_invite(&vk, "only-one-part"),
            Err(TrustError::MalformedToken)
        ));
        assert!(matches!(
            decode_invite(&vk, "a.b.c"),
            Err(TrustError::MalformedToken)
        ));
    }

    #[test]
    fn bad_signature_is_distinguished() {
        let (sk, _) = keypair();
        let (_, other_vk) = keypair();
        let payload = InvitePayload::new("prod", "qa", "k", DEFAULT_INVITE_TTL);
        let token = encode_invite(&sk, &payload).unwrap();
        assert!(matches!(
            decode_invite(&other_vk, &token),
            Err(TrustError::BadSignature)
        ));
    }

    #[test]
    fn wrong_shape_is_distinguished() {
        let (sk, vk) = keypair();
        // Valid signature over JSON that is not an invite payload.
        let value = serde_json::json!({"not": "an invite"});
        let bytes = canonical_json_bytes(&value).unwrap();
        let sig = sk.sign(&bytes);
        let token = format!(
            "{}.{}",
            b64url_encode(&bytes),
            b64url_encode(&sig.to_bytes())
        );
        assert!(matches!(
            decode_invite(&vk, &token),
            Err(TrustError::PayloadShape(_))
        ));
    }

    #[test]
    fn window_check_honors_skew() {
        let mut payload = InvitePayload::new("prod", "qa", "k", Duration::from_secs(600));
        let now = Utc::now().timestamp_millis();

        // 30 s before nbf is inside the skew allowance.
        payload.nbf = now + 30_000;
        assert!(payload.check_window(now).is_ok());

        // 2 min before nbf is not.
        payload.nbf = now + 120_000;
        assert!(matches!(
            payload.check_window(now),
            Err(TrustError::NotYetValid)
        ));

        // 30 s past exp is inside the skew allowance.
        payload.nbf = now - 1_000;
        payload.exp = now - 30_000;
        assert!(payload.check_window(now).is_ok());

        // 2 min past exp is not.
        payload.exp = now - 120_000;
        assert!(matches!(payload.check_window(now), Err(TrustError::Expired)));
    }

    #[test]
    fn ttl_parsing() {
        assert_eq!(parse_ttl("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_ttl("15m").unwrap(), Duration::from_secs(900));
        assert_eq!(parse_ttl("2h").unwrap(), Duration::from_secs(7200));
        assert!(parse_ttl("10d").is_err());
        assert!(parse_ttl("m").is_err());
        assert!(parse_ttl("15").is_err());
        assert!(parse_ttl("").is_err());
    }

    #[test]
    fn fresh_invites_have_unique_jti() {
        let a = InvitePayload::new("prod", "qa", "k", DEFAULT_INVITE_TTL);
        let b = InvitePayload::new("prod", "qa", "k", DEFAULT_INVITE_TTL);
        assert_ne!(a.jti, b.jti);
    }
}
