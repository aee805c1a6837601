// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Key material persistence.
//!
//! Three kinds of secrets live on disk, all described in [`crate::paths`]:
//!
//! - the mesh **root keypair** — private half under the admin root, public
//!   half pinned on every host (PEM, PKCS#8/SPKI),
//! - a per-host **enrollment keypair** (`node.key` / `node.pub`) generated
//!   the first time a host joins,
//! - the 32-byte **transport secret** (`mesh.key`, base64).
//!
//! Private material is always written with mode `0o600`. The raw public key
//! is also exposed as standard base64 — that is the `nodePubKey` format
//! invite tokens bind to.

use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use ed25519_dalek::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey};
use ed25519_dalek::{SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use rand::RngCore;

use crate::error::TrustError;
use crate::paths::{write_plain, write_secret_file};

/// Generate a fresh Ed25519 keypair from the OS CSPRNG.
pub fn generate_keypair() -> SigningKey {
    SigningKey::generate(&mut OsRng)
}

/// Persist a private key as PKCS#8 PEM, mode `0o600`.
pub fn save_signing_key(path: &Path, key: &SigningKey) -> Result<(), TrustError> {
    let pem = key
        .to_pkcs8_pem(ed25519_dalek::pkcs8::spki::der::pem::LineEnding::LF)
        .map_err(|e| TrustError::Key(e.to_string()))?;
    write_secret_file(path, pem.as_bytes())?;
    Ok(())
}

pub fn load_signing_key(path: &Path) -> Result<SigningKey, TrustError> {
    let pem = std::fs::read_to_string(path)?;
    SigningKey::from_pkcs8_pem(&pem).map_err(|e| TrustError::Key(e.to_string()))
}

/// Persist a public key as SPKI PEM. Not secret; normal file mode.
pub fn save_verifying_key(path: &Path, key: &VerifyingKey) -> Result<(), TrustError> {
    let pem = key
        .to_public_key_pem(ed25519_dalek::pkcs8::spki::der::pem::LineEnding::LF)
        .map_err(|e| TrustError::Key(e.to_string()))?;
    write_plain(path, pem.as_bytes())?;
    Ok(())
}

pub fn load_verifying_key(path: &Path) -> Result<VerifyingKey, TrustError> {
    let pem = std::fs::read_to_string(path)?;
    VerifyingKey::from_public_key_pem(&pem).map_err(|e| TrustError::Key(e.to_string()))
}

/// Standard-base64 of the raw 32 public-key bytes — the invite `nodePubKey`
/// format.
pub fn verifying_key_b64(key: &VerifyingKey) -> String {
    STANDARD.encode(key.as_bytes())
}

/// Fresh 32-byte transport secret.
pub fn generate_transport_secret() -> [u8; 32] {
    let mut secret = [0u8; 32];
    OsRng.fill_bytes(&mut secret);
    secret
}

/// Persist the transport secret as base64, mode `0o600`.
pub fn save_transport_secret(path: &Path, secret: &[u8]) -> Result<(), TrustError> {
    let mut encoded = STANDARD.encode(secret);
    encoded.push('\n');
    write_secret_file(path, encoded.as_bytes())?;
    Ok(())
}

pub fn load_transport_secret(path: &Path) -> Result<Vec<u8>, TrustError> {
    let text = std::fs::read_to_string(path)?;
    let secret = STANDARD
        .decode(text.trim())
        .map_err(|e| TrustError::Key(format!("mesh key is not valid base64: {e}")))?;
    if secret.len() != 32 {
        return Err(TrustError::Key(format!(
            "mesh key must be 32 bytes, got {}",
            secret.len()
        )));
    }
    Ok(secret)
}

/// Decode a `nodePubKey` string back into a verifying key.
pub fn verifying_key_from_b64(text: &str) -> Result<VerifyingKey, TrustError> {
    let bytes = STANDARD
        .decode(text.trim())
        .map_err(|e| TrustError::Key(format!("public key is not valid base64: {e}")))?;
    let arr: [u8; 32] = bytes
        .try_into()
        .map_err(|_| TrustError::Key("public key must be 32 bytes".to_string()))?;
    VerifyingKey::from_bytes(&arr).map_err(|e| TrustError::Key(e.to_string()))
}

// ── Unit tests ────────────────────────────────────────────────────────────────
