// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Wire message types.
//!
//! [`MeshMessage`] is the JSON body POSTed between agents. [`IncomingMessage`]
//! is the post-delivery form stored in a receiver's queue: replies are never
//! queued (they resolve a pending ask instead), so the queued form only knows
//! `deliver` and `ask`.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::mac::{sign_mac, verify_mac};

/// Message type on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    /// Fire-and-forget delivery.
    Deliver,
    /// Request half of a logical RPC; the receiver replies later.
    Ask,
    /// Reply half; carries `replyTo` and resolves a pending ask.
    Reply,
}

impl MessageKind {
    /// The wire token — also the `type` field inside the MAC input.
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Deliver => "deliver",
            MessageKind::Ask => "ask",
            MessageKind::Reply => "reply",
        }
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One authenticated message between two agents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeshMessage {
    pub id: Uuid,
    pub from: String,
    pub to: String,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub payload: String,
    /// Required when `kind` is [`MessageKind::Reply`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<Uuid>,
    /// Milliseconds since the Unix epoch at signing time.
    pub timestamp: i64,
    pub nonce: Uuid,
    /// HMAC-SHA-256 over `(id, type, payload, timestamp, nonce)`, lowercase hex.
    pub mac: String,
}

impl MeshMessage {
    /// Build a freshly signed message: new id, new nonce, current timestamp.
    pub fn signed(
        secret: &[u8],
        from: impl Into<String>,
        to: impl Into<String>,
        kind: MessageKind,
        payload: impl Into<String>,
        reply_to: Option<Uuid>,
    ) -> Self {
        let id = Uuid::new_v4();
        let nonce = Uuid::new_v4();
        let timestamp = Utc::now().timestamp_millis();
        let payload = payload.into();
        let mac = sign_mac(
            secret,
            &id.to_string(),
            kind.as_str(),
            &payload,
            timestamp,
            &nonce.to_string(),
        );
        Self {
            id,
            from: from.into(),
            to: to.into(),
            kind,
            payload,
            reply_to,
            timestamp,
            nonce,
            mac,
        }
    }

    /// Verify this message's MAC against `secret`.
    pub fn verify(&self, secret: &[u8]) -> bool {
        verify_mac(
            secret,
            &self.id.to_string(),
            self.kind.as_str(),
            &self.payload,
            self.timestamp,
            &self.nonce.to_string(),
            &self.mac,
        )
    }
}

/// Kind of a queued message. Replies never reach the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IncomingKind {
    Deliver,
    Ask,
}

/// A message after it passed the auth pipeline and was accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomingMessage {
    pub id: Uuid,
    pub from: String,
    pub payload: String,
    pub timestamp: i64,
    #[serde(rename = "type")]
    pub kind: IncomingKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<Uuid>,
}

impl IncomingMessage {
    pub fn from_wire(msg: &MeshMessage, kind: IncomingKind) -> Self {
        Self {
            id: msg.id,
            from: msg.from.clone(),
            payload: msg.payload.clone(),
            timestamp: msg.timestamp,
            kind,
            reply_to: msg.reply_to,
        }
    }
}

// ── Unit tests ────────────────────────────────────────────────────────────────
