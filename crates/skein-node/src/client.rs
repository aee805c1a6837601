// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Outbound requester — builds signed messages and POSTs them to a peer's
//! message surface.
//!
//! Every message gets a fresh id, a fresh nonce and the current timestamp at
//! send time, so retrying a failed send produces a new message rather than a
//! replay. Non-2xx answers surface as [`NodeError::PeerStatus`] with the
//! status and body preserved; the health probe is the one deliberate
//! exception — any failure there just means "offline".

use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use skein_wire::{MeshMessage, MessageKind};

use crate::error::NodeError;

/// Client-side deadline for the health probe.
pub const HEALTH_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Signs and sends messages on behalf of one agent.
#[derive(Debug, Clone)]
pub struct PeerClient {
    http: reqwest::Client,
    agent: String,
    secret: Vec<u8>,
    bearer: String,
}

impl PeerClient {
    pub fn new(agent: impl Into<String>, secret: Vec<u8>) -> Self {
        let bearer = STANDARD.encode(&secret);
        Self {
            http: reqwest::Client::new(),
            agent: agent.into(),
            secret,
            bearer,
        }
    }

    /// The name messages are sent `from`.
    pub fn agent(&self) -> &str {
        &self.agent
    }

    /// Build a signed message from this agent. Exposed so the runtime can
    /// register an ask **before** the bytes leave the process.
    pub fn build(
        &self,
        to: &str,
        kind: MessageKind,
        payload: &str,
        reply_to: Option<Uuid>,
    ) -> MeshMessage {
        MeshMessage::signed(&self.secret, &self.agent, to, kind, payload, reply_to)
    }

    /// POST a prebuilt message to `{peer_url}/mesh/{msg|ask|response}`.
    pub async fn post(&self, peer_url: &str, msg: &MeshMessage) -> Result<Value, NodeError> {
        let path = match msg.kind {
            MessageKind::Deliver => "msg",
            MessageKind::Ask => "ask",
            MessageKind::Reply => "response",
        };
        let url = format!("{peer_url}/mesh/{path}");
        debug!(%url, id = %msg.id, "posting message");

        let resp = self
            .http
            .post(&url)
            .bearer_auth(&self.bearer)
            .json(msg)
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
        Ok(resp.json().await?)
    }

    /// Fire-and-forget delivery. Returns the message id on success.
    pub async fn deliver(
        &self,
        peer_url: &str,
        to: &str,
        payload: &str,
    ) -> Result<Uuid, NodeError> {
        let msg = self.build(to, MessageKind::Deliver, payload, None);
        self.post(peer_url, &msg).await?;
        Ok(msg.id)
    }

    /// Send a reply for a previously received ask. Returns whether the
    /// remote side still had the ask pending.
    pub async fn reply(
        &self,
        peer_url: &str,
        to: &str,
        reply_to: Uuid,
        payload: &str,
    ) -> Result<bool, NodeError> {
        let msg = self.build(to, MessageKind::Reply, payload, Some(reply_to));
        let body = self.post(peer_url, &msg).await?;
        Ok(body
            .get("resolved")
            .and_then(Value::as_bool)
            .unwrap_or(false))
    }

    /// Probe `{peer_url}/mesh/health` with a hard 5 s deadline.
    ///
    /// Any failure — connect refused, timeout, non-2xx — means "offline",
    /// never an error: health is a question, not an invariant.
    pub async fn health(&self, peer_url: &str) -> bool {
        let url = format!("{peer_url}/mesh/health");
        match self
            .http
            .get(&url)
            .timeout(HEALTH_PROBE_TIMEOUT)
            .send()
            .await
        {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                debug!(%url, "health probe failed: {e}");
                false
            }
        }
    }
}
