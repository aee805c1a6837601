// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use thiserror::Error;

use skein_trust::TrustError;
use skein_wire::WireError;

#[derive(Debug, Error)]
pub enum NodeError {
    /// The deadline of a pending ask elapsed before a reply arrived.
    #[error("ask timed out")]
    AskTimeout,

    /// The agent shut down while the ask was still pending.
    #[error("agent stopped")]
    AgentStopped,

    #[error("unknown peer {0:?}")]
    UnknownPeer(String),

    /// A peer answered with a non-2xx status.
    #[error("peer returned HTTP {status}: {body}")]
    PeerStatus { status: u16, body: String },

    #[error("http error: {0}")]
    Http(String),

    #[error("daemon control: {0}")]
    Daemon(String),

    /// A peer offered a manifest that does not advance the local version.
    #[error("refusing to adopt manifest v{offered} over local v{local}")]
    ManifestRegression { local: u64, offered: u64 },

    #[error(transparent)]
    Trust(#[from] TrustError),

    #[error(transparent)]
    Wire(#[from] WireError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl From<reqwest::Error> for NodeError {
    fn from(e: reqwest::Error) -> Self {
        NodeError::Http(e.to_string())
    }
}
