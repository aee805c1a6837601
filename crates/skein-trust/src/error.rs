// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use thiserror::Error;

use skein_wire::WireError;

#[derive(Debug, Error)]
pub enum TrustError {
    #[error("key error: {0}")]
    Key(String),

    #[error("unsupported signature algorithm {0:?}")]
    UnsupportedAlgorithm(String),

    #[error("malformed token")]
    MalformedToken,

    #[error("malformed envelope")]
    MalformedEnvelope,

    #[error("signature verification failed")]
    BadSignature,

    #[error("payload rejected: {0}")]
    PayloadShape(String),

    #[error("invite is not valid yet")]
    NotYetValid,

    #[error("invite has expired")]
    Expired,

    #[error("manifest is for mesh {actual:?}, expected {expected:?}")]
    MeshMismatch { expected: String, actual: String },

    #[error("unsupported duration unit in {0:?}")]
    DurationUnit(String),

    #[error("invite TTL {0} exceeds the 1 h cap")]
    TtlTooLong(String),

    #[error("mesh {0:?} is already initialized")]
    AlreadyInitialized(String),

    #[error(transparent)]
    Wire(#[from] WireError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}
