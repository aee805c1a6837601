// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WireError {
    #[error("cannot canonicalize a non-finite number")]
    NonFiniteNumber,

    #[error("canonicalization failed: {0}")]
    Canonicalize(String),

    #[error("invalid peer URL: {0}")]
    InvalidUrl(String),
}
