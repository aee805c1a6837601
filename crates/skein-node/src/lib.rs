// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! The agent node: everything one running agent needs to participate in a
//! skein mesh.
//!
//! # Anatomy
//!
//! ```text
//!               ┌──────────────────────────────────────────┐
//!  peer agents  │  axum listener (HTTP or HTTPS)           │
//!  ───────────► │    /mesh/msg /mesh/ask /mesh/response    │
//!               │    /mesh/health                          │
//!  joining host │    /mesh/bootstrap/{join,head,manifest}  │
//!  ───────────► └──────┬───────────────────────────────────┘
//!                      │ auth pipeline (bearer → size → shape
//!                      │  → timestamp → nonce → MAC)
//!                      ▼
//!               MessageQueue ──► daemon poll loop ──► BatchProcessor
//!               AskRegistry  ◄── /mesh/response resolves pending asks
//! ```
//!
//! Outbound, [`client::PeerClient`] signs fresh messages and POSTs them to a
//! peer's surface; [`runtime::MeshAgent`] ties listener, queue, registry and
//! auto-registration together, and [`sync`] keeps the local manifest current
//! by polling a seed peer.

pub mod ask;
pub mod client;
pub mod daemon;
pub mod error;
pub mod http;
pub mod nonce;
pub mod observer;
pub mod queue;
pub mod runtime;
pub mod sync;

pub use ask::AskRegistry;
pub use client::PeerClient;
pub use error::NodeError;
pub use nonce::NonceCache;
pub use observer::{MeshObserver, NullObserver};
pub use queue::MessageQueue;
pub use runtime::{AgentOptions, MeshAgent};
