// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Inbox notifications.
//!
//! The message surface calls the observer after a message is accepted and
//! queued. The hooks are advisory: queue and ask semantics hold whether or
//! not an observer is installed, and regardless of what it does.

use uuid::Uuid;

/// Receives a callback for each accepted message. Both hooks default to
/// no-ops so implementers can override either one alone.
pub trait MeshObserver: Send + Sync {
    /// A `deliver` message was queued.
    fn on_message(&self, _from: &str, _id: Uuid, _payload: &str) {}

    /// An `ask` message was queued; the sender is waiting for a reply.
    fn on_ask(&self, _from: &str, _id: Uuid, _payload: &str) {}
}

/// Observer that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullObserver;

impl MeshObserver for NullObserver {}
