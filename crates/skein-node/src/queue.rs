// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Incoming-message queue with an optional durable mirror.
//!
//! The queue is an in-process FIFO; acceptance order (the order requests
//! cleared the auth pipeline) is delivery order. When a mirror path is
//! configured, the full queue is persisted write-then-rename inside the same
//! critical section that mutated it, so the on-disk file always reflects a
//! state the queue was actually in.
//!
//! The mirror is best-effort by design: an agent that cannot persist must
//! still accept messages, and an agent that finds a corrupt mirror at
//! startup must still start. Losing queued messages is preferable to
//! refusing service.

use std::path::PathBuf;
use std::sync::Mutex;

use tracing::{debug, warn};

use skein_trust::paths::write_atomic;
use skein_wire::IncomingMessage;

#[derive(Debug)]
struct QueueInner {
    items: Vec<IncomingMessage>,
}

/// FIFO of accepted messages, shared across HTTP handlers via `Arc`.
#[derive(Debug)]
pub struct MessageQueue {
    inner: Mutex<QueueInner>,
    mirror: Option<PathBuf>,
}

impl MessageQueue {
    /// In-memory only.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(QueueInner { items: Vec::new() }),
            mirror: None,
        }
    }

    /// Queue with a durable mirror. Restores whatever the mirror holds;
    /// unreadable or unparsable mirrors restore as empty.
    pub fn with_mirror(path: PathBuf) -> Self {
        let items = match std::fs::read_to_string(&path) {
            Ok(text) => match serde_json::from_str::<Vec<IncomingMessage>>(&text) {
                Ok(items) => {
                    debug!(count = items.len(), mirror = %path.display(), "queue restored");
                    items
                }
                Err(e) => {
                    warn!(mirror = %path.display(), "queue mirror unparsable, starting empty: {e}");
                    Vec::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                warn!(mirror = %path.display(), "queue mirror unreadable, starting empty: {e}");
                Vec::new()
            }
        };
        Self {
            inner: Mutex::new(QueueInner { items }),
            mirror: Some(path),
        }
    }

    /// Append a message. Mirror failures are logged, never propagated.
    pub fn enqueue(&self, message: IncomingMessage) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.items.push(message);
        self.persist(&inner.items);
    }

    /// Return everything in FIFO order and clear; the empty state is
    /// persisted before the lock is released.
    pub fn drain(&self) -> Vec<IncomingMessage> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let drained = std::mem::take(&mut inner.items);
        self.persist(&inner.items);
        drained
    }

    /// Read-only snapshot.
    pub fn peek(&self) -> Vec<IncomingMessage> {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .items
            .clone()
    }

    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .items
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn persist(&self, items: &[IncomingMessage]) {
        let Some(path) = &self.mirror else {
            return;
        };
        let text = match serde_json::to_string_pretty(items) {
            Ok(t) => t,
            Err(e) => {
                warn!("queue mirror serialization failed: {e}");
                return;
            }
        };
        if let Err(e) = write_atomic(path, text.as_bytes()) {
            warn!(mirror = %path.display(), "queue mirror write failed: {e}");
        }
    }
}

impl Default for MessageQueue {
    fn default() -> Self {
        Self::new()
    }
}

// ── Unit tests ────────────────────────────────────────────────────────────────
