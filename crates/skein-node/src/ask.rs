// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Pending-ask registry — turns fire-and-forget HTTP calls into blocking
//! logical RPCs.
//!
//! Sending an ask registers the message id here and awaits the returned
//! future. When the remote agent eventually POSTs `/mesh/response` with a
//! matching `replyTo`, [`AskRegistry::resolve`] completes that future.
//! Each entry finishes **exactly once**: resolved, timed out, or rejected at
//! shutdown. The map removal under the lock is the linearization point —
//! whichever path removes the entry is the one that completes it, so a
//! racing timer and reply can never both fire.
//!
//! Late replies find no entry and report `resolved: false` to their sender;
//! that is an expected outcome, not an error.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::debug;
use uuid::Uuid;

use crate::error::NodeError;

#[derive(Debug)]
enum AskOutcome {
    Resolved(String),
    TimedOut,
    Destroyed,
}

struct Pending {
    tx: oneshot::Sender<AskOutcome>,
    timer: JoinHandle<()>,
}

/// Cheap-to-clone registry of in-flight asks.
#[derive(Clone, Default)]
pub struct AskRegistry {
    inner: Arc<Mutex<HashMap<Uuid, Pending>>>,
}

impl AskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pending ask and return the future the caller awaits.
    ///
    /// The future completes with the reply payload, or fails with
    /// [`NodeError::AskTimeout`] after `timeout`, or with
    /// [`NodeError::AgentStopped`] if the registry is destroyed first.
    pub fn register(
        &self,
        id: Uuid,
        timeout: Duration,
    ) -> impl Future<Output = Result<String, NodeError>> + Send {
        let (tx, rx) = oneshot::channel();

        let map = Arc::clone(&self.inner);
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let pending = lock(&map).remove(&id);
            if let Some(p) = pending {
                debug!(%id, "ask timed out");
                let _ = p.tx.send(AskOutcome::TimedOut);
            }
        });

        lock(&self.inner).insert(id, Pending { tx, timer });

        async move {
            match rx.await {
                Ok(AskOutcome::Resolved(payload)) => Ok(payload),
                Ok(AskOutcome::TimedOut) => Err(NodeError::AskTimeout),
                Ok(AskOutcome::Destroyed) | Err(_) => Err(NodeError::AgentStopped),
            }
        }
    }

    /// Complete the pending ask matching `reply_to`.
    ///
    /// Returns `false` when no such ask exists (already resolved, timed out,
    /// or never registered) — the reply is then simply dropped.
    pub fn resolve(&self, reply_to: Uuid, payload: String) -> bool {
        let pending = lock(&self.inner).remove(&reply_to);
        match pending {
            Some(p) => {
                p.timer.abort();
                let _ = p.tx.send(AskOutcome::Resolved(payload));
                true
            }
            None => false,
        }
    }

    pub fn has(&self, id: &Uuid) -> bool {
        lock(&self.inner).contains_key(id)
    }

    pub fn len(&self) -> usize {
        lock(&self.inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop a pending entry without completing it — used when the outbound
    /// POST of the ask itself failed and nobody will await the future.
    pub fn forget(&self, id: &Uuid) {
        if let Some(p) = lock(&self.inner).remove(id) {
            p.timer.abort();
        }
    }

    /// Reject every pending ask with a terminal error. Called at shutdown.
    pub fn destroy(&self) {
        let drained: Vec<(Uuid, Pending)> = lock(&self.inner).drain().collect();
        for (id, p) in drained {
            debug!(%id, "rejecting pending ask at shutdown");
            p.timer.abort();
            let _ = p.tx.send(AskOutcome::Destroyed);
        }
    }
}

fn lock(map: &Mutex<HashMap<Uuid, Pending>>) -> std::sync::MutexGuard<'_, HashMap<Uuid, Pending>> {
    map.lock().unwrap_or_else(|e| e.into_inner())
}

// ── Unit tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolve_completes_with_payload() {
        let registry = AskRegistry::new();
        let id = Uuid::new_v4();
        let pending = registry.register(id, Duration::from_secs(5));

        assert!(registry.has(&id));
        assert!(registry.resolve(id, "4".to_string()));

        assert_eq!(pending.await.unwrap(), "4");
        assert!(!registry.has(&id));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_rejects_with_ask_timed_out() {
        let registry = AskRegistry::new();
        let id = Uuid::new_v4();
        let pending = registry.register(id, Duration::from_millis(100));

        let err = pending.await.unwrap_err();
        assert!(matches!(err, NodeError::AskTimeout));
        assert!(err.to_string().contains("ask timed out"));
        assert!(!registry.has(&id));
    }

    #[tokio::test(start_paused = true)]
    async fn late_reply_after_timeout_is_dropped() {
        let registry = AskRegistry::new();
        let id = Uuid::new_v4();
        let pending = registry.register(id, Duration::from_millis(100));
        let _ = pending.await;

        assert!(!registry.resolve(id, "too late".to_string()));
    }

    #[tokio::test]
    async fn destroy_rejects_all_pending() {
        let registry = AskRegistry::new();
        let a = registry.register(Uuid::new_v4(), Duration::from_secs(30));
        let b = registry.register(Uuid::new_v4(), Duration::from_secs(30));

        registry.destroy();

        assert!(matches!(a.await.unwrap_err(), NodeError::AgentStopped));
        assert!(matches!(b.await.unwrap_err(), NodeError::AgentStopped));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn resolve_unknown_id_returns_false() {
        let registry = AskRegistry::new();
        assert!(!registry.resolve(Uuid::new_v4(), "nobody asked".to_string()));
    }

    #[tokio::test]
    async fn each_entry_completes_exactly_once() {
        let registry = AskRegistry::new();
        let id = Uuid::new_v4();
        let pending = registry.register(id, Duration::from_secs(5));

        assert!(registry.resolve(id, "first".to_string()));
        // Second resolution of the same id must lose.
        assert!(!registry.resolve(id, "second".to_string()));

        assert_eq!(pending.await.unwrap(), "first");
    }

    #[tokio::test]
    async fn forget_removes_without_completing() {
        let registry = AskRegistry::new();
        let id = Uuid::new_v4();
        let _pending = registry.register(id, Duration::from_secs(30));
        registry.forget(&id);
        assert!(!registry.has(&id));
        assert!(!registry.resolve(id, "x".to_string()));
    }
}
