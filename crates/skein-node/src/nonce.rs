// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Bounded-window duplicate detection.
//!
//! Every accepted message records its nonce here. A nonce seen twice inside
//! the replay window is a replay; anything older than the window has already
//! been rejected by the timestamp check, so entries can be dropped once they
//! age out. Memory is therefore bounded by the accept rate times the window.

use std::collections::HashMap;
use std::sync::Mutex;

/// Thread-safe nonce cache. Clones of the surrounding `Arc` share one map;
/// all operations take the lock, so HTTP handlers can race freely.
#[derive(Debug)]
pub struct NonceCache {
    window_ms: i64,
    seen: Mutex<HashMap<String, i64>>,
}

impl NonceCache {
    pub fn new(window_ms: i64) -> Self {
        Self {
            window_ms,
            seen: Mutex::new(HashMap::new()),
        }
    }

    /// Record `nonce` observed at `now_ms`.
    ///
    /// Returns `true` if the nonce was fresh (and is now recorded), `false`
    /// if it was already seen inside the window. Every call also prunes
    /// entries older than `now_ms − window`.
    pub fn check(&self, nonce: &str, now_ms: i64) -> bool {
        let mut seen = self.seen.lock().unwrap_or_else(|e| e.into_inner());

        // The window edge is inclusive: an entry observed exactly
        // `window_ms` ago still blocks its nonce on this call.
        let horizon = now_ms - self.window_ms;
        seen.retain(|_, observed| *observed >= horizon);

        if seen.contains_key(nonce) {
            return false;
        }
        seen.insert(nonce.to_string(), now_ms);
        true
    }

    /// Number of live entries — one per accepted message in the window.
    pub fn len(&self) -> usize {
        self.seen.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ── Unit tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: i64 = 60_000;

    #[test]
    fn fresh_nonce_is_accepted_once() {
        let cache = NonceCache::new(WINDOW);
        assert!(cache.check("n1", 1_000));
        assert!(!cache.check("n1", 1_001));
    }

    #[test]
    fn distinct_nonces_are_independent() {
        let cache = NonceCache::new(WINDOW);
        assert!(cache.check("n1", 1_000));
        assert!(cache.check("n2", 1_000));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn entries_age_out_after_the_window() {
        let cache = NonceCache::new(WINDOW);
        assert!(cache.check("n1", 1_000));
        // Inside the window the entry still blocks.
        assert!(!cache.check("n1", 1_000 + WINDOW));
        // Past the window it has been pruned and the nonce is fresh again.
        assert!(cache.check("n1", 1_000 + WINDOW + 1));
    }

    #[test]
    fn pruning_bounds_memory() {
        let cache = NonceCache::new(WINDOW);
        for i in 0..100 {
            assert!(cache.check(&format!("old-{i}"), 1_000));
        }
        assert_eq!(cache.len(), 100);
        // One check far in the future sweeps every stale entry.
        assert!(cache.check("new", 1_000 + WINDOW * 2));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn concurrent_checks_admit_each_nonce_once() {
        use std::sync::Arc;
        let cache = Arc::new(NonceCache::new(WINDOW));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = Arc::clone(&cache);
            handles.push(std::thread::spawn(move || {
                (0..50)
                    .filter(|i| cache.check(&format!("n-{i}"), 1_000))
                    .count()
            }));
        }
        let total: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        // 8 threads × 50 shared nonces: each nonce admitted exactly once.
        assert_eq!(total, 50);
    }
}
