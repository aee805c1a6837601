// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Daemon mode: the autonomous poll loop and PID-file process control.
//!
//! In daemon mode an agent drains its queue at a fixed interval and hands
//! each non-empty batch to a [`BatchProcessor`]. Batches never overlap:
//! processing happens inline in the loop and missed ticks are skipped, so a
//! slow processor simply stretches the interval.
//!
//! What a processor *does* with a batch is not this crate's business — the
//! stock [`ExecProcessor`] pipes the batch as JSON into an external command
//! and drains the child's stdout so a chatty child can never fill the pipe
//! and wedge the loop.
//!
//! # Process control
//!
//! The daemon records its PID at a well-known path. `stop` sends SIGTERM,
//! waits up to a bound, escalates to SIGKILL, and removes the PID file.

use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use skein_wire::IncomingMessage;

use crate::error::NodeError;
use crate::queue::MessageQueue;

/// Consumes one drained batch. Implementations run external tooling; the
/// loop only guarantees queue semantics (FIFO, drain-then-process, no
/// overlapping batches).
#[async_trait]
pub trait BatchProcessor: Send + Sync {
    async fn process(&self, batch: Vec<IncomingMessage>) -> anyhow::Result<()>;
}

/// Pipes each batch as a JSON array into an external command's stdin.
pub struct ExecProcessor {
    /// argv — `["my-handler", "--flag"]`.
    pub command: Vec<String>,
}

#[async_trait]
impl BatchProcessor for ExecProcessor {
    async fn process(&self, batch: Vec<IncomingMessage>) -> anyhow::Result<()> {
        let Some((program, args)) = self.command.split_first() else {
            anyhow::bail!("empty processor command");
        };

        let mut child = tokio::process::Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .spawn()?;

        let payload = serde_json::to_vec(&batch)?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(&payload).await?;
            // Drop closes the pipe so the child sees EOF.
        }

        // wait_with_output drains stdout while waiting — a child that logs
        // more than the pipe buffer can hold must not block the poll loop.
        let output = child.wait_with_output().await?;
        if !output.status.success() {
            anyhow::bail!("processor exited with {}", output.status);
        }
        info!(
            count = batch.len(),
            stdout_bytes = output.stdout.len(),
            "batch processed"
        );
        Ok(())
    }
}

/// Drain-and-process loop. Runs until `stop` flips to `true`.
pub async fn run_poll_loop(
    queue: Arc<MessageQueue>,
    processor: Arc<dyn BatchProcessor>,
    poll_interval: Duration,
    mut stop: tokio::sync::watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(poll_interval);
    // Processing happens inline, so ticks missed during a slow batch must
    // not burst afterwards.
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let batch = queue.drain();
                if batch.is_empty() {
                    continue;
                }
                info!(count = batch.len(), "handing batch to processor");
                if let Err(e) = processor.process(batch).await {
                    warn!("batch processor failed: {e}");
                }
            }
            changed = stop.changed() => {
                // A dropped sender also stops the loop.
                if changed.is_err() || *stop.borrow() {
                    break;
                }
            }
        }
    }
    info!("poll loop stopped");
}

// ── PID-file process control ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonStatus {
    Running(i32),
    /// PID file exists but no such process.
    Stale(i32),
    Stopped,
}

/// Record the current process id. The daemon calls this once on startup.
pub fn write_pid_file(path: &Path) -> Result<(), NodeError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, format!("{}\n", std::process::id()))?;
    Ok(())
}

pub fn remove_pid_file(path: &Path) {
    let _ = std::fs::remove_file(path);
}

fn read_pid(path: &Path) -> Option<i32> {
    std::fs::read_to_string(path)
        .ok()
        .and_then(|text| text.trim().parse().ok())
}

#[cfg(unix)]
fn process_alive(pid: i32) -> bool {
    // Signal 0 probes without delivering; EPERM still means "exists".
    if unsafe { libc::kill(pid, 0) } == 0 {
        return true;
    }
    std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

/// Inspect the PID file without touching the process.
pub fn daemon_status(pid_file: &Path) -> DaemonStatus {
    match read_pid(pid_file) {
        None => DaemonStatus::Stopped,
        #[cfg(unix)]
        Some(pid) if process_alive(pid) => DaemonStatus::Running(pid),
        Some(pid) => DaemonStatus::Stale(pid),
    }
}

/// Gracefully stop the daemon recorded in `pid_file`.
///
/// SIGTERM first; if the process is still alive after `wait`, SIGKILL. The
/// PID file is removed in every branch. Returns `false` when nothing was
/// running.
#[cfg(unix)]
pub async fn stop_daemon(pid_file: &Path, wait: Duration) -> Result<bool, NodeError> {
    let Some(pid) = read_pid(pid_file) else {
        return Ok(false);
    };
    if !process_alive(pid) {
        remove_pid_file(pid_file);
        return Ok(false);
    }

    info!(pid, "sending SIGTERM");
    unsafe {
        libc::kill(pid, libc::SIGTERM);
    }

    let deadline = tokio::time::Instant::now() + wait;
    while process_alive(pid) {
        if tokio::time::Instant::now() >= deadline {
            warn!(pid, "did not exit in time, sending SIGKILL");
            unsafe {
                libc::kill(pid, libc::SIGKILL);
            }
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    remove_pid_file(pid_file);
    Ok(true)
}

#[cfg(not(unix))]
pub async fn stop_daemon(_pid_file: &Path, _wait: Duration) -> Result<bool, NodeError> {
    Err(NodeError::Daemon(
        "daemon control is only supported on unix".to_string(),
    ))
}

// ── Unit tests ────────────────────────────────────────────────────────────────
