// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod cli;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use cli::{Cli, Commands};
use skein_node::daemon::{self, BatchProcessor, DaemonStatus, ExecProcessor};
use skein_node::http::MemoryLedger;
use skein_node::sync::{join_mesh, run_sync_loop};
use skein_node::{AgentOptions, MeshAgent, PeerClient};
use skein_trust::invite::parse_ttl;
use skein_trust::{keys, provision, MeshConfig, MeshPaths};
use skein_wire::IncomingMessage;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Init { mesh } => cmd_init(&mesh),
        Commands::Invite {
            mesh,
            agent,
            node_pub,
            node_pub_file,
            ttl,
            min_manifest_version,
        } => cmd_invite(&mesh, &agent, node_pub, node_pub_file, &ttl, min_manifest_version),
        Commands::Join {
            mesh,
            seed,
            token,
            root_pub,
        } => cmd_join(&mesh, &seed, &token, root_pub).await,
        Commands::Start {
            mesh,
            agent,
            host,
            port,
            no_register,
            daemon,
            exec,
            poll_interval,
            strict_invites,
        } => {
            cmd_start(
                &mesh,
                &agent,
                host,
                port,
                no_register,
                daemon,
                exec,
                &poll_interval,
                strict_invites,
            )
            .await
        }
        Commands::Stop { mesh, agent, wait } => cmd_stop(&mesh, &agent, wait).await,
        Commands::Status { mesh, agent } => cmd_status(&mesh, &agent),
        Commands::Peers { mesh } => cmd_peers(&mesh).await,
        Commands::Publish { mesh } => cmd_publish(&mesh),
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "info" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

// ── init / invite / publish (admin side) ──────────────────────────────────────

fn cmd_init(mesh: &str) -> anyhow::Result<()> {
    let paths = MeshPaths::new(mesh);
    provision::init_mesh(&paths, mesh)?;
    println!("Mesh {mesh:?} initialized.");
    println!("  state: {}", paths.mesh_dir().display());
    println!("  root key (keep offline!): {}", paths.root_key_file().display());
    Ok(())
}

fn cmd_invite(
    mesh: &str,
    agent: &str,
    node_pub: Option<String>,
    node_pub_file: Option<std::path::PathBuf>,
    ttl: &str,
    min_manifest_version: Option<u64>,
) -> anyhow::Result<()> {
    let paths = MeshPaths::new(mesh);

    let node_pub_b64 = match (node_pub, node_pub_file) {
        (Some(b64), None) => b64,
        (None, Some(path)) => {
            let key = keys::load_verifying_key(&path)
                .with_context(|| format!("reading node public key from {}", path.display()))?;
            keys::verifying_key_b64(&key)
        }
        _ => anyhow::bail!("provide exactly one of --node-pub or --node-pub-file"),
    };

    let ttl = parse_ttl(ttl)?;
    let token = provision::issue_invite(
        &paths,
        mesh,
        agent,
        &node_pub_b64,
        ttl,
        min_manifest_version,
    )?;

    println!("Invite for agent {agent:?} (valid {}s):", ttl.as_secs());
    println!("{token}");
    Ok(())
}

fn cmd_publish(mesh: &str) -> anyhow::Result<()> {
    let paths = MeshPaths::new(mesh);
    let envelope = provision::publish_manifest(&paths)?;
    let payload = skein_trust::decode_manifest(&envelope)?;
    println!("Published manifest v{} for mesh {mesh:?}.", payload.version);
    Ok(())
}

// ── join ──────────────────────────────────────────────────────────────────────

async fn cmd_join(
    mesh: &str,
    seed: &str,
    token: &str,
    root_pub: Option<std::path::PathBuf>,
) -> anyhow::Result<()> {
    let paths = MeshPaths::new(mesh);

    let root_pub_path = root_pub.unwrap_or_else(|| paths.root_pub_file());
    let root_pub = keys::load_verifying_key(&root_pub_path).with_context(|| {
        format!(
            "no pinned root public key at {} — pass --root-pub with the key \
             distributed alongside the invite",
            root_pub_path.display()
        )
    })?;

    let seed = skein_wire::normalize_peer_url(seed)?;
    let outcome = join_mesh(&paths, mesh, &seed, token, &root_pub).await?;

    println!(
        "Joined mesh {:?} as agent {:?} (manifest v{}, {} peer(s)).",
        outcome.mesh, outcome.agent, outcome.version, outcome.peers
    );
    println!("Start the agent with: skein start -m {} -a {}", mesh, outcome.agent);
    Ok(())
}

// ── start / stop / status ─────────────────────────────────────────────────────

/// Fallback daemon processor when no --exec is configured: log and drop.
struct LogProcessor;

#[async_trait::async_trait]
impl BatchProcessor for LogProcessor {
    async fn process(&self, batch: Vec<IncomingMessage>) -> anyhow::Result<()> {
        for m in &batch {
            info!(from = %m.from, id = %m.id, payload = %m.payload, "message drained");
        }
        Ok(())
    }
}

#[allow(clippy::too_many_arguments)]
async fn cmd_start(
    mesh: &str,
    agent_name: &str,
    host: String,
    port: u16,
    no_register: bool,
    daemon_mode: bool,
    exec: Vec<String>,
    poll_interval: &str,
    strict_invites: bool,
) -> anyhow::Result<()> {
    let paths = MeshPaths::new(mesh);

    let mut opts = AgentOptions::new(agent_name);
    opts.host = host;
    opts.port = port;
    opts.auto_register = !no_register;
    if strict_invites {
        opts.ledger = Arc::new(MemoryLedger::default());
    }

    let agent = MeshAgent::start(paths.clone(), opts).await?;
    println!("Agent {agent_name:?} online at {}", agent.url());

    let (stop_tx, stop_rx) = tokio::sync::watch::channel(false);
    let mut background = Vec::new();

    if daemon_mode {
        let pid_file = paths.pid_file(agent_name);
        daemon::write_pid_file(&pid_file)?;

        let processor: Arc<dyn BatchProcessor> = if exec.is_empty() {
            Arc::new(LogProcessor)
        } else {
            Arc::new(ExecProcessor { command: exec })
        };
        let interval = parse_ttl(poll_interval)?;
        background.push(tokio::spawn(daemon::run_poll_loop(
            agent.queue(),
            processor,
            interval,
            stop_rx.clone(),
        )));
        info!(pid_file = %pid_file.display(), "daemon mode active");
    }

    // Poll the seed for manifest updates when join configured one.
    let config = MeshConfig::load(&paths.config_file())?;
    if let Some(sync) = config.sync.clone() {
        if let Ok(root_pub) = keys::load_verifying_key(&paths.root_pub_file()) {
            background.push(tokio::spawn(run_sync_loop(
                paths.clone(),
                config.mesh.clone(),
                root_pub,
                sync,
                stop_rx.clone(),
            )));
        }
    }

    wait_for_termination().await;
    info!("termination signal received");

    let _ = stop_tx.send(true);
    agent.shutdown().await;
    for task in background {
        let _ = task.await;
    }
    if daemon_mode {
        daemon::remove_pid_file(&paths.pid_file(agent_name));
    }
    Ok(())
}

async fn wait_for_termination() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = match signal(SignalKind::terminate()) {
            Ok(term) => term,
            Err(_) => {
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

async fn cmd_stop(mesh: &str, agent: &str, wait: u64) -> anyhow::Result<()> {
    let paths = MeshPaths::new(mesh);
    let stopped = daemon::stop_daemon(&paths.pid_file(agent), Duration::from_secs(wait)).await?;
    if stopped {
        println!("Agent {agent:?} stopped.");
    } else {
        println!("Agent {agent:?} was not running.");
    }
    Ok(())
}

fn cmd_status(mesh: &str, agent: &str) -> anyhow::Result<()> {
    let paths = MeshPaths::new(mesh);
    match daemon::daemon_status(&paths.pid_file(agent)) {
        DaemonStatus::Running(pid) => println!("Agent {agent:?} running (pid {pid})."),
        DaemonStatus::Stale(pid) => {
            println!("Agent {agent:?} not running (stale PID file, pid {pid}).")
        }
        DaemonStatus::Stopped => println!("Agent {agent:?} not running."),
    }
    Ok(())
}

// ── peers ─────────────────────────────────────────────────────────────────────

async fn cmd_peers(mesh: &str) -> anyhow::Result<()> {
    let paths = MeshPaths::new(mesh);
    let config = MeshConfig::load(&paths.config_file())
        .with_context(|| format!("mesh {mesh:?} is not initialized here"))?;

    if config.agents.is_empty() {
        println!("No peers configured for mesh {mesh:?}.");
        return Ok(());
    }

    let secret = keys::load_transport_secret(&paths.mesh_key_file())?;
    let client = PeerClient::new("_cli", secret);

    let probes = config.agents.values().map(|peer| {
        let client = client.clone();
        let name = peer.name.clone();
        let url = peer.url.clone();
        async move {
            let online = client.health(&url).await;
            (name, url, online)
        }
    });

    let mut results = futures::future::join_all(probes).await;
    results.sort_by(|a, b| a.0.cmp(&b.0));

    println!("{} peer(s) in mesh {mesh:?}:\n", results.len());
    for (name, url, online) in results {
        let status = if online { "online" } else { "offline" };
        println!("  {name:<16} {status:<8} {url}");
    }
    Ok(())
}
