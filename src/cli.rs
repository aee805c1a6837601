// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// skein — a peer-to-peer message mesh for named agents.
#[derive(Parser, Debug)]
#[command(name = "skein", version, about)]
pub struct Cli {
    /// Log to stderr (RUST_LOG still applies).
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create a new mesh: transport secret, root keypair, manifest v1.
    ///
    /// The root private key lands in the admin directory; everything else
    /// under the mesh state directory. Run once per mesh.
    Init {
        /// Mesh name.
        #[arg(long, short = 'm')]
        mesh: String,
    },

    /// Issue a signed invite token for one new host.
    ///
    /// The token binds mesh, agent name and the joining host's enrollment
    /// public key, and expires after --ttl (default 15m, max 1h).
    Invite {
        #[arg(long, short = 'm')]
        mesh: String,
        /// Agent name the joining host will run.
        #[arg(long, short = 'a')]
        agent: String,
        /// The joining host's enrollment public key (standard base64).
        #[arg(long, conflicts_with = "node_pub_file")]
        node_pub: Option<String>,
        /// Same key, but read from a PEM file (e.g. a copied node.pub).
        #[arg(long)]
        node_pub_file: Option<PathBuf>,
        /// Invite lifetime: 30s, 15m, 1h.
        #[arg(long, default_value = "15m")]
        ttl: String,
        /// Refuse joining through peers serving an older manifest.
        #[arg(long)]
        min_manifest_version: Option<u64>,
    },

    /// Join a mesh using an invite token from its admin.
    ///
    /// Generates this host's enrollment keypair on first use, presents the
    /// invite to the seed peer, verifies the returned manifest against the
    /// pinned root public key and adopts it.
    Join {
        #[arg(long, short = 'm')]
        mesh: String,
        /// Base URL of a peer already in the mesh, e.g. http://seed:18790.
        #[arg(long)]
        seed: String,
        /// The invite token.
        #[arg(long)]
        token: String,
        /// Path to the mesh root public key (PEM). Defaults to the copy
        /// already pinned under this mesh's state directory.
        #[arg(long)]
        root_pub: Option<PathBuf>,
    },

    /// Start an agent (foreground; use --daemon for the poll loop).
    Start {
        #[arg(long, short = 'm')]
        mesh: String,
        /// This agent's name in the mesh.
        #[arg(long, short = 'a')]
        agent: String,
        /// Listen host.
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        /// Listen port; 0 = OS-assigned.
        #[arg(long, short = 'p', default_value_t = 0)]
        port: u16,
        /// Do not add this agent to the local peer map.
        #[arg(long)]
        no_register: bool,
        /// Run the autonomous poll loop and record a PID file.
        #[arg(long)]
        daemon: bool,
        /// Command the daemon pipes each drained batch into (JSON on stdin).
        #[arg(long, num_args = 1.., value_name = "CMD")]
        exec: Vec<String>,
        /// Daemon poll interval.
        #[arg(long, default_value = "5s")]
        poll_interval: String,
        /// Enforce single-use invite tokens on the bootstrap surface.
        #[arg(long)]
        strict_invites: bool,
    },

    /// Stop a daemonized agent via its PID file.
    Stop {
        #[arg(long, short = 'm')]
        mesh: String,
        #[arg(long, short = 'a')]
        agent: String,
        /// Seconds to wait for graceful exit before SIGKILL.
        #[arg(long, default_value_t = 10)]
        wait: u64,
    },

    /// Report whether a daemonized agent is running.
    Status {
        #[arg(long, short = 'm')]
        mesh: String,
        #[arg(long, short = 'a')]
        agent: String,
    },

    /// List configured peers and probe their health endpoints.
    Peers {
        #[arg(long, short = 'm')]
        mesh: String,
    },

    /// Re-sign and publish a manifest from the current config.
    ///
    /// Copies the peer set and security parameters from config.json, embeds
    /// the transport secret, bumps the version and signs with the root key.
    Publish {
        #[arg(long, short = 'm')]
        mesh: String,
    },
}
