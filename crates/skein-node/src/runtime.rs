// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Agent startup — assembles queue, registry, listener and client.
//!
//! # Startup sequence
//!
//! [`MeshAgent::start`] performs these steps in order:
//!
//! 1. Load `config.json`, the transport secret and (if present) the pinned
//!    root public key and manifest store.
//! 2. Bind the listener on the configured host/port (`0` = OS-assigned) and
//!    note the actual port.
//! 3. Optionally auto-register this agent in the on-disk peer map at
//!    `scheme://host:port` — `https` iff TLS material is configured. The
//!    map is re-read immediately before the write so two agents starting on
//!    the same host do not clobber each other.
//! 4. Build the shared [`AppState`] (queue restored from its mirror, fresh
//!    nonce cache and ask registry, observer wired in).
//! 5. Serve — plain HTTP, or HTTPS via `axum-server`'s rustls binding when
//!    the config names cert/key files.
//!
//! Shutdown stops the listener gracefully and destroys the ask registry,
//! which rejects every still-pending ask with a terminal "agent stopped"
//! error.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum_server::tls_rustls::RustlsConfig;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use tokio::task::JoinHandle;
use tracing::{error, info};
use uuid::Uuid;

use skein_trust::keys;
use skein_trust::manifest::{ManifestStore, PeerEntry};
use skein_trust::{MeshConfig, MeshPaths};
use skein_wire::{normalize_peer_url, MessageKind};

use crate::ask::AskRegistry;
use crate::client::PeerClient;
use crate::error::NodeError;
use crate::http::{router, AppState, InviteLedger, OpenLedger};
use crate::nonce::NonceCache;
use crate::observer::{MeshObserver, NullObserver};
use crate::queue::MessageQueue;

/// How an agent should come up. `AgentOptions::new("name")` gives loopback,
/// an OS-assigned port, auto-registration and no observer.
pub struct AgentOptions {
    pub agent: String,
    pub host: String,
    pub port: u16,
    pub auto_register: bool,
    pub observer: Arc<dyn MeshObserver>,
    pub ledger: Arc<dyn InviteLedger>,
}

impl AgentOptions {
    pub fn new(agent: impl Into<String>) -> Self {
        Self {
            agent: agent.into(),
            host: "127.0.0.1".to_string(),
            port: 0,
            auto_register: true,
            observer: Arc::new(NullObserver),
            ledger: Arc::new(OpenLedger),
        }
    }
}

/// One running agent: listener, queue, ask registry and peer client.
pub struct MeshAgent {
    paths: MeshPaths,
    state: Arc<AppState>,
    client: PeerClient,
    addr: SocketAddr,
    url: String,
    handle: axum_server::Handle,
    serve_task: JoinHandle<()>,
}

impl MeshAgent {
    pub async fn start(paths: MeshPaths, opts: AgentOptions) -> Result<Self, NodeError> {
        let mut config = MeshConfig::load(&paths.config_file())?;
        let secret = keys::load_transport_secret(&paths.mesh_key_file())?;
        let root_pub = keys::load_verifying_key(&paths.root_pub_file()).ok();
        let manifests = ManifestStore::new(paths.manifest_file());

        let listener = std::net::TcpListener::bind((opts.host.as_str(), opts.port))?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;

        let scheme = if config.tls.is_some() { "https" } else { "http" };
        let url = normalize_peer_url(&format!(
            "{scheme}://{}:{}",
            advertise_host(&opts.host),
            addr.port()
        ))?;

        if opts.auto_register {
            // Re-read the on-disk map first: another agent starting on this
            // host may have registered itself since we loaded.
            let mut fresh = MeshConfig::load(&paths.config_file()).unwrap_or_else(|_| config.clone());
            fresh.agents.insert(
                opts.agent.clone(),
                PeerEntry {
                    name: opts.agent.clone(),
                    url: url.clone(),
                    description: None,
                },
            );
            fresh.save(&paths.config_file())?;
            config = fresh;
            info!(agent = %opts.agent, %url, "registered in local peer map");
        }

        let window_ms = config.security.replay_window_seconds as i64 * 1000;
        let state = Arc::new(AppState {
            agent: opts.agent.clone(),
            mesh: config.mesh.clone(),
            secret: secret.clone(),
            bearer: STANDARD.encode(&secret),
            security: config.security,
            nonces: Arc::new(NonceCache::new(window_ms)),
            queue: Arc::new(MessageQueue::with_mirror(paths.queue_file(&opts.agent))),
            asks: AskRegistry::new(),
            observer: opts.observer,
            self_url: Some(url.clone()),
            root_pub,
            manifests,
            ledger: opts.ledger,
        });

        let app = router(Arc::clone(&state));
        let handle = axum_server::Handle::new();

        let serve_task = match &config.tls {
            Some(tls) => {
                let rustls = RustlsConfig::from_pem_file(&tls.cert, &tls.key).await?;
                let server = axum_server::from_tcp_rustls(listener, rustls).handle(handle.clone());
                tokio::spawn(async move {
                    if let Err(e) = server.serve(app.into_make_service()).await {
                        error!("listener failed: {e}");
                    }
                })
            }
            None => {
                let server = axum_server::from_tcp(listener).handle(handle.clone());
                tokio::spawn(async move {
                    if let Err(e) = server.serve(app.into_make_service()).await {
                        error!("listener failed: {e}");
                    }
                })
            }
        };

        info!(
            agent = %opts.agent,
            mesh = %config.mesh,
            %addr,
            tls = config.tls.is_some(),
            "agent online"
        );

        let client = PeerClient::new(opts.agent, secret);
        Ok(Self {
            paths,
            state,
            client,
            addr,
            url,
            handle,
            serve_task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// The base URL peers reach this agent at.
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn agent(&self) -> &str {
        &self.state.agent
    }

    pub fn mesh(&self) -> &str {
        &self.state.mesh
    }

    pub fn queue(&self) -> Arc<MessageQueue> {
        Arc::clone(&self.state.queue)
    }

    pub fn asks(&self) -> AskRegistry {
        self.state.asks.clone()
    }

    pub fn client(&self) -> &PeerClient {
        &self.client
    }

    pub fn paths(&self) -> &MeshPaths {
        &self.paths
    }

    /// Current peer roster, read fresh from disk so a manifest adopted while
    /// running is visible immediately.
    pub fn peers(&self) -> Result<Vec<PeerEntry>, NodeError> {
        let config = MeshConfig::load(&self.paths.config_file())?;
        Ok(config.agents.into_values().collect())
    }

    fn peer_url(&self, name: &str) -> Result<String, NodeError> {
        let config = MeshConfig::load(&self.paths.config_file())?;
        config
            .agents
            .get(name)
            .map(|p| p.url.clone())
            .ok_or_else(|| NodeError::UnknownPeer(name.to_string()))
    }

    /// Fire-and-forget delivery to a named peer.
    pub async fn deliver_to(&self, to: &str, payload: &str) -> Result<Uuid, NodeError> {
        let peer = self.peer_url(to)?;
        self.client.deliver(&peer, to, payload).await
    }

    /// Send an ask and await the reply.
    ///
    /// The pending entry is registered **before** the request leaves the
    /// process, so a reply can never race the registration.
    pub async fn ask(
        &self,
        to: &str,
        payload: &str,
        timeout: Duration,
    ) -> Result<String, NodeError> {
        let peer = self.peer_url(to)?;
        let msg = self.client.build(to, MessageKind::Ask, payload, None);
        let pending = self.state.asks.register(msg.id, timeout);

        if let Err(e) = self.client.post(&peer, &msg).await {
            self.state.asks.forget(&msg.id);
            return Err(e);
        }
        pending.await
    }

    /// Answer a previously received ask.
    pub async fn reply_to(
        &self,
        to: &str,
        reply_to: Uuid,
        payload: &str,
    ) -> Result<bool, NodeError> {
        let peer = self.peer_url(to)?;
        self.client.reply(&peer, to, reply_to, payload).await
    }

    /// Stop the listener and reject all pending asks.
    pub async fn shutdown(self) {
        info!(agent = %self.state.agent, "shutting down");
        self.handle
            .graceful_shutdown(Some(Duration::from_secs(3)));
        self.state.asks.destroy();
        let _ = tokio::time::timeout(Duration::from_secs(5), self.serve_task).await;
    }
}

/// Hosts bind on wildcard addresses but cannot be dialed there.
fn advertise_host(bind_host: &str) -> &str {
    match bind_host {
        "0.0.0.0" | "::" | "[::]" => "127.0.0.1",
        other => other,
    }
}

// ── Unit tests ────────────────────────────────────────────────────────────────
