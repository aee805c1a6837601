// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! End-to-end messaging tests: two live agents on loopback exchanging
//! signed messages, plus wire-level probes of the auth pipeline.

use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use skein_node::{AgentOptions, MeshAgent, NodeError};
use skein_trust::{keys, provision, MeshPaths};
use skein_wire::{sign_mac, IncomingKind, MeshMessage, MessageKind};

async fn spawn_agent(paths: &MeshPaths, name: &str) -> MeshAgent {
    MeshAgent::start(paths.clone(), AgentOptions::new(name))
        .await
        .expect("agent must start")
}

fn mesh_secret(paths: &MeshPaths) -> Vec<u8> {
    keys::load_transport_secret(&paths.mesh_key_file()).unwrap()
}

fn bearer(paths: &MeshPaths) -> String {
    STANDARD.encode(mesh_secret(paths))
}

/// Wait until the queue holds at least `n` messages.
async fn wait_for_queue(agent: &MeshAgent, n: usize) {
    for _ in 0..100 {
        if agent.queue().len() >= n {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("queue never reached {n} messages");
}

#[tokio::test]
async fn round_trip_deliver() {
    let dir = tempfile::tempdir().unwrap();
    let paths = MeshPaths::under(dir.path(), "prod");
    provision::init_mesh(&paths, "prod").unwrap();

    let alice = spawn_agent(&paths, "alice").await;
    let bob = spawn_agent(&paths, "bob").await;

    let id = alice.deliver_to("bob", "hello bob").await.unwrap();

    let drained = bob.queue().drain();
    assert_eq!(drained.len(), 1);
    assert_eq!(drained[0].id, id);
    assert_eq!(drained[0].from, "alice");
    assert_eq!(drained[0].payload, "hello bob");
    assert_eq!(drained[0].kind, IncomingKind::Deliver);

    alice.shutdown().await;
    bob.shutdown().await;
}

#[tokio::test]
async fn fifo_order_is_preserved() {
    let dir = tempfile::tempdir().unwrap();
    let paths = MeshPaths::under(dir.path(), "prod");
    provision::init_mesh(&paths, "prod").unwrap();

    let alice = spawn_agent(&paths, "alice").await;
    let bob = spawn_agent(&paths, "bob").await;

    for payload in ["one", "two", "three"] {
        alice.deliver_to("bob", payload).await.unwrap();
    }

    let payloads: Vec<String> = bob.queue().drain().into_iter().map(|m| m.payload).collect();
    assert_eq!(payloads, ["one", "two", "three"]);

    alice.shutdown().await;
    bob.shutdown().await;
}

#[tokio::test]
async fn exact_replay_is_rejected_second_time() {
    let dir = tempfile::tempdir().unwrap();
    let paths = MeshPaths::under(dir.path(), "prod");
    provision::init_mesh(&paths, "prod").unwrap();

    let bob = spawn_agent(&paths, "bob").await;
    let secret = mesh_secret(&paths);
    let msg = MeshMessage::signed(&secret, "alice", "bob", MessageKind::Deliver, "once", None);

    let client = reqwest::Client::new();
    let url = format!("{}/mesh/msg", bob.url());

    let first = client
        .post(&url)
        .bearer_auth(bearer(&paths))
        .json(&msg)
        .send()
        .await
        .unwrap();
    assert_eq!(first.status(), 200);
    let body: serde_json::Value = first.json().await.unwrap();
    assert_eq!(body["delivered"], true);
    assert_eq!(body["messageId"], msg.id.to_string());

    let second = client
        .post(&url)
        .bearer_auth(bearer(&paths))
        .json(&msg)
        .send()
        .await
        .unwrap();
    assert_eq!(second.status(), 400);
    let body: serde_json::Value = second.json().await.unwrap();
    assert!(
        body["error"].as_str().unwrap().contains("replay"),
        "error must mention replay: {body}"
    );

    bob.shutdown().await;
}

#[tokio::test]
async fn wrong_bearer_is_401_before_mac() {
    let dir = tempfile::tempdir().unwrap();
    let paths = MeshPaths::under(dir.path(), "prod");
    provision::init_mesh(&paths, "prod").unwrap();

    let bob = spawn_agent(&paths, "bob").await;

    // MAC with a foreign secret AND present the matching foreign bearer:
    // the bearer check fails first, so this is 401 not 400.
    let foreign = [9u8; 32];
    let msg = MeshMessage::signed(&foreign, "alice", "bob", MessageKind::Deliver, "hi", None);

    let resp = reqwest::Client::new()
        .post(format!("{}/mesh/msg", bob.url()))
        .bearer_auth(STANDARD.encode(foreign))
        .json(&msg)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);

    bob.shutdown().await;
}

#[tokio::test]
async fn bad_mac_with_good_bearer_is_400() {
    let dir = tempfile::tempdir().unwrap();
    let paths = MeshPaths::under(dir.path(), "prod");
    provision::init_mesh(&paths, "prod").unwrap();

    let bob = spawn_agent(&paths, "bob").await;

    let foreign = [9u8; 32];
    let msg = MeshMessage::signed(&foreign, "alice", "bob", MessageKind::Deliver, "hi", None);

    let resp = reqwest::Client::new()
        .post(format!("{}/mesh/msg", bob.url()))
        .bearer_auth(bearer(&paths))
        .json(&msg)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("mac"));

    bob.shutdown().await;
}

#[tokio::test]
async fn stale_timestamp_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let paths = MeshPaths::under(dir.path(), "prod");
    provision::init_mesh(&paths, "prod").unwrap();

    let bob = spawn_agent(&paths, "bob").await;
    let secret = mesh_secret(&paths);

    // Hand-build a message signed five minutes in the past.
    let id = uuid::Uuid::new_v4();
    let nonce = uuid::Uuid::new_v4();
    let stale = chrono::Utc::now().timestamp_millis() - 5 * 60 * 1000;
    let mac = sign_mac(
        &secret,
        &id.to_string(),
        "deliver",
        "old news",
        stale,
        &nonce.to_string(),
    );
    let body = serde_json::json!({
        "id": id, "from": "alice", "to": "bob", "type": "deliver",
        "payload": "old news", "timestamp": stale, "nonce": nonce, "mac": mac,
    });

    let resp = reqwest::Client::new()
        .post(format!("{}/mesh/msg", bob.url()))
        .bearer_auth(bearer(&paths))
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("replay window"));

    bob.shutdown().await;
}

#[tokio::test]
async fn wrong_destination_is_404() {
    let dir = tempfile::tempdir().unwrap();
    let paths = MeshPaths::under(dir.path(), "prod");
    provision::init_mesh(&paths, "prod").unwrap();

    let bob = spawn_agent(&paths, "bob").await;
    let secret = mesh_secret(&paths);
    let msg = MeshMessage::signed(&secret, "alice", "carol", MessageKind::Deliver, "hi", None);

    let resp = reqwest::Client::new()
        .post(format!("{}/mesh/msg", bob.url()))
        .bearer_auth(bearer(&paths))
        .json(&msg)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
    assert!(bob.queue().is_empty());

    bob.shutdown().await;
}

#[tokio::test]
async fn ask_and_reply_resolve_the_pending_future() {
    let dir = tempfile::tempdir().unwrap();
    let paths = MeshPaths::under(dir.path(), "prod");
    provision::init_mesh(&paths, "prod").unwrap();

    let alice = spawn_agent(&paths, "alice").await;
    let bob = spawn_agent(&paths, "bob").await;

    // Alice blocks on the ask while bob, concurrently, drains his queue and
    // posts the reply back.
    let (answer, _) = tokio::join!(
        alice.ask("bob", "2+2?", Duration::from_secs(5)),
        async {
            wait_for_queue(&bob, 1).await;
            let asks = bob.queue().drain();
            assert_eq!(asks.len(), 1);
            assert_eq!(asks[0].kind, IncomingKind::Ask);
            assert_eq!(asks[0].from, "alice");
            assert_eq!(asks[0].payload, "2+2?");

            let resolved = bob.reply_to("alice", asks[0].id, "4").await.unwrap();
            assert!(resolved, "alice must still have the ask pending");
        }
    );
    assert_eq!(answer.unwrap(), "4");

    alice.shutdown().await;
    bob.shutdown().await;
}

#[tokio::test]
async fn ask_timeout_then_late_reply_is_unresolved() {
    let dir = tempfile::tempdir().unwrap();
    let paths = MeshPaths::under(dir.path(), "prod");
    provision::init_mesh(&paths, "prod").unwrap();

    let alice = spawn_agent(&paths, "alice").await;
    let bob = spawn_agent(&paths, "bob").await;

    let err = alice
        .ask("bob", "anyone there?", Duration::from_millis(100))
        .await
        .unwrap_err();
    assert!(matches!(err, NodeError::AskTimeout));
    assert!(err.to_string().contains("ask timed out"));

    // Bob answers after the deadline: 200, but resolved=false.
    let asks = bob.queue().drain();
    assert_eq!(asks.len(), 1);
    let resolved = bob.reply_to("alice", asks[0].id, "too late").await.unwrap();
    assert!(!resolved);

    alice.shutdown().await;
    bob.shutdown().await;
}

#[tokio::test]
async fn shutdown_rejects_pending_asks() {
    let dir = tempfile::tempdir().unwrap();
    let paths = MeshPaths::under(dir.path(), "prod");
    provision::init_mesh(&paths, "prod").unwrap();

    let alice = spawn_agent(&paths, "alice").await;
    let bob = spawn_agent(&paths, "bob").await;

    let asks = alice.asks();
    let pending = asks.register(uuid::Uuid::new_v4(), Duration::from_secs(30));

    alice.shutdown().await;

    let err = pending.await.unwrap_err();
    assert!(matches!(err, NodeError::AgentStopped));
    assert!(err.to_string().contains("agent stopped"));

    bob.shutdown().await;
}

#[tokio::test]
async fn health_is_public_and_reports_online() {
    let dir = tempfile::tempdir().unwrap();
    let paths = MeshPaths::under(dir.path(), "prod");
    provision::init_mesh(&paths, "prod").unwrap();

    let bob = spawn_agent(&paths, "bob").await;

    // No bearer header at all.
    let resp = reqwest::Client::new()
        .get(format!("{}/mesh/health", bob.url()))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["agent"], "bob");
    assert_eq!(body["status"], "online");

    // The peer client agrees, and an unbound port reads as offline.
    assert!(bob.client().health(bob.url()).await);
    assert!(!bob.client().health("http://127.0.0.1:1").await);

    bob.shutdown().await;
}

#[tokio::test]
async fn oversize_message_is_413() {
    let dir = tempfile::tempdir().unwrap();
    let paths = MeshPaths::under(dir.path(), "prod");
    provision::init_mesh(&paths, "prod").unwrap();

    let bob = spawn_agent(&paths, "bob").await;
    let secret = mesh_secret(&paths);

    let config = skein_trust::MeshConfig::load(&paths.config_file()).unwrap();
    let too_big = "x".repeat(config.security.max_message_size_bytes + 1);
    let msg = MeshMessage::signed(&secret, "alice", "bob", MessageKind::Deliver, too_big, None);

    let resp = reqwest::Client::new()
        .post(format!("{}/mesh/msg", bob.url()))
        .bearer_auth(bearer(&paths))
        .json(&msg)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 413);

    bob.shutdown().await;
}

#[tokio::test]
async fn queue_mirror_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let paths = MeshPaths::under(dir.path(), "prod");
    provision::init_mesh(&paths, "prod").unwrap();

    {
        let alice = spawn_agent(&paths, "alice").await;
        let bob = spawn_agent(&paths, "bob").await;
        alice.deliver_to("bob", "durable").await.unwrap();
        assert_eq!(bob.queue().len(), 1);
        alice.shutdown().await;
        bob.shutdown().await;
    }

    // A restarted bob restores the undrained message from the mirror.
    let bob = spawn_agent(&paths, "bob").await;
    let restored = bob.queue().drain();
    assert_eq!(restored.len(), 1);
    assert_eq!(restored[0].payload, "durable");

    bob.shutdown().await;
}
