//! Two-engine integration tests: convergence across a real loopback
//! connection and echo suppression on the receiving side.
//!
//! Grounded on the same two-peer harness shape the unit tests assemble
//! piecemeal (`channel.rs`'s `full_handshake_and_one_message_round_trip`,
//! `sync_engine.rs`'s conflict-resolution tests) but exercised end to end
//! through `SyncEngine::run_server` instead of a bare `SecureChannel`.
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use swarmsync_core::identity::IdentityStore;
use swarmsync_core::peer::Peer;
use swarmsync_core::sync_engine::SyncEngine;
use swarmsync_core::watcher::SemanticEvent;
use swarmsync_core::EngineConfig;
use tempfile::TempDir;
use tokio::net::TcpListener;

struct TwoPeers {
    engine_a: Arc<SyncEngine>,
    root_a: PathBuf,
    engine_b: Arc<SyncEngine>,
    root_b: PathBuf,
    // kept alive for the test's duration
    _root_a_dir: TempDir,
    _root_b_dir: TempDir,
    _id_a_dir: TempDir,
    _id_b_dir: TempDir,
}

/// Bring up two engines with mutual TOFU trust established and their
/// accept loops running on ephemeral loopback ports, each already
/// registered as the other's peer.
async fn two_peer_harness() -> TwoPeers {
    let root_a_dir = TempDir::new().unwrap();
    let root_b_dir = TempDir::new().unwrap();
    let id_a_dir = TempDir::new().unwrap();
    let id_b_dir = TempDir::new().unwrap();

    let mut store_a = IdentityStore::open(id_a_dir.path().to_path_buf()).unwrap();
    let mut store_b = IdentityStore::open(id_b_dir.path().to_path_buf()).unwrap();

    let device_id_a = store_a.device_id().to_string();
    let device_id_b = store_b.device_id().to_string();
    let fp_a = store_a.fingerprint();
    let fp_b = store_b.fingerprint();
    let pub_der_a = store_a.identity().public_key_der();
    let pub_der_b = store_b.identity().public_key_der();

    store_a
        .trust_peer(fp_b, Some(device_id_b.clone()), Some("B".into()))
        .unwrap();
    store_b
        .trust_peer(fp_a, Some(device_id_a.clone()), Some("A".into()))
        .unwrap();

    let config = EngineConfig::default();
    let engine_a = SyncEngine::new(
        config.clone(),
        root_a_dir.path().to_path_buf(),
        store_a,
        None,
        None,
    )
    .unwrap();
    let engine_b = SyncEngine::new(config, root_b_dir.path().to_path_buf(), store_b, None, None).unwrap();

    engine_a.initial_scan().await.unwrap();
    engine_b.initial_scan().await.unwrap();

    let listener_a = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr_a = listener_a.local_addr().unwrap();
    let listener_b = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr_b = listener_b.local_addr().unwrap();

    tokio::spawn(engine_a.clone().run_server(listener_a));
    tokio::spawn(engine_b.clone().run_server(listener_b));

    let peer_b_for_a = Peer {
        device_id: device_id_b,
        display_name: "B".into(),
        ip: addr_b.ip(),
        port: addr_b.port(),
        public_key_b64: BASE64.encode(&pub_der_b),
        sync_enabled: true,
        trusted: true,
    };
    let peer_a_for_b = Peer {
        device_id: device_id_a,
        display_name: "A".into(),
        ip: addr_a.ip(),
        port: addr_a.port(),
        public_key_b64: BASE64.encode(&pub_der_a),
        sync_enabled: true,
        trusted: true,
    };

    engine_a.on_peer_up(peer_b_for_a).await.unwrap();
    engine_b.on_peer_up(peer_a_for_b).await.unwrap();

    TwoPeers {
        engine_a,
        root_a: root_a_dir.path().to_path_buf(),
        engine_b,
        root_b: root_b_dir.path().to_path_buf(),
        _root_a_dir: root_a_dir,
        _root_b_dir: root_b_dir,
        _id_a_dir: id_a_dir,
        _id_b_dir: id_b_dir,
    }
}

/// Poll `check` until it returns `Some`, or panic after `timeout`.
async fn wait_for<T>(timeout: Duration, mut check: impl FnMut() -> Option<T>) -> T {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if let Some(v) = check() {
            return v;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("condition not met within {timeout:?}");
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Spec §8 scenario 1 ("simple propagation"): A creates a file, B ends up
/// with identical content and hash, with no further action on B's part.
#[tokio::test]
async fn file_created_on_one_peer_converges_on_the_other() {
    let peers = two_peer_harness().await;

    let path_a = peers.root_a.join("notes.txt");
    tokio::fs::write(&path_a, b"hello\n").await.unwrap();
    peers
        .engine_a
        .handle_local_event(SemanticEvent::Created("notes.txt".into()))
        .await
        .unwrap();

    let path_b = peers.root_b.join("notes.txt");
    let contents = wait_for(Duration::from_secs(5), || std::fs::read(&path_b).ok()).await;

    assert_eq!(contents, b"hello\n");
    assert_eq!(
        sha256_hex(&contents),
        "5891b5b522d5df086d0ff0b110fbd9d21bb4fc7163af34d08286a2e846f6be03"
    );
}

/// Spec §8 "Echo suppression" invariant: a file written in response to an
/// incoming record must be registered in the receiver's `EchoSuppressor`
/// so the watcher-equivalent local-change path does not re-broadcast it.
#[tokio::test]
async fn remote_write_is_registered_for_echo_suppression() {
    let peers = two_peer_harness().await;

    let path_a = peers.root_a.join("shared.txt");
    tokio::fs::write(&path_a, b"from a\n").await.unwrap();
    peers
        .engine_a
        .handle_local_event(SemanticEvent::Created("shared.txt".into()))
        .await
        .unwrap();

    let path_b = peers.root_b.join("shared.txt");
    wait_for(Duration::from_secs(5), || {
        std::fs::read(&path_b).ok().filter(|c| c == b"from a\n")
    })
    .await;

    // The apply path suppresses the relative path as a side effect of
    // writing it; a subsequent local-change notification for the same
    // path must be swallowed exactly once.
    assert!(peers.engine_b.echo_suppressor().should_suppress("shared.txt"));
    // One-shot: the second check (simulating a second, unrelated local
    // event for the same path) is no longer suppressed.
    assert!(!peers.engine_b.echo_suppressor().should_suppress("shared.txt"));
}

fn sha256_hex(data: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}
