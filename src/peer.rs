//! The peer directory (C2) and the `Peer` record of the data model (§3).
//!
//! The peer directory itself is an external collaborator per spec §4.1 — the
//! core only consumes a stream of `peer-up`/`peer-down` events plus a
//! snapshot. This module defines the `Peer` record both sides agree on and a
//! minimal in-memory directory implementation the engine uses to track
//! reachability/idle-eviction, grounded on the teacher's `Device` (device.rs)
//! generalized with the trust/session fields spec.md requires.
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::time::Instant;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Peer {
    /// Stable device identifier: short random 8-hex-char id used on the wire.
    pub device_id: String,
    pub display_name: String,
    pub ip: IpAddr,
    pub port: u16,
    /// base64 DER-encoded long-term ECDSA P-256 public key.
    pub public_key_b64: String,
    pub sync_enabled: bool,
    pub trusted: bool,
}

impl Peer {
    pub fn endpoint(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }

    /// The stable trust-table key: SHA-256 of the raw DER public key bytes,
    /// matching [`crate::crypto::fingerprint_of_public_key`] so a peer
    /// discovered over mDNS and the same peer authenticated over a secure
    /// channel resolve to the same fingerprint. Falls back to hashing the
    /// base64 text itself if it doesn't decode (a malformed beacon), so this
    /// never panics on untrusted input.
    pub fn fingerprint(&self) -> String {
        use base64::engine::general_purpose::STANDARD as BASE64;
        use base64::Engine as _;
        match BASE64.decode(&self.public_key_b64) {
            Ok(der) => crate::crypto::fingerprint_of_public_key(&der),
            Err(_) => crate::crypto::fingerprint_of_public_key(self.public_key_b64.as_bytes()),
        }
    }
}

/// Minimal reachable-peer tracker: last-seen timestamps and idle eviction.
/// A real deployment plugs in its own directory (backed by settings) that
/// also implements `PeerSource`; this is the bookkeeping the engine itself
/// needs regardless of which directory produced the events.
#[derive(Debug, Default)]
pub struct PeerDirectory {
    peers: HashMap<String, (Peer, Instant)>,
}

impl PeerDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&mut self, peer: Peer) {
        self.peers.insert(peer.device_id.clone(), (peer, Instant::now()));
    }

    pub fn remove(&mut self, device_id: &str) -> Option<Peer> {
        self.peers.remove(device_id).map(|(p, _)| p)
    }

    pub fn get(&self, device_id: &str) -> Option<Peer> {
        self.peers.get(device_id).map(|(p, _)| p.clone())
    }

    pub fn touch(&mut self, device_id: &str) {
        if let Some(entry) = self.peers.get_mut(device_id) {
            entry.1 = Instant::now();
        }
    }

    pub fn snapshot(&self) -> Vec<Peer> {
        self.peers.values().map(|(p, _)| p.clone()).collect()
    }

    /// Evict peers idle longer than `timeout`; returns the evicted device ids.
    pub fn evict_idle(&mut self, timeout: std::time::Duration) -> Vec<String> {
        let now = Instant::now();
        let stale: Vec<String> = self
            .peers
            .iter()
            .filter(|(_, (_, last_seen))| now.duration_since(*last_seen) > timeout)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &stale {
            self.peers.remove(id);
        }
        stale
    }

    pub fn trusted_sync_enabled(&self) -> Vec<Peer> {
        self.peers
            .values()
            .filter(|(p, _)| p.trusted && p.sync_enabled)
            .map(|(p, _)| p.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mk_peer(id: &str) -> Peer {
        Peer {
            device_id: id.to_string(),
            display_name: "box".into(),
            ip: "127.0.0.1".parse().unwrap(),
            port: 21027,
            public_key_b64: "AAAA".into(),
            sync_enabled: true,
            trusted: true,
        }
    }

    #[test]
    fn evicts_only_stale_peers() {
        let mut dir = PeerDirectory::new();
        dir.upsert(mk_peer("a"));
        assert_eq!(dir.evict_idle(std::time::Duration::from_secs(60)).len(), 0);
        assert!(dir.get("a").is_some());
    }

    #[test]
    fn trusted_sync_enabled_filters() {
        let mut dir = PeerDirectory::new();
        let mut untrusted = mk_peer("b");
        untrusted.trusted = false;
        dir.upsert(mk_peer("a"));
        dir.upsert(untrusted);
        let out = dir.trusted_sync_enabled();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].device_id, "a");
    }
}
