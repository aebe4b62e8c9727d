//! Peer discovery: the `PeerSource` trait the core consumes (spec §4.1,
//! external interface only) plus a concrete mDNS adapter implementing it.
//!
//! Grounded on the teacher's `DiscoveryService` (mdns-sd daemon lifecycle,
//! background thread feeding an async channel, stale-device cleanup timer)
//! adapted to the beacon contract of spec §6.3: JSON properties instead of
//! flat string properties, and the legacy pipe-delimited fallback format.
use crate::peer::Peer;
use async_trait::async_trait;
use mdns_sd::{ResolvedService, ServiceDaemon, ServiceEvent};
use parking_lot::RwLock;
use serde::Deserialize;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

const SERVICE_TYPE: &str = "_swarm._tcp.local.";
const STALE_TIMEOUT: Duration = Duration::from_secs(60);
const CLEANUP_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub enum DiscoveryEvent {
    PeerUp(Peer),
    PeerDown(String),
}

/// The interface boundary of spec §4.1: the core only ever consumes this
/// trait, never mdns-sd (or any other discovery transport) directly.
#[async_trait]
pub trait PeerSource: Send + Sync {
    async fn next_event(&mut self) -> Option<DiscoveryEvent>;
    fn snapshot(&self) -> Vec<Peer>;
}

/// The beacon payload of spec §6.3. `signature` covers all preceding fields
/// serialized in this same field order; the core does not itself validate
/// it (validation, if any, belongs to a higher trust layer) — it only
/// shapes the record into a [`Peer`].
#[derive(Debug, Deserialize)]
struct BeaconPayload {
    #[allow(dead_code)]
    protocol: String,
    #[allow(dead_code)]
    version: u32,
    peer_id: String,
    peer_name: String,
    transfer_port: u16,
    sync_enabled: bool,
    #[allow(dead_code)]
    timestamp: i64,
    public_key: String,
    #[allow(dead_code)]
    signature: String,
}

struct TrackedPeer {
    peer: Peer,
    last_seen: Instant,
}

/// mDNS-backed [`PeerSource`] implementation consuming service-text-record
/// properties shaped like the spec §6.3 beacon, plus the legacy
/// `SWARM|id|name|port|sync` pipe-delimited form for interop with old peers.
pub struct MdnsPeerSource {
    _daemon: ServiceDaemon,
    events: mpsc::Receiver<DiscoveryEvent>,
    tracked: Arc<RwLock<HashMap<String, TrackedPeer>>>,
}

/// Tracks the mDNS instance fullname each device_id was last resolved under,
/// since `ServiceRemoved` only carries the fullname, not our TXT-derived id.
type FullnameIndex = Arc<RwLock<HashMap<String, String>>>;

impl MdnsPeerSource {
    pub fn start() -> crate::error::Result<Self> {
        let daemon = ServiceDaemon::new()
            .map_err(|e| crate::error::SwarmError::Initialization(format!("mDNS daemon: {e}")))?;
        let receiver = daemon
            .browse(SERVICE_TYPE)
            .map_err(|e| crate::error::SwarmError::Initialization(format!("mDNS browse: {e}")))?;

        let (tx, rx) = mpsc::channel(256);
        let tracked: Arc<RwLock<HashMap<String, TrackedPeer>>> = Arc::new(RwLock::new(HashMap::new()));
        let tracked_for_thread = tracked.clone();
        let fullnames: FullnameIndex = Arc::new(RwLock::new(HashMap::new()));

        std::thread::spawn(move || {
            loop {
                match receiver.recv_timeout(CLEANUP_INTERVAL) {
                    Ok(ServiceEvent::ServiceResolved(info)) => {
                        if let Some(peer) = parse_service_info(&info) {
                            let device_id = peer.device_id.clone();
                            fullnames.write().insert(info.fullname.clone(), device_id.clone());
                            tracked_for_thread.write().insert(
                                device_id.clone(),
                                TrackedPeer {
                                    peer: peer.clone(),
                                    last_seen: Instant::now(),
                                },
                            );
                            let _ = tx.blocking_send(DiscoveryEvent::PeerUp(peer));
                        }
                    }
                    Ok(ServiceEvent::ServiceRemoved(_, fullname)) => {
                        let resolved = fullnames
                            .write()
                            .remove(&fullname)
                            .or_else(|| device_id_from_fullname(&fullname));
                        if let Some(device_id) = resolved {
                            tracked_for_thread.write().remove(&device_id);
                            let _ = tx.blocking_send(DiscoveryEvent::PeerDown(device_id));
                        }
                    }
                    Ok(_) => {}
                    Err(_) => {}
                }

                let now = Instant::now();
                let stale: Vec<String> = tracked_for_thread
                    .read()
                    .iter()
                    .filter(|(_, t)| now.duration_since(t.last_seen) > STALE_TIMEOUT)
                    .map(|(id, _)| id.clone())
                    .collect();
                for device_id in stale {
                    tracked_for_thread.write().remove(&device_id);
                    if tx.blocking_send(DiscoveryEvent::PeerDown(device_id)).is_err() {
                        break;
                    }
                }
            }
        });

        Ok(Self {
            _daemon: daemon,
            events: rx,
            tracked,
        })
    }
}

#[async_trait]
impl PeerSource for MdnsPeerSource {
    async fn next_event(&mut self) -> Option<DiscoveryEvent> {
        self.events.recv().await
    }

    fn snapshot(&self) -> Vec<Peer> {
        self.tracked.read().values().map(|t| t.peer.clone()).collect()
    }
}

fn device_id_from_fullname(fullname: &str) -> Option<String> {
    fullname.split('.').next().map(|s| s.to_string())
}

fn txt_get(info: &ResolvedService, key: &str) -> Option<String> {
    info.txt_properties
        .get(key)
        .map(|prop| prop.val_str().to_string())
}

fn parse_service_info(info: &ResolvedService) -> Option<Peer> {
    let ip = info
        .addresses
        .iter()
        .find(|scoped_ip| scoped_ip.is_ipv4())
        .or_else(|| info.addresses.iter().next())
        .map(|scoped_ip| scoped_ip.to_ip_addr())?;
    let port = info.port;

    if let Some(json_prop) = txt_get(info, "beacon") {
        if let Ok(beacon) = serde_json::from_str::<BeaconPayload>(&json_prop) {
            return Some(Peer {
                device_id: beacon.peer_id,
                display_name: beacon.peer_name,
                ip,
                port: beacon.transfer_port,
                public_key_b64: beacon.public_key,
                sync_enabled: beacon.sync_enabled,
                trusted: false,
            });
        }
    }

    if let Some(legacy) = txt_get(info, "legacy") {
        if let Some(peer) = parse_legacy_beacon(&legacy, ip) {
            return Some(peer);
        }
    }

    trace!("service record missing a recognizable beacon payload");
    let device_id = txt_get(info, "id")?;
    Some(Peer {
        device_id,
        display_name: txt_get(info, "name").unwrap_or_else(|| "unknown".to_string()),
        ip,
        port,
        public_key_b64: txt_get(info, "public_key").unwrap_or_default(),
        sync_enabled: txt_get(info, "sync_enabled")
            .map(|v| v == "true")
            .unwrap_or(true),
        trusted: false,
    })
}

/// `SWARM|id|name|port|sync` legacy pipe-delimited beacon (spec §6.3).
fn parse_legacy_beacon(line: &str, ip: IpAddr) -> Option<Peer> {
    let mut parts = line.splitn(5, '|');
    if parts.next()? != "SWARM" {
        return None;
    }
    let device_id = parts.next()?.to_string();
    let display_name = parts.next()?.to_string();
    let port: u16 = parts.next()?.parse().ok()?;
    let sync_enabled = parts.next().map(|v| v == "1" || v == "true").unwrap_or(true);
    debug!(%device_id, "parsed legacy pipe-delimited beacon");
    Some(Peer {
        device_id,
        display_name,
        ip,
        port,
        public_key_b64: String::new(),
        sync_enabled,
        trusted: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_legacy_pipe_delimited_beacon() {
        let peer = parse_legacy_beacon("SWARM|abcd1234|laptop|21027|1", "127.0.0.1".parse().unwrap()).unwrap();
        assert_eq!(peer.device_id, "abcd1234");
        assert_eq!(peer.display_name, "laptop");
        assert_eq!(peer.port, 21027);
        assert!(peer.sync_enabled);
    }

    #[test]
    fn rejects_non_swarm_legacy_line() {
        assert!(parse_legacy_beacon("OTHER|x|y|1|1", "127.0.0.1".parse().unwrap()).is_none());
    }

    #[test]
    fn beacon_payload_parses_from_json() {
        let json = r#"{"protocol":"swarm","version":1,"peer_id":"abcd","peer_name":"box",
            "transfer_port":21027,"sync_enabled":true,"timestamp":1700000000,
            "public_key":"AAAA","signature":"BBBB"}"#;
        let beacon: BeaconPayload = serde_json::from_str(json).unwrap();
        assert_eq!(beacon.peer_id, "abcd");
        assert_eq!(beacon.transfer_port, 21027);
    }
}
