use crate::peer::Peer;
use serde::{Deserialize, Serialize};
use std::time::SystemTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferDirection {
    Incoming,
    Outgoing,
}

/// Status events surfaced to external listeners (GUI, logging, tests).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SwarmEvent {
    PeerUp(Peer),
    PeerDown(String),
    ManifestReceived {
        peer_id: String,
        entry_count: usize,
    },
    TransferStarted {
        id: String,
        relative_path: String,
        total_size: u64,
        peer_id: String,
        direction: TransferDirection,
    },
    TransferProgress {
        id: String,
        bytes_transferred: u64,
        total_size: u64,
    },
    TransferCompleted {
        id: String,
        relative_path: String,
    },
    TransferFailed {
        id: String,
        error: String,
    },
    ConflictDetected {
        relative_path: String,
        peer_id: String,
        resolution: String,
    },
    TimeTravelDetected {
        relative_path: String,
        #[serde(with = "system_time_secs")]
        remote_mtime: SystemTime,
    },
    RescanRequested {
        reason: String,
    },
    /// Storage failure forced the engine into degraded read-only mode (§7 kind 7).
    StatusChanged {
        degraded: bool,
        reason: String,
    },
    /// An unknown peer attempted to connect; deferred to the external
    /// pairing-code UI for a trust decision.
    PairingRequest {
        device_id: String,
        display_name: String,
    },
    Error(String),
}

mod system_time_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::{SystemTime, UNIX_EPOCH};

    pub fn serialize<S: Serializer>(t: &SystemTime, s: S) -> Result<S::Ok, S::Error> {
        let secs = t
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        secs.serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<SystemTime, D::Error> {
        let secs = u64::deserialize(d)?;
        Ok(UNIX_EPOCH + std::time::Duration::from_secs(secs))
    }
}
