//! Persisted device identity and the trusted-peer table (TOFU).
//!
//! Grounded on the teacher's `security::KeyStore`: atomic write-then-rename
//! identity persistence, owner-only file permissions, and a peers table
//! keyed by fingerprint. The certificate/mTLS machinery is replaced with the
//! raw ECDSA identity of [`crate::crypto::Identity`] per spec §3/§4.2.
use crate::crypto::Identity;
use crate::error::{Result, SwarmError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum TrustStatus {
    Trusted,
    Untrusted,
    Blocked,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnownPeerRecord {
    pub fingerprint: String,
    pub device_id: Option<String>,
    pub name: Option<String>,
    pub status: TrustStatus,
    pub last_seen_secs: u64,
}

#[derive(Serialize, Deserialize)]
struct PersistedIdentity {
    scalar: Vec<u8>,
    device_id: String,
}

#[derive(Serialize, Deserialize, Default)]
struct KnownPeers {
    peers: HashMap<String, KnownPeerRecord>,
}

/// Persisted identity + trust table. The identity keypair lives outside the
/// managed root (a user-profile directory, or beside the executable in
/// portable mode) per spec §6.4.
pub struct IdentityStore {
    identity: Identity,
    device_id: String,
    known_peers: KnownPeers,
    storage_dir: PathBuf,
    pairing_mode: bool,
}

impl IdentityStore {
    pub fn open(storage_dir: PathBuf) -> Result<Self> {
        if !storage_dir.exists() {
            std::fs::create_dir_all(&storage_dir)?;
        }
        restrict_dir(&storage_dir);

        let (identity, device_id) = Self::load_or_create_identity(&storage_dir)?;
        let known_peers = Self::load_known_peers(&storage_dir)?;

        Ok(Self {
            identity,
            device_id,
            known_peers,
            storage_dir,
            pairing_mode: false,
        })
    }

    fn load_or_create_identity(dir: &Path) -> Result<(Identity, String)> {
        let path = dir.join("identity.json");
        if path.exists() {
            let data = std::fs::read(&path)?;
            let persisted: PersistedIdentity = serde_json::from_slice(&data)?;
            let identity = Identity::from_scalar_bytes(&persisted.scalar)?;
            return Ok((identity, persisted.device_id));
        }

        info!("no identity found, generating a new device keypair");
        let identity = Identity::generate();
        let device_id = random_short_id();
        let persisted = PersistedIdentity {
            scalar: identity.to_scalar_bytes(),
            device_id: device_id.clone(),
        };
        write_atomic_restricted(&path, &serde_json::to_vec_pretty(&persisted)?)?;
        Ok((identity, device_id))
    }

    fn load_known_peers(dir: &Path) -> Result<KnownPeers> {
        let path = dir.join("known_peers.json");
        if !path.exists() {
            return Ok(KnownPeers::default());
        }
        let data = std::fs::read(&path)?;
        match serde_json::from_slice(&data) {
            Ok(peers) => Ok(peers),
            Err(e) => {
                warn!("known_peers.json is corrupt ({e}); starting fresh, backing up original");
                let ts = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .unwrap_or_default()
                    .as_secs();
                let backup = dir.join(format!("known_peers.corrupt.{ts}.json"));
                let _ = std::fs::rename(&path, backup);
                Ok(KnownPeers::default())
            }
        }
    }

    fn save_peers(&self) -> Result<()> {
        let path = self.storage_dir.join("known_peers.json");
        write_atomic_restricted(&path, &serde_json::to_vec_pretty(&self.known_peers)?)
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn fingerprint(&self) -> String {
        self.identity.device_fingerprint()
    }

    pub fn is_trusted(&self, fingerprint: &str) -> bool {
        matches!(
            self.known_peers.peers.get(fingerprint).map(|p| &p.status),
            Some(TrustStatus::Trusted)
        )
    }

    pub fn is_blocked(&self, fingerprint: &str) -> bool {
        matches!(
            self.known_peers.peers.get(fingerprint).map(|p| &p.status),
            Some(TrustStatus::Blocked)
        )
    }

    pub fn needs_pairing(&self, fingerprint: &str) -> bool {
        self.known_peers.peers.get(fingerprint).is_none()
    }

    pub fn trust_peer(&mut self, fingerprint: String, device_id: Option<String>, name: Option<String>) -> Result<()> {
        self.known_peers.peers.insert(
            fingerprint.clone(),
            KnownPeerRecord {
                fingerprint,
                device_id,
                name,
                status: TrustStatus::Trusted,
                last_seen_secs: now_secs(),
            },
        );
        self.save_peers()
    }

    pub fn block_peer(&mut self, fingerprint: String) -> Result<()> {
        self.known_peers.peers.insert(
            fingerprint.clone(),
            KnownPeerRecord {
                fingerprint,
                device_id: None,
                name: None,
                status: TrustStatus::Blocked,
                last_seen_secs: now_secs(),
            },
        );
        self.save_peers()
    }

    pub fn forget_peer(&mut self, fingerprint: &str) -> Result<()> {
        self.known_peers.peers.remove(fingerprint);
        self.save_peers()
    }

    pub fn set_pairing_mode(&mut self, enabled: bool) {
        self.pairing_mode = enabled;
    }

    pub fn is_pairing_mode(&self) -> bool {
        self.pairing_mode
    }

    pub fn known_peers(&self) -> Vec<KnownPeerRecord> {
        self.known_peers.peers.values().cloned().collect()
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn random_short_id() -> String {
    use rand::RngCore;
    let mut bytes = [0u8; 4];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(unix)]
fn restrict_dir(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    let perms = std::fs::Permissions::from_mode(0o700);
    if let Err(e) = std::fs::set_permissions(path, perms) {
        warn!("failed to restrict storage directory permissions: {e}");
    }
}

#[cfg(not(unix))]
fn restrict_dir(_path: &Path) {
    // Best-effort only: on non-Unix platforms, file-mode-600 is an OS
    // convention spec §3 only requires where it is meaningful. A real
    // deployment would use an OS-provided user-scoped key-protection
    // facility here (see `IdentityStore` doc comment in spec §3).
}

fn write_atomic_restricted(path: &Path, data: &[u8]) -> Result<()> {
    let tmp_path = path.with_extension("json.tmp");
    std::fs::write(&tmp_path, data)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        std::fs::set_permissions(&tmp_path, perms)?;
    }

    {
        let f = std::fs::File::open(&tmp_path)?;
        f.sync_all()?;
    }

    std::fs::rename(&tmp_path, path)
        .map_err(|e| SwarmError::Initialization(format!("failed to persist {path:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_and_reloads_identity() {
        let dir = tempfile::tempdir().unwrap();
        let store = IdentityStore::open(dir.path().to_path_buf()).unwrap();
        let fp = store.fingerprint();
        drop(store);

        let reloaded = IdentityStore::open(dir.path().to_path_buf()).unwrap();
        assert_eq!(reloaded.fingerprint(), fp);
    }

    #[test]
    fn trust_then_forget_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = IdentityStore::open(dir.path().to_path_buf()).unwrap();
        assert!(store.needs_pairing("abc"));
        store.trust_peer("abc".into(), Some("dev1".into()), Some("laptop".into())).unwrap();
        assert!(store.is_trusted("abc"));
        store.forget_peer("abc").unwrap();
        assert!(store.needs_pairing("abc"));
    }

    #[test]
    fn recovers_from_corrupt_known_peers_file() {
        let dir = tempfile::tempdir().unwrap();
        let _ = IdentityStore::open(dir.path().to_path_buf()).unwrap();
        std::fs::write(dir.path().join("known_peers.json"), b"not json").unwrap();
        let store = IdentityStore::open(dir.path().to_path_buf()).unwrap();
        assert!(store.known_peers().is_empty());
    }
}
