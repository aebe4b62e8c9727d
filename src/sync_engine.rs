//! Sync engine (C11): the coordination core. Maintains the local manifest,
//! diffs incoming manifests, enforces echo suppression / conflict
//! resolution / future-timestamp rejection, and orchestrates delta
//! transfers through the connection pool.
//!
//! Grounded on the teacher's `ConnectedClient` (client.rs): a single struct
//! holding `Arc`-shared subsystems plus a `broadcast::Sender` for status
//! events, an accept loop bounded by a semaphore, and per-peer connection
//! bookkeeping behind a lock. The message-dispatch `match` mirrors the
//! teacher's `Message` handling in its read loop (client.rs's big `match
//! message { ... }` block), generalized to the sync vocabulary of spec §6.1.
use crate::channel::{SecureChannel, HEADER_HANDSHAKE, HEADER_SYNC, HEADER_TRANSFER};
use crate::codec::{self, SyncMessage};
use crate::config::EngineConfig;
use crate::crypto::Identity;
use crate::delta;
use crate::error::{Result, SwarmError};
use crate::events::{SwarmEvent, TransferDirection};
use crate::hasher;
use crate::identity::IdentityStore;
use crate::ignore::IgnoreMatcher;
use crate::model::{mtime_secs, FileAction, Manifest, SyncedFile};
use crate::peer::{Peer, PeerDirectory};
use crate::pool::{AcceptLimiter, ConnectionPool};
use crate::state_store::{self, StateStore};
use crate::watcher::{EchoSuppressor, SemanticEvent};
use crate::wire;
use parking_lot::{Mutex as SyncMutex, RwLock as SyncRwLock};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

/// Decision returned by a pluggable conflict resolver when both sides have
/// changed a file since the last synced baseline (spec §4.11 "conflict
/// escalation").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictResolution {
    KeepLocal,
    KeepRemote,
    KeepBoth,
    Skip,
}

/// External collaborator (spec §4.11): decides how to resolve a true
/// conflict (both sides changed since the last synced baseline). Not a
/// core component — a capability the engine is constructed with, with a
/// no-op-equivalent default supplied below.
pub trait ConflictResolutionService: Send + Sync {
    fn resolve(
        &self,
        relative_path: &str,
        peer_id: &str,
        local: &SyncedFile,
        remote: &SyncedFile,
    ) -> ConflictResolution;
}

/// Default conflict policy when no resolver is configured: auto-newest by
/// mtime, `KeepLocal` when local wins (spec §4.11).
pub struct AutoNewestResolver;

impl ConflictResolutionService for AutoNewestResolver {
    fn resolve(
        &self,
        _relative_path: &str,
        _peer_id: &str,
        local: &SyncedFile,
        remote: &SyncedFile,
    ) -> ConflictResolution {
        if remote_wins(local, remote) {
            ConflictResolution::KeepRemote
        } else {
            ConflictResolution::KeepLocal
        }
    }
}

/// External collaborator: the per-file version archive (spec §1 names it as
/// out of scope). The engine only calls out to it before overwriting a
/// local file during conflict escalation; a no-op default is supplied.
pub trait VersioningService: Send + Sync {
    fn archive(&self, relative_path: &str, local_path: &Path) -> Result<()>;
}

pub struct NoopVersioning;

impl VersioningService for NoopVersioning {
    fn archive(&self, _relative_path: &str, _local_path: &Path) -> Result<()> {
        Ok(())
    }
}

/// LWW conflict rule (§4.11): remote wins iff its mtime is strictly newer,
/// or mtimes tie and its hash sorts lexicographically lower.
pub fn remote_wins(local: &SyncedFile, remote: &SyncedFile) -> bool {
    let (lt, rt) = (mtime_secs(local.last_modified), mtime_secs(remote.last_modified));
    match lt.cmp(&rt) {
        std::cmp::Ordering::Less => true,
        std::cmp::Ordering::Greater => false,
        std::cmp::Ordering::Equal => remote.content_hash < local.content_hash,
    }
}

/// True if `remote_mtime` is further in the future than `tolerance` allows
/// (§4.11 "future-timestamp guard", default tolerance 10 minutes).
pub fn is_future_timestamp(remote_mtime: SystemTime, tolerance: Duration) -> bool {
    match remote_mtime.duration_since(SystemTime::now()) {
        Ok(ahead) => ahead > tolerance,
        Err(_) => false,
    }
}

/// Result of conflict-escalation handling for one incoming write.
enum ConflictOutcome {
    /// No conflict, or the resolver picked the incoming side: write to the
    /// primary path as usual.
    Proceed,
    /// The resolver kept local state (or asked to skip): discard the
    /// incoming bytes/delta entirely.
    Stop,
    /// `KeepBoth`: write the incoming bytes to this side-by-side relative
    /// path instead, leaving the primary path untouched.
    WriteSideBySide(String),
}

/// `<name> (conflict from <peer>).<ext>`, per spec §4.11 `KeepBoth`.
fn conflict_side_path(relative_path: &str, peer_id: &str) -> String {
    let (parent, file_name) = match relative_path.rsplit_once('/') {
        Some((p, f)) => (Some(p), f),
        None => (None, relative_path),
    };
    let side_name = match file_name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{stem} (conflict from {peer_id}).{ext}"),
        _ => format!("{file_name} (conflict from {peer_id})"),
    };
    match parent {
        Some(p) => format!("{p}/{side_name}"),
        None => side_name,
    }
}

/// One outstanding delta-sync exchange this engine initiated (§4.11).
#[derive(Debug, Clone)]
struct PendingDelta {
    peer_id: String,
    fingerprint: SyncedFile,
}

/// The coordination core (C11). Generic over nothing — discovery is
/// injected as a stream of [`crate::discovery::DiscoveryEvent`] the caller
/// feeds in via [`SyncEngine::on_peer_up`]/[`SyncEngine::on_peer_down`],
/// keeping the engine decoupled from any one discovery transport per
/// spec §4.1.
pub struct SyncEngine {
    config: EngineConfig,
    managed_root: PathBuf,
    device_id: String,
    display_name: String,
    /// Identity is immutable after construction (signing borrows `&self`
    /// and touches no interior mutable state), so a bare `Arc` satisfies
    /// spec §5's "single reference" requirement without an extra mutex.
    identity: Arc<Identity>,
    identity_store: Arc<SyncMutex<IdentityStore>>,
    state_store: Arc<StateStore>,
    ignore: Arc<IgnoreMatcher>,
    echo: EchoSuppressor,
    peers: Arc<SyncRwLock<PeerDirectory>>,
    pools: Arc<SyncRwLock<HashMap<String, Arc<ConnectionPool>>>>,
    pending_deltas: Arc<SyncMutex<HashMap<String, PendingDelta>>>,
    accept_limiter: Arc<AcceptLimiter>,
    event_tx: broadcast::Sender<SwarmEvent>,
    conflict_resolver: Arc<dyn ConflictResolutionService>,
    versioning: Arc<dyn VersioningService>,
    paused: AtomicBool,
    degraded: AtomicBool,
    cancelled: Arc<tokio::sync::Notify>,
    shutting_down: AtomicBool,
}

const EVENT_CHANNEL_CAPACITY: usize = 512;
const BLOCK_SIGNATURES_TIMEOUT: Duration = Duration::from_secs(30);
const FILE_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

impl SyncEngine {
    pub fn new(
        config: EngineConfig,
        managed_root: PathBuf,
        identity_store: IdentityStore,
        conflict_resolver: Option<Arc<dyn ConflictResolutionService>>,
        versioning: Option<Arc<dyn VersioningService>>,
    ) -> Result<Arc<Self>> {
        let vault_dir = state_store::default_vault_dir(&managed_root);
        let state_store = Arc::new(StateStore::open(&vault_dir)?);
        let ignore = Arc::new(IgnoreMatcher::load(&managed_root)?);
        let (event_tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let device_id = identity_store.device_id().to_string();
        // Placeholder display name; callers that own a settings layer
        // override it via `set_display_name` before going live.
        let display_name = device_id.clone();
        let identity = Arc::new(identity_store_identity(&identity_store));
        let echo = EchoSuppressor::new(config.echo_suppression_ttl);

        Ok(Arc::new(Self {
            config,
            managed_root,
            device_id,
            display_name,
            identity,
            identity_store: Arc::new(SyncMutex::new(identity_store)),
            state_store,
            ignore,
            echo,
            peers: Arc::new(SyncRwLock::new(PeerDirectory::new())),
            pools: Arc::new(SyncRwLock::new(HashMap::new())),
            pending_deltas: Arc::new(SyncMutex::new(HashMap::new())),
            accept_limiter: Arc::new(AcceptLimiter::new()),
            event_tx,
            conflict_resolver: conflict_resolver.unwrap_or_else(|| Arc::new(AutoNewestResolver)),
            versioning: versioning.unwrap_or_else(|| Arc::new(NoopVersioning)),
            paused: AtomicBool::new(false),
            degraded: AtomicBool::new(false),
            cancelled: Arc::new(tokio::sync::Notify::new()),
            shutting_down: AtomicBool::new(false),
        }))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SwarmEvent> {
        self.event_tx.subscribe()
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn set_display_name(&mut self, name: String) {
        self.display_name = name;
    }

    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::SeqCst);
    }

    pub fn echo_suppressor(&self) -> &EchoSuppressor {
        &self.echo
    }

    fn emit(&self, event: SwarmEvent) {
        let _ = self.event_tx.send(event);
    }

    fn relative_path_of(&self, path: &Path) -> Option<String> {
        path.strip_prefix(&self.managed_root)
            .ok()
            .map(|p| p.to_string_lossy().replace('\\', "/"))
    }

    fn absolute_path_of(&self, relative_path: &str) -> PathBuf {
        self.managed_root.join(relative_path)
    }

    // ------------------------------------------------------------------
    // Initial scan (§4.11)
    // ------------------------------------------------------------------

    /// Walk the managed root once at startup: adopt the cached hash when
    /// `(size, mtime-within-1s)` matches the state store's entry, otherwise
    /// recompute. Saves the updated store before returning.
    pub async fn initial_scan(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for entry in WalkDir::new(&self.managed_root)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if entry.file_type().is_dir() {
                continue;
            }
            let Some(relative) = self.relative_path_of(entry.path()) else {
                continue;
            };
            if self.ignore.is_ignored(&relative, false) {
                continue;
            }
            seen.insert(relative.clone());

            let metadata = match entry.metadata() {
                Ok(m) => m,
                Err(e) => {
                    warn!("skipping unreadable file {relative}: {e}");
                    continue;
                }
            };
            let size = metadata.len();
            let mtime = metadata.modified().unwrap_or(UNIX_EPOCH);

            let cached = self.state_store.get(&relative)?;
            let hash = match &cached {
                Some(existing)
                    if existing.file_size == size
                        && mtimes_within_one_second(existing.last_modified, mtime) =>
                {
                    existing.content_hash.clone()
                }
                _ => {
                    hasher::hash_file_with_retries(entry.path(), self.config.hash_retry_attempts as usize).await?
                }
            };

            let fingerprint = SyncedFile::new_file(relative.clone(), hash, size, mtime);
            self.state_store.add_or_update(&fingerprint)?;
        }

        // Entries recorded in the store but no longer present on disk are
        // left for the integrity scanner to reconcile (spec §4.3: loss of
        // liveness here is tolerated, not corrected inline).
        let _ = seen;
        self.state_store.flush()?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Local watcher event handling (§4.11 "Per-event handling")
    // ------------------------------------------------------------------

    pub async fn handle_local_event(&self, event: SemanticEvent) -> Result<()> {
        match event {
            SemanticEvent::Created(rel) | SemanticEvent::Modified(rel) => {
                self.handle_local_create_or_update(&rel).await
            }
            SemanticEvent::Deleted(rel) => self.handle_local_delete(&rel).await,
            SemanticEvent::Renamed(old, new) => self.handle_local_rename(&old, &new).await,
            SemanticEvent::DirectoryRenamed(old, new) => {
                self.handle_local_directory_rename(&old, &new).await
            }
            SemanticEvent::Rescan => {
                self.emit(SwarmEvent::RescanRequested {
                    reason: "watcher buffer overflow".into(),
                });
                self.initial_scan().await
            }
        }
    }

    async fn handle_local_create_or_update(&self, relative_path: &str) -> Result<()> {
        if self.ignore.is_ignored(relative_path, false) {
            return Ok(());
        }
        let path = self.absolute_path_of(relative_path);
        let metadata = match tokio::fs::metadata(&path).await {
            Ok(m) => m,
            Err(_) => return Ok(()), // raced with a delete; the Deleted event will follow.
        };
        let is_directory = metadata.is_dir();
        let (hash, size, mtime) = if is_directory {
            (String::new(), 0, metadata.modified().unwrap_or(UNIX_EPOCH))
        } else {
            let hash = hasher::hash_file_with_retries(&path, self.config.hash_retry_attempts as usize).await?;
            (hash, metadata.len(), metadata.modified().unwrap_or(UNIX_EPOCH))
        };

        let mut fingerprint = SyncedFile::new_file(relative_path, hash, size, mtime);
        fingerprint.is_directory = is_directory;
        fingerprint.source_peer_id = Some(self.device_id.clone());
        self.state_store.add_or_update(&fingerprint)?;

        if !self.paused.load(Ordering::SeqCst) {
            self.broadcast_change(&fingerprint).await;
        }
        Ok(())
    }

    async fn handle_local_delete(&self, relative_path: &str) -> Result<()> {
        let was_dir = self
            .state_store
            .get(relative_path)?
            .map(|f| f.is_directory)
            .unwrap_or(false);
        self.state_store.remove(relative_path)?;
        if self.paused.load(Ordering::SeqCst) {
            return Ok(());
        }
        let msg = if was_dir {
            SyncMessage::DirDeleted {
                relative_path: relative_path.to_string(),
            }
        } else {
            SyncMessage::FileDeleted {
                relative_path: relative_path.to_string(),
                is_directory: false,
            }
        };
        self.broadcast_message(&msg).await;
        Ok(())
    }

    async fn handle_local_rename(&self, old_relative_path: &str, new_relative_path: &str) -> Result<()> {
        let was_dir = self
            .state_store
            .get(old_relative_path)?
            .map(|f| f.is_directory)
            .unwrap_or(false);
        self.state_store.rename(old_relative_path, new_relative_path)?;
        if self.paused.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.broadcast_message(&SyncMessage::FileRenamed {
            old_relative_path: old_relative_path.to_string(),
            new_relative_path: new_relative_path.to_string(),
            is_directory: was_dir,
        })
        .await;
        Ok(())
    }

    async fn handle_local_directory_rename(&self, old_prefix: &str, new_prefix: &str) -> Result<()> {
        self.state_store.rename_prefix(old_prefix, new_prefix)?;
        if self.paused.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.broadcast_message(&SyncMessage::FileRenamed {
            old_relative_path: old_prefix.to_string(),
            new_relative_path: new_prefix.to_string(),
            is_directory: true,
        })
        .await;
        Ok(())
    }

    async fn broadcast_change(&self, fingerprint: &SyncedFile) {
        let peers = self.peers.read().trusted_sync_enabled();
        for peer in peers {
            if let Err(e) = self.push_file(&peer, fingerprint).await {
                warn!(peer = %peer.device_id, "failed to push {}: {e}", fingerprint.relative_path);
            }
        }
    }

    async fn broadcast_message(&self, msg: &SyncMessage) {
        let peers = self.peers.read().trusted_sync_enabled();
        for peer in peers {
            if let Err(e) = self.send_to_peer(&peer, msg).await {
                warn!(peer = %peer.device_id, "failed to deliver message: {e}");
            }
        }
    }

    // ------------------------------------------------------------------
    // Peer lifecycle (§4.1)
    // ------------------------------------------------------------------

    pub async fn on_peer_up(&self, peer: Peer) -> Result<()> {
        self.peers.write().upsert(peer.clone());
        self.emit(SwarmEvent::PeerUp(peer.clone()));

        let fingerprint = peer.fingerprint();
        if self.identity_store.lock().needs_pairing(&fingerprint) {
            self.emit(SwarmEvent::PairingRequest {
                device_id: peer.device_id.clone(),
                display_name: peer.display_name.clone(),
            });
        }

        if peer.trusted && peer.sync_enabled {
            self.push_manifest_to(&peer).await?;
        }
        Ok(())
    }

    pub fn on_peer_down(&self, device_id: &str) {
        self.peers.write().remove(device_id);
        self.pools.write().remove(device_id);
        self.emit(SwarmEvent::PeerDown(device_id.to_string()));
    }

    /// Evict peers idle past the configured timeout (spec §6.5 default 60s).
    pub fn evict_idle_peers(&self) -> Vec<String> {
        let evicted = self.peers.write().evict_idle(self.config.peer_idle_timeout);
        for id in &evicted {
            self.pools.write().remove(id);
            self.emit(SwarmEvent::PeerDown(id.clone()));
        }
        evicted
    }

    fn peer_is_trusted(&self, peer_fingerprint: &str) -> bool {
        self.identity_store.lock().is_trusted(peer_fingerprint)
    }

    // ------------------------------------------------------------------
    // Manifest exchange (§4.11 "On peer-up" / "ProcessIncomingManifest")
    // ------------------------------------------------------------------

    pub async fn local_manifest(&self) -> Result<Manifest> {
        self.state_store.enumerate_all()
    }

    pub async fn push_manifest_to(&self, peer: &Peer) -> Result<()> {
        let manifest = self.local_manifest().await?;
        self.send_to_peer(peer, &SyncMessage::SyncManifest { manifest })
            .await
    }

    /// Diff an incoming manifest against local state: request files we're
    /// missing or that lose under the LWW rule; the companion local-push
    /// sweep (pushing entries the peer doesn't have) happens separately via
    /// [`Self::push_manifest_to`] on the next local change or peer-up.
    pub async fn process_incoming_manifest(&self, from_peer: &Peer, manifest: Manifest) -> Result<()> {
        self.emit(SwarmEvent::ManifestReceived {
            peer_id: from_peer.device_id.clone(),
            entry_count: manifest.len(),
        });

        for remote in &manifest {
            if remote.action == FileAction::Delete {
                continue;
            }
            let local = self.state_store.get(&remote.relative_path)?;
            match local {
                None => {
                    self.request_file(from_peer, &remote.relative_path).await?;
                }
                Some(local) if local.content_hash != remote.content_hash => {
                    if is_future_timestamp(remote.last_modified, self.config.future_timestamp_tolerance) {
                        self.emit(SwarmEvent::TimeTravelDetected {
                            relative_path: remote.relative_path.clone(),
                            remote_mtime: remote.last_modified,
                        });
                        continue;
                    }
                    if remote_wins(&local, remote) {
                        self.request_file(from_peer, &remote.relative_path).await?;
                    }
                    // local wins: nothing to do here, the companion push sweep handles it.
                }
                Some(_) => {} // identical hash, nothing to do.
            }
        }
        Ok(())
    }

    /// Request `relative_path` from `peer` and apply whatever whole-file
    /// reply comes back, holding the connection for the round trip (same
    /// idiom as [`Self::push_file_with_delta`]'s signature exchange).
    async fn request_file(&self, peer: &Peer, relative_path: &str) -> Result<()> {
        let pool = self.pool_for(peer);
        let mut conn = pool
            .acquire(&self.identity, &self.device_id, &self.display_name)
            .await?;

        let outcome = async {
            conn.channel
                .send(&SyncMessage::RequestFile {
                    relative_path: relative_path.to_string(),
                })
                .await?;

            let reply = tokio::time::timeout(FILE_REQUEST_TIMEOUT, conn.channel.recv())
                .await
                .map_err(|_| SwarmError::Timeout("waiting for requested file".into()))??;

            match reply {
                SyncMessage::FileChangedCompressed {
                    relative_path: reply_path,
                    hash,
                    mtime,
                    original_size,
                    compressed,
                } if reply_path.eq_ignore_ascii_case(relative_path) => {
                    let data = codec::brotli_decompress(&compressed)?;
                    self.apply_whole_file(peer, &reply_path, &hash, mtime, original_size, false, data)
                        .await
                }
                SyncMessage::FileChanged {
                    relative_path: reply_path,
                    hash,
                    mtime,
                    size,
                    is_directory,
                    data,
                } if reply_path.eq_ignore_ascii_case(relative_path) => {
                    self.apply_whole_file(peer, &reply_path, &hash, mtime, size, is_directory, data)
                        .await
                }
                other => {
                    debug!("unexpected reply to file request for {relative_path}: {other:?}");
                    Err(SwarmError::Protocol("unexpected reply to file request".into()))
                }
            }
        }
        .await;

        pool.release(conn);
        outcome
    }

    // ------------------------------------------------------------------
    // Outbound transport: pool acquire/release around one message or one
    // request/response exchange (spec §4.8: the connection's own lock is
    // held for the duration of one exchange, no longer).
    // ------------------------------------------------------------------

    fn pool_for(&self, peer: &Peer) -> Arc<ConnectionPool> {
        if let Some(pool) = self.pools.read().get(&peer.device_id) {
            return pool.clone();
        }
        let mut pools = self.pools.write();
        pools
            .entry(peer.device_id.clone())
            .or_insert_with(|| {
                Arc::new(ConnectionPool::with_config(
                    peer.endpoint(),
                    self.config.max_connections_per_peer,
                    self.config.replay_max_gap,
                    self.config.replay_window_size,
                ))
            })
            .clone()
    }

    pub async fn send_to_peer(&self, peer: &Peer, msg: &SyncMessage) -> Result<()> {
        let pool = self.pool_for(peer);
        let mut conn = pool
            .acquire(&self.identity, &self.device_id, &self.display_name)
            .await?;
        let result = conn.channel.send(msg).await;
        pool.release(conn);
        result
    }

    /// Push one file to `peer`. Below the delta threshold, or when the peer
    /// has never held a version, sends a whole (Brotli-compressed) file.
    /// At or above threshold, drives the request-signatures/delta exchange
    /// of spec §4.11 over a single held connection.
    async fn push_file(&self, peer: &Peer, fingerprint: &SyncedFile) -> Result<()> {
        if fingerprint.is_directory {
            return self
                .send_to_peer(
                    peer,
                    &SyncMessage::DirCreated {
                        relative_path: fingerprint.relative_path.clone(),
                    },
                )
                .await;
        }

        let use_delta = fingerprint.file_size >= self.config.delta_threshold_bytes
            && !codec::skip_compression(&fingerprint.relative_path);

        if use_delta {
            match self.push_file_with_delta(peer, fingerprint).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!("delta push failed ({e}), falling back to full send");
                }
            }
        }
        self.push_file_whole(peer, fingerprint).await
    }

    async fn push_file_whole(&self, peer: &Peer, fingerprint: &SyncedFile) -> Result<()> {
        let path = self.absolute_path_of(&fingerprint.relative_path);
        let data = tokio::fs::read(&path).await?;
        let compressed = codec::brotli_compress(&data);
        let transfer_id = uuid::Uuid::new_v4().to_string();
        self.emit(SwarmEvent::TransferStarted {
            id: transfer_id.clone(),
            relative_path: fingerprint.relative_path.clone(),
            total_size: fingerprint.file_size,
            peer_id: peer.device_id.clone(),
            direction: TransferDirection::Outgoing,
        });
        let result = self
            .send_to_peer(
                peer,
                &SyncMessage::FileChangedCompressed {
                    relative_path: fingerprint.relative_path.clone(),
                    hash: fingerprint.content_hash.clone(),
                    mtime: mtime_secs(fingerprint.last_modified),
                    original_size: data.len() as i64,
                    compressed,
                },
            )
            .await;
        match &result {
            Ok(()) => self.emit(SwarmEvent::TransferCompleted {
                id: transfer_id,
                relative_path: fingerprint.relative_path.clone(),
            }),
            Err(e) => self.emit(SwarmEvent::TransferFailed {
                id: transfer_id,
                error: e.to_string(),
            }),
        }
        result
    }

    async fn push_file_with_delta(&self, peer: &Peer, fingerprint: &SyncedFile) -> Result<()> {
        let key = fingerprint.relative_path.to_lowercase();
        self.pending_deltas.lock().insert(
            key.clone(),
            PendingDelta {
                peer_id: peer.device_id.clone(),
                fingerprint: fingerprint.clone(),
            },
        );

        let pool = self.pool_for(peer);
        let mut conn = pool
            .acquire(&self.identity, &self.device_id, &self.display_name)
            .await?;

        let outcome = async {
            conn.channel
                .send(&SyncMessage::RequestSignatures {
                    relative_path: fingerprint.relative_path.clone(),
                })
                .await?;

            let reply = tokio::time::timeout(BLOCK_SIGNATURES_TIMEOUT, conn.channel.recv())
                .await
                .map_err(|_| SwarmError::Timeout("waiting for BLOCK_SIGNATURES".into()))??;

            let signatures = match reply {
                SyncMessage::BlockSignatures {
                    relative_path,
                    signatures,
                } if relative_path.eq_ignore_ascii_case(&fingerprint.relative_path) => signatures,
                other => {
                    debug!("dropping reply {other:?}, did not match pending delta for {key}");
                    return Err(SwarmError::Protocol("unexpected reply to signature request".into()));
                }
            };

            let path = self.absolute_path_of(&fingerprint.relative_path);
            let new_bytes = tokio::fs::read(&path).await?;

            if signatures.is_empty() {
                drop(new_bytes);
                return Err(SwarmError::Protocol("peer has no prior version".into()));
            }

            let block_size = self.config.block_size as usize;
            let instructions = delta::compute_delta(&new_bytes, &signatures, block_size);
            if delta::should_fall_back_to_full_send(&instructions, new_bytes.len() as u64) {
                return Err(SwarmError::Protocol("delta not worthwhile".into()));
            }

            conn.channel
                .send(&SyncMessage::DeltaData {
                    relative_path: fingerprint.relative_path.clone(),
                    hash: fingerprint.content_hash.clone(),
                    mtime: mtime_secs(fingerprint.last_modified),
                    size: new_bytes.len() as i64,
                    instructions,
                })
                .await
        }
        .await;

        self.pending_deltas.lock().remove(&key);
        pool.release(conn);
        outcome
    }

    // ------------------------------------------------------------------
    // Inbound message dispatch (§4.11 (d))
    // ------------------------------------------------------------------

    /// Dispatch one decoded message received on `channel` from `peer`.
    /// Mutating operations require the peer be both handshaken AND trusted
    /// (spec §9 Open Questions resolution); untrusted handshaken peers may
    /// only exchange manifests (observe, not mutate).
    pub async fn handle_incoming_message(
        &self,
        peer: &Peer,
        channel: &mut SecureChannel,
        msg: SyncMessage,
    ) -> Result<()> {
        let trusted = self.peer_is_trusted(&channel.peer_fingerprint);

        match msg {
            SyncMessage::SyncManifest { manifest } => {
                self.process_incoming_manifest(peer, manifest).await
            }
            SyncMessage::RequestFile { relative_path } => {
                self.serve_request_file(peer, channel, &relative_path).await
            }
            SyncMessage::RequestSignatures { relative_path } => {
                self.serve_request_signatures(channel, &relative_path).await
            }
            SyncMessage::BlockSignatures { .. } => {
                // Arrives only as a direct reply within `push_file_with_delta`'s
                // held connection; if dispatched here the pending entry has
                // already been cleared or never existed. Drop (spec §4.11:
                // "signatures for an unexpected path arrive: drop").
                debug!("unsolicited BLOCK_SIGNATURES outside a pending exchange; dropping");
                Ok(())
            }
            _ if !trusted => {
                debug!(peer = %peer.device_id, "untrusted peer attempted a mutating operation; ignoring");
                Err(SwarmError::PeerNotTrusted(peer.device_id.clone()))
            }
            SyncMessage::FileChanged {
                relative_path,
                hash,
                mtime,
                size,
                is_directory,
                data,
            } => {
                self.apply_whole_file(peer, &relative_path, &hash, mtime, size, is_directory, data)
                    .await
            }
            SyncMessage::FileChangedCompressed {
                relative_path,
                hash,
                mtime,
                original_size,
                compressed,
            } => {
                let data = codec::brotli_decompress(&compressed)?;
                self.apply_whole_file(peer, &relative_path, &hash, mtime, original_size, false, data)
                    .await
            }
            SyncMessage::FileDeleted { relative_path, .. } => {
                self.apply_remote_delete(&relative_path).await
            }
            SyncMessage::DirDeleted { relative_path } => self.apply_remote_delete(&relative_path).await,
            SyncMessage::DirCreated { relative_path } => {
                self.echo.suppress(&relative_path);
                let full = self.absolute_path_of(&relative_path);
                tokio::fs::create_dir_all(&full).await?;
                let mut fp = SyncedFile::new_file(relative_path.clone(), "", 0, SystemTime::now());
                fp.is_directory = true;
                fp.source_peer_id = Some(peer.device_id.clone());
                self.state_store.add_or_update(&fp)?;
                Ok(())
            }
            SyncMessage::FileRenamed {
                old_relative_path,
                new_relative_path,
                is_directory,
            } => {
                self.echo.suppress(&old_relative_path);
                self.echo.suppress(&new_relative_path);
                let old_full = self.absolute_path_of(&old_relative_path);
                let new_full = self.absolute_path_of(&new_relative_path);
                if old_full.exists() {
                    if let Some(parent) = new_full.parent() {
                        tokio::fs::create_dir_all(parent).await?;
                    }
                    tokio::fs::rename(&old_full, &new_full).await?;
                }
                if is_directory {
                    self.state_store
                        .rename_prefix(&old_relative_path, &new_relative_path)?;
                } else {
                    self.state_store.rename(&old_relative_path, &new_relative_path)?;
                }
                Ok(())
            }
            SyncMessage::DeltaData {
                relative_path,
                hash,
                mtime,
                size,
                instructions,
            } => {
                self.apply_delta_data(peer, &relative_path, &hash, mtime, size, instructions)
                    .await
            }
        }
    }

    async fn serve_request_file(
        &self,
        peer: &Peer,
        channel: &mut SecureChannel,
        relative_path: &str,
    ) -> Result<()> {
        let Some(fingerprint) = self.state_store.get(relative_path)? else {
            return Ok(());
        };
        let path = self.absolute_path_of(relative_path);
        let data = tokio::fs::read(&path).await?;
        let compressed = codec::brotli_compress(&data);
        let transfer_id = uuid::Uuid::new_v4().to_string();
        self.emit(SwarmEvent::TransferStarted {
            id: transfer_id.clone(),
            relative_path: relative_path.to_string(),
            total_size: fingerprint.file_size,
            peer_id: peer.device_id.clone(),
            direction: TransferDirection::Outgoing,
        });
        let result = channel
            .send(&SyncMessage::FileChangedCompressed {
                relative_path: relative_path.to_string(),
                hash: fingerprint.content_hash,
                mtime: mtime_secs(fingerprint.last_modified),
                original_size: data.len() as i64,
                compressed,
            })
            .await;
        match &result {
            Ok(()) => self.emit(SwarmEvent::TransferCompleted {
                id: transfer_id,
                relative_path: relative_path.to_string(),
            }),
            Err(e) => self.emit(SwarmEvent::TransferFailed {
                id: transfer_id,
                error: e.to_string(),
            }),
        }
        result
    }

    /// Receiver-side signature service (§4.11): compute signatures of the
    /// local file, or an empty list if absent.
    async fn serve_request_signatures(&self, channel: &mut SecureChannel, relative_path: &str) -> Result<()> {
        let path = self.absolute_path_of(relative_path);
        let signatures = if path.exists() {
            let block_size = self.config.block_size as usize;
            delta::signatures_of_file(&path, block_size)?
        } else {
            Vec::new()
        };
        channel
            .send(&SyncMessage::BlockSignatures {
                relative_path: relative_path.to_string(),
                signatures,
            })
            .await
    }

    async fn apply_whole_file(
        &self,
        peer: &Peer,
        relative_path: &str,
        hash: &str,
        mtime: i64,
        size: i64,
        is_directory: bool,
        data: Vec<u8>,
    ) -> Result<()> {
        if is_future_timestamp(
            UNIX_EPOCH + Duration::from_secs(mtime.max(0) as u64),
            self.config.future_timestamp_tolerance,
        ) {
            self.emit(SwarmEvent::TimeTravelDetected {
                relative_path: relative_path.to_string(),
                remote_mtime: UNIX_EPOCH + Duration::from_secs(mtime.max(0) as u64),
            });
            return Ok(());
        }

        let actual_hash = hasher::hash_bytes(&data);
        if actual_hash != hash {
            return Err(SwarmError::ChecksumMismatch(relative_path.to_string()));
        }

        let target_relative = match self.resolve_conflict_if_needed(peer, relative_path, hash, mtime).await? {
            ConflictOutcome::Stop => return Ok(()),
            ConflictOutcome::Proceed => relative_path.to_string(),
            ConflictOutcome::WriteSideBySide(side_path) => side_path,
        };

        self.echo.suppress(&target_relative);
        let full = self.absolute_path_of(&target_relative);
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&full, &data).await?;
        set_file_mtime(&full, mtime);

        let mut fingerprint = SyncedFile::new_file(
            target_relative,
            hash,
            size.max(0) as u64,
            UNIX_EPOCH + Duration::from_secs(mtime.max(0) as u64),
        );
        fingerprint.is_directory = is_directory;
        fingerprint.source_peer_id = Some(peer.device_id.clone());
        self.state_store.add_or_update(&fingerprint)?;
        Ok(())
    }

    async fn apply_delta_data(
        &self,
        peer: &Peer,
        relative_path: &str,
        hash: &str,
        mtime: i64,
        size: i64,
        instructions: Vec<crate::model::DeltaInstruction>,
    ) -> Result<()> {
        let old_path = self.absolute_path_of(relative_path);
        let new_path = old_path.with_extension("swarmdelta_new");
        let block_size = self.config.block_size as usize;
        delta::apply_delta(&old_path, &new_path, &instructions, block_size)?;

        let reconstructed = tokio::fs::read(&new_path).await?;
        let actual_hash = hasher::hash_bytes(&reconstructed);
        if actual_hash != hash {
            let _ = tokio::fs::remove_file(&new_path).await;
            return Err(SwarmError::ChecksumMismatch(relative_path.to_string()));
        }

        let target_relative = match self.resolve_conflict_if_needed(peer, relative_path, hash, mtime).await? {
            ConflictOutcome::Stop => {
                let _ = tokio::fs::remove_file(&new_path).await;
                return Ok(());
            }
            ConflictOutcome::Proceed => relative_path.to_string(),
            ConflictOutcome::WriteSideBySide(side_path) => side_path,
        };

        self.echo.suppress(&target_relative);
        let target_path = self.absolute_path_of(&target_relative);
        if let Some(parent) = target_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::rename(&new_path, &target_path).await?;
        set_file_mtime(&target_path, mtime);

        let fingerprint = SyncedFile::new_file(
            target_relative,
            hash,
            size.max(0) as u64,
            UNIX_EPOCH + Duration::from_secs(mtime.max(0) as u64),
        );
        self.state_store.add_or_update(&fingerprint)?;
        Ok(())
    }

    /// What the caller should do with the already-verified incoming
    /// bytes/delta after conflict resolution runs.
    async fn resolve_conflict_if_needed(
        &self,
        peer: &Peer,
        relative_path: &str,
        incoming_hash: &str,
        incoming_mtime: i64,
    ) -> Result<ConflictOutcome> {
        let Some(local) = self.state_store.get(relative_path)? else {
            return Ok(ConflictOutcome::Proceed);
        };
        if local.content_hash == incoming_hash {
            return Ok(ConflictOutcome::Proceed);
        }
        // Both sides have content for this path and they differ: a true
        // conflict only if local itself changed since the last synced
        // baseline is indistinguishable from "we just haven't synced yet"
        // without a baseline hash; treat any hash mismatch with existing
        // local content as escalation-worthy, per spec §4.11.
        let remote = SyncedFile::new_file(
            relative_path,
            incoming_hash,
            0,
            UNIX_EPOCH + Duration::from_secs(incoming_mtime.max(0) as u64),
        );
        let resolution = self
            .conflict_resolver
            .resolve(relative_path, &peer.device_id, &local, &remote);

        self.emit(SwarmEvent::ConflictDetected {
            relative_path: relative_path.to_string(),
            peer_id: peer.device_id.clone(),
            resolution: format!("{resolution:?}"),
        });

        match resolution {
            ConflictResolution::KeepRemote => {
                let local_path = self.absolute_path_of(relative_path);
                if local_path.exists() {
                    let _ = self.versioning.archive(relative_path, &local_path);
                }
                Ok(ConflictOutcome::Proceed)
            }
            ConflictResolution::KeepLocal | ConflictResolution::Skip => Ok(ConflictOutcome::Stop),
            ConflictResolution::KeepBoth => Ok(ConflictOutcome::WriteSideBySide(
                conflict_side_path(relative_path, &peer.device_id),
            )),
        }
    }

    async fn apply_remote_delete(&self, relative_path: &str) -> Result<()> {
        self.echo.suppress(relative_path);
        let full = self.absolute_path_of(relative_path);
        if full.is_dir() {
            let _ = tokio::fs::remove_dir_all(&full).await;
        } else {
            let _ = tokio::fs::remove_file(&full).await;
        }
        self.state_store.remove(relative_path)?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Background loops: watcher event pump, integrity scanner, peer
    // eviction. Each is cooperatively cancelled via `self.cancelled`
    // (spec §5 shutdown sequence) and run as an independent task by the
    // caller (e.g. `tokio::spawn(engine.clone().run_watcher_events(rx))`).
    // ------------------------------------------------------------------

    /// Drain watcher events onto [`Self::handle_local_event`] until the
    /// channel closes or the engine is cancelled.
    pub async fn run_watcher_events(self: Arc<Self>, mut events: tokio::sync::mpsc::Receiver<SemanticEvent>) {
        loop {
            tokio::select! {
                _ = self.cancelled.notified() => break,
                event = events.recv() => {
                    let Some(event) = event else { break };
                    if let Err(e) = self.handle_local_event(event).await {
                        warn!("failed to handle local watcher event: {e}");
                    }
                }
            }
        }
    }

    /// Periodic full-tree integrity scan (C12, spec §4.12). On any
    /// discrepancy, triggers a forced sync pass by re-pushing the local
    /// manifest to every trusted, sync-enabled peer.
    pub async fn run_integrity_scanner(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.normalized_scan_interval());
        ticker.tick().await; // first tick fires immediately; skip it, scan on the next interval.
        loop {
            tokio::select! {
                _ = self.cancelled.notified() => break,
                _ = ticker.tick() => {
                    match crate::scanner::run_scan_with_retries(
                        &self.managed_root,
                        &self.state_store,
                        &self.ignore,
                        self.config.hash_retry_attempts as usize,
                    )
                    .await
                    {
                        Ok(report) if report.needs_forced_sync() => {
                            info!(
                                discrepancies = report.discrepancies.len(),
                                "integrity scan found discrepancies, forcing a sync pass"
                            );
                            self.emit(SwarmEvent::RescanRequested {
                                reason: format!("integrity scan found {} discrepancies", report.discrepancies.len()),
                            });
                            for peer in self.peers.read().trusted_sync_enabled() {
                                if let Err(e) = self.push_manifest_to(&peer).await {
                                    warn!(peer = %peer.device_id, "failed to push forced-sync manifest: {e}");
                                }
                            }
                        }
                        Ok(_) => {}
                        Err(e) => warn!("integrity scan failed: {e}"),
                    }
                }
            }
        }
    }

    /// Periodic idle-peer eviction (spec §3 "Peer records live for the
    /// duration of reachability plus a timeout").
    pub async fn run_peer_eviction(self: Arc<Self>) {
        let check_interval = (self.config.peer_idle_timeout / 6).max(Duration::from_secs(1));
        let mut ticker = tokio::time::interval(check_interval);
        loop {
            tokio::select! {
                _ = self.cancelled.notified() => break,
                _ = ticker.tick() => {
                    self.evict_idle_peers();
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Server-side accept loop (§4.8, §5 shutdown sequence)
    // ------------------------------------------------------------------

    pub async fn run_server(self: Arc<Self>, listener: TcpListener) {
        loop {
            tokio::select! {
                _ = self.cancelled.notified() => {
                    info!("sync engine accept loop shutting down");
                    break;
                }
                accepted = listener.accept() => {
                    let Ok((stream, addr)) = accepted else { continue };
                    let Some(permit) = self.accept_limiter.try_admit() else {
                        debug!(%addr, "inbound connection rejected: accept limiter at capacity");
                        drop(stream);
                        continue;
                    };
                    let engine = self.clone();
                    tokio::spawn(async move {
                        let _permit = permit;
                        if let Err(e) = engine.handle_connection(stream, addr).await {
                            debug!(%addr, "connection closed: {e}");
                        }
                    });
                }
            }
        }
    }

    async fn handle_connection(self: Arc<Self>, stream: TcpStream, addr: SocketAddr) -> Result<()> {
        let mut stream = stream;
        let header = crate::channel::read_top_level_header(&mut stream).await?;

        if header == HEADER_TRANSFER {
            // Legacy single-file user-confirmed transfer: requires a
            // higher-level confirmation UI the core does not own (spec §1).
            wire::write_error_sentinel(&mut stream, "legacy transfer requires external confirmation").await?;
            return Ok(());
        }
        if header != HEADER_HANDSHAKE {
            return Err(SwarmError::Protocol(format!("unexpected header on sync port: {header}")));
        }

        let mut channel = SecureChannel::handshake_server(
            stream,
            &self.identity,
            &self.device_id,
            &self.display_name,
            self.config.replay_max_gap,
            self.config.replay_window_size,
        )
        .await?;
        let peer = self.peer_for_handshaken_channel(&channel, addr);
        info!(peer = %peer.device_id, %addr, "inbound peer connected");

        loop {
            let msg = match channel.recv().await {
                Ok(msg) => msg,
                Err(e) => {
                    debug!(peer = %peer.device_id, "connection ended: {e}");
                    return Ok(());
                }
            };
            if let Err(e) = self.handle_incoming_message(&peer, &mut channel, msg).await {
                warn!(peer = %peer.device_id, "error handling message: {e}");
            }
        }
    }

    fn peer_for_handshaken_channel(&self, channel: &SecureChannel, addr: SocketAddr) -> Peer {
        if let Some(known) = self.peers.read().get(&channel.peer_device_id) {
            return known;
        }
        let trusted = self.peer_is_trusted(&channel.peer_fingerprint);
        Peer {
            device_id: channel.peer_device_id.clone(),
            display_name: channel.peer_display_name.clone(),
            ip: addr.ip(),
            port: addr.port(),
            public_key_b64: String::new(),
            sync_enabled: true,
            trusted,
        }
    }

    // ------------------------------------------------------------------
    // Shutdown (§5): signal cancel -> close listener (caller's job, it
    // owns the `TcpListener`) -> drain per-peer pools -> flush state store.
    // ------------------------------------------------------------------

    pub async fn shutdown(&self) {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("sync engine shutting down");
        self.cancelled.notify_waiters();
        self.pools.write().clear();
        if let Err(e) = self.state_store.flush() {
            error!("failed to flush state store on shutdown: {e}");
            self.degraded.store(true, Ordering::SeqCst);
            self.emit(SwarmEvent::StatusChanged {
                degraded: true,
                reason: format!("state store flush failed: {e}"),
            });
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }
}

fn identity_store_identity(store: &IdentityStore) -> Identity {
    // `IdentityStore` owns the identity; engines need their own `Arc` to it
    // for use across tasks. `Identity` doesn't implement `Clone` (its
    // signing key should have exactly one live copy per spec §5), so the
    // engine reconstructs an equivalent handle from the same scalar bytes
    // rather than cloning the original.
    Identity::from_scalar_bytes(&store.identity().to_scalar_bytes())
        .expect("identity store always holds a valid scalar")
}

fn mtimes_within_one_second(a: SystemTime, b: SystemTime) -> bool {
    let diff = match a.duration_since(b) {
        Ok(d) => d,
        Err(e) => e.duration(),
    };
    diff <= Duration::from_secs(1)
}

fn set_file_mtime(path: &Path, mtime_secs_value: i64) {
    if mtime_secs_value < 0 {
        return;
    }
    let mtime = UNIX_EPOCH + Duration::from_secs(mtime_secs_value as u64);
    if let Err(e) = filetime_set(path, mtime) {
        warn!("failed to preserve mtime for {path:?}: {e}");
    }
}

/// Preserve the fingerprint's `last_modified` on the reconstructed file
/// (spec §4.11 receiver-side signature service), via the stable
/// `std::fs::File::set_modified` — no `filetime` dependency needed.
fn filetime_set(path: &Path, mtime: SystemTime) -> std::io::Result<()> {
    let file = std::fs::File::options().write(true).open(path)?;
    file.set_modified(mtime)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SyncedFile;
    use std::time::{Duration, UNIX_EPOCH};

    fn fp(path: &str, hash: &str, secs: u64) -> SyncedFile {
        SyncedFile::new_file(path, hash, 10, UNIX_EPOCH + Duration::from_secs(secs))
    }

    #[test]
    fn newer_mtime_wins() {
        let local = fp("x.txt", "h_a", 100);
        let remote = fp("x.txt", "h_b", 200);
        assert!(remote_wins(&local, &remote));
    }

    #[test]
    fn older_mtime_loses() {
        let local = fp("x.txt", "h_a", 200);
        let remote = fp("x.txt", "h_b", 100);
        assert!(!remote_wins(&local, &remote));
    }

    #[test]
    fn tie_break_is_lexicographic_hash() {
        // sha256("AA") = 961b6dd... ; sha256("BB") = 38164fb...
        let local = fp("x.txt", "961b6dd3ed3c11b71a6b0f64f4eecb1b2bc4d00ce9e68f6e26d3fe43b4dce2e3", 100);
        let remote = fp("x.txt", "38164fbb95de6eb8d21f90a9d9e8b67c9fd36fa6e1b71b2bbc8ba9e02a0d07e4", 100);
        assert!(remote_wins(&local, &remote));
    }

    #[test]
    fn tie_break_is_deterministic_across_calls() {
        let local = fp("x.txt", "bbbb", 100);
        let remote = fp("x.txt", "aaaa", 100);
        let first = remote_wins(&local, &remote);
        let second = remote_wins(&local, &remote);
        assert_eq!(first, second);
    }

    #[test]
    fn future_timestamp_beyond_tolerance_is_rejected() {
        let far_future = SystemTime::now() + Duration::from_secs(3600);
        assert!(is_future_timestamp(far_future, Duration::from_secs(600)));
    }

    #[test]
    fn near_future_within_tolerance_is_accepted() {
        let near_future = SystemTime::now() + Duration::from_secs(30);
        assert!(!is_future_timestamp(near_future, Duration::from_secs(600)));
    }

    #[test]
    fn past_timestamp_is_never_future() {
        let past = UNIX_EPOCH;
        assert!(!is_future_timestamp(past, Duration::from_secs(600)));
    }

    #[test]
    fn conflict_side_path_inserts_before_extension() {
        assert_eq!(
            conflict_side_path("docs/notes.txt", "ab12cd34"),
            "docs/notes (conflict from ab12cd34).txt"
        );
    }

    #[test]
    fn conflict_side_path_handles_extensionless_root_file() {
        assert_eq!(
            conflict_side_path("Makefile", "ab12cd34"),
            "Makefile (conflict from ab12cd34)"
        );
    }

    use proptest::prelude::*;

    proptest! {
        #[test]
        fn prop_conflict_decision_is_deterministic(
            local_hash in "[0-9a-f]{8}",
            remote_hash in "[0-9a-f]{8}",
            local_secs in 0u64..1_000_000,
            remote_secs in 0u64..1_000_000,
        ) {
            let local = fp("x.txt", &local_hash, local_secs);
            let remote = fp("x.txt", &remote_hash, remote_secs);
            let first = remote_wins(&local, &remote);
            let second = remote_wins(&local, &remote);
            prop_assert_eq!(first, second);
        }
    }
}
