//! In-process engine configuration: the threshold constants of spec §6.5.
//!
//! This is deliberately not a settings loader or on-disk preferences file —
//! that remains an external collaborator. `EngineConfig` is what the sync
//! engine is constructed with; callers that do own a settings layer map
//! their persisted preferences onto this struct.
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Delta sync is only attempted for files at or above this size (T).
    pub delta_threshold_bytes: u64,
    /// Files at or below this size may be sent in parallel without delta.
    pub small_file_threshold_bytes: u64,
    /// Rolling-checksum block size (B).
    pub block_size: u32,
    /// Max parallel connections per peer (P).
    pub max_connections_per_peer: usize,
    /// Global accept-side semaphore cap.
    pub max_concurrent_inbound: usize,
    /// Per-path debounce window (D).
    pub debounce_window: Duration,
    /// Directory-rename coalescing window (D_dir).
    pub dir_rename_window: Duration,
    /// Minimum renames sharing a parent to coalesce into DirectoryRenamed (K).
    pub dir_rename_min_count: usize,
    /// How long a coalesced parent is remembered to swallow stragglers (M).
    pub dir_rename_straggler_window: Duration,
    /// Echo-suppression TTL.
    pub echo_suppression_ttl: Duration,
    /// Peer idle timeout before eviction from the peer directory.
    pub peer_idle_timeout: Duration,
    /// Future-timestamp tolerance for the time-travel guard.
    pub future_timestamp_tolerance: Duration,
    /// Connection connect/read/write timeout.
    pub connect_timeout: Duration,
    /// Replay guard: maximum accepted gap ahead of `expected_next`.
    pub replay_max_gap: u64,
    /// Replay guard: size of the received-sequence sliding window.
    pub replay_window_size: usize,
    /// Connection-creation retry attempts (R).
    pub connect_retries: u32,
    /// Hasher retry attempts on transient sharing violation.
    pub hash_retry_attempts: u32,
    /// Integrity scanner interval.
    pub integrity_scan_interval: Duration,
    /// Integrity scanner minimum interval (enforced floor).
    pub integrity_scan_min_interval: Duration,
    /// Discovery beacon re-broadcast interval (consumed cadence, informational).
    pub broadcast_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            delta_threshold_bytes: 1024 * 1024,
            small_file_threshold_bytes: 256 * 1024,
            block_size: 64 * 1024,
            max_connections_per_peer: 4,
            max_concurrent_inbound: 50,
            debounce_window: Duration::from_millis(300),
            dir_rename_window: Duration::from_millis(500),
            dir_rename_min_count: 5,
            dir_rename_straggler_window: Duration::from_millis(2000),
            echo_suppression_ttl: Duration::from_secs(3),
            peer_idle_timeout: Duration::from_secs(60),
            future_timestamp_tolerance: Duration::from_secs(10 * 60),
            connect_timeout: Duration::from_secs(10),
            replay_max_gap: 100,
            replay_window_size: 1000,
            connect_retries: 3,
            hash_retry_attempts: 5,
            integrity_scan_interval: Duration::from_secs(4 * 60 * 60),
            integrity_scan_min_interval: Duration::from_secs(15 * 60),
            broadcast_interval: Duration::from_secs(5),
        }
    }
}

impl EngineConfig {
    /// Clamp the integrity scan interval to the enforced minimum.
    pub fn normalized_scan_interval(&self) -> Duration {
        self.integrity_scan_interval
            .max(self.integrity_scan_min_interval)
    }
}
