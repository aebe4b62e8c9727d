//! Connection pool (C8): one pool per peer endpoint, health checks, RTT
//! classification, and socket tuning.
//!
//! Grounded on the teacher's connection bookkeeping in `transport.rs`
//! (per-peer `Mutex`-guarded connection lists, exponential-backoff retry on
//! connect) generalized to the pooled `acquire`/`release` contract of spec
//! §4.8.
use crate::channel::SecureChannel;
use crate::crypto::Identity;
use crate::error::{Result, SwarmError};
use parking_lot::Mutex;
use socket2::{SockRef, TcpKeepalive};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::debug;

pub const DEFAULT_POOL_SIZE: usize = 4;
pub const MAX_POOL_SIZE: usize = 8;
const CONNECT_RETRIES: u32 = 3;
const CONNECT_RETRY_BASE_MS: u64 = 100;
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const MAX_CONCURRENT_INBOUND: usize = 50;

/// RTT-derived buffer-size tier (spec §4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RttClass {
    Loopback,
    Default,
    HighLatency,
}

impl RttClass {
    pub fn buffer_size(self) -> usize {
        match self {
            RttClass::Loopback => 1024 * 1024,
            RttClass::Default => 256 * 1024,
            RttClass::HighLatency => 16 * 1024,
        }
    }

    /// Classify an endpoint by address shape — the teacher's original RTT
    /// estimate is this same IP-range heuristic (no real probe); spec §9
    /// keeps it as an acceptable refinement rather than requiring a ping.
    pub fn classify(addr: &SocketAddr) -> Self {
        let ip = addr.ip();
        if ip.is_loopback() {
            return RttClass::Loopback;
        }
        match ip {
            std::net::IpAddr::V4(v4) => {
                if v4.is_private() {
                    RttClass::Loopback
                } else {
                    RttClass::Default
                }
            }
            std::net::IpAddr::V6(v6) => {
                if (v6.segments()[0] & 0xffc0) == 0xfe80 {
                    RttClass::Loopback
                } else {
                    RttClass::Default
                }
            }
        }
    }
}

/// One handshaken connection held by the pool.
pub struct PooledConnection {
    pub channel: SecureChannel,
    pub rtt_class: RttClass,
}

impl PooledConnection {
    pub fn is_healthy(&self) -> bool {
        self.channel.is_healthy()
    }
}

fn tune_socket(stream: &TcpStream, rtt: RttClass) -> Result<()> {
    let sock_ref = SockRef::from(stream);
    sock_ref.set_nodelay(true)?;
    let keepalive = TcpKeepalive::new().with_time(Duration::from_secs(30));
    sock_ref.set_tcp_keepalive(&keepalive)?;
    let timeout = match rtt {
        RttClass::HighLatency => Duration::from_secs(20),
        _ => CONNECT_TIMEOUT,
    };
    sock_ref.set_read_timeout(Some(timeout))?;
    sock_ref.set_write_timeout(Some(timeout))?;
    let buffer_size = rtt.buffer_size();
    sock_ref.set_send_buffer_size(buffer_size)?;
    sock_ref.set_recv_buffer_size(buffer_size)?;
    Ok(())
}

async fn connect_with_retry(addr: SocketAddr) -> Result<TcpStream> {
    let mut attempt = 0u32;
    loop {
        match tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => return Ok(stream),
            Ok(Err(e)) if attempt + 1 < CONNECT_RETRIES => {
                attempt += 1;
                let backoff = CONNECT_RETRY_BASE_MS * 2u64.pow(attempt - 1);
                debug!(%addr, attempt, %e, "connect failed, retrying");
                tokio::time::sleep(Duration::from_millis(backoff)).await;
            }
            Ok(Err(e)) => return Err(SwarmError::Connection(format!("connect to {addr} failed: {e}"))),
            Err(_) if attempt + 1 < CONNECT_RETRIES => {
                attempt += 1;
                let backoff = CONNECT_RETRY_BASE_MS * 2u64.pow(attempt - 1);
                tokio::time::sleep(Duration::from_millis(backoff)).await;
            }
            Err(_) => return Err(SwarmError::Timeout(format!("connect to {addr} timed out"))),
        }
    }
}

/// Per-peer-endpoint connection pool.
pub struct ConnectionPool {
    addr: SocketAddr,
    idle: Mutex<Vec<PooledConnection>>,
    max_size: usize,
    replay_max_gap: u64,
    replay_window_size: usize,
}

impl ConnectionPool {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            idle: Mutex::new(Vec::new()),
            max_size: DEFAULT_POOL_SIZE,
            replay_max_gap: crate::channel::DEFAULT_REPLAY_MAX_GAP,
            replay_window_size: crate::channel::DEFAULT_REPLAY_WINDOW,
        }
    }

    pub fn with_max_size(addr: SocketAddr, max_size: usize) -> Self {
        Self {
            addr,
            idle: Mutex::new(Vec::new()),
            max_size: max_size.min(MAX_POOL_SIZE),
            replay_max_gap: crate::channel::DEFAULT_REPLAY_MAX_GAP,
            replay_window_size: crate::channel::DEFAULT_REPLAY_WINDOW,
        }
    }

    /// Same as [`Self::with_max_size`] but sourcing the replay guard's
    /// gap/window from the engine's own configuration rather than the
    /// channel module's defaults (spec §6.5 `replay_max_gap`/`replay_window_size`).
    pub fn with_config(addr: SocketAddr, max_size: usize, replay_max_gap: u64, replay_window_size: usize) -> Self {
        Self {
            addr,
            idle: Mutex::new(Vec::new()),
            max_size: max_size.min(MAX_POOL_SIZE),
            replay_max_gap,
            replay_window_size,
        }
    }

    /// Return a handshaken, healthy connection, creating one if the pool is
    /// empty. Unhealthy idle connections are dropped rather than returned.
    pub async fn acquire(&self, identity: &Identity, device_id: &str, display_name: &str) -> Result<PooledConnection> {
        loop {
            let candidate = self.idle.lock().pop();
            match candidate {
                None => break,
                Some(conn) if conn.is_healthy() => return Ok(conn),
                Some(_) => {
                    debug!("dropping unhealthy idle connection");
                    continue;
                }
            }
        }

        let stream = connect_with_retry(self.addr).await?;
        let rtt_class = RttClass::classify(&self.addr);
        tune_socket(&stream, rtt_class)?;

        let channel = SecureChannel::handshake_client(
            stream,
            identity,
            device_id,
            display_name,
            self.replay_max_gap,
            self.replay_window_size,
        )
        .await?;
        Ok(PooledConnection { channel, rtt_class })
    }

    /// Return a connection to the pool, dropping it instead if the pool is
    /// already at capacity.
    pub fn release(&self, conn: PooledConnection) {
        let mut idle = self.idle.lock();
        if idle.len() < self.max_size {
            idle.push(conn);
        }
    }

    pub fn len(&self) -> usize {
        self.idle.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Server-side accept throttling: a global semaphore bounding concurrent
/// inbound connections (spec §4.8).
pub struct AcceptLimiter {
    semaphore: Arc<tokio::sync::Semaphore>,
}

impl AcceptLimiter {
    pub fn new() -> Self {
        Self {
            semaphore: Arc::new(tokio::sync::Semaphore::new(MAX_CONCURRENT_INBOUND)),
        }
    }

    /// Try to admit one inbound connection; `None` means the accept must be
    /// closed immediately without further processing.
    pub fn try_admit(&self) -> Option<tokio::sync::OwnedSemaphorePermit> {
        self.semaphore.clone().try_acquire_owned().ok()
    }
}

impl Default for AcceptLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_loopback_and_private_as_low_latency() {
        assert_eq!(
            RttClass::classify(&"127.0.0.1:9000".parse().unwrap()),
            RttClass::Loopback
        );
        assert_eq!(
            RttClass::classify(&"192.168.1.5:9000".parse().unwrap()),
            RttClass::Loopback
        );
        assert_eq!(
            RttClass::classify(&"8.8.8.8:9000".parse().unwrap()),
            RttClass::Default
        );
    }

    #[test]
    fn buffer_sizes_follow_rtt_tier() {
        assert!(RttClass::Loopback.buffer_size() >= 1024 * 1024);
        assert!(RttClass::HighLatency.buffer_size() <= 16 * 1024);
    }

    #[test]
    fn accept_limiter_caps_concurrency() {
        let limiter = AcceptLimiter::new();
        let mut held = Vec::new();
        for _ in 0..MAX_CONCURRENT_INBOUND {
            held.push(limiter.try_admit().expect("should admit under cap"));
        }
        assert!(limiter.try_admit().is_none());
    }
}
