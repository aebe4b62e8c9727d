//! Secure channel (C7): wire framing, handshake, per-connection session key,
//! and the sequence/replay guard.
//!
//! Grounded on the teacher's `transport.rs` connection lifecycle (length-
//! prefixed control headers, read/write split over a `TcpStream`) but the
//! handshake itself is the bespoke ECDH/HKDF/signature exchange of spec
//! §4.7 rather than QUIC+rustls mTLS; see DESIGN.md.
use crate::codec::SyncMessage;
use crate::crypto::{self, EphemeralKeypair, Identity};
use crate::error::{Result, SwarmError};
use crate::wire::*;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use std::collections::VecDeque;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, warn};

pub const HEADER_TRANSFER: &str = "SWARM-TRANSFER-1.0";
pub const HEADER_HANDSHAKE: &str = "SWARM-SECURE-HANDSHAKE-1.0";
pub const HEADER_SYNC: &str = "SWARM-SYNC-1.0";

const MAX_HEADER_LEN: usize = 128;
const MAX_GAP: u64 = 100;
const REPLAY_WINDOW: usize = 1000;

/// Defaults for callers that construct a channel outside the engine (tests,
/// `ConnectionPool::new`) without an `EngineConfig` to source from; the
/// engine itself threads `replay_max_gap`/`replay_window_size` from config.
pub const DEFAULT_REPLAY_MAX_GAP: u64 = MAX_GAP;
pub const DEFAULT_REPLAY_WINDOW: usize = REPLAY_WINDOW;

/// Sliding-window replay guard for one receive direction of a channel.
pub struct ReplayGuard {
    expected_next: u64,
    min_accepted: u64,
    max_gap: u64,
    window_size: usize,
    seen: VecDeque<u64>,
}

impl ReplayGuard {
    /// Defaults matching spec §6.5 (`MAX_GAP` 100, window 1000); production
    /// code should prefer [`Self::with_limits`] sourced from `EngineConfig`.
    pub fn new() -> Self {
        Self::with_limits(MAX_GAP, REPLAY_WINDOW)
    }

    pub fn with_limits(max_gap: u64, window_size: usize) -> Self {
        Self {
            expected_next: 0,
            min_accepted: 0,
            max_gap,
            window_size,
            seen: VecDeque::with_capacity(window_size),
        }
    }

    /// Accept-or-reject `seq`, sliding the window forward on success.
    pub fn check(&mut self, seq: u64) -> Result<()> {
        if seq < self.min_accepted || seq > self.expected_next + self.max_gap {
            return Err(SwarmError::ReplayDetected(seq));
        }
        if self.seen.contains(&seq) {
            return Err(SwarmError::ReplayDetected(seq));
        }
        self.seen.push_back(seq);
        if self.seen.len() > self.window_size {
            self.seen.pop_front();
            self.min_accepted = self.min_accepted.max(*self.seen.front().unwrap_or(&self.min_accepted));
        }
        if seq >= self.expected_next {
            self.expected_next = seq + 1;
        }
        Ok(())
    }
}

impl Default for ReplayGuard {
    fn default() -> Self {
        Self::new()
    }
}

/// An outgoing monotone sequence counter, one per channel direction.
#[derive(Default)]
pub struct SequenceCounter(u64);

impl SequenceCounter {
    pub fn next(&mut self) -> u64 {
        let v = self.0;
        self.0 += 1;
        v
    }
}

/// The handshaken, encrypted result of a successful secure channel setup.
pub struct SecureChannel {
    stream: TcpStream,
    session_key: [u8; 32],
    pub peer_device_id: String,
    pub peer_display_name: String,
    pub peer_fingerprint: String,
    outgoing: SequenceCounter,
    incoming: ReplayGuard,
}

impl SecureChannel {
    /// Client side of the handshake: connect already performed by the caller.
    pub async fn handshake_client(
        mut stream: TcpStream,
        identity: &Identity,
        device_id: &str,
        display_name: &str,
        replay_max_gap: u64,
        replay_window_size: usize,
    ) -> Result<Self> {
        let eph = EphemeralKeypair::generate();
        let identity_pub = identity.public_key_der();
        let mut signed = Vec::new();
        signed.extend_from_slice(device_id.as_bytes());
        signed.extend_from_slice(b"\x00");
        signed.extend_from_slice(BASE64.encode(&eph.public_bytes).as_bytes());
        let signature = identity.sign(&signed);

        write_string(&mut stream, HEADER_HANDSHAKE).await?;
        write_string(&mut stream, device_id).await?;
        write_string(&mut stream, display_name).await?;
        write_bytes(&mut stream, &eph.public_bytes).await?;
        write_bytes(&mut stream, &identity_pub).await?;
        write_bytes(&mut stream, &signature).await?;

        let status = read_string(&mut stream, MAX_HEADER_LEN).await?;
        if let Some(reason) = status.strip_prefix("FAIL:") {
            return Err(SwarmError::Connection(format!(
                "handshake rejected by peer: {reason}"
            )));
        }
        if status != "OK" {
            return Err(SwarmError::Protocol(format!(
                "unexpected handshake status {status:?}"
            )));
        }

        let server_device_id = read_string(&mut stream, MAX_HEADER_LEN).await?;
        let server_display_name = read_string(&mut stream, MAX_HEADER_LEN).await?;
        let server_eph_pub = read_bytes(&mut stream, 256).await?;
        let server_identity_pub = read_bytes(&mut stream, 256).await?;

        let session_key = eph.derive_session_key(&server_eph_pub)?;
        let peer_fingerprint = crypto::fingerprint_of_public_key(&server_identity_pub);

        debug!(peer = %server_device_id, "client-side handshake complete");
        Ok(Self {
            stream,
            session_key,
            peer_device_id: server_device_id,
            peer_display_name: server_display_name,
            peer_fingerprint,
            outgoing: SequenceCounter::default(),
            incoming: ReplayGuard::with_limits(replay_max_gap, replay_window_size),
        })
    }

    /// Server side. `header` is the already-consumed top-level header string.
    /// Trust gating is enforced by the caller (the engine), not here — per
    /// spec §9 the core still completes the cryptographic handshake with an
    /// untrusted peer, it merely restricts what that peer may later do.
    pub async fn handshake_server(
        mut stream: TcpStream,
        identity: &Identity,
        device_id: &str,
        display_name: &str,
        replay_max_gap: u64,
        replay_window_size: usize,
    ) -> Result<Self> {
        let client_device_id = read_string(&mut stream, MAX_HEADER_LEN).await?;
        let client_display_name = read_string(&mut stream, MAX_HEADER_LEN).await?;
        let client_eph_pub = read_bytes(&mut stream, 256).await?;
        let client_identity_pub = read_bytes(&mut stream, 256).await?;
        let signature = read_bytes(&mut stream, 256).await?;

        let mut signed = Vec::new();
        signed.extend_from_slice(client_device_id.as_bytes());
        signed.extend_from_slice(b"\x00");
        signed.extend_from_slice(BASE64.encode(&client_eph_pub).as_bytes());

        let verified = crypto::verify(&client_identity_pub, &signed, &signature).unwrap_or(false);
        if !verified {
            write_string(&mut stream, "FAIL:signature-invalid").await?;
            return Err(SwarmError::SignatureInvalid);
        }

        let eph = EphemeralKeypair::generate();
        write_string(&mut stream, "OK").await?;
        write_string(&mut stream, device_id).await?;
        write_string(&mut stream, display_name).await?;
        write_bytes(&mut stream, &eph.public_bytes).await?;
        write_bytes(&mut stream, &identity.public_key_der()).await?;

        let session_key = eph.derive_session_key(&client_eph_pub)?;
        let peer_fingerprint = crypto::fingerprint_of_public_key(&client_identity_pub);

        debug!(peer = %client_device_id, "server-side handshake complete");
        Ok(Self {
            stream,
            session_key,
            peer_device_id: client_device_id,
            peer_display_name: client_display_name,
            peer_fingerprint,
            outgoing: SequenceCounter::default(),
            incoming: ReplayGuard::with_limits(replay_max_gap, replay_window_size),
        })
    }

    /// Seal `msg` and write one framed AEAD record: `seq(8) || aead(...)`.
    pub async fn send(&mut self, msg: &SyncMessage) -> Result<()> {
        let mut plaintext = Vec::new();
        msg.write(&mut plaintext).await?;
        let sealed = crypto::aead_encrypt(&self.session_key, &plaintext)?;
        let seq = self.outgoing.next();
        write_u64(&mut self.stream, seq).await?;
        write_bytes(&mut self.stream, &sealed).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Read, verify, and decode the next framed record. Replay/AEAD failures
    /// are returned as errors; the caller closes the connection on them.
    pub async fn recv(&mut self) -> Result<SyncMessage> {
        let seq = read_u64(&mut self.stream).await?;
        let sealed = read_bytes(&mut self.stream, 4 * 1024 * 1024 * 1024).await?;
        self.incoming.check(seq)?;
        let plaintext = crypto::aead_decrypt(&self.session_key, &sealed)?;
        let mut cursor = std::io::Cursor::new(plaintext);
        SyncMessage::read(&mut cursor).await
    }

    pub fn into_stream(self) -> TcpStream {
        self.stream
    }

    /// `socket.poll(0, read)`-style liveness probe (spec §4.8): a readable
    /// socket reporting zero available bytes means the peer closed cleanly.
    pub fn is_healthy(&self) -> bool {
        let mut buf = [0u8; 1];
        match self.stream.try_read(&mut buf) {
            Ok(0) => false,
            Ok(_) => true,
            Err(e) => e.kind() == std::io::ErrorKind::WouldBlock,
        }
    }
}

/// Dispatch on the connection's top-level header before any handshake runs.
pub async fn read_top_level_header<R: AsyncRead + Unpin>(r: &mut R) -> Result<String> {
    let header = read_string(r, MAX_HEADER_LEN).await?;
    match header.as_str() {
        HEADER_TRANSFER | HEADER_HANDSHAKE | HEADER_SYNC => Ok(header),
        other => {
            warn!(%other, "unknown top-level header");
            Err(SwarmError::Protocol(format!("unknown header {other:?}")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replay_guard_rejects_duplicate_then_accepts_next() {
        let mut guard = ReplayGuard::new();
        for seq in 0..4u64 {
            guard.check(seq).unwrap();
        }
        assert!(guard.check(1).is_err());
        guard.check(4).unwrap();
    }

    #[test]
    fn replay_guard_rejects_out_of_gap_window() {
        let mut guard = ReplayGuard::new();
        guard.check(0).unwrap();
        assert!(guard.check(0 + MAX_GAP + 1).is_err());
    }

    #[tokio::test]
    async fn full_handshake_and_one_message_round_trip() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server_identity = Identity::generate();
        let server_task = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut stream = stream;
            let header = read_top_level_header(&mut stream).await.unwrap();
            assert_eq!(header, HEADER_HANDSHAKE);
            let mut channel = SecureChannel::handshake_server(
                stream,
                &server_identity,
                "srv1",
                "server-box",
                MAX_GAP,
                REPLAY_WINDOW,
            )
            .await
            .unwrap();
            let msg = channel.recv().await.unwrap();
            match msg {
                SyncMessage::RequestFile { relative_path } => {
                    assert_eq!(relative_path, "docs/readme.txt");
                }
                other => panic!("unexpected message {other:?}"),
            }
        });

        let client_identity = Identity::generate();
        let stream = TcpStream::connect(addr).await.unwrap();
        let mut channel = SecureChannel::handshake_client(
            stream,
            &client_identity,
            "cli1",
            "client-box",
            MAX_GAP,
            REPLAY_WINDOW,
        )
        .await
        .unwrap();
        channel
            .send(&SyncMessage::RequestFile {
                relative_path: "docs/readme.txt".into(),
            })
            .await
            .unwrap();

        server_task.await.unwrap();
    }
}
