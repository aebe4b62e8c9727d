//! Streaming file hasher (C4): SHA-256 of files with retry on transient
//! sharing violations. Grounded on the teacher's async-chunked-read
//! conventions (file I/O is always a suspension point, spec §5).
use crate::error::Result;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tracing::debug;

const READ_CHUNK: usize = 64 * 1024;
const BACKOFF_MS: [u64; 5] = [50, 100, 200, 400, 800];
/// Default retry count for callers with no `EngineConfig` to source from
/// (matches `EngineConfig::default().hash_retry_attempts`).
pub const DEFAULT_RETRY_ATTEMPTS: usize = BACKOFF_MS.len();

/// Stream `path` in >=64 KiB reads, SHA-256, retrying transient sharing
/// violations / short reads with exponential backoff up to
/// [`DEFAULT_RETRY_ATTEMPTS`] tries. Production code should prefer
/// [`hash_file_with_retries`] sourced from `EngineConfig::hash_retry_attempts`.
pub async fn hash_file(path: &Path) -> Result<String> {
    hash_file_with_retries(path, DEFAULT_RETRY_ATTEMPTS).await
}

/// Same as [`hash_file`] but with a caller-supplied retry count (spec §6.5
/// `hash_retry_attempts`). The backoff delay curve still tops out at
/// `BACKOFF_MS`'s last entry once `max_attempts` exceeds its length.
pub async fn hash_file_with_retries(path: &Path, max_attempts: usize) -> Result<String> {
    let mut attempt = 0usize;
    loop {
        match hash_file_once(path).await {
            Ok(hex) => return Ok(hex),
            Err(e) if attempt < max_attempts && is_transient(&e) => {
                let delay = BACKOFF_MS[attempt.min(BACKOFF_MS.len() - 1)];
                debug!(
                    "transient error hashing {path:?} (attempt {attempt}): {e}; retrying in {delay}ms"
                );
                tokio::time::sleep(Duration::from_millis(delay)).await;
                attempt += 1;
            }
            Err(e) => return Err(e.into()),
        }
    }
}

async fn hash_file_once(path: &Path) -> std::io::Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

fn is_transient(e: &std::io::Error) -> bool {
    use std::io::ErrorKind;
    matches!(
        e.kind(),
        ErrorKind::WouldBlock | ErrorKind::Interrupted | ErrorKind::PermissionDenied
    )
}

/// Pure-function SHA-256 over an in-memory buffer, used by the delta engine
/// and tests that don't want real file I/O.
pub fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hashes_known_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        tokio::fs::write(&path, b"hello\n").await.unwrap();
        let hash = hash_file(&path).await.unwrap();
        assert_eq!(
            hash,
            "5891b5b522d5df086d0ff0b110fbd9d21bb4fc7163af34d08286a2e846f6be03"
        );
    }

    #[tokio::test]
    async fn hashes_large_file_in_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.bin");
        let data = vec![0xABu8; READ_CHUNK * 3 + 17];
        tokio::fs::write(&path, &data).await.unwrap();
        let hash = hash_file(&path).await.unwrap();
        assert_eq!(hash, hash_bytes(&data));
    }
}
