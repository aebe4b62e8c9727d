//! The data model of spec §3: file fingerprints, manifests, block signatures
//! and delta instructions. Grounded on the teacher's `filesystem::FsEntry`
//! generalized into the persistent, hashable fingerprint spec.md requires.
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileAction {
    Create,
    Update,
    Delete,
    Rename,
}

/// The atomic unit of manifest state (`SyncedFile`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncedFile {
    /// Case-insensitive identity within the managed root. Always uses `/`
    /// separators regardless of host path convention.
    pub relative_path: String,
    /// SHA-256 hex of byte contents; empty string for directories.
    pub content_hash: String,
    #[serde(with = "unix_secs")]
    pub last_modified: SystemTime,
    pub file_size: u64,
    pub is_directory: bool,
    pub action: FileAction,
    pub old_relative_path: Option<String>,
    /// Origin of the last authoritative write; used for echo suppression and audit.
    pub source_peer_id: Option<String>,
}

impl SyncedFile {
    /// Case-insensitive key for state-store lookups (Invariant: must match the
    /// host filesystem's convention; implemented uniformly as lower-cased
    /// comparison so lookups are robust even on case-sensitive hosts).
    pub fn lookup_key(&self) -> String {
        self.relative_path.to_lowercase()
    }

    pub fn new_file(relative_path: impl Into<String>, content_hash: impl Into<String>, size: u64, mtime: SystemTime) -> Self {
        Self {
            relative_path: relative_path.into(),
            content_hash: content_hash.into(),
            last_modified: mtime,
            file_size: size,
            is_directory: false,
            action: FileAction::Create,
            old_relative_path: None,
            source_peer_id: None,
        }
    }
}

mod unix_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    pub fn serialize<S: Serializer>(t: &SystemTime, s: S) -> Result<S::Ok, S::Error> {
        let d = t.duration_since(UNIX_EPOCH).unwrap_or_default();
        (d.as_secs() as i64).serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<SystemTime, D::Error> {
        let secs = i64::deserialize(d)?;
        if secs < 0 {
            Ok(UNIX_EPOCH)
        } else {
            Ok(UNIX_EPOCH + Duration::from_secs(secs as u64))
        }
    }
}

/// The set of all file fingerprints for the managed root, exchanged verbatim
/// as JSON over the wire (message type 5, `SYNC_MANIFEST`).
pub type Manifest = Vec<SyncedFile>;

/// One block's weak/strong checksums, produced by the delta engine (C10).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockSignature {
    pub index: u32,
    pub weak: u32,
    /// SHA-256 hex of the block.
    pub strong: String,
}

/// A tagged-union instruction in a delta stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DeltaInstruction {
    Copy { source_block_index: u32, length: u32 },
    Insert { bytes: Vec<u8> },
}

/// mtime-then-hash ordering used by the LWW conflict rule (spec §4.11).
pub fn mtime_secs(t: SystemTime) -> i64 {
    t.duration_since(UNIX_EPOCH).map(|d| d.as_secs() as i64).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_key_is_case_insensitive() {
        let f = SyncedFile::new_file("Notes/Todo.TXT", "abc", 3, UNIX_EPOCH);
        assert_eq!(f.lookup_key(), "notes/todo.txt");
    }

    #[test]
    fn round_trips_through_json() {
        let f = SyncedFile::new_file("a/b.txt", "deadbeef", 10, UNIX_EPOCH + std::time::Duration::from_secs(100));
        let json = serde_json::to_string(&f).unwrap();
        let back: SyncedFile = serde_json::from_str(&json).unwrap();
        assert_eq!(f, back);
    }
}
