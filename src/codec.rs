//! Transfer codec (C9): the 1-byte sync-message vocabulary of spec §6.1 and
//! its payload layouts, plus Brotli compression policy for file-content
//! payloads.
use crate::error::{Result, SwarmError};
use crate::model::{BlockSignature, DeltaInstruction, Manifest};
use crate::wire::*;
use std::io::{Cursor, Read, Write};
use tokio::io::{AsyncRead, AsyncWrite};

/// Hard ceiling on an individual string/json field to bound memory use from
/// a misbehaving or malicious peer; actual file bytes are framed separately
/// and are not subject to this cap.
const MAX_FIELD_LEN: usize = 16 * 1024 * 1024;
const MAX_PAYLOAD_LEN: usize = 4 * 1024 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq)]
pub enum SyncMessage {
    /// Legacy uncompressed whole-file push. Never emitted by current
    /// senders (spec §9 Open Questions) but still accepted on receive for
    /// interop with old peers.
    FileChanged {
        relative_path: String,
        hash: String,
        mtime: i64,
        size: i64,
        is_directory: bool,
        data: Vec<u8>,
    },
    FileDeleted {
        relative_path: String,
        is_directory: bool,
    },
    DirCreated {
        relative_path: String,
    },
    DirDeleted {
        relative_path: String,
    },
    SyncManifest {
        manifest: Manifest,
    },
    RequestFile {
        relative_path: String,
    },
    RequestSignatures {
        relative_path: String,
    },
    BlockSignatures {
        relative_path: String,
        signatures: Vec<BlockSignature>,
    },
    DeltaData {
        relative_path: String,
        hash: String,
        mtime: i64,
        size: i64,
        instructions: Vec<DeltaInstruction>,
    },
    FileRenamed {
        old_relative_path: String,
        new_relative_path: String,
        is_directory: bool,
    },
    FileChangedCompressed {
        relative_path: String,
        hash: String,
        mtime: i64,
        original_size: i64,
        compressed: Vec<u8>,
    },
}

impl SyncMessage {
    fn type_code(&self) -> u8 {
        match self {
            SyncMessage::FileChanged { .. } => 1,
            SyncMessage::FileDeleted { .. } => 2,
            SyncMessage::DirCreated { .. } => 3,
            SyncMessage::DirDeleted { .. } => 4,
            SyncMessage::SyncManifest { .. } => 5,
            SyncMessage::RequestFile { .. } => 6,
            SyncMessage::RequestSignatures { .. } => 7,
            SyncMessage::BlockSignatures { .. } => 8,
            SyncMessage::DeltaData { .. } => 9,
            SyncMessage::FileRenamed { .. } => 10,
            SyncMessage::FileChangedCompressed { .. } => 11,
        }
    }

    pub async fn write<W: AsyncWrite + Unpin>(&self, w: &mut W) -> Result<()> {
        write_u8(w, self.type_code()).await?;
        match self {
            SyncMessage::FileChanged {
                relative_path,
                hash,
                mtime,
                size,
                is_directory,
                data,
            } => {
                write_string(w, relative_path).await?;
                write_string(w, hash).await?;
                write_i64(w, *mtime).await?;
                write_i64(w, *size).await?;
                write_bool(w, *is_directory).await?;
                write_bytes(w, data).await?;
            }
            SyncMessage::FileDeleted {
                relative_path,
                is_directory,
            } => {
                write_string(w, relative_path).await?;
                write_bool(w, *is_directory).await?;
            }
            SyncMessage::DirCreated { relative_path } | SyncMessage::DirDeleted { relative_path } => {
                write_string(w, relative_path).await?;
            }
            SyncMessage::SyncManifest { manifest } => {
                let json = serde_json::to_string(manifest)?;
                write_string(w, &json).await?;
            }
            SyncMessage::RequestFile { relative_path }
            | SyncMessage::RequestSignatures { relative_path } => {
                write_string(w, relative_path).await?;
            }
            SyncMessage::BlockSignatures {
                relative_path,
                signatures,
            } => {
                write_string(w, relative_path).await?;
                write_i32(w, signatures.len() as i32).await?;
                for sig in signatures {
                    write_i32(w, sig.index as i32).await?;
                    write_i32(w, sig.weak as i32).await?;
                    write_string(w, &sig.strong).await?;
                }
            }
            SyncMessage::DeltaData {
                relative_path,
                hash,
                mtime,
                size,
                instructions,
            } => {
                write_string(w, relative_path).await?;
                write_string(w, hash).await?;
                write_i64(w, *mtime).await?;
                write_i64(w, *size).await?;
                write_i32(w, instructions.len() as i32).await?;
                for instr in instructions {
                    match instr {
                        DeltaInstruction::Copy {
                            source_block_index,
                            length,
                        } => {
                            write_u8(w, 0).await?;
                            write_i32(w, *source_block_index as i32).await?;
                            write_i32(w, *length as i32).await?;
                        }
                        DeltaInstruction::Insert { bytes } => {
                            write_u8(w, 1).await?;
                            write_i32(w, bytes.len() as i32).await?;
                            tokio::io::AsyncWriteExt::write_all(w, bytes).await?;
                        }
                    }
                }
            }
            SyncMessage::FileRenamed {
                old_relative_path,
                new_relative_path,
                is_directory,
            } => {
                write_string(w, old_relative_path).await?;
                write_string(w, new_relative_path).await?;
                write_bool(w, *is_directory).await?;
            }
            SyncMessage::FileChangedCompressed {
                relative_path,
                hash,
                mtime,
                original_size,
                compressed,
            } => {
                write_string(w, relative_path).await?;
                write_string(w, hash).await?;
                write_i64(w, *mtime).await?;
                write_i64(w, *original_size).await?;
                write_bytes(w, compressed).await?;
            }
        }
        Ok(())
    }

    pub async fn read<R: AsyncRead + Unpin>(r: &mut R) -> Result<SyncMessage> {
        let code = read_u8(r).await?;
        match code {
            1 => Ok(SyncMessage::FileChanged {
                relative_path: read_string(r, MAX_FIELD_LEN).await?,
                hash: read_string(r, MAX_FIELD_LEN).await?,
                mtime: read_i64(r).await?,
                size: read_i64(r).await?,
                is_directory: read_bool(r).await?,
                data: read_bytes(r, MAX_PAYLOAD_LEN).await?,
            }),
            2 => Ok(SyncMessage::FileDeleted {
                relative_path: read_string(r, MAX_FIELD_LEN).await?,
                is_directory: read_bool(r).await?,
            }),
            3 => Ok(SyncMessage::DirCreated {
                relative_path: read_string(r, MAX_FIELD_LEN).await?,
            }),
            4 => Ok(SyncMessage::DirDeleted {
                relative_path: read_string(r, MAX_FIELD_LEN).await?,
            }),
            5 => {
                let json = read_string(r, MAX_PAYLOAD_LEN).await?;
                let manifest: Manifest = serde_json::from_str(&json)?;
                Ok(SyncMessage::SyncManifest { manifest })
            }
            6 => Ok(SyncMessage::RequestFile {
                relative_path: read_string(r, MAX_FIELD_LEN).await?,
            }),
            7 => Ok(SyncMessage::RequestSignatures {
                relative_path: read_string(r, MAX_FIELD_LEN).await?,
            }),
            8 => {
                let relative_path = read_string(r, MAX_FIELD_LEN).await?;
                let count = read_i32(r).await?;
                if count < 0 {
                    return Err(SwarmError::Protocol("negative signature count".into()));
                }
                let mut signatures = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    let index = read_i32(r).await? as u32;
                    let weak = read_i32(r).await? as u32;
                    let strong = read_string(r, 128).await?;
                    signatures.push(BlockSignature {
                        index,
                        weak,
                        strong,
                    });
                }
                Ok(SyncMessage::BlockSignatures {
                    relative_path,
                    signatures,
                })
            }
            9 => {
                let relative_path = read_string(r, MAX_FIELD_LEN).await?;
                let hash = read_string(r, MAX_FIELD_LEN).await?;
                let mtime = read_i64(r).await?;
                let size = read_i64(r).await?;
                let count = read_i32(r).await?;
                if count < 0 {
                    return Err(SwarmError::Protocol("negative instruction count".into()));
                }
                let mut instructions = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    let tag = read_u8(r).await?;
                    match tag {
                        0 => {
                            let source_block_index = read_i32(r).await? as u32;
                            let length = read_i32(r).await? as u32;
                            instructions.push(DeltaInstruction::Copy {
                                source_block_index,
                                length,
                            });
                        }
                        1 => {
                            let bytes = read_bytes(r, MAX_PAYLOAD_LEN).await?;
                            instructions.push(DeltaInstruction::Insert { bytes });
                        }
                        other => {
                            return Err(SwarmError::Protocol(format!(
                                "unknown delta instruction tag {other}"
                            )));
                        }
                    }
                }
                Ok(SyncMessage::DeltaData {
                    relative_path,
                    hash,
                    mtime,
                    size,
                    instructions,
                })
            }
            10 => Ok(SyncMessage::FileRenamed {
                old_relative_path: read_string(r, MAX_FIELD_LEN).await?,
                new_relative_path: read_string(r, MAX_FIELD_LEN).await?,
                is_directory: read_bool(r).await?,
            }),
            11 => Ok(SyncMessage::FileChangedCompressed {
                relative_path: read_string(r, MAX_FIELD_LEN).await?,
                hash: read_string(r, MAX_FIELD_LEN).await?,
                mtime: read_i64(r).await?,
                original_size: read_i64(r).await?,
                compressed: read_bytes(r, MAX_PAYLOAD_LEN).await?,
            }),
            other => Err(SwarmError::Protocol(format!(
                "unknown sync message type code {other}"
            ))),
        }
    }
}

/// Names ending in these suffixes already hold compressed content; skip
/// delta sync and Brotli for them (spec §4.9).
pub fn skip_compression(relative_path: &str) -> bool {
    relative_path.to_lowercase().ends_with(".senc")
}

/// Brotli-compress at the fastest quality level (spec §4.9 compression policy).
pub fn brotli_compress(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    let params = brotli::enc::BrotliEncoderParams {
        quality: 1,
        ..Default::default()
    };
    brotli::BrotliCompress(&mut Cursor::new(data), &mut out, &params)
        .expect("in-memory brotli compression cannot fail");
    out
}

pub fn brotli_decompress(data: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let mut reader = brotli::Decompressor::new(data, 4096);
    reader
        .read_to_end(&mut out)
        .map_err(|e| SwarmError::Protocol(format!("brotli decompression failed: {e}")))?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FileAction, SyncedFile};
    use std::time::UNIX_EPOCH;

    #[tokio::test]
    async fn file_deleted_round_trips() {
        let msg = SyncMessage::FileDeleted {
            relative_path: "a/b.txt".into(),
            is_directory: false,
        };
        let mut buf = Vec::new();
        msg.write(&mut buf).await.unwrap();
        let mut cursor = Cursor::new(buf);
        let decoded = SyncMessage::read(&mut cursor).await.unwrap();
        assert_eq!(decoded, msg);
    }

    #[tokio::test]
    async fn manifest_round_trips() {
        let manifest = vec![SyncedFile {
            relative_path: "x.txt".into(),
            content_hash: "abc".into(),
            last_modified: UNIX_EPOCH,
            file_size: 3,
            is_directory: false,
            action: FileAction::Create,
            old_relative_path: None,
            source_peer_id: None,
        }];
        let msg = SyncMessage::SyncManifest {
            manifest: manifest.clone(),
        };
        let mut buf = Vec::new();
        msg.write(&mut buf).await.unwrap();
        let mut cursor = Cursor::new(buf);
        let decoded = SyncMessage::read(&mut cursor).await.unwrap();
        assert_eq!(decoded, SyncMessage::SyncManifest { manifest });
    }

    #[tokio::test]
    async fn delta_data_with_mixed_instructions_round_trips() {
        let msg = SyncMessage::DeltaData {
            relative_path: "big.bin".into(),
            hash: "deadbeef".into(),
            mtime: 1234,
            size: 99,
            instructions: vec![
                DeltaInstruction::Copy {
                    source_block_index: 0,
                    length: 65536,
                },
                DeltaInstruction::Insert {
                    bytes: b"abc".to_vec(),
                },
            ],
        };
        let mut buf = Vec::new();
        msg.write(&mut buf).await.unwrap();
        let mut cursor = Cursor::new(buf);
        let decoded = SyncMessage::read(&mut cursor).await.unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn brotli_round_trips() {
        let data = b"the quick brown fox jumps over the lazy dog".repeat(100);
        let compressed = brotli_compress(&data);
        let decompressed = brotli_decompress(&compressed).unwrap();
        assert_eq!(decompressed, data);
    }

    #[test]
    fn senc_files_skip_compression() {
        assert!(skip_compression("archive.SENC"));
        assert!(!skip_compression("archive.zip"));
    }
}
