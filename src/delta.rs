//! Delta engine (C10): block signatures, rolling-checksum delta computation,
//! and the instruction applier.
//!
//! No file in the retrieved pack implements rsync-style delta sync; this
//! module is built from the algorithmic description of spec §4.10 using the
//! same streaming/atomic-rename I/O idiom as `hasher.rs` and
//! `state_store.rs` (see DESIGN.md).
use crate::crypto::sha256_hex;
use crate::error::Result;
use crate::model::{BlockSignature, DeltaInstruction};
use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

pub const BLOCK_SIZE: usize = 64 * 1024;
pub const DELTA_THRESHOLD: u64 = 1024 * 1024;
const MOD_ADLER: u32 = 65521;

/// Adler-like rolling checksum supporting O(1) slide-by-one-byte updates.
#[derive(Debug, Clone, Copy, Default)]
pub struct RollingChecksum {
    a: u32,
    b: u32,
    len: u32,
}

impl RollingChecksum {
    pub fn new() -> Self {
        Self { a: 1, b: 0, len: 0 }
    }

    pub fn from_block(block: &[u8]) -> Self {
        let mut rc = Self::new();
        for &byte in block {
            rc.push(byte);
        }
        rc
    }

    fn push(&mut self, byte: u8) {
        self.a = (self.a + byte as u32) % MOD_ADLER;
        self.b = (self.b + self.a) % MOD_ADLER;
        self.len += 1;
    }

    /// Slide the window forward by one byte: `old` leaves, `new` enters.
    /// Window length is unchanged by a slide, only its contents shift.
    pub fn roll(&mut self, old: u8, new: u8) {
        self.a = (self.a + MOD_ADLER - old as u32 + new as u32) % MOD_ADLER;
        let len_old_term = (self.len * old as u32) % MOD_ADLER;
        self.b = (self.b + MOD_ADLER - len_old_term + self.a) % MOD_ADLER;
    }

    pub fn value(&self) -> u32 {
        (self.b << 16) | self.a
    }
}

/// Produce one [`BlockSignature`] per block of `data` (final short block
/// included). `signatures(x, B)` is a pure function of `(x, B)`.
pub fn compute_signatures(data: &[u8], block_size: usize) -> Vec<BlockSignature> {
    data.chunks(block_size)
        .enumerate()
        .map(|(index, block)| BlockSignature {
            index: index as u32,
            weak: RollingChecksum::from_block(block).value(),
            strong: sha256_hex(block),
        })
        .collect()
}

pub fn signatures_of_file(path: &Path, block_size: usize) -> Result<Vec<BlockSignature>> {
    let mut file = File::open(path)?;
    let mut data = Vec::new();
    file.read_to_end(&mut data)?;
    Ok(compute_signatures(&data, block_size))
}

/// Compute a delta transforming `old` (described by `signatures`) into `new`.
pub fn compute_delta(new: &[u8], signatures: &[BlockSignature], block_size: usize) -> Vec<DeltaInstruction> {
    if signatures.is_empty() || new.is_empty() {
        return vec![DeltaInstruction::Insert {
            bytes: new.to_vec(),
        }];
    }

    let mut by_weak: HashMap<u32, Vec<&BlockSignature>> = HashMap::new();
    for sig in signatures {
        by_weak.entry(sig.weak).or_default().push(sig);
    }

    let mut instructions = Vec::new();
    let mut literal: Vec<u8> = Vec::new();
    let mut pos = 0usize;

    // The rolling window is recomputed from scratch only when its length
    // changes (the final short block) or right after a block-aligned Copy;
    // every byte-by-byte slide on a miss updates it in O(1) via `roll`,
    // per spec §4.10.
    let mut window_len = block_size.min(new.len() - pos);
    let mut rolling = RollingChecksum::from_block(&new[pos..pos + window_len]);

    while pos < new.len() {
        let window = &new[pos..pos + window_len];
        let weak = rolling.value();

        let matched = by_weak.get(&weak).and_then(|candidates| {
            let strong = sha256_hex(window);
            candidates.iter().find(|c| c.strong == strong)
        });

        if let Some(sig) = matched {
            if !literal.is_empty() {
                instructions.push(DeltaInstruction::Insert {
                    bytes: std::mem::take(&mut literal),
                });
            }
            instructions.push(DeltaInstruction::Copy {
                source_block_index: sig.index,
                length: window.len() as u32,
            });
            pos += window_len;
            if pos < new.len() {
                window_len = block_size.min(new.len() - pos);
                rolling = RollingChecksum::from_block(&new[pos..pos + window_len]);
            }
        } else {
            literal.push(new[pos]);
            pos += 1;
            if pos < new.len() {
                let next_window_len = block_size.min(new.len() - pos);
                if next_window_len == window_len {
                    let leaving = new[pos - 1];
                    let entering = new[pos + window_len - 1];
                    rolling.roll(leaving, entering);
                } else {
                    window_len = next_window_len;
                    rolling = RollingChecksum::from_block(&new[pos..pos + window_len]);
                }
            }
        }
    }

    if !literal.is_empty() {
        instructions.push(DeltaInstruction::Insert { bytes: literal });
    }

    instructions
}

/// Σ (Copy: 8 bytes overhead) + (Insert: 5 bytes + data), used to decide
/// whether delta sync is worthwhile versus a whole-file send.
pub fn estimate_delta_size(instructions: &[DeltaInstruction]) -> u64 {
    instructions
        .iter()
        .map(|instr| match instr {
            DeltaInstruction::Copy { .. } => 8,
            DeltaInstruction::Insert { bytes } => 5 + bytes.len() as u64,
        })
        .sum()
}

/// True if the delta is not worth sending over a whole compressed file
/// (spec §4.10's `estimated_delta_size >= 0.9 * new_size` fallback rule).
pub fn should_fall_back_to_full_send(instructions: &[DeltaInstruction], new_size: u64) -> bool {
    estimate_delta_size(instructions) as f64 >= 0.9 * new_size as f64
}

/// Apply `instructions` against `old_path`, writing the reconstructed bytes
/// to `new_path` atomically (temp file + rename). `old_path` and `new_path`
/// must not be the same file.
pub fn apply_delta(old_path: &Path, new_path: &Path, instructions: &[DeltaInstruction], block_size: usize) -> Result<()> {
    let mut old_file = File::open(old_path)?;
    let tmp_path = new_path.with_extension("swarmtmp");
    {
        let mut tmp = File::create(&tmp_path)?;
        for instr in instructions {
            match instr {
                DeltaInstruction::Copy {
                    source_block_index,
                    length,
                } => {
                    let offset = (*source_block_index as u64) * block_size as u64;
                    old_file.seek(SeekFrom::Start(offset))?;
                    let mut remaining = *length as usize;
                    let mut buf = [0u8; 8192];
                    while remaining > 0 {
                        let chunk = remaining.min(buf.len());
                        old_file.read_exact(&mut buf[..chunk])?;
                        tmp.write_all(&buf[..chunk])?;
                        remaining -= chunk;
                    }
                }
                DeltaInstruction::Insert { bytes } => {
                    tmp.write_all(bytes)?;
                }
            }
        }
        tmp.sync_all()?;
    }
    std::fs::rename(&tmp_path, new_path).map_err(|e| {
        let _ = std::fs::remove_file(&tmp_path);
        e.into()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn signatures_are_pure_function_of_input_and_block_size() {
        let data = b"hello world, this is a test of the rolling checksum".repeat(10);
        let a = compute_signatures(&data, 16);
        let b = compute_signatures(&data, 16);
        assert_eq!(a, b);
    }

    #[test]
    fn rolling_checksum_matches_recompute_after_slide() {
        let data = b"abcdefghijklmnop";
        let window = 4;
        let mut rolling = RollingChecksum::from_block(&data[0..window]);
        for i in 1..=(data.len() - window) {
            rolling.roll(data[i - 1], data[i + window - 1]);
            let direct = RollingChecksum::from_block(&data[i..i + window]);
            assert_eq!(rolling.value(), direct.value(), "mismatch at slide {i}");
        }
    }

    #[test]
    fn delta_round_trip_small_patch() {
        let mut old = vec![0u8; 128 * 1024];
        let mut new = old.clone();
        new[40000..40003].copy_from_slice(b"abc");

        let sigs = compute_signatures(&old, BLOCK_SIZE);
        let delta = compute_delta(&new, &sigs, BLOCK_SIZE);

        let dir = tempdir().unwrap();
        let old_path = dir.path().join("old.bin");
        let new_path = dir.path().join("new.bin");
        std::fs::write(&old_path, &old).unwrap();
        apply_delta(&old_path, &new_path, &delta, BLOCK_SIZE).unwrap();

        let reconstructed = std::fs::read(&new_path).unwrap();
        assert_eq!(reconstructed, new);
        old.clear();
    }

    #[test]
    fn delta_round_trip_arbitrary_bytes() {
        let old: Vec<u8> = (0..5000u32).map(|i| (i % 251) as u8).collect();
        let mut new = old.clone();
        new.truncate(2000);
        new.extend_from_slice(b"brand new tail content appended here");

        let sigs = compute_signatures(&old, 512);
        let delta = compute_delta(&new, &sigs, 512);

        let dir = tempdir().unwrap();
        let old_path = dir.path().join("old.bin");
        let new_path = dir.path().join("new.bin");
        std::fs::write(&old_path, &old).unwrap();
        apply_delta(&old_path, &new_path, &delta, 512).unwrap();

        assert_eq!(std::fs::read(&new_path).unwrap(), new);
    }

    #[test]
    fn empty_signatures_fall_back_to_full_insert() {
        let delta = compute_delta(b"content", &[], BLOCK_SIZE);
        assert_eq!(delta.len(), 1);
        assert!(matches!(delta[0], DeltaInstruction::Insert { .. }));
    }

    #[test]
    fn large_delta_triggers_full_send_fallback() {
        let instructions = vec![DeltaInstruction::Insert {
            bytes: vec![0u8; 1000],
        }];
        assert!(should_fall_back_to_full_send(&instructions, 1000));
        let small = vec![DeltaInstruction::Copy {
            source_block_index: 0,
            length: 65536,
        }];
        assert!(!should_fall_back_to_full_send(&small, 65536));
    }

    use proptest::prelude::*;

    proptest! {
        #[test]
        fn prop_delta_round_trip(
            old in prop::collection::vec(any::<u8>(), 0..4000),
            new in prop::collection::vec(any::<u8>(), 0..4000),
            block_size in 8usize..200,
        ) {
            let sigs = compute_signatures(&old, block_size);
            let delta = compute_delta(&new, &sigs, block_size);

            let dir = tempdir().unwrap();
            let old_path = dir.path().join("old.bin");
            let new_path = dir.path().join("new.bin");
            std::fs::write(&old_path, &old).unwrap();
            apply_delta(&old_path, &new_path, &delta, block_size).unwrap();

            prop_assert_eq!(std::fs::read(&new_path).unwrap(), new);
        }

        #[test]
        fn prop_signatures_are_deterministic(
            data in prop::collection::vec(any::<u8>(), 0..4000),
            block_size in 8usize..200,
        ) {
            let a = compute_signatures(&data, block_size);
            let b = compute_signatures(&data, block_size);
            prop_assert_eq!(a, b);
        }
    }
}
