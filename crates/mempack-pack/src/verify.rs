//! Full-pack integrity walk.
//!
//! Walks every block, recomputes its checksum over the compressed payload,
//! and attempts ECC repair for mismatches. Unrecoverable blocks are added to
//! the reader's poison set so later chunk fetches fail fast.

use tracing::{info, warn};

use mempack_core::util::xxh3;
use mempack_core::{Deadline, MemPackResult};

use crate::reader::PackReader;

/// Per-block verification outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockStatus {
    Ok,
    /// Checksum failed but ECC reconstructed the payload.
    Recovered,
    /// Checksum failed and repair was impossible.
    Unrecoverable,
}

/// Aggregate verification report.
///
/// `corrupted` counts every block whose stored checksum did not match;
/// it always equals `recovered + unrecoverable`.
#[derive(Debug, Clone, Default)]
pub struct VerifyReport {
    pub ok: u32,
    pub corrupted: u32,
    pub recovered: u32,
    pub unrecoverable: u32,
    pub blocks: Vec<(u32, BlockStatus)>,
}

impl VerifyReport {
    /// True when every block is intact or repairable.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.unrecoverable == 0
    }
}

/// Verify every block of an open pack.
pub fn verify_pack(reader: &PackReader) -> MemPackResult<VerifyReport> {
    verify_pack_with(reader, Deadline::none())
}

/// Deadline-aware verification walk; expiry aborts with `Timeout`.
pub fn verify_pack_with(reader: &PackReader, deadline: Deadline) -> MemPackResult<VerifyReport> {
    let mut report = VerifyReport::default();

    for block_id in 0..reader.block_count() {
        deadline.check()?;
        let expected = reader.block_checksum(block_id)?;
        let payload = reader.block_compressed_bytes(block_id)?;
        if xxh3(&payload) == expected {
            report.ok += 1;
            report.blocks.push((block_id, BlockStatus::Ok));
            continue;
        }
        drop(payload);
        report.corrupted += 1;

        let status = attempt_repair(reader, block_id, expected);
        if status == BlockStatus::Recovered {
            info!(block_id, "verify: block recovered via ECC");
            report.recovered += 1;
        } else {
            warn!(block_id, "verify: block unrecoverable");
            reader.poison(block_id);
            report.unrecoverable += 1;
        }
        report.blocks.push((block_id, status));
    }

    Ok(report)
}

fn attempt_repair(reader: &PackReader, block_id: u32, expected: u64) -> BlockStatus {
    let Some(ecc) = reader.ecc() else {
        return BlockStatus::Unrecoverable;
    };
    let Ok(entry) = reader.block_entry(block_id) else {
        return BlockStatus::Unrecoverable;
    };
    let provider = |member: u32| -> Option<Vec<u8>> {
        let bytes = reader.block_compressed_bytes(member).ok()?;
        let checksum = reader.block_checksum(member).ok()?;
        (xxh3(&bytes) == checksum).then(|| bytes.into_owned())
    };
    match ecc.repair_block(block_id, &provider) {
        Ok(padded) => {
            let repaired = &padded[..entry.compressed_size as usize];
            if xxh3(repaired) == expected {
                BlockStatus::Recovered
            } else {
                BlockStatus::Unrecoverable
            }
        }
        Err(_) => BlockStatus::Unrecoverable,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::TAG_BLOCKS;
    use crate::reader::ReadOptions;
    use crate::writer::write_pack;
    use mempack_core::{Chunk, ChunkMeta, EccParams, MemPackConfig};
    use tempfile::TempDir;

    fn build(dir: &TempDir, ecc: Option<EccParams>, blocks_wanted: usize) -> std::path::PathBuf {
        let path = dir.path().join("verify.mpack");
        let mut config = MemPackConfig::default();
        config.block_size = 64;
        config.ecc = ecc;
        // Each text fills one block at this block size.
        let chunks: Vec<Chunk> = (0..blocks_wanted as u64)
            .map(|i| Chunk {
                id: i,
                text: format!("block payload {i} {}", "abcdefgh".repeat(6)),
                meta: ChunkMeta::new().with("source", "v.md"),
            })
            .collect();
        write_pack(&path, &chunks, &config, "hashing-v1", 32).unwrap();
        path
    }

    fn corrupt_block(path: &std::path::Path, block_id: u32) {
        let reader = PackReader::open(path, ReadOptions::default()).unwrap();
        let blocks = reader
            .sections()
            .iter()
            .find(|s| s.tag == TAG_BLOCKS)
            .copied()
            .unwrap();
        let entry = reader.block_entry(block_id).unwrap();
        drop(reader);

        let mut bytes = std::fs::read(path).unwrap();
        let at = (blocks.offset + entry.file_offset) as usize;
        bytes[at] ^= 0xFF;
        std::fs::write(path, &bytes).unwrap();
    }

    #[test]
    fn clean_pack_verifies_clean() {
        let dir = TempDir::new().unwrap();
        let path = build(&dir, Some(EccParams { k: 4, m: 2 }), 8);
        let reader = PackReader::open(&path, ReadOptions::default()).unwrap();
        let report = verify_pack(&reader).unwrap();
        assert_eq!(report.ok, reader.block_count());
        assert_eq!(report.corrupted, 0);
        assert!(report.is_healthy());
    }

    #[test]
    fn single_corruption_recovers_with_ecc() {
        let dir = TempDir::new().unwrap();
        let path = build(&dir, Some(EccParams { k: 4, m: 2 }), 8);
        corrupt_block(&path, 2);

        let reader = PackReader::open(&path, ReadOptions::default()).unwrap();
        let report = verify_pack(&reader).unwrap();
        assert_eq!(report.corrupted, 1);
        assert_eq!(report.recovered, 1);
        assert_eq!(report.unrecoverable, 0);
        assert!(report.is_healthy());
        assert!(!reader.is_poisoned(2));
    }

    #[test]
    fn corruption_without_ecc_is_unrecoverable() {
        let dir = TempDir::new().unwrap();
        let path = build(&dir, None, 4);
        corrupt_block(&path, 1);

        let reader = PackReader::open(&path, ReadOptions::default()).unwrap();
        let report = verify_pack(&reader).unwrap();
        assert_eq!(report.corrupted, 1);
        assert_eq!(report.recovered, 0);
        assert_eq!(report.unrecoverable, 1);
        assert!(reader.is_poisoned(1));
    }

    #[test]
    fn losses_beyond_parity_are_unrecoverable() {
        let dir = TempDir::new().unwrap();
        let path = build(&dir, Some(EccParams { k: 4, m: 2 }), 8);
        // Three corruptions in the first group of four: m + 1.
        corrupt_block(&path, 0);
        corrupt_block(&path, 1);
        corrupt_block(&path, 2);

        let reader = PackReader::open(&path, ReadOptions::default()).unwrap();
        let report = verify_pack(&reader).unwrap();
        assert_eq!(report.corrupted, 3);
        assert_eq!(report.recovered, 0);
        assert_eq!(report.unrecoverable, 3);
        assert!(!report.is_healthy());
    }
}
