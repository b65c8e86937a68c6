//! Chunk and block tables of contents.
//!
//! Both tables are dense, sorted by id, and laid out as a `u64` count
//! followed by fixed-width little-endian entries so a reader can address
//! entry `i` at a constant offset inside the mapped section. The chunk table
//! is followed by a meta heap of TLV-encoded `ChunkMeta` records.

use mempack_core::{ChunkMeta, MemPackError, MemPackResult};

use crate::layout::header_corrupt;

/// Encoded size of one chunk TOC entry.
pub const CHUNK_ENTRY_LEN: usize = 24;
/// Encoded size of one block TOC entry.
pub const BLOCK_ENTRY_LEN: usize = 24;

/// Where a chunk lives: `(block_id, offset_in_block, length)` plus the
/// location of its meta record in the TOCC heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkEntry {
    pub block_id: u32,
    pub offset_in_block: u32,
    pub length: u32,
    pub meta_offset: u64,
    pub meta_len: u32,
}

/// Where a block lives: offset relative to the BLKS section start, sizes,
/// and the XXH3 of the compressed payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockEntry {
    pub file_offset: u64,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    pub checksum: u64,
}

/// Encode the TOCC section: count, fixed entries, meta heap.
#[must_use]
pub fn encode_chunk_table(entries: &[ChunkEntry], meta_heap: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(8 + entries.len() * CHUNK_ENTRY_LEN + meta_heap.len());
    buf.extend_from_slice(&(entries.len() as u64).to_le_bytes());
    for entry in entries {
        buf.extend_from_slice(&entry.block_id.to_le_bytes());
        buf.extend_from_slice(&entry.offset_in_block.to_le_bytes());
        buf.extend_from_slice(&entry.length.to_le_bytes());
        buf.extend_from_slice(&entry.meta_offset.to_le_bytes());
        buf.extend_from_slice(&entry.meta_len.to_le_bytes());
    }
    buf.extend_from_slice(meta_heap);
    buf
}

/// Encode the TOCB section: count then fixed entries.
#[must_use]
pub fn encode_block_table(entries: &[BlockEntry]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(8 + entries.len() * BLOCK_ENTRY_LEN);
    buf.extend_from_slice(&(entries.len() as u64).to_le_bytes());
    for entry in entries {
        buf.extend_from_slice(&entry.file_offset.to_le_bytes());
        buf.extend_from_slice(&entry.compressed_size.to_le_bytes());
        buf.extend_from_slice(&entry.uncompressed_size.to_le_bytes());
        buf.extend_from_slice(&entry.checksum.to_le_bytes());
    }
    buf
}

/// Read-side view over an encoded TOCC section.
#[derive(Debug)]
pub struct ChunkTable<'a> {
    entries: &'a [u8],
    meta_heap: &'a [u8],
    count: u64,
}

impl<'a> ChunkTable<'a> {
    pub fn parse(section: &'a [u8]) -> MemPackResult<Self> {
        if section.len() < 8 {
            return Err(header_corrupt("chunk table truncated"));
        }
        let count = u64::from_le_bytes(section[..8].try_into().expect("length checked"));
        let entries_len = (count as usize)
            .checked_mul(CHUNK_ENTRY_LEN)
            .filter(|&len| 8 + len <= section.len())
            .ok_or_else(|| header_corrupt("chunk table count exceeds section"))?;
        Ok(Self {
            entries: &section[8..8 + entries_len],
            meta_heap: &section[8 + entries_len..],
            count,
        })
    }

    #[must_use]
    pub fn len(&self) -> u64 {
        self.count
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn entry(&self, chunk_id: u64) -> MemPackResult<ChunkEntry> {
        if chunk_id >= self.count {
            return Err(MemPackError::ChunkUnavailable { chunk_id });
        }
        let at = chunk_id as usize * CHUNK_ENTRY_LEN;
        let bytes = &self.entries[at..at + CHUNK_ENTRY_LEN];
        Ok(ChunkEntry {
            block_id: u32::from_le_bytes(bytes[0..4].try_into().expect("fixed width")),
            offset_in_block: u32::from_le_bytes(bytes[4..8].try_into().expect("fixed width")),
            length: u32::from_le_bytes(bytes[8..12].try_into().expect("fixed width")),
            meta_offset: u64::from_le_bytes(bytes[12..20].try_into().expect("fixed width")),
            meta_len: u32::from_le_bytes(bytes[20..24].try_into().expect("fixed width")),
        })
    }

    /// Decode the meta record for `entry`.
    pub fn meta(&self, entry: &ChunkEntry) -> MemPackResult<ChunkMeta> {
        let start = entry.meta_offset as usize;
        let end = start
            .checked_add(entry.meta_len as usize)
            .filter(|&e| e <= self.meta_heap.len())
            .ok_or_else(|| header_corrupt("meta record outside heap"))?;
        ChunkMeta::from_bytes(&self.meta_heap[start..end])
    }
}

/// Read-side view over an encoded TOCB section.
#[derive(Debug)]
pub struct BlockTable<'a> {
    entries: &'a [u8],
    count: u32,
}

impl<'a> BlockTable<'a> {
    pub fn parse(section: &'a [u8]) -> MemPackResult<Self> {
        if section.len() < 8 {
            return Err(header_corrupt("block table truncated"));
        }
        let count = u64::from_le_bytes(section[..8].try_into().expect("length checked"));
        let entries_len = (count as usize)
            .checked_mul(BLOCK_ENTRY_LEN)
            .filter(|&len| 8 + len == section.len())
            .ok_or_else(|| header_corrupt("block table length mismatch"))?;
        let count = u32::try_from(count).map_err(|_| header_corrupt("block count overflow"))?;
        Ok(Self {
            entries: &section[8..8 + entries_len],
            count,
        })
    }

    #[must_use]
    pub fn len(&self) -> u32 {
        self.count
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn entry(&self, block_id: u32) -> MemPackResult<BlockEntry> {
        if block_id >= self.count {
            return Err(MemPackError::BlockCorrupt { block_id });
        }
        let at = block_id as usize * BLOCK_ENTRY_LEN;
        let bytes = &self.entries[at..at + BLOCK_ENTRY_LEN];
        Ok(BlockEntry {
            file_offset: u64::from_le_bytes(bytes[0..8].try_into().expect("fixed width")),
            compressed_size: u32::from_le_bytes(bytes[8..12].try_into().expect("fixed width")),
            uncompressed_size: u32::from_le_bytes(bytes[12..16].try_into().expect("fixed width")),
            checksum: u64::from_le_bytes(bytes[16..24].try_into().expect("fixed width")),
        })
    }
}
