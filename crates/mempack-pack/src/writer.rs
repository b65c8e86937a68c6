//! Pack assembly and emission.
//!
//! Blocks are filled greedily in chunk-id order up to the target
//! uncompressed size; a chunk that alone exceeds the target occupies its own
//! block. Sections are emitted in fixed order (header, CNFG, TOCC, TOCB,
//! BLKS, CSUM, ECCG?, TAGI?, FOOT), the header section table is rewritten
//! once offsets are known, the footer checksum is patched last, and the file
//! is published with an atomic rename.

use std::collections::BTreeMap;
use std::path::Path;

use tracing::debug;

use mempack_core::util::{atomic_write, xxh3};
use mempack_core::{Chunk, MemPackConfig, MemPackError, MemPackResult};

use crate::compress;
use crate::ecc::EccSection;
use crate::layout::{
    self, encode_footer, encode_header, header_len, PackInfo, SectionEntry, FLAG_ECC,
    FLAG_TAG_INDEX, FORMAT_VERSION, TAG_BLOCKS, TAG_CHECKSUMS, TAG_CONFIG, TAG_ECC, TAG_FOOTER,
    TAG_TAG_INDEX, TAG_TOC_BLOCKS, TAG_TOC_CHUNKS,
};
use crate::toc::{encode_block_table, encode_chunk_table, BlockEntry, ChunkEntry};

/// What a completed pack write looked like.
#[derive(Debug, Clone, Copy)]
pub struct PackSummary {
    pub blocks: u32,
    pub bytes_written: u64,
    pub compressed_total: u64,
    pub uncompressed_total: u64,
}

/// Write a `.mpack` file for `chunks` at `path`.
pub fn write_pack(
    path: &Path,
    chunks: &[Chunk],
    config: &MemPackConfig,
    embedding_model: &str,
    embedding_dim: u32,
) -> MemPackResult<PackSummary> {
    config.validate()?;

    // Stage 1: group chunks into uncompressed blocks, building the chunk TOC
    // and the meta heap as we go.
    let mut chunk_entries = Vec::with_capacity(chunks.len());
    let mut meta_heap = Vec::new();
    let mut raw_blocks: Vec<Vec<u8>> = Vec::new();
    let mut current = Vec::new();

    for chunk in chunks {
        let text = chunk.text.as_bytes();
        if !current.is_empty() && current.len() + text.len() > config.block_size {
            raw_blocks.push(std::mem::take(&mut current));
        }
        let meta_bytes = chunk.meta.to_bytes();
        chunk_entries.push(ChunkEntry {
            block_id: raw_blocks.len() as u32,
            offset_in_block: current.len() as u32,
            length: text.len() as u32,
            meta_offset: meta_heap.len() as u64,
            meta_len: meta_bytes.len() as u32,
        });
        meta_heap.extend_from_slice(&meta_bytes);
        current.extend_from_slice(text);
    }
    if !current.is_empty() {
        raw_blocks.push(current);
    }

    // Stage 2: compress, checksum, lay blocks out back to back.
    let mut block_entries = Vec::with_capacity(raw_blocks.len());
    let mut payloads = Vec::with_capacity(raw_blocks.len());
    let mut uncompressed_total = 0u64;
    let mut compressed_total = 0u64;
    let mut running_offset = 0u64;
    for raw in &raw_blocks {
        let payload = compress::compress(config.compressor, raw)?;
        block_entries.push(BlockEntry {
            file_offset: running_offset,
            compressed_size: payload.len() as u32,
            uncompressed_size: raw.len() as u32,
            checksum: xxh3(&payload),
        });
        running_offset += payload.len() as u64;
        uncompressed_total += raw.len() as u64;
        compressed_total += payload.len() as u64;
        payloads.push(payload);
    }

    // Stage 3: section bodies.
    let info = PackInfo {
        format_version: FORMAT_VERSION,
        compressor: config.compressor,
        chunk_size: config.chunking.chunk_size,
        chunk_overlap: config.chunking.chunk_overlap,
        embedding_model: embedding_model.to_string(),
        embedding_dim,
        index_type: "hnsw".to_string(),
        ecc: config.ecc,
        block_size: config.block_size,
    };
    let cnfg = serde_json::to_vec(&info).map_err(|e| MemPackError::InvalidConfig {
        message: format!("config serialization failed: {e}"),
    })?;

    let tocc = encode_chunk_table(&chunk_entries, &meta_heap);
    let tocb = encode_block_table(&block_entries);

    let mut blks = Vec::with_capacity(compressed_total as usize);
    for payload in &payloads {
        blks.extend_from_slice(payload);
    }

    let mut csum = Vec::with_capacity(block_entries.len() * 8);
    for entry in &block_entries {
        csum.extend_from_slice(&entry.checksum.to_le_bytes());
    }

    let eccg = match config.ecc {
        Some(params) if !payloads.is_empty() => Some(EccSection::build(params, &payloads)?.encode()),
        _ => None,
    };
    let tagi = encode_tag_index(chunks);

    // Stage 4: assemble. Offsets depend only on section lengths, so the
    // table is final before any byte is written.
    let mut flags = 0u32;
    if eccg.is_some() {
        flags |= FLAG_ECC;
    }
    if tagi.is_some() {
        flags |= FLAG_TAG_INDEX;
    }

    let mut bodies: Vec<([u8; 4], &[u8])> = vec![
        (TAG_CONFIG, cnfg.as_slice()),
        (TAG_TOC_CHUNKS, tocc.as_slice()),
        (TAG_TOC_BLOCKS, tocb.as_slice()),
        (TAG_BLOCKS, blks.as_slice()),
        (TAG_CHECKSUMS, csum.as_slice()),
    ];
    if let Some(eccg) = eccg.as_deref() {
        bodies.push((TAG_ECC, eccg));
    }
    if let Some(tagi) = tagi.as_deref() {
        bodies.push((TAG_TAG_INDEX, tagi));
    }

    let section_count = bodies.len() + 1; // + FOOT
    let mut offset = header_len(section_count) as u64;
    let mut sections = Vec::with_capacity(section_count);
    for (tag, body) in &bodies {
        sections.push(SectionEntry {
            tag: *tag,
            offset,
            length: body.len() as u64,
        });
        offset += body.len() as u64;
    }
    let footer_len = 2 + section_count * layout::SECTION_ENTRY_LEN + 8;
    sections.push(SectionEntry {
        tag: TAG_FOOTER,
        offset,
        length: footer_len as u64,
    });

    let mut file = encode_header(flags, &sections);
    for (_, body) in &bodies {
        file.extend_from_slice(body);
    }
    file.extend_from_slice(&encode_footer(&sections));
    debug_assert_eq!(file.len() as u64, offset + footer_len as u64);

    // Patch the footer checksum now that every other byte is final.
    let blocks_entry = sections
        .iter()
        .find(|s| s.tag == TAG_BLOCKS)
        .expect("BLKS always present");
    let checksum = layout::file_checksum(&file, blocks_entry);
    let len = file.len();
    file[len - 8..].copy_from_slice(&checksum.to_le_bytes());

    atomic_write(path, &file)?;
    debug!(
        path = %path.display(),
        chunks = chunks.len(),
        blocks = block_entries.len(),
        bytes = file.len(),
        "pack written"
    );

    Ok(PackSummary {
        blocks: block_entries.len() as u32,
        bytes_written: file.len() as u64,
        compressed_total,
        uncompressed_total,
    })
}

/// Build the TAGI section body, or `None` when no chunk carries tags.
fn encode_tag_index(chunks: &[Chunk]) -> Option<Vec<u8>> {
    let mut by_tag: BTreeMap<&str, Vec<u64>> = BTreeMap::new();
    for chunk in chunks {
        for tag in chunk.meta.tags() {
            by_tag.entry(tag.as_str()).or_default().push(chunk.id);
        }
    }
    if by_tag.is_empty() {
        return None;
    }
    let mut buf = Vec::new();
    buf.extend_from_slice(&(by_tag.len() as u32).to_le_bytes());
    for (tag, chunk_ids) in by_tag {
        buf.extend_from_slice(&(tag.len() as u32).to_le_bytes());
        buf.extend_from_slice(tag.as_bytes());
        buf.extend_from_slice(&(chunk_ids.len() as u32).to_le_bytes());
        for id in chunk_ids {
            buf.extend_from_slice(&id.to_le_bytes());
        }
    }
    Some(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mempack_core::ChunkMeta;
    use tempfile::TempDir;

    fn chunk(id: u64, text: &str) -> Chunk {
        Chunk {
            id,
            text: text.to_string(),
            meta: ChunkMeta::new().with("source", "test.md"),
        }
    }

    #[test]
    fn greedy_fill_respects_block_size() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("pack.mpack");
        let mut config = MemPackConfig::default();
        config.block_size = 100;

        // 40-byte texts: two per 100-byte block.
        let chunks: Vec<Chunk> = (0..5).map(|i| chunk(i, &"x".repeat(40))).collect();
        let summary = write_pack(&path, &chunks, &config, "hashing-v1", 64).unwrap();
        assert_eq!(summary.blocks, 3);
        assert_eq!(summary.uncompressed_total, 200);
    }

    #[test]
    fn oversized_chunk_gets_its_own_block() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("pack.mpack");
        let mut config = MemPackConfig::default();
        config.block_size = 100;

        let chunks = vec![
            chunk(0, &"a".repeat(30)),
            chunk(1, &"b".repeat(250)), // alone in its block
            chunk(2, &"c".repeat(30)),
        ];
        let summary = write_pack(&path, &chunks, &config, "hashing-v1", 64).unwrap();
        assert_eq!(summary.blocks, 3);
    }

    #[test]
    fn identical_builds_are_byte_identical() {
        let dir = TempDir::new().unwrap();
        let path_a = dir.path().join("a.mpack");
        let path_b = dir.path().join("b.mpack");
        let config = MemPackConfig::default();

        let chunks: Vec<Chunk> = (0..10)
            .map(|i| chunk(i, &format!("chunk number {i} with some shared text")))
            .collect();
        write_pack(&path_a, &chunks, &config, "hashing-v1", 64).unwrap();
        write_pack(&path_b, &chunks, &config, "hashing-v1", 64).unwrap();

        assert_eq!(
            std::fs::read(&path_a).unwrap(),
            std::fs::read(&path_b).unwrap()
        );
    }
}
