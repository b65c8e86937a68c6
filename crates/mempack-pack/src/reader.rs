//! Validated pack reading.
//!
//! `open` parses and cross-checks the header and footer section tables,
//! verifies the whole-file checksum (block payloads are covered by their own
//! per-block checksums), and keeps the TOC, checksum table, and ECC section
//! addressable for the lifetime of the reader. Block payloads are fetched on
//! demand, either as zero-copy mmap slices or via positioned reads when
//! `mmap` is disabled.
//!
//! The reader is immutable after open except for the poison set, which
//! records blocks proven unrecoverable so their chunks fail fast with
//! `ChunkUnavailable`.

use std::borrow::Cow;
use std::collections::HashSet;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use memmap2::Mmap;
use parking_lot::Mutex;
use tracing::debug;

use mempack_core::{ChunkMeta, MemPackError, MemPackResult};

use crate::ecc::EccSection;
use crate::layout::{
    self, footer_corrupt, header_corrupt, parse_footer, parse_header, PackInfo, SectionEntry,
    TAG_BLOCKS, TAG_CHECKSUMS, TAG_CONFIG, TAG_ECC, TAG_FOOTER, TAG_TAG_INDEX, TAG_TOC_BLOCKS,
    TAG_TOC_CHUNKS,
};
use crate::toc::{BlockEntry, BlockTable, ChunkEntry, ChunkTable};

/// How to open a pack.
#[derive(Debug, Clone, Copy)]
pub struct ReadOptions {
    /// Memory-map the file; positioned I/O when false.
    pub mmap: bool,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self { mmap: true }
    }
}

enum Backing {
    Mapped {
        mmap: Mmap,
    },
    Positioned {
        file: Mutex<File>,
        /// Everything before the BLKS payload.
        prefix: Vec<u8>,
        /// Everything from the end of BLKS to EOF.
        suffix: Vec<u8>,
        blocks_range: (u64, u64),
    },
}

/// An open, validated `.mpack` file.
pub struct PackReader {
    backing: Backing,
    sections: Vec<SectionEntry>,
    info: PackInfo,
    ecc: Option<EccSection>,
    file_len: usize,
    chunk_count: u64,
    block_count: u32,
    poisoned: Mutex<HashSet<u32>>,
}

impl PackReader {
    /// Open and validate a pack. Header, footer, magic, version, and
    /// whole-file checksum failures are fatal here.
    pub fn open(path: &Path, options: ReadOptions) -> MemPackResult<Self> {
        let mut file = File::open(path)?;
        let file_len = usize::try_from(file.metadata()?.len())
            .map_err(|_| header_corrupt("file too large for this platform"))?;

        let backing = if options.mmap {
            // Read-only map held for the lifetime of the reader.
            let mmap = unsafe { Mmap::map(&file) }?;
            Backing::Mapped { mmap }
        } else {
            Self::open_positioned(&mut file, file_len)?
        };

        let mut reader = Self {
            backing,
            sections: Vec::new(),
            info: placeholder_info(),
            ecc: None,
            file_len,
            chunk_count: 0,
            block_count: 0,
            poisoned: Mutex::new(HashSet::new()),
        };
        reader.validate()?;
        debug!(
            path = %path.display(),
            chunks = reader.chunk_count,
            blocks = reader.block_count,
            mmap = options.mmap,
            "pack opened"
        );
        Ok(reader)
    }

    /// Positioned-I/O open: pull every non-BLKS byte into memory, leave the
    /// block payloads on disk.
    fn open_positioned(file: &mut File, file_len: usize) -> MemPackResult<Backing> {
        let mut head = vec![0u8; layout::HEADER_PREFIX_LEN.min(file_len)];
        file.seek(SeekFrom::Start(0))?;
        file.read_exact(&mut head)?;
        let section_count = u16::from_le_bytes(
            head.get(10..12)
                .ok_or_else(|| header_corrupt("file shorter than header prefix"))?
                .try_into()
                .expect("fixed width"),
        ) as usize;
        let header_len = layout::header_len(section_count);
        if file_len < header_len {
            return Err(header_corrupt("section table truncated"));
        }
        let mut header_bytes = vec![0u8; header_len];
        file.seek(SeekFrom::Start(0))?;
        file.read_exact(&mut header_bytes)?;
        let header = parse_header(&header_bytes)?;
        let blocks = find_section(&header.sections, TAG_BLOCKS)
            .ok_or_else(|| header_corrupt("missing BLKS section"))?;
        let range = blocks.range(file_len)?;

        let mut prefix = vec![0u8; range.start];
        file.seek(SeekFrom::Start(0))?;
        file.read_exact(&mut prefix)?;
        let mut suffix = vec![0u8; file_len - range.end];
        file.seek(SeekFrom::Start(range.end as u64))?;
        file.read_exact(&mut suffix)?;

        Ok(Backing::Positioned {
            file: Mutex::new(file.try_clone()?),
            prefix,
            suffix,
            blocks_range: (range.start as u64, range.end as u64),
        })
    }

    fn validate(&mut self) -> MemPackResult<()> {
        let header_bytes = self.bytes_at(0, layout::HEADER_PREFIX_LEN.min(self.file_len))?;
        let section_count = if header_bytes.len() >= layout::HEADER_PREFIX_LEN {
            u16::from_le_bytes(header_bytes[10..12].try_into().expect("fixed width")) as usize
        } else {
            return Err(header_corrupt("file shorter than header prefix"));
        };
        let header_len = layout::header_len(section_count);
        let header = parse_header(&self.bytes_at(0, header_len)?.into_owned())?;

        // The footer must be the last section and duplicate the header table.
        let footer_entry = header
            .sections
            .last()
            .filter(|s| s.tag == TAG_FOOTER)
            .copied()
            .ok_or_else(|| footer_corrupt("FOOT is not the final section"))?;
        let footer_range = footer_entry.range(self.file_len)?;
        if footer_range.end != self.file_len {
            return Err(footer_corrupt("trailing bytes after footer"));
        }
        let footer_bytes = self.bytes_at(footer_range.start, footer_range.len())?;
        let (footer_sections, stored_checksum) = parse_footer(&footer_bytes)?;
        if footer_sections != header.sections {
            return Err(footer_corrupt("footer table disagrees with header"));
        }

        let blocks = find_section(&header.sections, TAG_BLOCKS)
            .ok_or_else(|| header_corrupt("missing BLKS section"))?;
        blocks.range(self.file_len)?;
        let computed = self.compute_file_checksum(&blocks)?;
        if computed != stored_checksum {
            return Err(footer_corrupt(&format!(
                "checksum mismatch: stored {stored_checksum:#018x}, computed {computed:#018x}"
            )));
        }

        for tag in [TAG_CONFIG, TAG_TOC_CHUNKS, TAG_TOC_BLOCKS, TAG_CHECKSUMS] {
            find_section(&header.sections, tag)
                .ok_or_else(|| header_corrupt("missing required section"))?
                .range(self.file_len)?;
        }

        self.sections = header.sections;

        let info: PackInfo = {
            let cnfg = self.section_bytes(TAG_CONFIG)?;
            serde_json::from_slice(&cnfg)
                .map_err(|e| header_corrupt(&format!("CNFG parse failed: {e}")))?
        };
        if info.format_version > layout::FORMAT_VERSION {
            return Err(MemPackError::UnsupportedVersion {
                found: info.format_version,
                supported: layout::FORMAT_VERSION,
            });
        }
        self.info = info;

        let chunk_count = {
            let tocc = self.section_bytes(TAG_TOC_CHUNKS)?;
            ChunkTable::parse(&tocc)?.len()
        };
        self.chunk_count = chunk_count;
        let block_count = {
            let tocb = self.section_bytes(TAG_TOC_BLOCKS)?;
            BlockTable::parse(&tocb)?.len()
        };
        self.block_count = block_count;

        let csum = self.section_bytes(TAG_CHECKSUMS)?;
        if csum.len() != block_count as usize * 8 {
            return Err(header_corrupt("CSUM length disagrees with block count"));
        }
        drop(csum);

        let ecc = match self.section_bytes(TAG_ECC) {
            Ok(bytes) => Some(EccSection::decode(&bytes)?),
            Err(_) => None,
        };
        self.ecc = ecc;
        Ok(())
    }

    fn compute_file_checksum(&self, blocks: &SectionEntry) -> MemPackResult<u64> {
        match &self.backing {
            Backing::Mapped { mmap } => Ok(layout::file_checksum(mmap, blocks)),
            Backing::Positioned { prefix, suffix, .. } => {
                let mut hasher = xxhash_rust::xxh3::Xxh3::new();
                hasher.update(prefix);
                hasher.update(&suffix[..suffix.len() - 8]);
                Ok(hasher.digest())
            }
        }
    }

    /// Raw bytes at an absolute file offset; borrows from the map when
    /// possible.
    fn bytes_at(&self, start: usize, len: usize) -> MemPackResult<Cow<'_, [u8]>> {
        let end = start
            .checked_add(len)
            .filter(|&e| e <= self.file_len)
            .ok_or_else(|| header_corrupt("read past end of file"))?;
        match &self.backing {
            Backing::Mapped { mmap } => Ok(Cow::Borrowed(&mmap[start..end])),
            Backing::Positioned {
                prefix,
                suffix,
                blocks_range,
                file,
            } => {
                let (blk_start, blk_end) = (blocks_range.0 as usize, blocks_range.1 as usize);
                if end <= blk_start {
                    Ok(Cow::Borrowed(&prefix[start..end]))
                } else if start >= blk_end {
                    Ok(Cow::Borrowed(&suffix[start - blk_end..end - blk_end]))
                } else {
                    let mut buf = vec![0u8; len];
                    let mut file = file.lock();
                    file.seek(SeekFrom::Start(start as u64))?;
                    file.read_exact(&mut buf)?;
                    Ok(Cow::Owned(buf))
                }
            }
        }
    }

    fn section(&self, tag: [u8; 4]) -> MemPackResult<SectionEntry> {
        find_section(&self.sections, tag)
            .ok_or_else(|| header_corrupt(&format!("missing section {:?}", tag)))
    }

    fn section_bytes(&self, tag: [u8; 4]) -> MemPackResult<Cow<'_, [u8]>> {
        let entry = self.section(tag)?;
        self.bytes_at(entry.offset as usize, entry.length as usize)
    }

    /// Build-time parameters recorded in the pack.
    #[must_use]
    pub fn info(&self) -> &PackInfo {
        &self.info
    }

    /// Decoded ECC section, when the pack carries one.
    #[must_use]
    pub fn ecc(&self) -> Option<&EccSection> {
        self.ecc.as_ref()
    }

    /// Section table, for diagnostics.
    #[must_use]
    pub fn sections(&self) -> &[SectionEntry] {
        &self.sections
    }

    #[must_use]
    pub fn chunk_count(&self) -> u64 {
        self.chunk_count
    }

    #[must_use]
    pub fn block_count(&self) -> u32 {
        self.block_count
    }

    pub fn chunk_entry(&self, chunk_id: u64) -> MemPackResult<ChunkEntry> {
        let tocc = self.section_bytes(TAG_TOC_CHUNKS)?;
        ChunkTable::parse(&tocc)?.entry(chunk_id)
    }

    pub fn chunk_meta(&self, chunk_id: u64) -> MemPackResult<ChunkMeta> {
        let tocc = self.section_bytes(TAG_TOC_CHUNKS)?;
        let table = ChunkTable::parse(&tocc)?;
        let entry = table.entry(chunk_id)?;
        table.meta(&entry)
    }

    pub fn block_entry(&self, block_id: u32) -> MemPackResult<BlockEntry> {
        let tocb = self.section_bytes(TAG_TOC_BLOCKS)?;
        BlockTable::parse(&tocb)?.entry(block_id)
    }

    /// Expected XXH3 of a block's compressed payload, from the CSUM table.
    pub fn block_checksum(&self, block_id: u32) -> MemPackResult<u64> {
        if block_id >= self.block_count {
            return Err(MemPackError::BlockCorrupt { block_id });
        }
        let csum = self.section_bytes(TAG_CHECKSUMS)?;
        let at = block_id as usize * 8;
        Ok(u64::from_le_bytes(
            csum[at..at + 8].try_into().expect("validated length"),
        ))
    }

    /// A block's compressed payload, unverified.
    pub fn block_compressed_bytes(&self, block_id: u32) -> MemPackResult<Cow<'_, [u8]>> {
        let entry = self.block_entry(block_id)?;
        let blocks = self.section(TAG_BLOCKS)?;
        let start = blocks
            .offset
            .checked_add(entry.file_offset)
            .ok_or_else(|| header_corrupt("block offset overflow"))?;
        if entry.file_offset + u64::from(entry.compressed_size) > blocks.length {
            return Err(header_corrupt("block extends past BLKS section"));
        }
        self.bytes_at(start as usize, entry.compressed_size as usize)
    }

    /// Chunk ids carrying `tag`, from the TAGI section. Empty when the pack
    /// has no tag index or the tag is unknown.
    pub fn chunks_with_tag(&self, tag: &str) -> MemPackResult<Vec<u64>> {
        let Ok(body) = self.section_bytes(TAG_TAG_INDEX) else {
            return Ok(Vec::new());
        };
        let bytes = body.as_ref();
        let mut pos = 0usize;
        let take = |pos: &mut usize, n: usize| -> MemPackResult<&[u8]> {
            let end = pos
                .checked_add(n)
                .filter(|&e| e <= bytes.len())
                .ok_or_else(|| header_corrupt("TAGI truncated"))?;
            let out = &bytes[*pos..end];
            *pos = end;
            Ok(out)
        };
        let tag_count = u32::from_le_bytes(take(&mut pos, 4)?.try_into().expect("fixed"));
        for _ in 0..tag_count {
            let name_len = u32::from_le_bytes(take(&mut pos, 4)?.try_into().expect("fixed")) as usize;
            let name = take(&mut pos, name_len)?;
            let id_count =
                u32::from_le_bytes(take(&mut pos, 4)?.try_into().expect("fixed")) as usize;
            if name == tag.as_bytes() {
                let mut ids = Vec::with_capacity(id_count);
                for _ in 0..id_count {
                    ids.push(u64::from_le_bytes(
                        take(&mut pos, 8)?.try_into().expect("fixed"),
                    ));
                }
                return Ok(ids);
            }
            pos = pos
                .checked_add(id_count * 8)
                .filter(|&e| e <= bytes.len())
                .ok_or_else(|| header_corrupt("TAGI truncated"))?;
        }
        Ok(Vec::new())
    }

    /// Mark a block unrecoverable; its chunks fail with `ChunkUnavailable`.
    pub fn poison(&self, block_id: u32) {
        self.poisoned.lock().insert(block_id);
    }

    #[must_use]
    pub fn is_poisoned(&self, block_id: u32) -> bool {
        self.poisoned.lock().contains(&block_id)
    }
}

fn find_section(sections: &[SectionEntry], tag: [u8; 4]) -> Option<SectionEntry> {
    sections.iter().find(|s| s.tag == tag).copied()
}

fn placeholder_info() -> PackInfo {
    PackInfo {
        format_version: 0,
        compressor: mempack_core::CompressorKind::None,
        chunk_size: 0,
        chunk_overlap: 0,
        embedding_model: String::new(),
        embedding_dim: 0,
        index_type: String::new(),
        ecc: None,
        block_size: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::write_pack;
    use mempack_core::{Chunk, ChunkMeta, MemPackConfig};
    use tempfile::TempDir;

    fn build_sample(dir: &TempDir, config: &MemPackConfig) -> std::path::PathBuf {
        let path = dir.path().join("sample.mpack");
        let chunks: Vec<Chunk> = (0..6)
            .map(|i| {
                let mut meta = ChunkMeta::new().with("source", "doc.md").with("pos", i as i64);
                meta.add_tag("sample");
                Chunk {
                    id: i,
                    text: format!("chunk {i} body with enough text to be worth storing"),
                    meta,
                }
            })
            .collect();
        write_pack(&path, &chunks, config, "hashing-v1", 64).unwrap();
        path
    }

    #[test]
    fn open_round_trips_toc_and_meta() {
        let dir = TempDir::new().unwrap();
        let path = build_sample(&dir, &MemPackConfig::default());
        for mmap in [true, false] {
            let reader = PackReader::open(&path, ReadOptions { mmap }).unwrap();
            assert_eq!(reader.chunk_count(), 6);
            assert!(reader.block_count() >= 1);
            assert_eq!(reader.info().embedding_model, "hashing-v1");

            let entry = reader.chunk_entry(2).unwrap();
            assert!(entry.length > 0);
            let meta = reader.chunk_meta(2).unwrap();
            assert_eq!(meta.get("pos"), Some(&mempack_core::MetaValue::I64(2)));

            let tagged = reader.chunks_with_tag("sample").unwrap();
            assert_eq!(tagged, vec![0, 1, 2, 3, 4, 5]);
            assert!(reader.chunks_with_tag("absent").unwrap().is_empty());
        }
    }

    #[test]
    fn block_bytes_match_their_checksums() {
        let dir = TempDir::new().unwrap();
        let path = build_sample(&dir, &MemPackConfig::default());
        for mmap in [true, false] {
            let reader = PackReader::open(&path, ReadOptions { mmap }).unwrap();
            for block_id in 0..reader.block_count() {
                let payload = reader.block_compressed_bytes(block_id).unwrap();
                assert_eq!(
                    mempack_core::util::xxh3(&payload),
                    reader.block_checksum(block_id).unwrap(),
                    "block {block_id} with mmap={mmap}"
                );
            }
        }
    }

    #[test]
    fn structural_corruption_is_fatal() {
        let dir = TempDir::new().unwrap();
        let path = build_sample(&dir, &MemPackConfig::default());
        let original = std::fs::read(&path).unwrap();

        // Magic.
        let mut bad = original.clone();
        bad[0] = b'Z';
        std::fs::write(&path, &bad).unwrap();
        assert!(matches!(
            PackReader::open(&path, ReadOptions::default()),
            Err(MemPackError::BadMagic { .. })
        ));

        // A TOC byte: covered by the whole-file checksum.
        let mut bad = original.clone();
        bad[60] ^= 0xFF;
        std::fs::write(&path, &bad).unwrap();
        assert!(PackReader::open(&path, ReadOptions::default()).is_err());

        // Truncation.
        std::fs::write(&path, &original[..original.len() - 4]).unwrap();
        assert!(PackReader::open(&path, ReadOptions::default()).is_err());
    }

    #[test]
    fn block_body_corruption_does_not_block_open() {
        let dir = TempDir::new().unwrap();
        let path = build_sample(&dir, &MemPackConfig::default());
        let mut bytes = std::fs::read(&path).unwrap();

        let reader = PackReader::open(&path, ReadOptions::default()).unwrap();
        let blocks = reader
            .sections()
            .iter()
            .find(|s| s.tag == TAG_BLOCKS)
            .copied()
            .unwrap();
        drop(reader);

        bytes[blocks.offset as usize + 3] ^= 0xFF;
        std::fs::write(&path, &bytes).unwrap();

        // Open succeeds; the damage shows up at block fetch time.
        let reader = PackReader::open(&path, ReadOptions::default()).unwrap();
        let payload = reader.block_compressed_bytes(0).unwrap();
        assert_ne!(
            mempack_core::util::xxh3(&payload),
            reader.block_checksum(0).unwrap()
        );
    }

    #[test]
    fn poison_set_is_tracked() {
        let dir = TempDir::new().unwrap();
        let path = build_sample(&dir, &MemPackConfig::default());
        let reader = PackReader::open(&path, ReadOptions::default()).unwrap();
        assert!(!reader.is_poisoned(0));
        reader.poison(0);
        assert!(reader.is_poisoned(0));
    }
}
