//! Container framing: header, section table, footer.
//!
//! # File layout (all integers little-endian)
//!
//! | Region | Contents |
//! |--------|----------|
//! | header | `magic[4]="MPCK"`, `version: u16`, `flags: u32`, `section_count: u16`, section table |
//! | sections | CNFG, TOCC, TOCB, BLKS, CSUM, ECCG?, TAGI?, FOOT in fixed order |
//! | FOOT | duplicate section table, `xxh3: u64` |
//!
//! Each section table entry is `tag[4] | offset: u64 | length: u64` (20
//! bytes). The footer checksum covers the whole file except the BLKS payload
//! (blocks carry their own per-block checksums and are repairable through
//! ECC) and the checksum field itself.

use serde::{Deserialize, Serialize};

use mempack_core::{CompressorKind, EccParams, MemPackError, MemPackResult};

/// Pack file magic.
pub const PACK_MAGIC: [u8; 4] = *b"MPCK";
/// Current container format version.
pub const FORMAT_VERSION: u16 = 1;

/// Header prefix length before the section table.
pub const HEADER_PREFIX_LEN: usize = 12;
/// Encoded length of one section table entry.
pub const SECTION_ENTRY_LEN: usize = 20;

/// Flag bit: pack carries an ECCG section.
pub const FLAG_ECC: u32 = 0x1;
/// Flag bit: pack carries a TAGI section.
pub const FLAG_TAG_INDEX: u32 = 0x2;

pub const TAG_CONFIG: [u8; 4] = *b"CNFG";
pub const TAG_TOC_CHUNKS: [u8; 4] = *b"TOCC";
pub const TAG_TOC_BLOCKS: [u8; 4] = *b"TOCB";
pub const TAG_BLOCKS: [u8; 4] = *b"BLKS";
pub const TAG_CHECKSUMS: [u8; 4] = *b"CSUM";
pub const TAG_ECC: [u8; 4] = *b"ECCG";
pub const TAG_TAG_INDEX: [u8; 4] = *b"TAGI";
pub const TAG_FOOTER: [u8; 4] = *b"FOOT";

/// One section table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionEntry {
    pub tag: [u8; 4],
    pub offset: u64,
    pub length: u64,
}

impl SectionEntry {
    pub fn write(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.tag);
        buf.extend_from_slice(&self.offset.to_le_bytes());
        buf.extend_from_slice(&self.length.to_le_bytes());
    }

    pub fn read(bytes: &[u8]) -> MemPackResult<Self> {
        if bytes.len() < SECTION_ENTRY_LEN {
            return Err(header_corrupt("section table entry truncated"));
        }
        Ok(Self {
            tag: [bytes[0], bytes[1], bytes[2], bytes[3]],
            offset: u64::from_le_bytes(bytes[4..12].try_into().expect("length checked")),
            length: u64::from_le_bytes(bytes[12..20].try_into().expect("length checked")),
        })
    }

    /// Byte range of this section, bounds-checked against the file length.
    pub fn range(&self, file_len: usize) -> MemPackResult<std::ops::Range<usize>> {
        let start = usize::try_from(self.offset).map_err(|_| header_corrupt("offset overflow"))?;
        let len = usize::try_from(self.length).map_err(|_| header_corrupt("length overflow"))?;
        let end = start
            .checked_add(len)
            .filter(|&e| e <= file_len)
            .ok_or_else(|| header_corrupt("section extends past end of file"))?;
        Ok(start..end)
    }
}

/// Build-time parameters persisted as the CNFG JSON section.
///
/// Everything a reader needs to interpret the pack and to re-embed queries
/// compatibly. Deliberately carries no timestamps: two builds from the same
/// inputs must be byte-identical.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackInfo {
    pub format_version: u16,
    pub compressor: CompressorKind,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub embedding_model: String,
    pub embedding_dim: u32,
    pub index_type: String,
    pub ecc: Option<EccParams>,
    pub block_size: usize,
}

/// Encode the header for a known section table.
#[must_use]
pub fn encode_header(flags: u32, sections: &[SectionEntry]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(header_len(sections.len()));
    buf.extend_from_slice(&PACK_MAGIC);
    buf.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    buf.extend_from_slice(&flags.to_le_bytes());
    buf.extend_from_slice(&(sections.len() as u16).to_le_bytes());
    for section in sections {
        section.write(&mut buf);
    }
    buf
}

/// Total header length for `section_count` sections.
#[must_use]
pub fn header_len(section_count: usize) -> usize {
    HEADER_PREFIX_LEN + section_count * SECTION_ENTRY_LEN
}

/// Parsed header fields.
#[derive(Debug)]
pub struct Header {
    pub flags: u32,
    pub sections: Vec<SectionEntry>,
}

/// Parse and validate the fixed header. Fatal on bad magic or version.
pub fn parse_header(bytes: &[u8]) -> MemPackResult<Header> {
    if bytes.len() < HEADER_PREFIX_LEN {
        return Err(header_corrupt("file shorter than header prefix"));
    }
    let found = [bytes[0], bytes[1], bytes[2], bytes[3]];
    if found != PACK_MAGIC {
        return Err(MemPackError::BadMagic {
            expected: PACK_MAGIC,
            found,
        });
    }
    let version = u16::from_le_bytes([bytes[4], bytes[5]]);
    if version > FORMAT_VERSION {
        return Err(MemPackError::UnsupportedVersion {
            found: version,
            supported: FORMAT_VERSION,
        });
    }
    let flags = u32::from_le_bytes(bytes[6..10].try_into().expect("length checked"));
    let section_count = u16::from_le_bytes([bytes[10], bytes[11]]) as usize;
    if bytes.len() < header_len(section_count) {
        return Err(header_corrupt("section table truncated"));
    }
    let mut sections = Vec::with_capacity(section_count);
    for i in 0..section_count {
        let at = HEADER_PREFIX_LEN + i * SECTION_ENTRY_LEN;
        sections.push(SectionEntry::read(&bytes[at..])?);
    }
    Ok(Header { flags, sections })
}

/// Encode the FOOT section body: duplicate table plus a checksum slot.
///
/// The checksum is written as zero here and patched once the final file
/// bytes exist.
#[must_use]
pub fn encode_footer(sections: &[SectionEntry]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(2 + sections.len() * SECTION_ENTRY_LEN + 8);
    buf.extend_from_slice(&(sections.len() as u16).to_le_bytes());
    for section in sections {
        section.write(&mut buf);
    }
    buf.extend_from_slice(&0u64.to_le_bytes());
    buf
}

/// Parse the FOOT section body into its table and checksum.
pub fn parse_footer(bytes: &[u8]) -> MemPackResult<(Vec<SectionEntry>, u64)> {
    if bytes.len() < 10 {
        return Err(footer_corrupt("footer truncated"));
    }
    let section_count = u16::from_le_bytes([bytes[0], bytes[1]]) as usize;
    let expected_len = 2 + section_count * SECTION_ENTRY_LEN + 8;
    if bytes.len() != expected_len {
        return Err(footer_corrupt("footer length mismatch"));
    }
    let mut sections = Vec::with_capacity(section_count);
    for i in 0..section_count {
        sections.push(SectionEntry::read(&bytes[2 + i * SECTION_ENTRY_LEN..])?);
    }
    let checksum = u64::from_le_bytes(
        bytes[expected_len - 8..]
            .try_into()
            .expect("length checked"),
    );
    Ok((sections, checksum))
}

/// Compute the whole-file checksum: everything except the BLKS payload and
/// the trailing checksum field itself.
#[must_use]
pub fn file_checksum(file: &[u8], blocks: &SectionEntry) -> u64 {
    let blocks_start = blocks.offset as usize;
    let blocks_end = (blocks.offset + blocks.length) as usize;
    let mut hasher = xxhash_rust::xxh3::Xxh3::new();
    hasher.update(&file[..blocks_start]);
    hasher.update(&file[blocks_end..file.len() - 8]);
    hasher.digest()
}

pub(crate) fn header_corrupt(reason: &str) -> MemPackError {
    MemPackError::HeaderCorrupt {
        reason: reason.to_string(),
    }
}

pub(crate) fn footer_corrupt(reason: &str) -> MemPackError {
    MemPackError::FooterCorrupt {
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_sections() -> Vec<SectionEntry> {
        vec![
            SectionEntry {
                tag: TAG_CONFIG,
                offset: 52,
                length: 10,
            },
            SectionEntry {
                tag: TAG_FOOTER,
                offset: 62,
                length: 50,
            },
        ]
    }

    #[test]
    fn header_round_trip() {
        let sections = sample_sections();
        let encoded = encode_header(FLAG_ECC, &sections);
        assert_eq!(encoded.len(), header_len(sections.len()));

        let header = parse_header(&encoded).unwrap();
        assert_eq!(header.flags, FLAG_ECC);
        assert_eq!(header.sections, sections);
    }

    #[test]
    fn bad_magic_is_fatal() {
        let mut encoded = encode_header(0, &sample_sections());
        encoded[0] = b'X';
        assert!(matches!(
            parse_header(&encoded),
            Err(MemPackError::BadMagic { .. })
        ));
    }

    #[test]
    fn future_version_is_rejected() {
        let mut encoded = encode_header(0, &sample_sections());
        encoded[4..6].copy_from_slice(&99u16.to_le_bytes());
        assert!(matches!(
            parse_header(&encoded),
            Err(MemPackError::UnsupportedVersion { found: 99, .. })
        ));
    }

    #[test]
    fn footer_round_trip() {
        let sections = sample_sections();
        let mut encoded = encode_footer(&sections);
        let len = encoded.len();
        encoded[len - 8..].copy_from_slice(&0xDEAD_BEEFu64.to_le_bytes());

        let (decoded, checksum) = parse_footer(&encoded).unwrap();
        assert_eq!(decoded, sections);
        assert_eq!(checksum, 0xDEAD_BEEF);
    }

    #[test]
    fn section_range_rejects_overflow() {
        let entry = SectionEntry {
            tag: TAG_BLOCKS,
            offset: 100,
            length: 50,
        };
        assert!(entry.range(120).is_err());
        assert_eq!(entry.range(150).unwrap(), 100..150);
    }
}
