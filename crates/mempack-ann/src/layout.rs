//! `.ann` file framing.
//!
//! # Layout (little-endian)
//!
//! | Offset | Field |
//! |--------|-------|
//! | 0 | `magic[4]="MPAN"` |
//! | 4 | `version: u16` |
//! | 6 | `algo: u8` (1 = HNSW) |
//! | 7 | `d: u32` |
//! | 11 | `N: u32` |
//! | 15 | `M: u16` |
//! | 17 | `ef_construction: u16` |
//! | 19 | `metric: u8` (1 = cosine) |
//! | 20 | `entry_point: u32` (`u32::MAX` when empty) |
//! | 24 | `seed: u64` |
//! | 32 | `layer_table_offset: u64` |
//! | 40 | `neighbors_offset: u64` |
//! | 48 | `id_map_offset: u64` (0 if absent) |
//! | 56 | padding to 64 |
//!
//! The vector region sits at offset 64 (`N * d` f32 values). The layer
//! table holds one 8-byte entry per node: `neighbor_offset: u32` (relative
//! to the neighbor heap) and `level_count: u8`. The heap stores, per node
//! and per level, `count: u16` followed by `count` u32 neighbor ids. The
//! optional id map is a dense `u64` per vector. Region starts are 8-byte
//! aligned.

use mempack_core::{MemPackError, MemPackResult};

use crate::hnsw::HnswIndex;

/// ANN file magic.
pub const ANN_MAGIC: [u8; 4] = *b"MPAN";
/// Current `.ann` format version.
pub const ANN_VERSION: u16 = 1;
/// Algorithm tag for HNSW.
pub const ALGO_HNSW: u8 = 1;
/// Metric tag for cosine distance on normalized vectors.
pub const METRIC_COSINE: u8 = 1;
/// Fixed header length.
pub const ANN_HEADER_LEN: usize = 64;

/// Encoded length of one layer table entry.
pub const LAYER_ENTRY_LEN: usize = 8;

/// Decoded header fields.
#[derive(Debug, Clone, Copy)]
pub struct AnnHeader {
    pub dim: u32,
    pub count: u32,
    pub m: u16,
    pub ef_construction: u16,
    pub entry_point: u32,
    pub seed: u64,
    pub layer_table_offset: u64,
    pub neighbors_offset: u64,
    pub id_map_offset: u64,
}

/// Serialize an index (and optional vector→chunk id map) to `.ann` bytes.
///
/// Pass `id_map` only when vector ids do not equal chunk ids; an identity
/// map is omitted from the file entirely.
pub fn encode_ann(index: &HnswIndex, id_map: Option<&[u64]>) -> MemPackResult<Vec<u8>> {
    let n = index.len();
    if let Some(map) = id_map {
        if map.len() != n {
            return Err(MemPackError::AnnCorrupt {
                reason: format!("id map holds {} entries for {} vectors", map.len(), n),
            });
        }
    }

    // Neighbor heap plus per-node layer entries.
    let mut heap: Vec<u8> = Vec::new();
    let mut layer_table = Vec::with_capacity(n * LAYER_ENTRY_LEN);
    for id in 0..n as u32 {
        let offset = u32::try_from(heap.len()).map_err(|_| MemPackError::AnnCorrupt {
            reason: "neighbor heap exceeds 4 GiB".to_string(),
        })?;
        let level_count = index.level_of(id) + 1;
        layer_table.extend_from_slice(&offset.to_le_bytes());
        layer_table.push(level_count);
        layer_table.extend_from_slice(&[0u8; 3]);
        for level in 0..level_count {
            let neighbors = index.neighbors_of(id, level);
            heap.extend_from_slice(&(neighbors.len() as u16).to_le_bytes());
            for &neighbor in neighbors {
                heap.extend_from_slice(&neighbor.to_le_bytes());
            }
        }
    }

    let vectors_len = n * index.dim() * 4;
    let layer_table_offset = align8(ANN_HEADER_LEN + vectors_len);
    let neighbors_offset = align8(layer_table_offset + layer_table.len());
    let id_map_offset = match id_map {
        Some(_) => align8(neighbors_offset + heap.len()),
        None => 0,
    };
    let total = match id_map {
        Some(map) => id_map_offset + map.len() * 8,
        None => neighbors_offset + heap.len(),
    };

    let mut buf = Vec::with_capacity(total);
    buf.extend_from_slice(&ANN_MAGIC);
    buf.extend_from_slice(&ANN_VERSION.to_le_bytes());
    buf.push(ALGO_HNSW);
    buf.extend_from_slice(&(index.dim() as u32).to_le_bytes());
    buf.extend_from_slice(&(n as u32).to_le_bytes());
    buf.extend_from_slice(&(index.m() as u16).to_le_bytes());
    buf.extend_from_slice(&(index.ef_construction() as u16).to_le_bytes());
    buf.push(METRIC_COSINE);
    buf.extend_from_slice(&index.entry_point().unwrap_or(u32::MAX).to_le_bytes());
    buf.extend_from_slice(&index.seed().to_le_bytes());
    buf.extend_from_slice(&(layer_table_offset as u64).to_le_bytes());
    buf.extend_from_slice(&(neighbors_offset as u64).to_le_bytes());
    buf.extend_from_slice(&(id_map_offset as u64).to_le_bytes());
    buf.resize(ANN_HEADER_LEN, 0);

    for id in 0..n as u32 {
        for &value in index.vector(id) {
            buf.extend_from_slice(&value.to_le_bytes());
        }
    }
    buf.resize(layer_table_offset, 0);
    buf.extend_from_slice(&layer_table);
    buf.resize(neighbors_offset, 0);
    buf.extend_from_slice(&heap);
    if let Some(map) = id_map {
        buf.resize(id_map_offset, 0);
        for &chunk_id in map {
            buf.extend_from_slice(&chunk_id.to_le_bytes());
        }
    }
    Ok(buf)
}

/// Parse and structurally validate the header against the file length.
pub fn parse_ann_header(bytes: &[u8]) -> MemPackResult<AnnHeader> {
    if bytes.len() < ANN_HEADER_LEN {
        return Err(ann_corrupt("file shorter than header"));
    }
    if bytes[0..4] != ANN_MAGIC {
        return Err(MemPackError::BadMagic {
            expected: ANN_MAGIC,
            found: [bytes[0], bytes[1], bytes[2], bytes[3]],
        });
    }
    let version = u16::from_le_bytes([bytes[4], bytes[5]]);
    if version > ANN_VERSION {
        return Err(MemPackError::UnsupportedVersion {
            found: version,
            supported: ANN_VERSION,
        });
    }
    if bytes[6] != ALGO_HNSW {
        return Err(ann_corrupt("unknown algorithm tag"));
    }
    if bytes[19] != METRIC_COSINE {
        return Err(ann_corrupt("unknown metric tag"));
    }

    let header = AnnHeader {
        dim: u32::from_le_bytes(bytes[7..11].try_into().expect("fixed")),
        count: u32::from_le_bytes(bytes[11..15].try_into().expect("fixed")),
        m: u16::from_le_bytes(bytes[15..17].try_into().expect("fixed")),
        ef_construction: u16::from_le_bytes(bytes[17..19].try_into().expect("fixed")),
        entry_point: u32::from_le_bytes(bytes[20..24].try_into().expect("fixed")),
        seed: u64::from_le_bytes(bytes[24..32].try_into().expect("fixed")),
        layer_table_offset: u64::from_le_bytes(bytes[32..40].try_into().expect("fixed")),
        neighbors_offset: u64::from_le_bytes(bytes[40..48].try_into().expect("fixed")),
        id_map_offset: u64::from_le_bytes(bytes[48..56].try_into().expect("fixed")),
    };

    let n = header.count as usize;
    let vectors_end = ANN_HEADER_LEN + n * header.dim as usize * 4;
    let lt = header.layer_table_offset as usize;
    let nb = header.neighbors_offset as usize;
    if lt < vectors_end || nb < lt + n * LAYER_ENTRY_LEN || nb > bytes.len() {
        return Err(ann_corrupt("region offsets out of order"));
    }
    if header.id_map_offset != 0 {
        let im = header.id_map_offset as usize;
        if im < nb || im + n * 8 > bytes.len() {
            return Err(ann_corrupt("id map outside file"));
        }
    }
    if n > 0 && header.entry_point as usize >= n {
        return Err(ann_corrupt("entry point out of range"));
    }
    if header.dim == 0 && n > 0 {
        return Err(ann_corrupt("zero dimension"));
    }
    Ok(header)
}

fn align8(offset: usize) -> usize {
    (offset + 7) & !7
}

fn ann_corrupt(reason: &str) -> MemPackError {
    MemPackError::AnnCorrupt {
        reason: reason.to_string(),
    }
}
