//! Build and runtime configuration.
//!
//! All sections carry serde derives: the build-time subset is persisted
//! verbatim into the pack's CNFG section so a reader can recover the exact
//! parameters a pack was built with.

use serde::{Deserialize, Serialize};

use crate::error::{MemPackError, MemPackResult};

/// Block compression codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressorKind {
    /// Identity; payload stored as-is.
    None,
    /// Raw DEFLATE stream.
    Deflate,
    /// Zstandard framed format with embedded content size.
    Zstd,
}

impl Default for CompressorKind {
    fn default() -> Self {
        Self::Zstd
    }
}

/// Text chunking parameters, in characters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    /// Target chunk length.
    pub chunk_size: usize,
    /// Characters shared with the previous chunk.
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 300,
            chunk_overlap: 50,
        }
    }
}

/// HNSW construction and search knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HnswParams {
    /// Max neighbors per node per layer (level 0 allows 2M).
    #[serde(rename = "M")]
    pub m: usize,
    /// Beam width during construction.
    pub ef_construction: usize,
    /// Default beam width at query time.
    pub ef_search: usize,
    /// Level-generation seed; fixed so builds are reproducible.
    pub seed: u64,
}

impl Default for HnswParams {
    fn default() -> Self {
        Self {
            m: 32,
            ef_construction: 200,
            ef_search: 64,
            seed: 0x6d70_616e, // "mpan"
        }
    }
}

/// ANN index selection. HNSW is the only algorithm in format version 1.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexConfig {
    pub hnsw: HnswParams,
}

/// Reed–Solomon erasure-coding parameters.
///
/// Each group covers `k` consecutive data blocks with `m` parity shards;
/// any `k` of the `k + m` members reconstruct the group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EccParams {
    pub k: usize,
    pub m: usize,
}

/// Top-level MemPack configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemPackConfig {
    /// Block codec.
    pub compressor: CompressorKind,
    /// Chunking parameters.
    pub chunking: ChunkingConfig,
    /// ANN index parameters.
    pub index: IndexConfig,
    /// Optional erasure coding; `None` disables the ECCG section.
    pub ecc: Option<EccParams>,
    /// Target uncompressed block size in bytes.
    pub block_size: usize,
    /// Max resident decompressed blocks in the read cache.
    pub block_cache_size: usize,
    /// Max blocks decoded per prefetch batch.
    pub io_batch_size: usize,
    /// Chunks per embedding batch during build.
    pub embed_batch_size: usize,
    /// Read via memory mapping; positioned I/O when false.
    pub mmap: bool,
    /// Enable batched block lookahead on the read path.
    pub prefetch: bool,
}

impl Default for MemPackConfig {
    fn default() -> Self {
        Self {
            compressor: CompressorKind::default(),
            chunking: ChunkingConfig::default(),
            index: IndexConfig::default(),
            ecc: None,
            block_size: 64 * 1024,
            block_cache_size: 1024,
            io_batch_size: 16,
            embed_batch_size: 64,
            mmap: true,
            prefetch: true,
        }
    }
}

impl MemPackConfig {
    /// Validate the configuration. Fails fast with `InvalidConfig`.
    pub fn validate(&self) -> MemPackResult<()> {
        if self.chunking.chunk_size == 0 {
            return Err(invalid("chunk_size cannot be 0"));
        }
        if self.chunking.chunk_overlap >= self.chunking.chunk_size {
            return Err(invalid("chunk_overlap must be smaller than chunk_size"));
        }
        if self.block_size == 0 {
            return Err(invalid("block_size cannot be 0"));
        }
        if self.block_cache_size == 0 {
            return Err(invalid("block_cache_size cannot be 0"));
        }
        if self.io_batch_size == 0 {
            return Err(invalid("io_batch_size cannot be 0"));
        }
        if self.embed_batch_size == 0 {
            return Err(invalid("embed_batch_size cannot be 0"));
        }
        if self.index.hnsw.m < 2 {
            return Err(invalid("index.hnsw.M must be at least 2"));
        }
        if self.index.hnsw.ef_construction < self.index.hnsw.m {
            return Err(invalid("index.hnsw.ef_construction must be >= M"));
        }
        if self.index.hnsw.ef_search == 0 {
            return Err(invalid("index.hnsw.ef_search cannot be 0"));
        }
        if let Some(ecc) = self.ecc {
            if ecc.k == 0 || ecc.m == 0 {
                return Err(invalid("ecc.k and ecc.m must both be nonzero"));
            }
            // GF(2^8) Vandermonde rows are distinct only below the field size.
            if ecc.k + ecc.m > 255 {
                return Err(invalid("ecc.k + ecc.m must not exceed 255"));
            }
        }
        Ok(())
    }
}

fn invalid(message: &str) -> MemPackError {
    MemPackError::InvalidConfig {
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(MemPackConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_overlap_not_smaller_than_size() {
        let mut config = MemPackConfig::default();
        config.chunking.chunk_size = 50;
        config.chunking.chunk_overlap = 50;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_oversized_ecc_group() {
        let mut config = MemPackConfig::default();
        config.ecc = Some(EccParams { k: 200, m: 60 });
        assert!(config.validate().is_err());
    }

    #[test]
    fn compressor_serde_names_are_lowercase() {
        let json = serde_json::to_string(&CompressorKind::Zstd).unwrap();
        assert_eq!(json, "\"zstd\"");
        let back: CompressorKind = serde_json::from_str("\"deflate\"").unwrap();
        assert_eq!(back, CompressorKind::Deflate);
    }
}
