//! Error types shared across the MemPack workspace.
//!
//! Errors are designed for fail-fast debugging with descriptive messages.

use thiserror::Error;

/// Comprehensive error type for all MemPack operations.
///
/// # Error Categories
///
/// | Category | Variants | Policy |
/// |----------|----------|--------|
/// | Open | BadMagic, UnsupportedVersion, HeaderCorrupt, FooterCorrupt | Fatal at open |
/// | Block | BlockCorrupt, ChunkUnavailable, EccUnrecoverable, Decompress | Repair via ECC, else poison |
/// | Index | AnnCorrupt, DimensionMismatch | Fatal at open / per call |
/// | Runtime | Io, EmbedBackend, Timeout, InvalidConfig | Propagate to caller |
#[derive(Debug, Error)]
pub enum MemPackError {
    /// File I/O failure (open, read, write, rename).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// File does not start with the expected magic bytes.
    #[error("Bad magic: expected {expected:?}, found {found:?}")]
    BadMagic { expected: [u8; 4], found: [u8; 4] },

    /// Format version is newer than this reader understands.
    #[error("Unsupported format version {found} (max supported {supported})")]
    UnsupportedVersion { found: u16, supported: u16 },

    /// Header failed structural validation.
    #[error("Header corrupt: {reason}")]
    HeaderCorrupt { reason: String },

    /// Footer checksum or section table mismatch.
    #[error("Footer corrupt: {reason}")]
    FooterCorrupt { reason: String },

    /// A block's compressed payload failed its checksum and could not be repaired.
    #[error("Block {block_id} corrupt")]
    BlockCorrupt { block_id: u32 },

    /// The chunk resides in a poisoned (unrecoverable) block.
    #[error("Chunk {chunk_id} unavailable: containing block is corrupt")]
    ChunkUnavailable { chunk_id: u64 },

    /// An ECC group lost more shards than its parity can restore.
    #[error("ECC group {group_id} unrecoverable: {intact} of {needed} required shards intact")]
    EccUnrecoverable {
        group_id: u32,
        intact: usize,
        needed: usize,
    },

    /// Decompression failed (truncated or malformed stream).
    #[error("Decompression failed for block {block_id}: {reason}")]
    DecompressError { block_id: u32, reason: String },

    /// The `.ann` file failed structural validation.
    #[error("ANN index corrupt: {reason}")]
    AnnCorrupt { reason: String },

    /// Query or vector dimension does not match the index.
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// The embedding backend reported a failure; propagated verbatim.
    #[error("Embedding backend '{backend}' failed: {message}")]
    EmbedBackend { backend: String, message: String },

    /// The call's deadline expired before completion.
    #[error("Operation timed out")]
    Timeout,

    /// Configuration failed validation.
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },
}

/// Result type alias for MemPack operations.
pub type MemPackResult<T> = Result<T, MemPackError>;

impl MemPackError {
    /// True for errors that indicate on-disk corruption rather than misuse.
    #[must_use]
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            Self::BadMagic { .. }
                | Self::HeaderCorrupt { .. }
                | Self::FooterCorrupt { .. }
                | Self::BlockCorrupt { .. }
                | Self::ChunkUnavailable { .. }
                | Self::EccUnrecoverable { .. }
                | Self::DecompressError { .. }
                | Self::AnnCorrupt { .. }
        )
    }
}
