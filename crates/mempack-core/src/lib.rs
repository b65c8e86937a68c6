//! Core types for MemPack knowledge packs.
//!
//! This crate carries everything the container and index crates share:
//!
//! - **error**: the `MemPackError` enum used across the workspace
//! - **config**: build and runtime configuration with fail-fast validation
//! - **meta**: the restricted tagged metadata model and its TLV codec
//! - **types**: chunks, search hits, build/retriever statistics, deadlines
//! - **chunker**: the deterministic sliding-window text splitter
//! - **embed**: the pluggable embedding backend seam
//! - **util**: checksums and atomic file publication

pub mod chunker;
pub mod config;
pub mod embed;
pub mod error;
pub mod meta;
pub mod types;
pub mod util;

pub use chunker::{chunk_text, normalize_text};
pub use config::{
    ChunkingConfig, CompressorKind, EccParams, HnswParams, IndexConfig, MemPackConfig,
};
pub use embed::{l2_normalize, EmbeddingBackend, HashingEmbedder};
pub use error::{MemPackError, MemPackResult};
pub use meta::{ChunkMeta, MetaValue};
pub use types::{BuildStats, Chunk, Deadline, RetrieverStats, SearchHit};
