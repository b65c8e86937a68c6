//! MemPack: portable, deterministic, memory-mappable knowledge packs.
//!
//! A pack is a pair of files: `.mpack` holds compressed text chunks with
//! integrity metadata, `.ann` holds an HNSW index over their embeddings.
//! [`MemPackEncoder`] builds the pair; [`MemPackRetriever`] opens it for
//! semantic search.
//!
//! ```no_run
//! use mempack::{MemPackEncoder, MemPackRetriever, RetrieverOptions};
//! use mempack_core::{ChunkMeta, HashingEmbedder, MemPackConfig};
//! # fn main() -> mempack_core::MemPackResult<()> {
//! let backend = HashingEmbedder::new(256);
//!
//! let mut encoder = MemPackEncoder::new(MemPackConfig::default())?;
//! encoder.add_document("notes.md", "Qubits hold superposition states.", ChunkMeta::new());
//! encoder.build(&backend, "kb.mpack".as_ref(), "kb.ann".as_ref())?;
//!
//! let retriever = MemPackRetriever::open(
//!     "kb.mpack".as_ref(),
//!     "kb.ann".as_ref(),
//!     Box::new(backend),
//!     RetrieverOptions::default(),
//! )?;
//! let _hits = retriever.search("superposition", 3)?;
//! # Ok(())
//! # }
//! ```

pub mod encoder;
pub mod retriever;

pub use encoder::MemPackEncoder;
pub use retriever::{verify_files, MemPackRetriever, RetrieverOptions};

pub use mempack_core::{
    BuildStats, Chunk, ChunkMeta, CompressorKind, Deadline, EccParams, EmbeddingBackend,
    HashingEmbedder, HnswParams, MemPackConfig, MemPackError, MemPackResult, MetaValue,
    RetrieverStats, SearchHit,
};
pub use mempack_pack::{VerifyReport, BlockStatus};
