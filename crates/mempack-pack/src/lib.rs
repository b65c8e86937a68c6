//! The `.mpack` container format and its engines.
//!
//! A pack co-locates compressed text blocks, per-chunk and per-block tables
//! of contents, per-block XXH3 checksums, and optional Reed–Solomon parity
//! in a single immutable, memory-mappable file.
//!
//! - **layout**: magic/version/section framing and the footer checksum
//! - **toc**: chunk and block tables
//! - **compress**: the `none`/`deflate`/`zstd` block codecs
//! - **ecc**: GF(2^8) Reed–Solomon groups and the ECCG section
//! - **writer**: block assembly and section emission
//! - **reader**: validated open, mmap or positioned I/O, section access
//! - **cache**: bounded LRU of decompressed blocks with miss coalescing
//! - **verify**: full-pack walk with repair reporting

pub mod cache;
pub mod compress;
pub mod ecc;
pub mod layout;
pub mod reader;
pub mod toc;
pub mod verify;
pub mod writer;

pub use cache::{BlockCache, CacheStats, CachedBlockReader};
pub use layout::{PackInfo, SectionEntry, FORMAT_VERSION, PACK_MAGIC};
pub use reader::{PackReader, ReadOptions};
pub use toc::{BlockEntry, ChunkEntry};
pub use verify::{verify_pack, verify_pack_with, BlockStatus, VerifyReport};
pub use writer::{write_pack, PackSummary};
