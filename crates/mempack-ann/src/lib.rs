//! HNSW approximate-nearest-neighbor indexing for MemPack.
//!
//! - **hnsw**: the in-memory graph builder with seeded, reproducible
//!   construction and an exact `(distance asc, id asc)` result order
//! - **layout**: the `.ann` header and region framing
//! - **reader**: zero-copy mmap search over a persisted graph

pub mod hnsw;
pub mod layout;
pub mod reader;

pub use hnsw::HnswIndex;
pub use layout::{encode_ann, ANN_MAGIC, ANN_VERSION};
pub use reader::AnnReader;
