//! Command handlers. Each returns the process exit code on success.

pub mod build;
pub mod export;
pub mod info;
pub mod search;
pub mod verify;

use std::path::{Path, PathBuf};

use mempack::{HashingEmbedder, MemPackRetriever, MemPackResult, RetrieverOptions};
use mempack_pack::{PackReader, ReadOptions};

/// Resolve `<base>` into the `.mpack`/`.ann` pair.
pub fn pack_paths(base: &Path) -> (PathBuf, PathBuf) {
    (base.with_extension("mpack"), base.with_extension("ann"))
}

/// Open a retriever over `<base>`, wiring the deterministic offline embedder
/// at the dimension recorded in the pack's config section.
pub fn open_retriever(base: &Path, mmap: bool) -> MemPackResult<MemPackRetriever> {
    let (pack, ann) = pack_paths(base);
    let dim = {
        let reader = PackReader::open(&pack, ReadOptions { mmap })?;
        reader.info().embedding_dim as usize
    };
    MemPackRetriever::open(
        &pack,
        &ann,
        Box::new(HashingEmbedder::new(dim)),
        RetrieverOptions {
            mmap,
            ..RetrieverOptions::default()
        },
    )
}
