//! `mempack info`: header, section, and configuration details.

use std::path::PathBuf;

use clap::Args;

use mempack::MemPackResult;
use mempack_ann::AnnReader;
use mempack_pack::{PackReader, ReadOptions};

use super::pack_paths;

#[derive(Args)]
pub struct InfoArgs {
    /// Pack base path (reads <base>.mpack and <base>.ann)
    pub base: PathBuf,
}

pub fn run(args: InfoArgs) -> MemPackResult<i32> {
    let (pack_path, ann_path) = pack_paths(&args.base);
    let reader = PackReader::open(&pack_path, ReadOptions::default())?;
    let info = reader.info();

    println!("pack: {}", pack_path.display());
    println!("  format version: {}", info.format_version);
    println!("  compressor: {:?}", info.compressor);
    println!(
        "  chunking: size {} overlap {}",
        info.chunk_size, info.chunk_overlap
    );
    println!(
        "  embedding: {} (dim {})",
        info.embedding_model, info.embedding_dim
    );
    match info.ecc {
        Some(params) => println!("  ecc: k={} m={}", params.k, params.m),
        None => println!("  ecc: disabled"),
    }
    println!("  chunks: {}", reader.chunk_count());
    println!("  blocks: {}", reader.block_count());

    println!("  sections:");
    for section in reader.sections() {
        println!(
            "    {}  offset {:>8}  length {:>8}",
            String::from_utf8_lossy(&section.tag),
            section.offset,
            section.length
        );
    }

    let ann = AnnReader::open(&ann_path)?;
    println!("ann: {}", ann_path.display());
    println!(
        "  vectors: {}  dim: {}  M: {}  efConstruction: {}  id map: {}",
        ann.len(),
        ann.dim(),
        ann.header().m,
        ann.header().ef_construction,
        if ann.has_id_map() { "explicit" } else { "identity" }
    );
    Ok(0)
}
