//! `mempack build`: pack input files into a `.mpack`/`.ann` pair.

use std::path::PathBuf;

use clap::Args;
use tracing::info;

use mempack::{
    ChunkMeta, CompressorKind, EccParams, HashingEmbedder, MemPackConfig, MemPackEncoder,
    MemPackResult,
};

use super::pack_paths;

#[derive(Args)]
pub struct BuildArgs {
    /// Input text files; each becomes one document with meta.source set
    #[arg(required = true)]
    pub inputs: Vec<PathBuf>,

    /// Output base path (writes <out>.mpack and <out>.ann)
    #[arg(short, long)]
    pub out: PathBuf,

    /// Block codec
    #[arg(long, value_parser = parse_compressor, default_value = "zstd")]
    pub compressor: CompressorKind,

    /// Target chunk length in characters
    #[arg(long, default_value_t = 300)]
    pub chunk_size: usize,

    /// Characters shared with the previous chunk
    #[arg(long, default_value_t = 50)]
    pub chunk_overlap: usize,

    /// Embedding dimension for the built-in hashing embedder
    #[arg(long, default_value_t = 256)]
    pub dim: usize,

    /// Enable Reed-Solomon erasure coding as k,m (e.g. 4,2)
    #[arg(long, value_parser = parse_ecc)]
    pub ecc: Option<EccParams>,
}

pub fn run(args: BuildArgs) -> MemPackResult<i32> {
    let mut config = MemPackConfig::default();
    config.compressor = args.compressor;
    config.chunking.chunk_size = args.chunk_size;
    config.chunking.chunk_overlap = args.chunk_overlap;
    config.ecc = args.ecc;

    let mut encoder = MemPackEncoder::new(config)?;
    for input in &args.inputs {
        let text = std::fs::read_to_string(input)?;
        let name = input
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| input.display().to_string());
        encoder.add_document(&name, text, ChunkMeta::new());
        info!(input = %input.display(), "added document");
    }

    let (pack_path, ann_path) = pack_paths(&args.out);
    let backend = HashingEmbedder::new(args.dim);
    let stats = encoder.build(&backend, &pack_path, &ann_path)?;

    println!("built {} and {}", pack_path.display(), ann_path.display());
    println!(
        "  chunks: {}  blocks: {}  vectors: {}",
        stats.chunks, stats.blocks, stats.vectors
    );
    println!(
        "  bytes: {}  compression: {:.2}x  build: {:.1} ms (embedding {:.1} ms)",
        stats.bytes_written, stats.compression_ratio, stats.build_time_ms, stats.embedding_time_ms
    );
    Ok(0)
}

fn parse_compressor(value: &str) -> Result<CompressorKind, String> {
    match value {
        "none" => Ok(CompressorKind::None),
        "deflate" => Ok(CompressorKind::Deflate),
        "zstd" => Ok(CompressorKind::Zstd),
        other => Err(format!("unknown compressor '{other}'")),
    }
}

fn parse_ecc(value: &str) -> Result<EccParams, String> {
    let (k, m) = value
        .split_once(',')
        .ok_or_else(|| "expected k,m".to_string())?;
    let params = EccParams {
        k: k.trim().parse().map_err(|_| "invalid k".to_string())?,
        m: m.trim().parse().map_err(|_| "invalid m".to_string())?,
    };
    if params.k == 0 || params.m == 0 {
        return Err("k and m must be nonzero".to_string());
    }
    Ok(params)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compressor_names_parse() {
        assert_eq!(parse_compressor("zstd").unwrap(), CompressorKind::Zstd);
        assert_eq!(parse_compressor("none").unwrap(), CompressorKind::None);
        assert_eq!(
            parse_compressor("deflate").unwrap(),
            CompressorKind::Deflate
        );
        assert!(parse_compressor("lz4").is_err());
    }

    #[test]
    fn ecc_pairs_parse() {
        assert_eq!(parse_ecc("4,2").unwrap(), EccParams { k: 4, m: 2 });
        assert_eq!(parse_ecc(" 8 , 3 ").unwrap(), EccParams { k: 8, m: 3 });
        assert!(parse_ecc("4").is_err());
        assert!(parse_ecc("0,2").is_err());
        assert!(parse_ecc("4,x").is_err());
    }
}
