//! Block codecs: identity, raw DEFLATE, and Zstandard.
//!
//! Compression failures are fatal at build time; decompression failures
//! surface as `DecompressError` with the offending block id so the read path
//! can route into ECC repair. Every decoder verifies the decoded length
//! against the TOC's uncompressed size, which catches truncated streams for
//! all three codecs.

use std::io::{Read, Write};

use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;

use mempack_core::{CompressorKind, MemPackError, MemPackResult};

/// Zstd level used for all packs. Fixed so builds are reproducible across
/// machines with the same library version.
const ZSTD_LEVEL: i32 = 3;

/// Compress a block payload with the selected codec.
pub fn compress(kind: CompressorKind, data: &[u8]) -> MemPackResult<Vec<u8>> {
    match kind {
        CompressorKind::None => Ok(data.to_vec()),
        CompressorKind::Deflate => {
            let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(data)?;
            Ok(encoder.finish()?)
        }
        CompressorKind::Zstd => zstd::bulk::compress(data, ZSTD_LEVEL).map_err(MemPackError::Io),
    }
}

/// Decompress a block payload, verifying the expected uncompressed size.
pub fn decompress(
    kind: CompressorKind,
    block_id: u32,
    data: &[u8],
    uncompressed_size: usize,
) -> MemPackResult<Vec<u8>> {
    let out = match kind {
        CompressorKind::None => data.to_vec(),
        CompressorKind::Deflate => {
            let mut decoder = DeflateDecoder::new(data);
            let mut out = Vec::with_capacity(uncompressed_size);
            decoder
                .read_to_end(&mut out)
                .map_err(|e| decompress_error(block_id, &e.to_string()))?;
            out
        }
        CompressorKind::Zstd => zstd::bulk::decompress(data, uncompressed_size)
            .map_err(|e| decompress_error(block_id, &e.to_string()))?,
    };
    if out.len() != uncompressed_size {
        return Err(decompress_error(
            block_id,
            &format!(
                "decoded {} bytes, expected {} (truncated stream)",
                out.len(),
                uncompressed_size
            ),
        ));
    }
    Ok(out)
}

fn decompress_error(block_id: u32, reason: &str) -> MemPackError {
    MemPackError::DecompressError {
        block_id,
        reason: reason.to_string(),
    }
}
