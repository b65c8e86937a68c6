//! Small shared utilities: checksums and atomic file publication.

use std::fs;
use std::io::Write;
use std::path::Path;

use crate::error::MemPackResult;

/// XXH3 64-bit hash, the checksum used throughout the pack format.
#[must_use]
pub fn xxh3(data: &[u8]) -> u64 {
    xxhash_rust::xxh3::xxh3_64(data)
}

/// Write `data` to `path` atomically: write a sibling temp file, fsync, then
/// rename over the destination. Readers never observe a partial file.
pub fn atomic_write(path: &Path, data: &[u8]) -> MemPackResult<()> {
    let tmp_path = path.with_extension("tmp");
    {
        let mut file = fs::File::create(&tmp_path)?;
        file.write_all(data)?;
        file.sync_all()?;
    }
    fs::rename(&tmp_path, path)?;
    Ok(())
}
