//! Bounded LRU cache of decompressed blocks.
//!
//! The cache is the only shared mutable state on the read path. Entries are
//! `Arc<Vec<u8>>` decompressed payloads keyed by block id; eviction pops the
//! least recently used entry. A pending-insertion table coalesces concurrent
//! misses on the same block so the verify-and-decompress work runs exactly
//! once; followers block on a condvar and pick the published entry up on
//! wake. Every resident entry was checksum-verified before insertion.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use linked_hash_map::LinkedHashMap;
use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, warn};

use mempack_core::util::xxh3;
use mempack_core::{MemPackError, MemPackResult};

use crate::compress;
use crate::reader::PackReader;

/// Snapshot of cache counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub resident: usize,
}

struct PendingBlock {
    done: Mutex<bool>,
    cv: Condvar,
}

impl PendingBlock {
    fn new() -> Self {
        Self {
            done: Mutex::new(false),
            cv: Condvar::new(),
        }
    }
}

/// LRU cache with per-key miss coalescing.
pub struct BlockCache {
    capacity: usize,
    entries: Mutex<LinkedHashMap<u32, Arc<Vec<u8>>>>,
    pending: Mutex<HashMap<u32, Arc<PendingBlock>>>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl BlockCache {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: Mutex::new(LinkedHashMap::new()),
            pending: Mutex::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Fetch `block_id`, running `load` at most once across concurrent
    /// callers. A successful load is published atomically: the entry is
    /// inserted fully decompressed before any waiter wakes.
    pub fn get_or_load<F>(&self, block_id: u32, load: F) -> MemPackResult<Arc<Vec<u8>>>
    where
        F: Fn() -> MemPackResult<Vec<u8>>,
    {
        loop {
            if let Some(entry) = self.entries.lock().get_refresh(&block_id) {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(entry.clone());
            }

            let (slot, is_leader) = {
                let mut pending = self.pending.lock();
                match pending.get(&block_id) {
                    Some(slot) => (slot.clone(), false),
                    None => {
                        let slot = Arc::new(PendingBlock::new());
                        pending.insert(block_id, slot.clone());
                        (slot, true)
                    }
                }
            };

            if is_leader {
                self.misses.fetch_add(1, Ordering::Relaxed);
                let result = load();
                let published = result.map(|bytes| {
                    let entry = Arc::new(bytes);
                    let mut entries = self.entries.lock();
                    entries.insert(block_id, entry.clone());
                    while entries.len() > self.capacity {
                        entries.pop_front();
                        self.evictions.fetch_add(1, Ordering::Relaxed);
                    }
                    entry
                });
                // Wake followers only after the entry is resident (or the
                // load has definitively failed).
                self.pending.lock().remove(&block_id);
                *slot.done.lock() = true;
                slot.cv.notify_all();
                return published;
            }

            let mut done = slot.done.lock();
            while !*done {
                slot.cv.wait(&mut done);
            }
            // Retry: on leader success this is a hit; on leader failure this
            // caller takes over the load.
        }
    }

    /// True when the block is resident (does not touch LRU order).
    #[must_use]
    pub fn contains(&self, block_id: u32) -> bool {
        self.entries.lock().contains_key(&block_id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resident block ids in LRU order, oldest first. Test hook.
    #[must_use]
    pub fn resident_ids(&self) -> Vec<u32> {
        self.entries.lock().keys().copied().collect()
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            resident: self.len(),
        }
    }
}

/// The full read path for block payloads: compressed fetch, checksum
/// verification, ECC repair, decompression, caching, batched prefetch.
pub struct CachedBlockReader {
    reader: Arc<PackReader>,
    cache: BlockCache,
    io_batch_size: usize,
    prefetch_enabled: bool,
}

impl CachedBlockReader {
    #[must_use]
    pub fn new(
        reader: Arc<PackReader>,
        cache_capacity: usize,
        io_batch_size: usize,
        prefetch: bool,
    ) -> Self {
        Self {
            reader,
            cache: BlockCache::new(cache_capacity),
            io_batch_size: io_batch_size.max(1),
            prefetch_enabled: prefetch,
        }
    }

    #[must_use]
    pub fn reader(&self) -> &Arc<PackReader> {
        &self.reader
    }

    #[must_use]
    pub fn cache(&self) -> &BlockCache {
        &self.cache
    }

    /// The decompressed payload of `block_id`, through the cache.
    pub fn block(&self, block_id: u32) -> MemPackResult<Arc<Vec<u8>>> {
        self.cache
            .get_or_load(block_id, || self.load_block(block_id))
    }

    /// The text slice of `chunk_id`, decompressing its block as needed.
    /// Corrupt blocks surface as `ChunkUnavailable`.
    pub fn chunk_text(&self, chunk_id: u64) -> MemPackResult<String> {
        let entry = self.reader.chunk_entry(chunk_id)?;
        let block = self.block(entry.block_id).map_err(|e| match e {
            MemPackError::BlockCorrupt { .. }
            | MemPackError::EccUnrecoverable { .. }
            | MemPackError::DecompressError { .. } => MemPackError::ChunkUnavailable { chunk_id },
            other => other,
        })?;
        let start = entry.offset_in_block as usize;
        let end = start + entry.length as usize;
        if end > block.len() {
            return Err(MemPackError::ChunkUnavailable { chunk_id });
        }
        String::from_utf8(block[start..end].to_vec())
            .map_err(|_| MemPackError::ChunkUnavailable { chunk_id })
    }

    /// Batched lookahead: decode the given blocks in adjacent-id runs of at
    /// most `io_batch_size`. Failures are skipped here; the per-chunk path
    /// reports them.
    pub fn prefetch(&self, block_ids: &[u32]) {
        if !self.prefetch_enabled || block_ids.is_empty() {
            return;
        }
        let mut ids: Vec<u32> = block_ids.to_vec();
        ids.sort_unstable();
        ids.dedup();

        // Group adjacent ids so one batch touches one contiguous file range.
        let mut batch: Vec<u32> = Vec::new();
        for id in ids {
            let adjacent = batch.last().is_some_and(|&last| id == last + 1);
            if !batch.is_empty() && (!adjacent || batch.len() >= self.io_batch_size) {
                self.prefetch_run(&batch);
                batch.clear();
            }
            batch.push(id);
        }
        self.prefetch_run(&batch);
    }

    fn prefetch_run(&self, run: &[u32]) {
        for &block_id in run {
            if self.cache.contains(block_id) {
                continue;
            }
            if let Err(err) = self.block(block_id) {
                debug!(block_id, %err, "prefetch skipped block");
            }
        }
    }

    /// Verify-and-decompress miss path, attempting ECC repair on checksum
    /// failure.
    fn load_block(&self, block_id: u32) -> MemPackResult<Vec<u8>> {
        if self.reader.is_poisoned(block_id) {
            return Err(MemPackError::BlockCorrupt { block_id });
        }
        let entry = self.reader.block_entry(block_id)?;
        let expected = self.reader.block_checksum(block_id)?;
        let payload = self.reader.block_compressed_bytes(block_id)?;

        let compressor = self.reader.info().compressor;
        if xxh3(&payload) == expected {
            return compress::decompress(
                compressor,
                block_id,
                &payload,
                entry.uncompressed_size as usize,
            );
        }
        drop(payload);
        warn!(block_id, "block checksum mismatch, attempting repair");

        let Some(ecc) = self.reader.ecc() else {
            self.reader.poison(block_id);
            return Err(MemPackError::BlockCorrupt { block_id });
        };

        let reader = &self.reader;
        let provider = |member: u32| -> Option<Vec<u8>> {
            let bytes = reader.block_compressed_bytes(member).ok()?;
            let checksum = reader.block_checksum(member).ok()?;
            (xxh3(&bytes) == checksum).then(|| bytes.into_owned())
        };
        let padded = match ecc.repair_block(block_id, &provider) {
            Ok(padded) => padded,
            Err(err) => {
                self.reader.poison(block_id);
                warn!(block_id, %err, "block unrecoverable");
                return Err(MemPackError::BlockCorrupt { block_id });
            }
        };
        let repaired = &padded[..entry.compressed_size as usize];
        if xxh3(repaired) != expected {
            self.reader.poison(block_id);
            return Err(MemPackError::BlockCorrupt { block_id });
        }
        info!(block_id, "block recovered via ECC");
        compress::decompress(
            compressor,
            block_id,
            repaired,
            entry.uncompressed_size as usize,
        )
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }
}
