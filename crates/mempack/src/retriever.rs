//! Query-time retrieval: the join between the ANN index and the pack.
//!
//! A search embeds the query, pulls an oversampled candidate list from the
//! HNSW index, translates vector ids to chunk ids, filters on metadata
//! straight out of the TOC (no block I/O), then batch-fetches the surviving
//! blocks through the LRU cache and slices the chunk texts out of the
//! decompressed buffers. Corrupt chunks are skipped and replaced from the
//! candidate queue; results are totally ordered by `(distance asc,
//! chunk_id asc)`, so identical queries return identical hits.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tracing::debug;

use mempack_ann::AnnReader;
use mempack_core::{
    l2_normalize, Chunk, Deadline, EmbeddingBackend, MemPackError, MemPackResult, MetaValue,
    RetrieverStats, SearchHit,
};
use mempack_pack::{verify_pack_with, CachedBlockReader, PackReader, ReadOptions, VerifyReport};

/// Runtime knobs for the read path.
#[derive(Debug, Clone)]
pub struct RetrieverOptions {
    /// HNSW beam width at query time.
    pub ef_search: usize,
    /// Max resident decompressed blocks.
    pub block_cache_size: usize,
    /// Max blocks per prefetch batch.
    pub io_batch_size: usize,
    /// Memory-map the pack; positioned I/O when false.
    pub mmap: bool,
    /// Enable batched block lookahead.
    pub prefetch: bool,
}

impl Default for RetrieverOptions {
    fn default() -> Self {
        let defaults = mempack_core::MemPackConfig::default();
        Self {
            ef_search: defaults.index.hnsw.ef_search,
            block_cache_size: defaults.block_cache_size,
            io_batch_size: defaults.io_batch_size,
            mmap: defaults.mmap,
            prefetch: defaults.prefetch,
        }
    }
}

/// An open `.mpack`/`.ann` pair ready for search.
///
/// Re-entrant: the underlying maps are immutable and the block cache is the
/// only shared mutable state, so `&self` methods may be called from many
/// threads at once.
pub struct MemPackRetriever {
    blocks: CachedBlockReader,
    ann: AnnReader,
    backend: Box<dyn EmbeddingBackend>,
    ef_search: usize,
    searches: AtomicU64,
    search_micros: AtomicU64,
}

impl MemPackRetriever {
    /// Open and cross-validate both files.
    pub fn open(
        pack_path: &Path,
        ann_path: &Path,
        backend: Box<dyn EmbeddingBackend>,
        options: RetrieverOptions,
    ) -> MemPackResult<Self> {
        let pack = Arc::new(PackReader::open(pack_path, ReadOptions { mmap: options.mmap })?);
        let ann = AnnReader::open(ann_path)?;

        if !ann.has_id_map() && u64::from(ann.len()) != pack.chunk_count() {
            return Err(MemPackError::AnnCorrupt {
                reason: format!(
                    "index holds {} vectors but pack holds {} chunks",
                    ann.len(),
                    pack.chunk_count()
                ),
            });
        }
        if ann.len() > 0 && backend.dim() != ann.dim() {
            return Err(MemPackError::DimensionMismatch {
                expected: ann.dim(),
                actual: backend.dim(),
            });
        }

        let blocks = CachedBlockReader::new(
            pack,
            options.block_cache_size,
            options.io_batch_size,
            options.prefetch,
        );
        Ok(Self {
            blocks,
            ann,
            backend,
            ef_search: options.ef_search.max(1),
            searches: AtomicU64::new(0),
            search_micros: AtomicU64::new(0),
        })
    }

    #[must_use]
    pub fn pack(&self) -> &Arc<PackReader> {
        self.blocks.reader()
    }

    #[must_use]
    pub fn ann(&self) -> &AnnReader {
        &self.ann
    }

    /// `search(query, top_k)` with no filter and no deadline.
    pub fn search(&self, query: &str, top_k: usize) -> MemPackResult<Vec<SearchHit>> {
        self.search_with(query, top_k, None, Deadline::none())
    }

    /// Full search: optional metadata equality filter and deadline.
    pub fn search_with(
        &self,
        query: &str,
        top_k: usize,
        filter_meta: Option<&[(String, MetaValue)]>,
        deadline: Deadline,
    ) -> MemPackResult<Vec<SearchHit>> {
        let started = Instant::now();
        let hits = self.search_inner(query, top_k, filter_meta, deadline)?;
        self.searches.fetch_add(1, Ordering::Relaxed);
        self.search_micros
            .fetch_add(started.elapsed().as_micros() as u64, Ordering::Relaxed);
        Ok(hits)
    }

    fn search_inner(
        &self,
        query: &str,
        top_k: usize,
        filter_meta: Option<&[(String, MetaValue)]>,
        deadline: Deadline,
    ) -> MemPackResult<Vec<SearchHit>> {
        if top_k == 0 {
            return Ok(Vec::new());
        }
        deadline.check()?;

        let mut encoded = self.backend.encode(&[query])?;
        let mut q = encoded.pop().ok_or_else(|| MemPackError::EmbedBackend {
            backend: self.backend.name().to_string(),
            message: "backend returned no vector for the query".to_string(),
        })?;
        if self.ann.len() > 0 && q.len() != self.ann.dim() {
            return Err(MemPackError::DimensionMismatch {
                expected: self.ann.dim(),
                actual: q.len(),
            });
        }
        l2_normalize(&mut q);
        deadline.check()?;

        // Oversample 2x when filtering so dropped candidates can be replaced.
        let mut ef = self.ef_search.max(top_k);
        if filter_meta.is_some() {
            ef = ef.max(top_k * 2);
        }
        let candidates = self.ann.search(&q, ef, ef)?;
        deadline.check()?;

        let pack = self.blocks.reader();
        let mut queue = candidates.into_iter();
        let mut pending: Vec<(u64, f32)> = Vec::new();
        let mut hits: Vec<(f32, SearchHit)> = Vec::new();

        // Waves: filter from the TOC, batch-prefetch, then extract; corrupt
        // chunks are dropped and the queue keeps feeding replacements.
        loop {
            deadline.check()?;
            pending.clear();
            while hits.len() + pending.len() < top_k {
                let Some((vector_id, dist)) = queue.next() else {
                    break;
                };
                let chunk_id = self.ann.chunk_id(vector_id);
                let Ok(entry) = pack.chunk_entry(chunk_id) else {
                    debug!(chunk_id, "candidate outside chunk table, skipped");
                    continue;
                };
                if pack.is_poisoned(entry.block_id) {
                    continue;
                }
                if let Some(filter) = filter_meta {
                    let meta = pack.chunk_meta(chunk_id)?;
                    if !meta.matches_all(filter) {
                        continue;
                    }
                }
                pending.push((chunk_id, dist));
            }
            if pending.is_empty() {
                break;
            }

            let block_ids: Vec<u32> = pending
                .iter()
                .filter_map(|&(chunk_id, _)| pack.chunk_entry(chunk_id).ok())
                .map(|entry| entry.block_id)
                .collect();
            self.blocks.prefetch(&block_ids);

            for &(chunk_id, dist) in &pending {
                deadline.check()?;
                match self.blocks.chunk_text(chunk_id) {
                    Ok(text) => {
                        let meta = pack.chunk_meta(chunk_id)?;
                        hits.push((
                            dist,
                            SearchHit {
                                chunk_id,
                                score: 1.0 - dist,
                                text,
                                meta,
                            },
                        ));
                    }
                    Err(MemPackError::ChunkUnavailable { .. }) => {
                        debug!(chunk_id, "chunk unavailable, pulling replacement");
                    }
                    Err(other) => return Err(other),
                }
            }
            if hits.len() >= top_k {
                break;
            }
        }

        hits.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.chunk_id.cmp(&b.1.chunk_id)));
        hits.truncate(top_k);
        Ok(hits.into_iter().map(|(_, hit)| hit).collect())
    }

    /// Search several queries, one result list per query, in order.
    pub fn search_batch(&self, queries: &[&str], top_k: usize) -> MemPackResult<Vec<Vec<SearchHit>>> {
        queries
            .iter()
            .map(|query| self.search(query, top_k))
            .collect()
    }

    /// Round-trip accessor: the exact chunk stored at build time.
    pub fn get_chunk_by_id(&self, chunk_id: u64) -> MemPackResult<Chunk> {
        let text = self.blocks.chunk_text(chunk_id)?;
        let meta = self.blocks.reader().chunk_meta(chunk_id)?;
        Ok(Chunk {
            id: chunk_id,
            text,
            meta,
        })
    }

    /// Walk every block and report integrity, attempting ECC repair.
    pub fn verify(&self) -> MemPackResult<VerifyReport> {
        self.verify_with(Deadline::none())
    }

    /// Deadline-aware verification walk.
    pub fn verify_with(&self, deadline: Deadline) -> MemPackResult<VerifyReport> {
        verify_pack_with(self.blocks.reader(), deadline)
    }

    #[must_use]
    pub fn stats(&self) -> RetrieverStats {
        let cache = self.blocks.stats();
        let searches = self.searches.load(Ordering::Relaxed);
        let micros = self.search_micros.load(Ordering::Relaxed);
        RetrieverStats {
            cache_hits: cache.hits,
            cache_misses: cache.misses,
            total_searches: searches,
            avg_search_ms: if searches > 0 {
                micros as f64 / searches as f64 / 1e3
            } else {
                0.0
            },
        }
    }
}

/// Verify a pack pair without opening a full retriever.
///
/// Validates the ANN header, cross-checks the vector count against the pack's
/// chunk count (or the id-map length when present), then walks every block
/// attempting ECC repair. No embedding backend is needed.
pub fn verify_files(pack_path: &Path, ann_path: &Path) -> MemPackResult<VerifyReport> {
    let pack = PackReader::open(pack_path, ReadOptions::default())?;
    let ann = AnnReader::open(ann_path)?;
    if !ann.has_id_map() && u64::from(ann.len()) != pack.chunk_count() {
        return Err(MemPackError::AnnCorrupt {
            reason: format!(
                "index holds {} vectors but pack holds {} chunks",
                ann.len(),
                pack.chunk_count()
            ),
        });
    }
    verify_pack_with(&pack, Deadline::none())
}
