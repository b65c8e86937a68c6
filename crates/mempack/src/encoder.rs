//! The staged build pipeline.
//!
//! Build is single-writer and staged: chunking runs single-threaded so
//! chunk ids are reproducible, embedding fans out over fixed-size batches
//! with order-preserving reassembly, and pack/index emission is sequential.
//! The same documents, configuration, and backend always produce
//! byte-identical `.mpack` and `.ann` files.

use std::path::Path;
use std::time::Instant;

use rayon::prelude::*;
use tracing::{debug, info};

use mempack_ann::{encode_ann, HnswIndex};
use mempack_core::util::atomic_write;
use mempack_core::{
    chunk_text, l2_normalize, normalize_text, BuildStats, Chunk, ChunkMeta, EmbeddingBackend,
    MemPackConfig, MemPackError, MemPackResult,
};
use mempack_pack::write_pack;

/// Accumulates documents, then builds a `.mpack`/`.ann` pair.
pub struct MemPackEncoder {
    config: MemPackConfig,
    documents: Vec<(String, ChunkMeta)>,
}

impl MemPackEncoder {
    /// Create an encoder; the configuration is validated here, fail-fast.
    pub fn new(config: MemPackConfig) -> MemPackResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            documents: Vec::new(),
        })
    }

    #[must_use]
    pub fn config(&self) -> &MemPackConfig {
        &self.config
    }

    /// Number of added documents.
    #[must_use]
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Add a raw text with its metadata.
    pub fn add_text(&mut self, text: impl Into<String>, meta: ChunkMeta) {
        self.documents.push((text.into(), meta));
    }

    /// Add a named document; `source` is recorded in the chunk metadata.
    pub fn add_document(&mut self, source: &str, text: impl Into<String>, mut meta: ChunkMeta) {
        meta.set("source", source);
        self.add_text(text, meta);
    }

    /// Chunk, embed, and emit both files. Returns build statistics.
    pub fn build(
        &self,
        backend: &dyn EmbeddingBackend,
        pack_path: &Path,
        ann_path: &Path,
    ) -> MemPackResult<BuildStats> {
        let started = Instant::now();

        // Stage 1: deterministic chunking, ids in insertion order.
        let mut chunks: Vec<Chunk> = Vec::new();
        for (text, meta) in &self.documents {
            let normalized = normalize_text(text);
            for piece in chunk_text(
                &normalized,
                self.config.chunking.chunk_size,
                self.config.chunking.chunk_overlap,
            ) {
                chunks.push(Chunk {
                    id: chunks.len() as u64,
                    text: piece,
                    meta: meta.clone(),
                });
            }
        }
        if chunks.is_empty() {
            return Err(MemPackError::InvalidConfig {
                message: "nothing to build: no documents produced any chunks".to_string(),
            });
        }
        debug!(documents = self.documents.len(), chunks = chunks.len(), "chunking done");

        // Stage 2: embedding fan-out. Batches keep their index, so
        // reassembly preserves chunk-id order regardless of thread timing.
        let embed_started = Instant::now();
        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        let batch_results: Vec<MemPackResult<Vec<Vec<f32>>>> = texts
            .par_chunks(self.config.embed_batch_size)
            .map(|batch| backend.encode(batch))
            .collect();

        let expected_dim = backend.dim();
        let mut vectors: Vec<Vec<f32>> = Vec::with_capacity(chunks.len());
        for result in batch_results {
            vectors.extend(result?);
        }
        if vectors.len() != chunks.len() {
            return Err(MemPackError::EmbedBackend {
                backend: backend.name().to_string(),
                message: format!(
                    "backend returned {} vectors for {} chunks",
                    vectors.len(),
                    chunks.len()
                ),
            });
        }
        for vector in &mut vectors {
            if vector.len() != expected_dim {
                return Err(MemPackError::DimensionMismatch {
                    expected: expected_dim,
                    actual: vector.len(),
                });
            }
            l2_normalize(vector);
        }
        let embedding_time_ms = embed_started.elapsed().as_secs_f64() * 1e3;

        // Stage 3: sequential pack emission.
        let summary = write_pack(
            pack_path,
            &chunks,
            &self.config,
            backend.name(),
            expected_dim as u32,
        )?;

        // Stage 4: deterministic index construction, vector id == chunk id.
        let mut index = HnswIndex::new(expected_dim, &self.config.index.hnsw);
        for vector in &vectors {
            index.insert(vector)?;
        }
        let ann_bytes = encode_ann(&index, None)?;
        atomic_write(ann_path, &ann_bytes)?;

        let stats = BuildStats {
            chunks: chunks.len() as u64,
            blocks: summary.blocks,
            vectors: vectors.len() as u64,
            bytes_written: summary.bytes_written + ann_bytes.len() as u64,
            build_time_ms: started.elapsed().as_secs_f64() * 1e3,
            embedding_time_ms,
            compression_ratio: if summary.compressed_total > 0 {
                summary.uncompressed_total as f64 / summary.compressed_total as f64
            } else {
                1.0
            },
        };
        info!(
            chunks = stats.chunks,
            blocks = stats.blocks,
            bytes = stats.bytes_written,
            "build complete"
        );
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mempack_core::HashingEmbedder;
    use tempfile::TempDir;

    #[test]
    fn empty_encoder_refuses_to_build() {
        let dir = TempDir::new().unwrap();
        let encoder = MemPackEncoder::new(MemPackConfig::default()).unwrap();
        let backend = HashingEmbedder::new(64);
        let err = encoder.build(
            &backend,
            &dir.path().join("x.mpack"),
            &dir.path().join("x.ann"),
        );
        assert!(matches!(err, Err(MemPackError::InvalidConfig { .. })));
    }

    #[test]
    fn build_produces_both_files_and_stats() {
        let dir = TempDir::new().unwrap();
        let mut encoder = MemPackEncoder::new(MemPackConfig::default()).unwrap();
        encoder.add_document(
            "a.md",
            "First document about embeddings. It has a couple of sentences.",
            ChunkMeta::new(),
        );
        encoder.add_document(
            "b.md",
            "Second document about block storage and checksums.",
            ChunkMeta::new(),
        );

        let pack_path = dir.path().join("kb.mpack");
        let ann_path = dir.path().join("kb.ann");
        let backend = HashingEmbedder::new(64);
        let stats = encoder.build(&backend, &pack_path, &ann_path).unwrap();

        assert!(stats.chunks >= 2);
        assert_eq!(stats.chunks, stats.vectors);
        assert!(stats.blocks >= 1);
        assert!(pack_path.exists());
        assert!(ann_path.exists());
        assert!(stats.bytes_written > 0);
    }
}
