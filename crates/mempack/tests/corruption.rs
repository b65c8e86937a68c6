//! Corruption, repair, and degradation end to end.

use std::path::{Path, PathBuf};

use mempack::{
    ChunkMeta, EccParams, HashingEmbedder, MemPackConfig, MemPackEncoder, MemPackRetriever,
    RetrieverOptions,
};
use mempack_pack::{PackReader, ReadOptions};
use tempfile::TempDir;

const DIM: usize = 128;

/// Build a pack with many small blocks so ECC groups are exercised.
fn build_kb(dir: &TempDir, ecc: Option<EccParams>) -> (PathBuf, PathBuf) {
    let mut config = MemPackConfig::default();
    config.chunking.chunk_size = 100;
    config.chunking.chunk_overlap = 20;
    config.block_size = 96;
    config.ecc = ecc;

    let mut encoder = MemPackEncoder::new(config).unwrap();
    for i in 0..16 {
        encoder.add_document(
            &format!("doc{i}.md"),
            &format!(
                "Topic {i} covers subject matter unique to this document. \
                 Extra filler sentence number {i} keeps the chunk distinct."
            ),
            ChunkMeta::new().with("doc", i as i64),
        );
    }

    let pack_path = dir.path().join("kb.mpack");
    let ann_path = dir.path().join("kb.ann");
    encoder
        .build(&HashingEmbedder::new(DIM), &pack_path, &ann_path)
        .unwrap();
    (pack_path, ann_path)
}

fn open_kb(pack: &Path, ann: &Path) -> MemPackRetriever {
    MemPackRetriever::open(
        pack,
        ann,
        Box::new(HashingEmbedder::new(DIM)),
        RetrieverOptions::default(),
    )
    .unwrap()
}

/// Flip one byte inside the compressed payload of `block_id`.
fn corrupt_block(path: &Path, block_id: u32) {
    let reader = PackReader::open(path, ReadOptions::default()).unwrap();
    let blocks_section = reader
        .sections()
        .iter()
        .find(|s| &s.tag == b"BLKS")
        .copied()
        .unwrap();
    let entry = reader.block_entry(block_id).unwrap();
    drop(reader);

    let mut bytes = std::fs::read(path).unwrap();
    let at = (blocks_section.offset + entry.file_offset) as usize;
    bytes[at] ^= 0xA5;
    std::fs::write(path, &bytes).unwrap();
}

#[test]
fn single_corruption_repairs_and_search_is_unchanged() {
    let dir = TempDir::new().unwrap();
    let (pack, ann) = build_kb(&dir, Some(EccParams { k: 4, m: 2 }));

    let retriever = open_kb(&pack, &ann);
    assert!(retriever.pack().block_count() >= 6, "need several blocks");
    let before = retriever.search("subject matter topic", 5).unwrap();
    drop(retriever);

    corrupt_block(&pack, 1);

    let retriever = open_kb(&pack, &ann);
    let report = retriever.verify().unwrap();
    assert_eq!(report.corrupted, 1);
    assert_eq!(report.recovered, 1);
    assert_eq!(report.unrecoverable, 0);

    let after = retriever.search("subject matter topic", 5).unwrap();
    assert_eq!(before.len(), after.len());
    for (a, b) in before.iter().zip(&after) {
        assert_eq!(a.chunk_id, b.chunk_id);
        assert_eq!(a.text, b.text);
    }
}

#[test]
fn gutted_group_degrades_without_global_errors() {
    let dir = TempDir::new().unwrap();
    let (pack, ann) = build_kb(&dir, Some(EccParams { k: 4, m: 2 }));

    let retriever = open_kb(&pack, &ann);
    let total_chunks = retriever.pack().chunk_count() as usize;
    let healthy = retriever.search("subject matter topic", total_chunks).unwrap();
    drop(retriever);

    // m + 1 corruptions inside the first group of four.
    corrupt_block(&pack, 0);
    corrupt_block(&pack, 1);
    corrupt_block(&pack, 2);

    let retriever = open_kb(&pack, &ann);
    let report = retriever.verify().unwrap();
    assert_eq!(report.corrupted, 3);
    assert!(report.unrecoverable >= 1);

    // Every search still succeeds; chunks in dead blocks are just missing.
    let degraded = retriever.search("subject matter topic", total_chunks).unwrap();
    assert!(degraded.len() < healthy.len());
    assert!(!degraded.is_empty());
}

#[test]
fn corruption_without_ecc_poisons_but_does_not_panic() {
    let dir = TempDir::new().unwrap();
    let (pack, ann) = build_kb(&dir, None);

    corrupt_block(&pack, 0);

    let retriever = open_kb(&pack, &ann);
    let report = retriever.verify().unwrap();
    assert_eq!(report.corrupted, 1);
    assert_eq!(report.recovered, 0);
    assert_eq!(report.unrecoverable, 1);

    let total_chunks = retriever.pack().chunk_count() as usize;
    let hits = retriever.search("subject matter topic", total_chunks).unwrap();
    assert!(hits.len() < total_chunks);
}

#[test]
fn truncated_ann_is_fatal_at_open() {
    let dir = TempDir::new().unwrap();
    let (pack, ann) = build_kb(&dir, None);

    let bytes = std::fs::read(&ann).unwrap();
    std::fs::write(&ann, &bytes[..40]).unwrap();

    assert!(MemPackRetriever::open(
        &pack,
        &ann,
        Box::new(HashingEmbedder::new(DIM)),
        RetrieverOptions::default(),
    )
    .is_err());
}
