//! Byte-level reproducibility of builds.

use mempack::{ChunkMeta, HashingEmbedder, MemPackConfig, MemPackEncoder};
use tempfile::TempDir;

fn build_once(dir: &TempDir, name: &str) -> (Vec<u8>, Vec<u8>) {
    let mut config = MemPackConfig::default();
    config.chunking.chunk_size = 120;
    config.chunking.chunk_overlap = 30;
    config.block_size = 256;
    config.ecc = Some(mempack::EccParams { k: 4, m: 2 });

    let mut encoder = MemPackEncoder::new(config).unwrap();
    for i in 0..12 {
        encoder.add_document(
            &format!("doc{i}.md"),
            &format!(
                "Document {i} opens with a sentence about storage engines. \
                 It continues with another sentence mentioning vectors and blocks. \
                 A third sentence closes document number {i}."
            ),
            ChunkMeta::new().with("index", i as i64),
        );
    }

    let pack_path = dir.path().join(format!("{name}.mpack"));
    let ann_path = dir.path().join(format!("{name}.ann"));
    let backend = HashingEmbedder::new(128);
    encoder.build(&backend, &pack_path, &ann_path).unwrap();

    (
        std::fs::read(&pack_path).unwrap(),
        std::fs::read(&ann_path).unwrap(),
    )
}

#[test]
fn identical_inputs_produce_identical_files() {
    let dir = TempDir::new().unwrap();
    let (pack_a, ann_a) = build_once(&dir, "a");
    let (pack_b, ann_b) = build_once(&dir, "b");

    assert_eq!(pack_a, pack_b, ".mpack files differ between identical builds");
    assert_eq!(ann_a, ann_b, ".ann files differ between identical builds");
}

#[test]
fn different_inputs_produce_different_files() {
    let dir = TempDir::new().unwrap();
    let (pack_a, _) = build_once(&dir, "a");

    let mut config = MemPackConfig::default();
    config.chunking.chunk_size = 120;
    config.chunking.chunk_overlap = 30;
    let mut encoder = MemPackEncoder::new(config).unwrap();
    encoder.add_document("other.md", "Entirely different content.", ChunkMeta::new());
    let pack_path = dir.path().join("c.mpack");
    let ann_path = dir.path().join("c.ann");
    encoder
        .build(&HashingEmbedder::new(128), &pack_path, &ann_path)
        .unwrap();

    assert_ne!(pack_a, std::fs::read(&pack_path).unwrap());
}
