//! `mempack export`: dump every chunk as JSON lines.

use std::io::Write;
use std::path::PathBuf;

use clap::Args;

use mempack::{MemPackResult, MetaValue};

use super::open_retriever;

#[derive(Args)]
pub struct ExportArgs {
    /// Pack base path (reads <base>.mpack and <base>.ann)
    pub base: PathBuf,
}

pub fn run(args: ExportArgs) -> MemPackResult<i32> {
    let retriever = open_retriever(&args.base, true)?;
    let stdout = std::io::stdout();
    let mut out = stdout.lock();

    let mut skipped = 0u64;
    for chunk_id in 0..retriever.pack().chunk_count() {
        let chunk = match retriever.get_chunk_by_id(chunk_id) {
            Ok(chunk) => chunk,
            Err(mempack::MemPackError::ChunkUnavailable { .. }) => {
                skipped += 1;
                continue;
            }
            Err(err) => return Err(err),
        };

        let mut record = serde_json::Map::new();
        record.insert("id".into(), serde_json::json!(chunk.id));
        record.insert("text".into(), serde_json::json!(chunk.text));
        let mut meta = serde_json::Map::new();
        for (key, value) in chunk.meta.fields() {
            meta.insert(key.clone(), meta_to_json(value));
        }
        record.insert("meta".into(), serde_json::Value::Object(meta));
        if !chunk.meta.tags().is_empty() {
            record.insert("tags".into(), serde_json::json!(chunk.meta.tags()));
        }
        writeln!(out, "{}", serde_json::Value::Object(record))?;
    }

    if skipped > 0 {
        eprintln!("warning: {skipped} chunks unavailable (corrupt blocks)");
    }
    Ok(0)
}

fn meta_to_json(value: &MetaValue) -> serde_json::Value {
    match value {
        MetaValue::Null => serde_json::Value::Null,
        MetaValue::Bool(b) => serde_json::json!(b),
        MetaValue::I64(i) => serde_json::json!(i),
        MetaValue::F64(f) => serde_json::json!(f),
        MetaValue::Str(s) => serde_json::json!(s),
    }
}
