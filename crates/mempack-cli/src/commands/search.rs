//! `mempack search`: semantic query against an existing pack.

use std::path::PathBuf;
use std::time::Duration;

use clap::Args;

use mempack::{Deadline, MemPackResult, MetaValue};

use super::open_retriever;

#[derive(Args)]
pub struct SearchArgs {
    /// Pack base path (reads <base>.mpack and <base>.ann)
    pub base: PathBuf,

    /// Query text
    pub query: String,

    /// Number of results
    #[arg(short = 'k', long, default_value_t = 5)]
    pub top_k: usize,

    /// Metadata equality filters as key=value (repeatable)
    #[arg(long = "filter", value_parser = parse_filter)]
    pub filters: Vec<(String, MetaValue)>,

    /// Abort the search after this many milliseconds
    #[arg(long)]
    pub timeout_ms: Option<u64>,

    /// Read via positioned I/O instead of mmap
    #[arg(long)]
    pub no_mmap: bool,
}

pub fn run(args: SearchArgs) -> MemPackResult<i32> {
    let retriever = open_retriever(&args.base, !args.no_mmap)?;

    let deadline = args
        .timeout_ms
        .map_or_else(Deadline::none, |ms| Deadline::after(Duration::from_millis(ms)));
    let filter = (!args.filters.is_empty()).then_some(args.filters.as_slice());
    let hits = retriever.search_with(&args.query, args.top_k, filter, deadline)?;

    if hits.is_empty() {
        println!("no results");
        return Ok(0);
    }
    for (rank, hit) in hits.iter().enumerate() {
        println!(
            "{}. score {:.4}  chunk {}  {}",
            rank + 1,
            hit.score,
            hit.chunk_id,
            meta_summary(hit)
        );
        println!("   {}", preview(&hit.text, 160));
    }
    Ok(0)
}

fn meta_summary(hit: &mempack::SearchHit) -> String {
    match hit.meta.get("source") {
        Some(MetaValue::Str(source)) => format!("({source})"),
        _ => String::new(),
    }
}

fn preview(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars).collect();
    format!("{cut}...")
}

fn parse_filter(value: &str) -> Result<(String, MetaValue), String> {
    let (key, raw) = value
        .split_once('=')
        .ok_or_else(|| "expected key=value".to_string())?;
    // Typed scalars first, falling back to a string match.
    let parsed = if raw == "null" {
        MetaValue::Null
    } else if let Ok(b) = raw.parse::<bool>() {
        MetaValue::Bool(b)
    } else if let Ok(i) = raw.parse::<i64>() {
        MetaValue::I64(i)
    } else if let Ok(f) = raw.parse::<f64>() {
        MetaValue::F64(f)
    } else {
        MetaValue::Str(raw.to_string())
    };
    Ok((key.to_string(), parsed))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filters_parse_typed_scalars() {
        assert_eq!(
            parse_filter("topic=quantum").unwrap(),
            ("topic".to_string(), MetaValue::Str("quantum".to_string()))
        );
        assert_eq!(
            parse_filter("count=42").unwrap(),
            ("count".to_string(), MetaValue::I64(42))
        );
        assert_eq!(
            parse_filter("draft=false").unwrap(),
            ("draft".to_string(), MetaValue::Bool(false))
        );
        assert_eq!(
            parse_filter("note=null").unwrap(),
            ("note".to_string(), MetaValue::Null)
        );
        assert!(parse_filter("no-equals").is_err());
    }

    #[test]
    fn previews_truncate_on_char_boundaries() {
        assert_eq!(preview("short", 10), "short");
        assert_eq!(preview("0123456789abc", 10), "0123456789...");
    }
}
