//! `mempack verify`: full integrity walk with repair reporting.

use std::path::PathBuf;

use clap::Args;

use mempack::{verify_files, MemPackResult};
use mempack_pack::BlockStatus;

use super::pack_paths;

#[derive(Args)]
pub struct VerifyArgs {
    /// Pack base path (reads <base>.mpack and <base>.ann)
    pub base: PathBuf,

    /// Print per-block status lines
    #[arg(long)]
    pub blocks: bool,
}

pub fn run(args: VerifyArgs) -> MemPackResult<i32> {
    let (pack_path, ann_path) = pack_paths(&args.base);
    let report = verify_files(&pack_path, &ann_path)?;

    println!(
        "blocks: {}  ok: {}  corrupted: {}  recovered: {}  unrecoverable: {}",
        report.blocks.len(),
        report.ok,
        report.corrupted,
        report.recovered,
        report.unrecoverable
    );
    if args.blocks {
        for (block_id, status) in &report.blocks {
            let label = match status {
                BlockStatus::Ok => "ok",
                BlockStatus::Recovered => "recovered",
                BlockStatus::Unrecoverable => "UNRECOVERABLE",
            };
            println!("  block {block_id}: {label}");
        }
    }

    if report.is_healthy() {
        println!("pack is healthy");
        Ok(0)
    } else {
        println!("pack has unrecoverable damage");
        Ok(2)
    }
}
