//! MemPack CLI.
//!
//! # Commands
//!
//! - `build`: chunk, embed, and pack input files into a `.mpack`/`.ann` pair
//! - `search`: semantic query against an existing pack
//! - `verify`: walk every block, attempt ECC repair, report integrity
//! - `info`: print header, section, and config details
//! - `export`: dump all chunks as JSON lines
//!
//! Exit codes: 0 ok, 1 generic error, 2 corrupt file (unrecovered), 3 usage
//! error.

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

mod commands;

use mempack::MemPackError;

/// Exit code for corruption the pack could not recover from.
const EXIT_CORRUPT: i32 = 2;
/// Exit code for invalid usage or configuration.
const EXIT_USAGE: i32 = 3;

/// MemPack - portable knowledge packs with ANN search
#[derive(Parser)]
#[command(name = "mempack")]
#[command(version = "0.1.0")]
#[command(about = "Build, search, and verify .mpack knowledge packs")]
#[command(propagate_version = true)]
struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a knowledge pack from input text files
    Build(commands::build::BuildArgs),
    /// Search a knowledge pack
    Search(commands::search::SearchArgs),
    /// Verify pack integrity, attempting ECC repair
    Verify(commands::verify::VerifyArgs),
    /// Show pack header, sections, and configuration
    Info(commands::info::InfoArgs),
    /// Export all chunks as JSON lines on stdout
    Export(commands::export::ExportArgs),
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            // Help/version are not usage errors.
            let code = if err.use_stderr() { EXIT_USAGE } else { 0 };
            let _ = err.print();
            std::process::exit(code);
        }
    };

    let filter = match cli.verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };
    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let result = match cli.command {
        Commands::Build(args) => commands::build::run(args),
        Commands::Search(args) => commands::search::run(args),
        Commands::Verify(args) => commands::verify::run(args),
        Commands::Info(args) => commands::info::run(args),
        Commands::Export(args) => commands::export::run(args),
    };

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(exit_code_for(&err));
        }
    }
}

fn exit_code_for(err: &MemPackError) -> i32 {
    if err.is_corruption() {
        EXIT_CORRUPT
    } else if matches!(err, MemPackError::InvalidConfig { .. }) {
        EXIT_USAGE
    } else {
        1
    }
}
