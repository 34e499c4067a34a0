//! # Main — CLI Entry Point
//!
//! Routes subcommands to the consolidation scheduler and its maintenance
//! helpers. Handles shared concerns: `.env` loading, logging setup, and the
//! database URL.
//!
//! ## Subcommands
//!
//! - `run`: loop until SIGINT/SIGTERM or the first failure.
//! - `once`: a single select-then-build cycle.
//! - `coverage`: per-algorithm target vs. current counts as JSON.
//! - `recover`: reset common hashlists abandoned in `parsing`.
//! - `migrate`: apply the hash inventory schema.
//!
//! ## Global Options
//!
//! - `--database-url` / `DATABASE_URL`: PostgreSQL connection.
//! - `--config` / `CONSOLIDATOR_CONFIG`: TOML file with a `[main]` section.
//! - `--delay-secs`, `--tmp-dir`, `--stale-parsing-secs`: override the file.

mod cli;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser)]
#[command(
    name = "hashlist-consolidator",
    about = "Maintain one deduplicated common hashlist per hash algorithm"
)]
struct Cli {
    /// PostgreSQL connection URL (or set DATABASE_URL env var)
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Path to a TOML config file with a [main] section
    #[arg(long, env = "CONSOLIDATOR_CONFIG")]
    config: Option<PathBuf>,

    /// Seconds to sleep between consolidation checks
    #[arg(long, env = "CONSOLIDATOR_DELAY_SECS")]
    delay_secs: Option<u64>,

    /// Directory new export files are written to
    #[arg(long, env = "CONSOLIDATOR_TMP_DIR")]
    tmp_dir: Option<PathBuf>,

    /// Reset common hashlists stuck in 'parsing' longer than this (0 = never)
    #[arg(long)]
    stale_parsing_secs: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the consolidation loop until interrupted or a cycle fails
    Run,
    /// Run a single consolidation cycle and exit
    Once,
    /// Print per-algorithm coverage of the common hashlists as JSON
    Coverage,
    /// Reset common hashlists abandoned in 'parsing' back to 'ready'
    Recover,
    /// Apply the hash inventory schema
    Migrate,
}

fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    // LOG_FORMAT=json for log shippers, human-readable otherwise
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_default();
    if log_format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .init();
    }

    let cli = Cli::parse();
    let rt = tokio::runtime::Runtime::new()?;

    match &cli.command {
        Commands::Run => cli::run_scheduler(&rt, &cli),
        Commands::Once => cli::run_once(&rt, &cli),
        Commands::Coverage => cli::run_coverage(&rt, &cli),
        Commands::Recover => cli::run_recover(&rt, &cli),
        Commands::Migrate => cli::run_migrate(&rt, &cli),
    }
}
