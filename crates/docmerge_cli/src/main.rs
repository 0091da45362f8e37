//! docmerge CLI
//!
//! Command-line tools for inspecting level assignment and simulating
//! ingestion and compaction.
//!
//! # Commands
//!
//! - `level` - Print the merge level of one or more keys
//! - `simulate` - Ingest generated batches into memory and compact them

mod commands;

use clap::{Parser, Subcommand};
use commands::simulate::SimulateOptions;
use tracing_subscriber::EnvFilter;

/// docmerge command-line tools.
#[derive(Parser)]
#[command(name = "docmerge")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the merge level assigned to each key
    Level {
        /// Merge keys to evaluate
        #[arg(required = true)]
        keys: Vec<String>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Ingest generated aged batches into memory, then compact them
    Simulate {
        /// Number of batches to ingest
        #[arg(short, long, default_value = "100")]
        batches: u64,

        /// Generations declared by each batch
        #[arg(short, long, default_value = "4")]
        ages: u64,

        /// Records written per generation
        #[arg(short, long, default_value = "8")]
        records: usize,

        /// Payload bytes per record
        #[arg(long, default_value = "64")]
        payload: usize,

        /// Blob size ceiling in bytes
        #[arg(short, long, default_value = "65536")]
        size_limit: usize,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Level { keys, format } => {
            commands::level::run(&keys, &format)?;
        }
        Commands::Simulate {
            batches,
            ages,
            records,
            payload,
            size_limit,
            format,
        } => {
            let options = SimulateOptions {
                batches,
                ages_per_batch: ages,
                records_per_age: records,
                payload_len: payload,
                size_limit,
            };
            commands::simulate::run(&options, &format)?;
        }
        Commands::Version => {
            println!("docmerge CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("docmerge Core v{}", docmerge_core::VERSION);
        }
    }

    Ok(())
}
