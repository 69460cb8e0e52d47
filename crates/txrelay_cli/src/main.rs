//! txrelay CLI
//!
//! Command-line tools for transaction store maintenance. Run them against a
//! store whose relay is stopped: every command takes the store lock.
//!
//! # Commands
//!
//! - `inspect` - Display record counts per status and per signer
//! - `dump` - Print stored records
//! - `verify` - Check every frame of the log
//! - `compact` - Rewrite the log without dead frames
//! - `prune` - Delete mined records up to a block and timestamp

mod commands;
mod error;

use clap::{Parser, Subcommand, ValueEnum};
use error::{CliError, CliResult};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use txrelay_store::Address;

/// txrelay transaction store tools.
#[derive(Parser)]
#[command(name = "txrelay")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the store directory
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Format {
    /// Human-readable text
    Text,
    /// Pretty-printed JSON
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Display record counts per status and per signer
    Inspect {
        /// Output format
        #[arg(short, long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },

    /// Print stored records in nonce order
    Dump {
        /// Only records of this signer
        #[arg(short, long)]
        signer: Option<Address>,

        /// Skip mined records
        #[arg(long)]
        pending: bool,

        /// Maximum number of records to print
        #[arg(short, long)]
        limit: Option<usize>,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },

    /// Verify every frame of the log
    Verify,

    /// Rewrite the log without dead frames
    Compact {
        /// Dry run - show what would be done
        #[arg(short, long)]
        dry_run: bool,
    },

    /// Delete mined records up to a block and timestamp
    Prune {
        /// Highest mined block number to delete
        #[arg(long)]
        max_block: u64,

        /// Highest mined block timestamp to delete, in Unix seconds
        #[arg(long)]
        max_timestamp: u64,

        /// Dry run - show what would be done
        #[arg(short, long)]
        dry_run: bool,
    },

    /// Show version information
    Version,
}

fn main() -> CliResult<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let path = || cli.path.clone().ok_or(CliError::MissingPath);
    match cli.command {
        Commands::Inspect { format } => commands::inspect::run(&path()?, format)?,
        Commands::Dump {
            signer,
            pending,
            limit,
            format,
        } => commands::dump::run(&path()?, signer, pending, limit, format)?,
        Commands::Verify => commands::verify::run(&path()?)?,
        Commands::Compact { dry_run } => commands::compact::run(&path()?, dry_run)?,
        Commands::Prune {
            max_block,
            max_timestamp,
            dry_run,
        } => commands::prune::run(&path()?, max_block, max_timestamp, dry_run)?,
        Commands::Version => {
            println!("txrelay CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("txrelay store v{}", txrelay_store::VERSION);
        }
    }

    Ok(())
}
