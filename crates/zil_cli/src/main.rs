//! zildump
//!
//! Inspection tool for intent log images.
//!
//! # Commands
//!
//! - `inspect` - Display the log header
//! - `dump` - Print blocks, records and per-type statistics
//! - `verify` - Check that the log chain is intact
//! - `kinds` - List the log kinds this build knows

mod commands;

use clap::{ArgAction, Parser, Subcommand};
use commands::{Format, PoolArgs};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use zil_core::{ZilKind, HEADER_SIZE};

/// Intent log inspection tool.
#[derive(Parser)]
#[command(name = "zildump")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the log image directory
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Increase log output (repeatable)
    #[arg(global = true, short, long, action = ArgAction::Count)]
    verbose: u8,

    #[command(flatten)]
    pool: PoolArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Display the log header
    Inspect {
        /// Output format
        #[arg(short, long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },

    /// Print blocks, records and statistics
    Dump {
        /// Detail level; repeat for more (default 2)
        #[arg(short = 'i', long = "intent", action = ArgAction::Count)]
        level: u8,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },

    /// Check that the log chain is intact
    Verify,

    /// List known log kinds
    Kinds,

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => EnvFilter::new("warn"),
        1 => EnvFilter::new("info"),
        _ => EnvFilter::new("debug"),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Inspect { format } => {
            let path = cli.path.ok_or("Log image path required for inspect")?;
            commands::inspect::run(&path, &cli.pool, format)?;
        }
        Commands::Dump { level, format } => {
            let path = cli.path.ok_or("Log image path required for dump")?;
            let level = if level == 0 { 2 } else { level };
            commands::dump::run(&path, &cli.pool, level, format)?;
        }
        Commands::Verify => {
            let path = cli.path.ok_or("Log image path required for verify")?;
            commands::verify::run(&path, &cli.pool)?;
        }
        Commands::Kinds => {
            for kind in ZilKind::ALL {
                println!("{:>3}  {}", kind.tag(), kind);
            }
            println!("header size: {HEADER_SIZE} bytes");
        }
        Commands::Version => {
            println!("zildump v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
