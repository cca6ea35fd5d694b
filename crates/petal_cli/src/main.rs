//! PetalDB CLI
//!
//! Command-line tools for PetalDB database maintenance.
//!
//! # Commands
//!
//! - `inspect` - Display key counts and per-segment discard statistics
//! - `verify` - Check every entry checksum without opening the database
//! - `compact` - Run one GC cycle to reclaim space
//! - `backup` - Copy a consistent snapshot to another directory

mod commands;

use clap::{Parser, Subcommand};
use petal_core::{Config, IoType};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// PetalDB command-line database tools.
#[derive(Parser)]
#[command(name = "petal")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the database directory
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Open segments through memory maps
    #[arg(global = true, long)]
    mmap: bool,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Display key counts and segment statistics
    Inspect {
        /// Show one line per segment
        #[arg(short, long)]
        segments: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Verify every entry checksum in every segment
    Verify,

    /// Compact segments to reclaim space
    Compact {
        /// Minimum discard ratio of a segment to be rewritten
        #[arg(short, long, default_value_t = 0.5)]
        ratio: f64,
    },

    /// Copy the database to another directory
    Backup {
        /// Destination directory (must be empty or missing)
        #[arg(short, long)]
        dest: PathBuf,
    },

    /// Show version information
    Version,
}

impl Cli {
    /// Configuration for maintenance opens: never creates a database and
    /// never starts the background collector.
    fn config(&self) -> Config {
        let io_type = if self.mmap {
            IoType::MMap
        } else {
            IoType::FileIo
        };
        Config::default()
            .create_if_missing(false)
            .gc_interval(Duration::ZERO)
            .io_type(io_type)
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = cli.config();
    match cli.command {
        Commands::Inspect { segments, format } => {
            let path = cli.path.ok_or("Database path required for inspect")?;
            commands::inspect::run(&path, config, segments, &format)?;
        }
        Commands::Verify => {
            let path = cli.path.ok_or("Database path required for verify")?;
            commands::verify::run(&path)?;
        }
        Commands::Compact { ratio } => {
            let path = cli.path.ok_or("Database path required for compact")?;
            commands::compact::run(&path, config, ratio)?;
        }
        Commands::Backup { dest } => {
            let path = cli.path.ok_or("Database path required for backup")?;
            commands::backup::run(&path, config, &dest)?;
        }
        Commands::Version => {
            println!("PetalDB CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("PetalDB Core v{}", petal_core::VERSION);
        }
    }

    Ok(())
}
