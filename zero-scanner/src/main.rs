//! Zero Scanner - scanner ingestion engine for the Zero ecosystem.
//!
//! Command-line front end: classify and list parameters, split multi-scanner
//! files, or run a scanner against a date window. Output is JSON on stdout.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use serde::Serialize;

use zero_scanner::config::ScannerConfig;
use zero_scanner::logging::init_logging;
use zero_scanner::{ExecutionRequest, ScanService, ScannerSubmission};

#[derive(Parser, Debug)]
#[command(name = "zero-scanner")]
#[command(author = "theonlyhennygod")]
#[command(version = "0.1.0")]
#[command(about = "Classify, split and run third-party market scanners.", long_about = None)]
struct Cli {
    /// Path to a scanner config file (defaults to ~/.codecoder/scanner.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show the entry-point shape and tunable parameters
    Format {
        /// Scanner source file
        file: PathBuf,
    },
    /// Split a multi-scanner file into independent partitions
    Split {
        file: PathBuf,
    },
    /// Run a scanner and print its reconciled records
    Run {
        file: PathBuf,

        /// First day of the window (YYYY-MM-DD)
        #[arg(long)]
        start: NaiveDate,

        /// Last day of the window (YYYY-MM-DD)
        #[arg(long)]
        end: NaiveDate,

        /// Substitute the configured universe and pass the window to the scanner
        #[arg(long)]
        enhanced: bool,

        /// Comma-separated symbols to use instead of the scanner's own (implies --enhanced)
        #[arg(long, value_delimiter = ',')]
        symbols: Option<Vec<String>>,

        /// Wall-clock ceiling in seconds
        #[arg(long)]
        timeout: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => {
            let mut config = ScannerConfig::load_from(path)?;
            config.apply_env_overrides();
            config
        }
        None => ScannerConfig::load()?,
    };

    init_logging(
        &config.observability.log_level,
        &config.observability.log_format,
    );
    tracing::debug!("Zero Scanner v{}", env!("CARGO_PKG_VERSION"));

    let service = ScanService::new(config);

    match cli.command {
        Commands::Format { file } => {
            let submission = load(&file)?;
            print_json(&service.format(&submission)?)
        }
        Commands::Split { file } => {
            let submission = load(&file)?;
            print_json(&service.split(&submission)?)
        }
        Commands::Run {
            file,
            start,
            end,
            enhanced,
            symbols,
            timeout,
        } => {
            let submission = load(&file)?;
            let mut request = ExecutionRequest::new(start, end)?;
            if enhanced {
                request = request.enhanced();
            }
            if let Some(symbols) = symbols {
                request = request.with_universe(symbols);
            }
            request.timeout_secs = timeout;

            let result = service.run(&submission, &request).await?;
            print_json(&result)
        }
    }
}

fn load(path: &Path) -> Result<ScannerSubmission> {
    ScannerSubmission::from_path(path)
        .with_context(|| format!("Failed to read scanner from {}", path.display()))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
