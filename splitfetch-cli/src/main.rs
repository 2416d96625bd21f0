//! Splitfetch CLI - command-line interface
//!
//! Downloads one URL in parallel byte-range segments using the splitfetch
//! library.

mod error;

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use splitfetch::size::parse_size;
use splitfetch::{ConfigFile, DownloadConfig, SegmentedDownloader};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use crate::error::CliError;

/// File downloader
#[derive(Debug, Parser)]
#[command(name = "splitfetch", version, about = "Download a file in parallel byte-range parts")]
struct Args {
    /// url to download
    #[arg(value_name = "URL")]
    url: String,

    /// minimum file chunk size (default 10MiB)
    #[arg(long, value_parser = parse_size_arg)]
    min_chunk_size: Option<u64>,

    /// maximum file chunk size (default 100MiB)
    #[arg(long, value_parser = parse_size_arg)]
    max_chunk_size: Option<u64>,

    /// output file path (default: url file name in the working directory)
    #[arg(short = 'O', long)]
    output: Option<PathBuf>,

    /// connect timeout in seconds (default 360)
    #[arg(long, value_name = "SECS")]
    connect_timeout: Option<u64>,

    /// cancel remaining parts as soon as one fails
    #[arg(long)]
    eager_cancel: bool,

    /// config file (default: $XDG_CONFIG_HOME/splitfetch/config.ini)
    #[arg(long)]
    config: Option<PathBuf>,

    /// enable debug logging on stderr
    #[arg(short, long)]
    verbose: bool,
}

fn parse_size_arg(value: &str) -> Result<u64, String> {
    match parse_size(value) {
        Some(0) | None => Err(format!("invalid size '{}'", value)),
        Some(size) => Ok(size),
    }
}

/// Layer defaults, the config file, then command-line flags.
fn resolve_config(args: &Args) -> Result<DownloadConfig, CliError> {
    let file = match args.config {
        Some(ref path) => ConfigFile::load_from(path)?,
        None => ConfigFile::load()?,
    };
    let mut config = file.apply_to(DownloadConfig::default());

    if let Some(min) = args.min_chunk_size {
        config = config.with_min_chunk_size(min);
    }
    if let Some(max) = args.max_chunk_size {
        config = config.with_max_chunk_size(max);
    }
    if let Some(secs) = args.connect_timeout {
        config = config.with_connect_timeout(Duration::from_secs(secs));
    }
    if args.eager_cancel {
        config = config.with_eager_cancel(true);
    }

    config.validate()?;
    Ok(config)
}

fn init_logging(verbose: bool) {
    let default = if verbose { "splitfetch=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn run(args: Args) -> Result<(), CliError> {
    let config = resolve_config(&args)?;
    debug!(?config, "resolved configuration");

    let downloader = SegmentedDownloader::new(config)?;
    let outcome = downloader
        .download(&args.url, args.output.as_deref())
        .await?;

    debug!(
        path = %outcome.output_path.display(),
        parts = outcome.parts,
        elapsed_ms = outcome.elapsed.as_millis() as u64,
        "download finished"
    );
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose);

    match run(args).await {
        Ok(()) => {
            println!("File download completed");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("error: {}", e);
            if e.is_download_failure() {
                println!("File download failed");
            }
            ExitCode::from(e.exit_code())
        }
    }
}
