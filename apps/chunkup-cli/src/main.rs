//! chunkup command-line entry point.

mod app;

use std::path::PathBuf;
use std::process::ExitCode;

use chunkup_uploader::UploaderConfig;
use chunkup_uploader::config::default_config_path;
use clap::Parser;
use tracing_subscriber::EnvFilter;

/// Upload a file to a resumable endpoint in byte-range chunks.
#[derive(Debug, Parser)]
#[command(name = "chunkup", version)]
pub struct Args {
    /// File to upload.
    pub file: PathBuf,

    /// Upload URL accepting `PUT` requests with `Content-Range`.
    pub endpoint: String,

    /// Chunk size in KiB (5120 to 512000).
    #[arg(long)]
    pub chunk_size_kb: Option<u64>,

    /// Retries allowed for each chunk.
    #[arg(long)]
    pub max_retries: Option<u32>,

    /// Refuse files larger than this many KiB.
    #[arg(long)]
    pub max_file_size_kb: Option<u64>,

    /// Configuration file (defaults to the platform config path).
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Print events as JSON lines.
    #[arg(long)]
    pub json: bool,

    /// Pause the upload while the endpoint's host is unreachable.
    #[arg(long)]
    pub probe: bool,
}

fn main() -> anyhow::Result<ExitCode> {
    let args = Args::parse();

    // Logs go to stderr so `--json` output stays machine-readable.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting chunkup");

    let config = match &args.config {
        Some(path) => UploaderConfig::load(path)?,
        None => UploaderConfig::load_or_default(&default_config_path())?,
    };

    let rt = tokio::runtime::Runtime::new()?;
    let outcome = rt.block_on(app::run(args, config))?;

    Ok(outcome.exit_code())
}
