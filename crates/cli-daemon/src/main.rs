//! CLI entry point for mergemux
//!
//! Parses command line arguments, sets up logging and starts the server.

use clap::Parser;
use mergemux::{Config, Daemon};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// mergemux - merge multi-part downloads and remux external audio with ffmpeg
#[derive(Parser, Debug)]
#[command(name = "mergemux")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (missing file means defaults)
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Port to listen on, overriding config and PORT
    #[arg(short, long)]
    port: Option<u16>,

    /// Directory of UI assets served for non-API routes
    #[arg(long)]
    static_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let mut config = match Config::load_or_default(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!(path = %args.config.display(), error = %e, "Failed to load configuration");
            return ExitCode::FAILURE;
        }
    };
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(dir) = args.static_dir {
        config.server.static_dir = Some(dir);
    }
    info!(
        config = %args.config.display(),
        port = config.server.port,
        ffmpeg = %config.transform.ffmpeg_bin.display(),
        "mergemux starting"
    );

    let daemon = match Daemon::new(config) {
        Ok(daemon) => Arc::new(daemon),
        Err(e) => {
            error!(error = %e, "Failed to initialize daemon");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = daemon.run_with_server().await {
        error!(error = %e, "Daemon error");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
