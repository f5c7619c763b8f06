//! runstate exporter CLI
//!
//! Starts the HTTP server exposing PipelineRun status metrics.

use anyhow::Context;
use clap::Parser;
use runstate_exporter::{config::ExporterConfig, config::Mode, start_server};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// PipelineRun status state-set exporter
#[derive(Debug, Parser)]
#[command(name = "runstate-exporter")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Load configuration from a TOML file
    #[arg(short, long, env = "RUNSTATE_CONFIG")]
    config: Option<PathBuf>,

    /// Operating mode: pull or reactive
    #[arg(short, long)]
    mode: Option<Mode>,

    /// Port to listen on
    #[arg(short = 'p', long)]
    port: Option<u16>,

    /// Resync interval in seconds (reactive mode)
    #[arg(long, env = "SCRAPE_INTERVAL")]
    scrape_interval: Option<u64>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Err(e) = run().await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => ExporterConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => {
            tracing::warn!("No config file specified, using defaults");
            ExporterConfig::default()
        }
    };

    if let Some(mode) = cli.mode {
        config.mode = mode;
    }
    if let Some(port) = cli.port {
        config.bind_port = port;
    }
    if let Some(secs) = cli.scrape_interval {
        config = config.with_scrape_interval(secs);
    }

    start_server(config).await?;
    Ok(())
}
