//! peerboxd binary entry point.
//!
//! Usage:
//! ```bash
//! peerboxd --config peerbox.toml
//! peerboxd --help
//! ```

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use peerboxd::{Config, Node};

/// Peer-to-peer file synchronization daemon.
#[derive(Parser, Debug)]
#[command(name = "peerboxd")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to the configuration file
    #[arg(long, default_value = "peerbox.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::from_file(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;

    Node::new(config)?.bind().await?.serve().await
}
