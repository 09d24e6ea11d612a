use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use chainlib::types::Block;
use chainlib::util::Saveable;
use chainlib::{CONSENSUS_FILE, CONSENSUS_TICK, GENESIS_FILE, PEERS_FILE};
use clap::Parser;
use consensus::Reconciler;
use tokio::sync::watch;
use tracing::*;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "consensus")]
#[command(about = "Publish the longest valid chain known to the peers")]
struct Cli {
    /// Peer list, one host:port per line
    #[arg(long, default_value = PEERS_FILE)]
    peers_file: PathBuf,

    /// Snapshot file to publish the winning chain to
    #[arg(long, default_value = CONSENSUS_FILE)]
    output: PathBuf,

    /// Seconds between polling rounds
    #[arg(long, default_value_t = CONSENSUS_TICK.as_secs())]
    interval_secs: u64,

    /// Per-peer reply deadline in milliseconds
    #[arg(long, default_value_t = 2000)]
    timeout_ms: u64,

    /// Genesis snapshot, only used to report the expected genesis
    #[arg(long, default_value = GENESIS_FILE)]
    genesis_file: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to install the log subscriber: {e}"))?;

    match Block::load_from_file(&cli.genesis_file) {
        Ok(genesis) => info!(
            hash = %genesis.hash,
            "expecting genesis from {}",
            cli.genesis_file.display()
        ),
        Err(e) => warn!("no genesis at {}: {e}", cli.genesis_file.display()),
    }

    let reconciler = Reconciler {
        peers_file: cli.peers_file,
        output: cli.output,
        timeout: Duration::from_millis(cli.timeout_ms),
    };
    let (stop_tx, stop_rx) = watch::channel(false);
    let period = Duration::from_secs(cli.interval_secs.max(1));
    let worker = tokio::spawn(async move { reconciler.run(period, stop_rx).await });

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;
    stop_tx.send_replace(true);
    worker.await.context("reconciler task failed")?;
    Ok(())
}
