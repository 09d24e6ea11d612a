use std::path::PathBuf;

use anyhow::{Context, Result};
use argh::*;
use chainlib::crypto::KeyPairAddresses;
use chainlib::error::ChainError;
use chainlib::types::Blockchain;
use chainlib::util::register_peer;
use node::{Node, NodeConfig, tasks, util};
use tokio::net::TcpListener;
use tracing::*;

#[derive(FromArgs, Debug)]
/// A proof-of-work ledger node
struct Args {
    #[argh(option)]
    /// port to listen on; overrides the port of the configured address
    port: Option<u16>,
    #[argh(option)]
    /// TOML config file
    config: Option<PathBuf>,
    #[argh(option)]
    /// peer list, one host:port per line
    peers_file: Option<PathBuf>,
    #[argh(option)]
    /// genesis snapshot to load, or to create if missing
    genesis_file: Option<PathBuf>,
    #[argh(option)]
    /// milliseconds between chain syncs
    sync_interval_ms: Option<u64>,
    #[argh(option)]
    /// directory for rolling log files
    log_dir: Option<PathBuf>,
}

impl Args {
    fn into_config(self) -> Result<NodeConfig> {
        let mut config = match &self.config {
            Some(path) => NodeConfig::load(path)?,
            None => NodeConfig::default(),
        };
        if let Some(port) = self.port {
            let host = config
                .address
                .rsplit_once(':')
                .map_or(config.address.as_str(), |(host, _)| host);
            config.address = format!("{host}:{port}");
        }
        if let Some(peers_file) = self.peers_file {
            config.peers_file = peers_file;
        }
        if let Some(genesis_file) = self.genesis_file {
            config.genesis_file = genesis_file;
        }
        if let Some(sync_interval_ms) = self.sync_interval_ms {
            config.sync_interval_ms = sync_interval_ms;
        }
        if self.log_dir.is_some() {
            config.log_dir = self.log_dir;
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Args = argh::from_env();
    let config = args.into_config()?;
    util::setup_tracing(config.log_dir.as_deref())?;
    util::setup_panic_hook();

    let chain = match Blockchain::new_or_load(&config.genesis_file, &mut KeyPairAddresses) {
        Ok(chain) => chain,
        Err(e @ ChainError::Identity(_)) => return Err(e).context("Failed to create genesis"),
        Err(e) => {
            warn!("starting without genesis, waiting for a peer chain: {e}");
            Blockchain::new()
        }
    };

    let listener = TcpListener::bind(&config.address)
        .await
        .with_context(|| format!("Failed to bind {}", config.address))?;
    info!("Listening on {}", config.address);

    if config.register_self {
        match register_peer(&config.peers_file, &config.address) {
            Ok(true) => info!("registered {} in {}", config.address, config.peers_file.display()),
            Ok(false) => {}
            Err(e) => warn!("failed to register in {}: {e}", config.peers_file.display()),
        }
    }

    let node = Node::new(config, chain);
    node.greet_peers().await;
    let handles = tasks::spawn_all(node.clone(), listener).await;

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;
    info!("shutting down");
    node.shutdown();
    for handle in handles {
        if let Err(e) = handle.await {
            error!("task ended abnormally: {e}");
        }
    }
    Ok(())
}
