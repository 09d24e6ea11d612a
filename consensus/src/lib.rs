//! Standalone chain reconciler.
//!
//! Polls every peer for its chain, keeps the longest valid one and publishes it to a snapshot
//! file that wallets and other readers can poll.

use std::path::PathBuf;
use std::time::Duration;

use chainlib::consensus::LongestChain;
use chainlib::error::{ChainError, Result};
use chainlib::network::{Message, call};
use chainlib::types::Blockchain;
use chainlib::util::{Saveable, read_peers};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::{self, MissedTickBehavior};
use tracing::*;

#[derive(Debug, Clone)]
pub struct Reconciler {
    pub peers_file: PathBuf,
    /// where the winning chain is published
    pub output: PathBuf,
    /// deadline for each peer's reply
    pub timeout: Duration,
}

impl Reconciler {
    /// Fetch every peer's chain concurrently. Replies come back in arrival order; unreachable
    /// peers and unexpected replies are logged and skipped.
    pub async fn collect(&self) -> Result<Vec<(String, Blockchain)>> {
        let peers = read_peers(&self.peers_file)?;
        let mut requests = JoinSet::new();
        let request = Message::FetchChain("consensus".to_string());
        for peer in peers {
            let deadline = self.timeout;
            let request = request.clone();
            requests.spawn(async move {
                let reply = call(&peer, &request, deadline).await;
                (peer, reply)
            });
        }

        let mut chains = vec![];
        while let Some(joined) = requests.join_next().await {
            match joined {
                Ok((peer, Ok(Message::Chain(blocks)))) => {
                    debug!(%peer, length = blocks.len(), "received chain");
                    chains.push((peer, Blockchain::from_blocks(blocks)));
                }
                Ok((peer, Ok(other))) => {
                    warn!(%peer, "unexpected reply to chain request: {other:?}")
                }
                Ok((_, Err(e))) => warn!("{e}"),
                Err(e) => warn!("fetch task failed: {e}"),
            }
        }
        Ok(chains)
    }

    /// One polling round. Returns the published chain, or `None` when no peer offered a valid one,
    /// in which case the previous snapshot is left in place.
    pub async fn round(&self) -> Result<Option<Blockchain>> {
        let mut selection = LongestChain::new();
        for (peer, chain) in self.collect().await? {
            if selection.offer(chain) {
                debug!(%peer, "leading candidate");
            }
        }
        let Some(winner) = selection.into_winner() else {
            info!("no valid chain this round");
            return Ok(None);
        };
        winner
            .save_to_file(&self.output)
            .map_err(ChainError::Snapshot)?;
        info!(
            length = winner.len(),
            tip = %winner.tip().map(|tip| tip.hash.to_string()).unwrap_or_default(),
            "published consensus to {}",
            self.output.display()
        );
        Ok(Some(winner))
    }

    /// Run a round every `period` until `stop` flips. Failed rounds are logged and retried on the
    /// next tick.
    pub async fn run(&self, period: Duration, mut stop: watch::Receiver<bool>) {
        let mut interval = time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = async { stop.wait_for(|stop| *stop).await.map(|_| ()) } => break,
                _ = interval.tick() => {
                    if let Err(e) = self.round().await {
                        error!("consensus round failed: {e}");
                    }
                }
            }
        }
        info!("reconciler stopped");
    }
}
