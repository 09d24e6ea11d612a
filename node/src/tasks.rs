use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::*;

use crate::handler::handle_connection;
use crate::runtime::Node;

/// Resolves once the node has been asked to shut down.
async fn stopped(mut stop: watch::Receiver<bool>) {
    // a dropped sender means the node is gone, which is a stop as well
    let _ = stop.wait_for(|stop| *stop).await;
}

fn ticker(period: Duration) -> time::Interval {
    let mut interval = time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

/// Accept connections and serve each on its own task.
pub async fn serve(node: Arc<Node>, listener: TcpListener) -> JoinHandle<()> {
    tokio::spawn(async move {
        let stop = stopped(node.stop_signal());
        tokio::pin!(stop);
        loop {
            tokio::select! {
                _ = &mut stop => break,
                accepted = listener.accept() => match accepted {
                    Ok((socket, _)) => {
                        tokio::spawn(handle_connection(node.clone(), socket));
                    }
                    Err(e) => error!("Failed to accept connection: {e}"),
                },
            }
        }
        info!("Listener stopped");
    })
}

/// Every mining tick, mine the pending transactions and push the new chain to the peers.
pub async fn mining(node: Arc<Node>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let stop = stopped(node.stop_signal());
        tokio::pin!(stop);
        let mut interval = ticker(node.config().mine_interval());
        loop {
            tokio::select! {
                _ = &mut stop => break,
                _ = interval.tick() => match node.mine_pending().await {
                    Ok(Some(_)) => node.broadcast_chain().await,
                    Ok(None) => {}
                    Err(e) => error!("Failed to mine block: {e:#}"),
                },
            }
        }
    })
}

/// Every sync tick, fetch the peers' chains into the candidate pool.
pub async fn syncing(node: Arc<Node>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let stop = stopped(node.stop_signal());
        tokio::pin!(stop);
        let mut interval = ticker(node.config().sync_interval());
        loop {
            tokio::select! {
                _ = &mut stop => break,
                _ = interval.tick() => node.sync_with_peers().await,
            }
        }
    })
}

/// Take candidates off the pool as they arrive and adopt the ones that outrank our chain.
pub async fn reconciling(node: Arc<Node>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let stop = stopped(node.stop_signal());
        tokio::pin!(stop);
        let candidates = node.candidates();
        loop {
            tokio::select! {
                _ = &mut stop => break,
                received = candidates.recv_async() => match received {
                    Ok(blocks) => {
                        node.reconcile(blocks).await;
                    }
                    Err(_) => break,
                },
            }
        }
    })
}

/// Start every background loop of a node.
pub async fn spawn_all(node: Arc<Node>, listener: TcpListener) -> Vec<JoinHandle<()>> {
    vec![
        serve(node.clone(), listener).await,
        mining(node.clone()).await,
        syncing(node.clone()).await,
        reconciling(node).await,
    ]
}
