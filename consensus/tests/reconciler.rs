use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chainlib::crypto::FixedAddresses;
use chainlib::types::{Block, Blockchain, Transaction};
use chainlib::util::Saveable;
use consensus::Reconciler;
use node::{Node, NodeConfig, tasks};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};

fn genesis_chain() -> Blockchain {
    let mut accounts = FixedAddresses::new(["A1", "A2", "A3", "A4", "A5"]);
    Blockchain::from_blocks(vec![Blockchain::genesis_block(&mut accounts).unwrap()])
}

/// A node that only answers requests; it never mines or syncs on its own.
async fn serving_node(peers_file: &Path, chain: Blockchain) -> (Arc<Node>, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let config = NodeConfig {
        address: listener.local_addr().unwrap().to_string(),
        peers_file: peers_file.to_path_buf(),
        ..NodeConfig::default()
    };
    let node = Node::new(config, chain);
    let handle = tasks::serve(node.clone(), listener).await;
    (node, handle)
}

async fn mine(node: &Node, from: &str, amounts: &[u64]) {
    for &amount in amounts {
        node.submit_transaction(Transaction::new(from, "A2", amount))
            .await
            .unwrap();
        node.mine_pending().await.unwrap().unwrap();
    }
}

fn reconciler(dir: &Path, peers_file: &Path) -> Reconciler {
    Reconciler {
        peers_file: peers_file.to_path_buf(),
        output: dir.join("consensus.blockchain"),
        timeout: Duration::from_secs(1),
    }
}

#[tokio::test]
async fn publishes_longest_chain() {
    let dir = tempfile::tempdir().unwrap();
    let peers_file = dir.path().join("nodes.txt");
    let genesis = genesis_chain();
    let (short, short_server) = serving_node(&peers_file, genesis.clone()).await;
    let (long, long_server) = serving_node(&peers_file, genesis).await;
    mine(&short, "A1", &[1]).await;
    mine(&long, "A3", &[1, 2]).await;

    // an address nobody listens on is skipped
    let closed = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead = closed.local_addr().unwrap();
    drop(closed);
    std::fs::write(
        &peers_file,
        format!("{}\n{dead}\n\n{}\n", short.address(), long.address()),
    )
    .unwrap();

    let reconciler = reconciler(dir.path(), &peers_file);
    let winner = reconciler.round().await.unwrap().unwrap();
    assert_eq!(winner, long.chain().await);
    assert_eq!(
        Blockchain::load_from_file(&reconciler.output).unwrap(),
        winner
    );

    for node in [&short, &long] {
        node.shutdown();
    }
    for server in [short_server, long_server] {
        server.await.unwrap();
    }
}

#[tokio::test]
async fn chain_with_duplicate_transaction_is_not_published() {
    let dir = tempfile::tempdir().unwrap();
    let peers_file = dir.path().join("nodes.txt");
    let (honest, honest_server) = serving_node(&peers_file, genesis_chain()).await;
    mine(&honest, "A1", &[4]).await;

    // replay the same transaction in a second block
    let honest_blocks = honest.chain().await.into_blocks();
    let tip = honest_blocks.last().unwrap();
    let replay = Block::new(vec![tip.transactions[0].clone()], Some(tip.hash)).unwrap();
    let mut replayed = honest_blocks.clone();
    replayed.push(replay);
    let (cheater, cheater_server) =
        serving_node(&peers_file, Blockchain::from_blocks(replayed)).await;
    assert_eq!(cheater.chain_len().await, 3);

    std::fs::write(
        &peers_file,
        format!("{}\n{}\n", cheater.address(), honest.address()),
    )
    .unwrap();

    let reconciler = reconciler(dir.path(), &peers_file);
    let winner = reconciler.round().await.unwrap().unwrap();
    assert_eq!(winner.len(), 2);
    assert_eq!(winner, honest.chain().await);

    for node in [&honest, &cheater] {
        node.shutdown();
    }
    for server in [honest_server, cheater_server] {
        server.await.unwrap();
    }
}

#[tokio::test]
async fn round_without_reachable_peers_leaves_snapshot_alone() {
    let dir = tempfile::tempdir().unwrap();
    let peers_file = dir.path().join("nodes.txt");
    let reconciler = reconciler(dir.path(), &peers_file);

    // no peer list at all
    assert!(reconciler.round().await.is_err());

    std::fs::write(&peers_file, "").unwrap();
    assert!(reconciler.round().await.unwrap().is_none());
    assert!(!reconciler.output.exists());
}

#[tokio::test]
async fn run_stops_on_signal() {
    let dir = tempfile::tempdir().unwrap();
    let peers_file = dir.path().join("nodes.txt");
    let (node, server) = serving_node(&peers_file, genesis_chain()).await;
    std::fs::write(&peers_file, format!("{}\n", node.address())).unwrap();

    let reconciler = reconciler(dir.path(), &peers_file);
    let output = reconciler.output.clone();
    let (stop_tx, stop_rx) = watch::channel(false);
    let worker = tokio::spawn(async move {
        reconciler.run(Duration::from_millis(50), stop_rx).await;
    });

    timeout(Duration::from_secs(5), async {
        while !output.exists() {
            sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap();
    stop_tx.send_replace(true);
    timeout(Duration::from_secs(2), worker).await.unwrap().unwrap();

    node.shutdown();
    server.await.unwrap();
}
