use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{Context, Result as AnyResult};
use chainlib::MAX_AMOUNT;
use chainlib::consensus::{check_candidate, outranks};
use chainlib::error::{ChainError, Result};
use chainlib::network::{BlockPayload, Message, Status, call};
use chainlib::sha256::Hash;
use chainlib::types::{Block, Blockchain, Mempool, Transaction};
use chainlib::util::read_peers;
use dashmap::DashSet;
use futures::future::join_all;
use tokio::sync::{RwLock, watch};
use tokio::task;
use tracing::{debug, info, warn};

use crate::config::NodeConfig;

/// Chain and mempool change together, so they share one lock.
#[derive(Debug, Default)]
struct Ledger {
    chain: Blockchain,
    mempool: Mempool,
}

/// One ledger node: its chain, its mempool and the bookkeeping around gossip.
///
/// Nothing in here does network or disk I/O while holding the ledger lock; callers get clones
/// and work on those.
pub struct Node {
    config: NodeConfig,
    ledger: RwLock<Ledger>,
    /// ids of every transaction this node has seen, accepted or not
    processed: DashSet<Hash>,
    candidates_tx: flume::Sender<Vec<Block>>,
    candidates_rx: flume::Receiver<Vec<Block>>,
    stop: watch::Sender<bool>,
}

impl Node {
    pub fn new(config: NodeConfig, chain: Blockchain) -> Arc<Self> {
        let (candidates_tx, candidates_rx) = flume::bounded(config.candidate_pool_capacity.max(1));
        let (stop, _) = watch::channel(false);
        let processed = DashSet::new();
        for id in chain.transaction_ids() {
            processed.insert(id);
        }
        Arc::new(Node {
            config,
            ledger: RwLock::new(Ledger {
                chain,
                mempool: Mempool::new(),
            }),
            processed,
            candidates_tx,
            candidates_rx,
            stop,
        })
    }

    pub fn address(&self) -> &str {
        &self.config.address
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// A copy of the current chain.
    pub async fn chain(&self) -> Blockchain {
        self.ledger.read().await.chain.clone()
    }

    pub async fn chain_len(&self) -> usize {
        self.ledger.read().await.chain.len()
    }

    pub async fn balance_of(&self, address: &str) -> i64 {
        self.ledger.read().await.chain.balance_of(address)
    }

    /// A copy of the pending transactions.
    pub async fn pending(&self) -> Vec<Transaction> {
        self.ledger.read().await.mempool.drain()
    }

    pub fn ping(&self, sender: &str) -> String {
        format!("Pong to {sender} from {}", self.config.address)
    }

    /// Admit a transaction into the mempool.
    ///
    /// A transaction is looked at once: resubmissions are answered with
    /// [`Status::AlreadyProcessed`] even if the first attempt was rejected. The balance check runs
    /// against the chain only; spends still waiting in the mempool are not counted.
    pub async fn submit_transaction(&self, transaction: Transaction) -> Result<Status> {
        // before the dedup set, so a forged id cannot shadow the genuine transaction
        if !transaction.verify_id() {
            return Err(ChainError::Malformed(format!(
                "transaction id {} does not match its content",
                transaction.id
            )));
        }
        if !self.processed.insert(transaction.id) {
            debug!(id = %transaction.id, "transaction already processed");
            return Ok(Status::AlreadyProcessed);
        }
        if transaction.amount > MAX_AMOUNT {
            return Err(ChainError::Malformed(format!(
                "amount {} exceeds {MAX_AMOUNT}",
                transaction.amount
            )));
        }
        if !transaction.is_structurally_valid() {
            return Err(ChainError::EmptyEndpoint);
        }

        let mut ledger = self.ledger.write().await;
        let balance = ledger.chain.balance_of(&transaction.from);
        if balance < transaction.amount as i64 {
            return Err(ChainError::InsufficientBalance {
                address: transaction.from.clone(),
                balance,
                amount: transaction.amount,
            });
        }
        info!(id = %transaction.id, from = %transaction.from, to = %transaction.to, amount = transaction.amount, "transaction admitted");
        ledger.mempool.add(transaction);
        Ok(Status::Accepted)
    }

    /// Take a block announcement from a peer. A single block must extend our tip; a whole chain
    /// goes to the reconciler.
    pub async fn submit_block(&self, payload: BlockPayload) -> Result<Status> {
        match payload {
            BlockPayload::Block(block) => {
                if !block.is_pow_valid() {
                    return Err(ChainError::InvalidPoW);
                }
                if !block.has_valid_transfers() {
                    return Err(ChainError::Malformed(format!(
                        "block {} carries invalid transactions",
                        block.hash
                    )));
                }
                let ids: Vec<Hash> = block.transaction_ids().collect();
                let hash = block.hash;
                {
                    let mut ledger = self.ledger.write().await;
                    ledger.chain.append(block)?;
                    ledger.mempool.clear();
                }
                for id in ids {
                    self.processed.insert(id);
                }
                info!(%hash, "appended block from peer");
                Ok(Status::Accepted)
            }
            BlockPayload::Chain(blocks) => {
                if self.enqueue_candidate(blocks) {
                    Ok(Status::Queued)
                } else {
                    Ok(Status::Rejected("candidate pool full".to_string()))
                }
            }
        }
    }

    /// Queue a candidate chain without waiting. When the pool is full the candidate is dropped.
    pub fn enqueue_candidate(&self, blocks: Vec<Block>) -> bool {
        match self.candidates_tx.try_send(blocks) {
            Ok(()) => true,
            Err(flume::TrySendError::Full(blocks)) => {
                warn!("candidate pool full, dropping a chain of {} blocks", blocks.len());
                false
            }
            Err(flume::TrySendError::Disconnected(_)) => false,
        }
    }

    pub(crate) fn candidates(&self) -> flume::Receiver<Vec<Block>> {
        self.candidates_rx.clone()
    }

    /// Run every queued candidate through [`Node::reconcile`] without waiting for more. Returns
    /// how many replaced the local chain.
    pub async fn reconcile_pending(&self) -> usize {
        let mut adopted = 0;
        while let Ok(blocks) = self.candidates_rx.try_recv() {
            if self.reconcile(blocks).await {
                adopted += 1;
            }
        }
        adopted
    }

    /// Replace the local chain with `blocks` if they form a valid chain that outranks it.
    /// Pending transactions already in the adopted chain leave the mempool.
    pub async fn reconcile(&self, blocks: Vec<Block>) -> bool {
        let candidate = Blockchain::from_blocks(blocks);
        // cheap comparison first, the full check hashes every block
        if !outranks(&candidate, &self.ledger.read().await.chain) {
            return false;
        }
        if let Err(e) = check_candidate(&candidate) {
            warn!("ignoring candidate chain of {} blocks: {e}", candidate.len());
            return false;
        }

        let included = candidate.transaction_ids();
        {
            let mut ledger = self.ledger.write().await;
            // the chain may have moved while we were validating
            if !outranks(&candidate, &ledger.chain) {
                return false;
            }
            info!(
                from = ledger.chain.len(),
                to = candidate.len(),
                tip = %candidate.tip().map(|tip| tip.hash).unwrap_or_else(Hash::zero),
                "adopting peer chain"
            );
            ledger.chain = candidate;
            ledger.mempool.remove_included(&included);
        }
        for id in included {
            self.processed.insert(id);
        }
        true
    }

    /// Mine the pending transactions on top of the current tip and append the result. Returns
    /// `None` when there is nothing to mine or no genesis yet.
    ///
    /// Only the transactions that made it into the block leave the mempool; the rest wait for the
    /// next round. If the chain moved while mining, the block is discarded.
    pub async fn mine_pending(&self) -> AnyResult<Option<Block>> {
        let (transactions, parent) = {
            let mut ledger = self.ledger.write().await;
            let Some(tip) = ledger.chain.tip().map(|tip| tip.hash) else {
                debug!("no genesis yet, not mining");
                return Ok(None);
            };
            // anything already on the chain would make the block unappendable
            let on_chain = ledger.chain.transaction_ids();
            ledger.mempool.remove_included(&on_chain);
            if ledger.mempool.is_empty() {
                return Ok(None);
            }
            (ledger.mempool.drain(), tip)
        };

        debug!(pending = transactions.len(), %parent, "mining");
        let block = task::spawn_blocking(move || Block::new(transactions, Some(parent)))
            .await
            .context("mining task failed")??;

        let mut ledger = self.ledger.write().await;
        ledger.chain.append(block.clone())?;
        let included: HashSet<Hash> = block.transaction_ids().collect();
        ledger.mempool.remove_included(&included);
        info!(hash = %block.hash, nonce = block.nonce, height = ledger.chain.len() - 1, "mined block");
        Ok(Some(block))
    }

    /// Peers from the peer file, minus ourselves. An unreadable file means no peers this time.
    pub fn peers(&self) -> Vec<String> {
        match read_peers(&self.config.peers_file) {
            Ok(peers) => peers
                .into_iter()
                .filter(|peer| peer != &self.config.address)
                .collect(),
            Err(e) => {
                warn!(
                    "failed to read peers from {}: {e}",
                    self.config.peers_file.display()
                );
                vec![]
            }
        }
    }

    /// Send `request` to every peer concurrently, one task each, and collect the replies that
    /// arrived. Failures are logged and left out.
    async fn fan_out(&self, request: Message) -> Vec<(String, Message)> {
        let deadline = self.config.rpc_timeout();
        let handles = self.peers().into_iter().map(|peer| {
            let request = request.clone();
            task::spawn(async move {
                let reply = call(&peer, &request, deadline).await;
                (peer, reply)
            })
        });

        let mut replies = vec![];
        for joined in join_all(handles).await {
            match joined {
                Ok((peer, Ok(reply))) => replies.push((peer, reply)),
                Ok((_, Err(e))) => warn!("{e}"),
                Err(e) => warn!("peer task failed: {e}"),
            }
        }
        replies
    }

    /// Ping every known peer once and log who answered.
    pub async fn greet_peers(&self) {
        for (peer, reply) in self.fan_out(Message::Ping(self.config.address.clone())).await {
            match reply {
                Message::Pong(greeting) => info!(%peer, "{greeting}"),
                other => warn!(%peer, "unexpected reply to ping: {other:?}"),
            }
        }
    }

    /// Push our whole chain to every peer.
    pub async fn broadcast_chain(&self) {
        let blocks = self.chain().await.into_blocks();
        let length = blocks.len();
        let request = Message::SubmitBlock(BlockPayload::Chain(blocks));
        for (peer, reply) in self.fan_out(request).await {
            match reply {
                Message::Status(status) => debug!(%peer, length, "broadcast: {status}"),
                other => warn!(%peer, "unexpected reply to block broadcast: {other:?}"),
            }
        }
    }

    /// Ask every peer for its chain and queue the answers for the reconciler.
    pub async fn sync_with_peers(&self) {
        let request = Message::FetchChain(self.config.address.clone());
        for (peer, reply) in self.fan_out(request).await {
            match reply {
                Message::Chain(blocks) => {
                    debug!(%peer, length = blocks.len(), "received chain");
                    self.enqueue_candidate(blocks);
                }
                other => warn!(%peer, "unexpected reply to chain request: {other:?}"),
            }
        }
    }

    pub fn stop_signal(&self) -> watch::Receiver<bool> {
        self.stop.subscribe()
    }

    /// Ask every loop to finish at its next tick.
    pub fn shutdown(&self) {
        self.stop.send_replace(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chainlib::crypto::FixedAddresses;

    fn node_with_genesis() -> Arc<Node> {
        let mut accounts = FixedAddresses::new(["A1", "A2", "A3", "A4", "A5"]);
        let genesis = Blockchain::genesis_block(&mut accounts).unwrap();
        Node::new(NodeConfig::default(), Blockchain::from_blocks(vec![genesis]))
    }

    #[tokio::test]
    async fn duplicate_submissions_are_processed_once() {
        let node = node_with_genesis();
        let tx = Transaction::new("A1", "A2", 10);

        assert_eq!(node.submit_transaction(tx.clone()).await.unwrap(), Status::Accepted);
        assert_eq!(
            node.submit_transaction(tx.clone()).await.unwrap(),
            Status::AlreadyProcessed
        );
        assert_eq!(node.pending().await.len(), 1);

        node.mine_pending().await.unwrap();
        assert_eq!(
            node.submit_transaction(tx.clone()).await.unwrap(),
            Status::AlreadyProcessed
        );
        let occurrences = node
            .chain()
            .await
            .blocks()
            .iter()
            .flat_map(|block| &block.transactions)
            .filter(|included| included.id == tx.id)
            .count();
        assert_eq!(occurrences, 1);
    }

    #[tokio::test]
    async fn forged_ids_and_empty_endpoints_are_rejected() {
        let node = node_with_genesis();

        let mut forged = Transaction::new("A1", "A2", 10);
        forged.amount = 90;
        assert!(matches!(
            node.submit_transaction(forged).await,
            Err(ChainError::Malformed(_))
        ));

        assert!(matches!(
            node.submit_transaction(Transaction::new("A1", "", 1)).await,
            Err(ChainError::EmptyEndpoint)
        ));
        assert!(matches!(
            node.submit_transaction(Transaction::grant("A1", 1_000)).await,
            Err(ChainError::EmptyEndpoint)
        ));
        assert!(node.pending().await.is_empty());
    }

    #[tokio::test]
    async fn amounts_beyond_i64_are_refused() {
        let node = node_with_genesis();
        for amount in [u64::MAX, MAX_AMOUNT + 1] {
            assert!(matches!(
                node.submit_transaction(Transaction::new("A6", "A2", amount)).await,
                Err(ChainError::Malformed(_))
            ));
        }
        assert!(matches!(
            node.submit_transaction(Transaction::new("A1", "A2", MAX_AMOUNT)).await,
            Err(ChainError::InsufficientBalance { .. })
        ));
        assert!(node.pending().await.is_empty());
        assert!(node.mine_pending().await.unwrap().is_none());

        // nor can a peer slip one in through a block
        let tip = node.chain().await.tip().unwrap().hash;
        let oversized = Transaction::new("A6", "A2", u64::MAX);
        let block = Block::new(vec![oversized], Some(tip)).unwrap();
        assert!(matches!(
            node.submit_block(BlockPayload::Block(block)).await,
            Err(ChainError::Malformed(_))
        ));
        assert_eq!(node.chain_len().await, 1);
        assert_eq!(node.balance_of("A6").await, 0);
        assert_eq!(node.balance_of("A2").await, 100);
    }

    #[tokio::test]
    async fn peer_block_repeating_a_mined_transaction_is_refused() {
        let node = node_with_genesis();
        let tx = Transaction::new("A1", "A2", 30);
        node.submit_transaction(tx.clone()).await.unwrap();
        node.mine_pending().await.unwrap().unwrap();

        let tip = node.chain().await.tip().unwrap().hash;
        let replay = Block::new(vec![tx.clone()], Some(tip)).unwrap();
        assert!(matches!(
            node.submit_block(BlockPayload::Block(replay)).await,
            Err(ChainError::DuplicateTransaction(id)) if id == tx.id
        ));

        let chain = node.chain().await;
        assert_eq!(chain.len(), 2);
        assert!(!chain.has_duplicate_transactions());
        assert_eq!(node.balance_of("A1").await, 70);
    }

    #[tokio::test]
    async fn mempool_overflow_waits_for_next_block() {
        let node = node_with_genesis();
        for i in 0..7 {
            let tx = Transaction::new("A1", "A2", i);
            node.submit_transaction(tx).await.unwrap();
        }

        let block = node.mine_pending().await.unwrap().unwrap();
        assert_eq!(block.transactions.len(), chainlib::MAX_TXS_PER_BLOCK);
        assert_eq!(node.pending().await.len(), 2);
        for id in block.transaction_ids() {
            assert!(node.pending().await.iter().all(|tx| tx.id != id));
        }

        node.mine_pending().await.unwrap().unwrap();
        assert!(node.pending().await.is_empty());
        assert_eq!(node.chain_len().await, 3);
        assert!(node.mine_pending().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn full_candidate_pool_drops_newest() {
        let config = NodeConfig {
            candidate_pool_capacity: 1,
            ..NodeConfig::default()
        };
        let node = Node::new(config, Blockchain::new());
        let chain = node_with_genesis().chain().await.into_blocks();

        assert_eq!(
            node.submit_block(BlockPayload::Chain(chain.clone())).await.unwrap(),
            Status::Queued
        );
        assert!(matches!(
            node.submit_block(BlockPayload::Chain(chain)).await.unwrap(),
            Status::Rejected(_)
        ));

        assert_eq!(node.reconcile_pending().await, 1);
        assert_eq!(node.chain_len().await, 1);
    }

    #[tokio::test]
    async fn adopting_a_chain_prunes_the_mempool() {
        let ahead = node_with_genesis();
        let genesis = ahead.chain().await;
        let behind = Node::new(NodeConfig::default(), genesis);

        let shared = Transaction::new("A1", "A2", 10);
        let own = Transaction::new("A3", "A4", 10);
        ahead.submit_transaction(shared.clone()).await.unwrap();
        ahead.mine_pending().await.unwrap();
        behind.submit_transaction(shared.clone()).await.unwrap();
        behind.submit_transaction(own.clone()).await.unwrap();

        assert!(behind.reconcile(ahead.chain().await.into_blocks()).await);
        assert_eq!(behind.chain().await, ahead.chain().await);
        assert_eq!(behind.pending().await, vec![own]);
    }

    #[tokio::test]
    async fn node_without_genesis_waits_for_a_peer() {
        let node = Node::new(NodeConfig::default(), Blockchain::new());
        assert!(matches!(
            node.submit_transaction(Transaction::new("A1", "A2", 1)).await,
            Err(ChainError::InsufficientBalance { .. })
        ));
        assert!(node.mine_pending().await.unwrap().is_none());

        let genesis = node_with_genesis().chain().await;
        assert!(node.reconcile(genesis.into_blocks()).await);
        assert_eq!(node.balance_of("A1").await, 100);
    }

    #[test]
    fn ping_names_both_ends() {
        let node = node_with_genesis();
        assert_eq!(node.ping("10.0.0.1:1"), "Pong to 10.0.0.1:1 from 127.0.0.1:9000");
    }
}
