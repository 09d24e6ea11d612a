use crate::{
    MAX_NONCE, MAX_TXS_PER_BLOCK, TARGET_BITS,
    error::{ChainError, Result},
    pow_target,
    sha256::Hash,
    types::Transaction,
    util::{Saveable, TransactionsDigest},
};

use std::io::{Error as IoError, ErrorKind as IoErrorKind, Read, Result as IoResult, Write};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Block {
    /// seconds since the epoch, stamped when the block is assembled
    pub timestamp: i64,
    #[serde(rename = "txs")]
    pub transactions: Vec<Transaction>,
    /// hash of the parent block, `None` for genesis
    pub prev_hash: Option<Hash>,
    /// hash found by mining; only meaningful once `nonce` is frozen
    pub hash: Hash,
    pub nonce: u32,
    /// number of leading zero bits required of `hash`
    pub difficulty: u32,
}

impl Block {
    /// Assemble and mine a block on top of `prev_hash`. Transactions beyond
    /// [`MAX_TXS_PER_BLOCK`] are dropped.
    pub fn new(mut transactions: Vec<Transaction>, prev_hash: Option<Hash>) -> Result<Self> {
        transactions.truncate(MAX_TXS_PER_BLOCK);
        let mut block = Block {
            timestamp: Utc::now().timestamp(),
            transactions,
            prev_hash,
            hash: Hash::zero(),
            nonce: 0,
            difficulty: TARGET_BITS,
        };
        block.mine()?;
        Ok(block)
    }

    /// Search nonces from zero upwards until the hash falls below the target. The first hit is
    /// kept. Fails once the nonce reaches [`MAX_NONCE`]; a retry needs a fresh timestamp.
    pub fn mine(&mut self) -> Result<()> {
        let target = pow_target(self.difficulty);
        // the transactions do not change while mining, digest them once
        let digest = TransactionsDigest::calculate(&self.transactions);
        let mut nonce = 0;
        while nonce < MAX_NONCE {
            let hash = Hash::digest(&self.preimage_with(&digest, nonce));
            if hash.matches_target(target) {
                self.nonce = nonce;
                self.hash = hash;
                debug!(%hash, nonce, "block mined");
                return Ok(());
            }
            nonce += 1;
        }
        warn!(timestamp = self.timestamp, "nonce space exhausted");
        Err(ChainError::MiningExhausted)
    }

    /// `prev_hash || txs_digest || hex(timestamp) || hex(difficulty) || hex(nonce)`
    pub fn preimage(&self) -> Vec<u8> {
        let digest = TransactionsDigest::calculate(&self.transactions);
        self.preimage_with(&digest, self.nonce)
    }

    fn preimage_with(&self, digest: &TransactionsDigest, nonce: u32) -> Vec<u8> {
        let mut data = Vec::with_capacity(32 + 32 + 32);
        if let Some(prev_hash) = &self.prev_hash {
            data.extend_from_slice(prev_hash.as_bytes());
        }
        data.extend_from_slice(digest.as_bytes());
        data.extend_from_slice(format!("{:x}", self.timestamp).as_bytes());
        data.extend_from_slice(format!("{:x}", self.difficulty).as_bytes());
        data.extend_from_slice(format!("{nonce:x}").as_bytes());
        data
    }

    pub fn recompute_hash(&self) -> Hash {
        Hash::digest(&self.preimage())
    }

    /// The stored hash is the hash of the block's content and lies below the target. Blocks
    /// claiming any difficulty other than [`TARGET_BITS`] are rejected outright.
    pub fn is_pow_valid(&self) -> bool {
        self.difficulty == TARGET_BITS
            && self.hash == self.recompute_hash()
            && self.hash.matches_target(pow_target(self.difficulty))
    }

    /// Every transaction is a well-formed transfer with a matching id, and there are no more of
    /// them than a block may hold. Only genesis may carry grants, so this does not apply there.
    pub fn has_valid_transfers(&self) -> bool {
        self.transactions.len() <= MAX_TXS_PER_BLOCK
            && self
                .transactions
                .iter()
                .all(|tx| tx.is_structurally_valid() && tx.verify_id())
    }

    pub fn transaction_ids(&self) -> impl Iterator<Item = Hash> + '_ {
        self.transactions.iter().map(|tx| tx.id)
    }
}

impl Saveable for Block {
    fn load<I: Read>(reader: I) -> IoResult<Self> {
        serde_json::from_reader(reader)
            .map_err(|_| IoError::new(IoErrorKind::InvalidData, "Failed to deserialize Block"))
    }
    fn save<O: Write>(&self, writer: O) -> IoResult<()> {
        serde_json::to_writer(writer, self)
            .map_err(|_| IoError::new(IoErrorKind::InvalidData, "Failed to serialize Block"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::U256;

    fn unmined(transactions: Vec<Transaction>) -> Block {
        Block {
            timestamp: 0,
            transactions,
            prev_hash: None,
            hash: Hash::zero(),
            nonce: 0,
            difficulty: TARGET_BITS,
        }
    }

    #[test]
    fn mined_block_meets_target() {
        let block = Block::new(vec![Transaction::new("A1", "A2", 5)], Some(Hash::zero())).unwrap();
        assert!(block.hash.as_u256() < U256::one() << (256 - TARGET_BITS as usize));
        assert_eq!(block.hash, block.recompute_hash());
        assert!(block.is_pow_valid());
    }

    #[test]
    fn first_nonce_found_is_kept() {
        let mut block = unmined(vec![]);
        block.mine().unwrap();
        let target = pow_target(TARGET_BITS);
        for nonce in 0..block.nonce {
            let mut earlier = block.clone();
            earlier.nonce = nonce;
            assert!(!earlier.recompute_hash().matches_target(target));
        }
    }

    #[test]
    fn new_truncates_transactions() {
        let transactions = (0..8)
            .map(|i| Transaction::new("A1", "A2", i))
            .collect::<Vec<_>>();
        let block = Block::new(transactions.clone(), None).unwrap();
        assert_eq!(block.transactions, transactions[..MAX_TXS_PER_BLOCK]);
    }

    #[test]
    fn preimage_layout() {
        let mut block = unmined(vec![]);
        block.timestamp = 255;
        block.nonce = 16;
        let empty_digest = Hash::digest(b"");

        let mut expected = empty_digest.as_bytes().to_vec();
        expected.extend_from_slice(b"ff310");
        assert_eq!(block.preimage(), expected);

        let parent = Hash::digest(b"parent");
        block.prev_hash = Some(parent);
        let mut expected = parent.as_bytes().to_vec();
        expected.extend_from_slice(empty_digest.as_bytes());
        expected.extend_from_slice(b"ff310");
        assert_eq!(block.preimage(), expected);
    }

    #[test]
    fn tampering_breaks_pow() {
        let block = Block::new(vec![Transaction::new("A1", "A2", 5)], None).unwrap();

        let mut flipped = block.clone();
        let mut bytes = *flipped.hash.as_bytes();
        bytes[0] ^= 0xff;
        flipped.hash = Hash::from(bytes);
        assert!(!flipped.is_pow_valid());

        let mut rewritten = block.clone();
        rewritten.transactions = vec![Transaction::new("A1", "A2", 500)];
        assert!(!rewritten.is_pow_valid());

        let mut easier = block;
        easier.difficulty = 0;
        assert!(!easier.is_pow_valid());
    }

    #[test]
    fn transfer_checks() {
        let block = Block::new(vec![Transaction::new("A1", "A2", 5)], None).unwrap();
        assert!(block.has_valid_transfers());

        let mut with_grant = block.clone();
        with_grant.transactions.push(Transaction::grant("A6", 5));
        assert!(!with_grant.has_valid_transfers());

        let mut forged = block.clone();
        forged.transactions[0].amount = 50;
        assert!(!forged.has_valid_transfers());

        let mut oversized = block;
        oversized.transactions = (0..6).map(|i| Transaction::new("A1", "A2", i)).collect();
        assert!(!oversized.has_valid_transfers());
    }

    #[test]
    fn json_shape() {
        let block = Block::new(vec![], None).unwrap();
        let value = serde_json::to_value(&block).unwrap();
        for key in ["timestamp", "txs", "prev_hash", "hash", "nonce", "difficulty"] {
            assert!(value.get(key).is_some(), "missing {key}");
        }
        assert!(value["prev_hash"].is_null());
    }

    #[test]
    fn snapshot_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("genesis.block");
        let block = Block::new(vec![Transaction::grant("A1", 100)], None).unwrap();
        block.save_to_file(&path).unwrap();
        assert_eq!(Block::load_from_file(&path).unwrap(), block);
    }
}
