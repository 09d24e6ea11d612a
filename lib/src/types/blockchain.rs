use crate::{
    GENESIS_ACCOUNTS, GENESIS_GRANT, MAX_AMOUNT,
    crypto::AddressSource,
    error::{ChainError, Result},
    sha256::Hash,
    types::*,
    util::*,
};

use std::collections::HashSet;
use std::io::{Error as IoError, ErrorKind as IoErrorKind, Read, Result as IoResult, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Blocks from genesis to tip. Serializes as a plain JSON list of blocks.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(transparent)]
pub struct Blockchain {
    blocks: Vec<Block>,
}

impl Blockchain {
    /// An empty chain, for a node that has to wait for a peer's genesis.
    pub fn new() -> Self {
        Blockchain { blocks: vec![] }
    }

    /// Wrap blocks received from elsewhere. Nothing is checked; see [`Blockchain::validate`].
    pub fn from_blocks(blocks: Vec<Block>) -> Self {
        Blockchain { blocks }
    }

    /// Build a genesis block granting [`GENESIS_GRANT`] to [`GENESIS_ACCOUNTS`] fresh addresses.
    pub fn genesis_block(addresses: &mut impl AddressSource) -> Result<Block> {
        let mut grants = Vec::with_capacity(GENESIS_ACCOUNTS);
        for _ in 0..GENESIS_ACCOUNTS {
            grants.push(Transaction::grant(addresses.next_address()?, GENESIS_GRANT));
        }
        Block::new(grants, None)
    }

    /// Start from the genesis snapshot at `path` if there is one, otherwise create a genesis block
    /// and try to persist it. Failing to write the snapshot is logged, not fatal.
    pub fn new_or_load<P: AsRef<Path>>(
        path: P,
        addresses: &mut impl AddressSource,
    ) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            let genesis = Block::load_from_file(path).map_err(ChainError::Snapshot)?;
            if genesis.prev_hash.is_some() || !genesis.is_pow_valid() {
                return Err(ChainError::InvalidChain(format!(
                    "{} does not hold a valid genesis block",
                    path.display()
                )));
            }
            info!(hash = %genesis.hash, "loaded genesis from {}", path.display());
            return Ok(Blockchain::from_blocks(vec![genesis]));
        }

        let genesis = Blockchain::genesis_block(addresses)?;
        match genesis.save_to_file(path) {
            Ok(()) => info!(hash = %genesis.hash, "wrote genesis to {}", path.display()),
            Err(e) => warn!("failed to persist genesis to {}: {e}", path.display()),
        }
        Ok(Blockchain::from_blocks(vec![genesis]))
    }

    /// Append a block that extends the tip. An empty chain only accepts a genesis block.
    ///
    /// A transaction already on the chain, or repeated within the block, is refused.
    pub fn append(&mut self, block: Block) -> Result<()> {
        if !block.is_pow_valid() {
            return Err(ChainError::InvalidPoW);
        }
        let expected_parent = self.tip().map(|tip| tip.hash);
        if block.prev_hash != expected_parent {
            return Err(ChainError::StaleParent);
        }
        let mut seen = self.transaction_ids();
        if let Some(id) = block.transaction_ids().find(|id| !seen.insert(*id)) {
            return Err(ChainError::DuplicateTransaction(id));
        }
        self.blocks.push(block);
        Ok(())
    }

    pub fn tip(&self) -> Option<&Block> {
        self.blocks.last()
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// blocks
    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn into_blocks(self) -> Vec<Block> {
        self.blocks
    }

    /// Everything received minus everything sent. May go negative: appending does not check for
    /// overdrafts. Summed wide and clamped, so an oversized genesis grant cannot overflow it.
    pub fn balance_of(&self, address: &str) -> i64 {
        let mut balance: i128 = 0;
        for transaction in self.blocks.iter().flat_map(|block| &block.transactions) {
            if transaction.to == address {
                balance += i128::from(transaction.amount);
            }
            if transaction.from == address {
                balance -= i128::from(transaction.amount);
            }
        }
        balance.clamp(i64::MIN.into(), i64::MAX.into()) as i64
    }

    pub fn transaction_ids(&self) -> HashSet<Hash> {
        self.blocks.iter().flat_map(Block::transaction_ids).collect()
    }

    /// true if some transaction id occurs more than once anywhere in the chain
    pub fn has_duplicate_transactions(&self) -> bool {
        let mut seen = HashSet::new();
        self.blocks
            .iter()
            .flat_map(Block::transaction_ids)
            .any(|id| !seen.insert(id))
    }

    /// Check the whole chain from genesis forward.
    ///
    /// Genesis must have no parent and a valid proof-of-work; its grants are trusted up to
    /// [`MAX_AMOUNT`] each. Every later
    /// block must link to its predecessor, satisfy its proof-of-work and pass
    /// [`Block::has_valid_transfers`].
    pub fn validate(&self) -> Result<()> {
        let Some(genesis) = self.blocks.first() else {
            return Err(ChainError::InvalidChain("chain is empty".to_string()));
        };
        if genesis.prev_hash.is_some() {
            return Err(ChainError::InvalidChain("genesis has a parent".to_string()));
        }
        if !genesis.is_pow_valid() {
            return Err(ChainError::InvalidChain(
                "genesis fails its proof-of-work".to_string(),
            ));
        }
        if genesis.transactions.iter().any(|tx| tx.amount > MAX_AMOUNT) {
            return Err(ChainError::InvalidChain(
                "genesis grants more than a balance can hold".to_string(),
            ));
        }

        for (height, pair) in self.blocks.windows(2).enumerate() {
            let (parent, block) = (&pair[0], &pair[1]);
            let height = height + 1;
            if block.prev_hash != Some(parent.hash) {
                return Err(ChainError::InvalidChain(format!(
                    "block {height} does not link to its parent"
                )));
            }
            if !block.is_pow_valid() {
                return Err(ChainError::InvalidChain(format!(
                    "block {height} fails its proof-of-work"
                )));
            }
            if !block.has_valid_transfers() {
                return Err(ChainError::InvalidChain(format!(
                    "block {height} carries invalid transactions"
                )));
            }
        }
        Ok(())
    }

    pub fn is_valid_full(&self) -> bool {
        self.validate().is_ok()
    }
}

impl Saveable for Blockchain {
    fn load<I: Read>(reader: I) -> IoResult<Self> {
        serde_json::from_reader(reader)
            .map_err(|_| IoError::new(IoErrorKind::InvalidData, "Failed to deserialize Blockchain"))
    }
    fn save<O: Write>(&self, writer: O) -> IoResult<()> {
        serde_json::to_writer(writer, self)
            .map_err(|_| IoError::new(IoErrorKind::InvalidData, "Failed to serialize Blockchain"))
    }
}
