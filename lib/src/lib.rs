pub mod consensus;
pub mod crypto;
pub mod error;
pub mod network;
pub mod sha256;
pub mod types;
pub mod util;

use std::time::Duration;

use uint::construct_uint;

construct_uint! {
    // construct an unsigned 256-bit integer
    // 4 x 64bit
    pub struct U256(4);
}

/// Number of leading zero bits a block hash must have. Part of the wire contract: every node
/// must agree on it, so it is not configurable.
pub const TARGET_BITS: u32 = 3;
/// Blocks carry at most this many transactions, extra ones wait for the next block.
pub const MAX_TXS_PER_BLOCK: usize = 5;
/// Mining gives up once the nonce reaches this value (2^31 - 1).
pub const MAX_NONCE: u32 = (1 << 31) - 1;
/// Amount granted to each genesis account.
pub const GENESIS_GRANT: u64 = 100;
/// Number of accounts funded by the genesis block.
pub const GENESIS_ACCOUNTS: usize = 5;
/// Largest amount a transfer may carry, so balances stay within `i64`.
pub const MAX_AMOUNT: u64 = i64::MAX as u64;
/// Capacity of the channel holding candidate chains received from peers.
pub const CANDIDATE_POOL_CAPACITY: usize = 100;
/// How often a node tries to mine its mempool.
pub const MINE_TICK: Duration = Duration::from_secs(10);
/// How often a node pulls its peers' chains.
pub const SYNC_TICK: Duration = Duration::from_secs(3);
/// How often the standalone reconciler polls the network.
pub const CONSENSUS_TICK: Duration = Duration::from_secs(3);

pub const GENESIS_FILE: &str = "genesis.block";
pub const PEERS_FILE: &str = "nodes.txt";
pub const CONSENSUS_FILE: &str = "consensus.blockchain";

/// Proof-of-work target for a difficulty: a valid hash is strictly below `2^(256 - difficulty)`.
pub fn pow_target(difficulty: u32) -> U256 {
    if difficulty == 0 || difficulty > 255 {
        // nothing fits below 2^256 in 256 bits, and a zero target rejects everything
        return U256::zero();
    }
    U256::one() << (256 - difficulty as usize)
}
