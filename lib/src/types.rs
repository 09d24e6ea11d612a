mod block;
mod blockchain;
mod mempool;
mod transaction;

pub use block::Block;
pub use blockchain::Blockchain;
pub use mempool::Mempool;
pub use transaction::Transaction;
