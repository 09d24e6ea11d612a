use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChainError {
    #[error("malformed payload: {0}")]
    Malformed(String),
    #[error("block hash does not satisfy its proof-of-work")]
    InvalidPoW,
    #[error("block does not extend the current tip")]
    StaleParent,
    #[error("insufficient balance: {address} holds {balance}, needs {amount}")]
    InsufficientBalance {
        address: String,
        balance: i64,
        amount: u64,
    },
    #[error("transaction has an empty sender or recipient")]
    EmptyEndpoint,
    #[error("peer {peer} unreachable: {reason}")]
    PeerUnreachable { peer: String, reason: String },
    #[error("no nonce below {max} satisfies the target", max = crate::MAX_NONCE)]
    MiningExhausted,
    #[error("transaction {0} is already on the chain")]
    DuplicateTransaction(crate::sha256::Hash),
    #[error("invalid chain: {0}")]
    InvalidChain(String),
    #[error("snapshot I/O error: {0}")]
    Snapshot(std::io::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("identity service failed: {0}")]
    Identity(String),
}

impl From<serde_json::Error> for ChainError {
    fn from(e: serde_json::Error) -> Self {
        ChainError::Malformed(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ChainError>;
