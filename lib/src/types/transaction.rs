use crate::{
    MAX_AMOUNT,
    crypto::Address,
    error::{ChainError, Result},
    sha256::{Hash, canonical_bytes},
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A value transfer. Immutable once created: the `id` commits to every other field.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Transaction {
    /// SHA-256 of the transaction serialized without its id.
    pub id: Hash,
    /// sender address, empty for genesis grants
    pub from: Address,
    pub to: Address,
    pub amount: u64,
    pub timestamp: DateTime<Utc>,
}

/// Everything but the id, in serialization order.
#[derive(Serialize)]
struct TransactionBody<'a> {
    from: &'a str,
    to: &'a str,
    amount: u64,
    timestamp: &'a DateTime<Utc>,
}

impl Transaction {
    pub fn new(from: impl Into<Address>, to: impl Into<Address>, amount: u64) -> Self {
        let mut transaction = Transaction {
            id: Hash::zero(),
            from: from.into(),
            to: to.into(),
            amount,
            timestamp: Utc::now(),
        };
        transaction.id = transaction.compute_id();
        transaction
    }

    /// A grant out of thin air. Only the genesis block may carry these.
    pub fn grant(to: impl Into<Address>, amount: u64) -> Self {
        Transaction::new("", to, amount)
    }

    pub fn compute_id(&self) -> Hash {
        Hash::hash(&TransactionBody {
            from: &self.from,
            to: &self.to,
            amount: self.amount,
            timestamp: &self.timestamp,
        })
    }

    /// true if the stored id matches the content
    pub fn verify_id(&self) -> bool {
        self.id == self.compute_id()
    }

    /// Both endpoints are set and the amount is at most [`MAX_AMOUNT`].
    pub fn is_structurally_valid(&self) -> bool {
        !self.from.is_empty() && !self.to.is_empty() && self.amount <= MAX_AMOUNT
    }

    pub fn serialise(&self) -> Vec<u8> {
        canonical_bytes(self)
    }

    pub fn deserialise(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| ChainError::Malformed(e.to_string()))
    }
}
