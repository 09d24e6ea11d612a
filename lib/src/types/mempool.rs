use std::collections::HashSet;

use crate::{sha256::Hash, types::Transaction};

/// Transactions waiting for a block. Admission rules live with the caller; the pool itself
/// accepts anything.
#[derive(Clone, Debug, Default)]
pub struct Mempool {
    transactions: Vec<Transaction>,
}

impl Mempool {
    pub fn new() -> Self {
        Mempool::default()
    }

    pub fn add(&mut self, transaction: Transaction) {
        self.transactions.push(transaction);
    }

    /// Snapshot of the pending transactions for block assembly. Leaves the pool untouched.
    pub fn drain(&self) -> Vec<Transaction> {
        self.transactions.clone()
    }

    pub fn clear(&mut self) {
        self.transactions.clear();
    }

    /// Drop every pending transaction whose id is in `included`.
    pub fn remove_included(&mut self, included: &HashSet<Hash>) {
        self.transactions.retain(|tx| !included.contains(&tx.id));
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }
}
