//! Longest-valid-chain selection.
//!
//! A candidate is acceptable when it passes [`Blockchain::validate`] and no transaction id occurs
//! twice in it. Among acceptable candidates the longest wins.

use std::cmp::Ordering;

use tracing::debug;

use crate::error::{ChainError, Result};
use crate::types::Blockchain;

pub fn check_candidate(candidate: &Blockchain) -> Result<()> {
    candidate.validate()?;
    if candidate.has_duplicate_transactions() {
        return Err(ChainError::InvalidChain(
            "a transaction appears more than once".to_string(),
        ));
    }
    Ok(())
}

/// Collects candidates in arrival order and keeps the longest acceptable one. A later candidate
/// of equal length does not displace the current winner.
#[derive(Debug, Default)]
pub struct LongestChain {
    best: Option<Blockchain>,
}

impl LongestChain {
    pub fn new() -> Self {
        LongestChain::default()
    }

    /// Returns true if the candidate became the new winner.
    pub fn offer(&mut self, candidate: Blockchain) -> bool {
        let best_len = self.best.as_ref().map_or(0, Blockchain::len);
        if candidate.len() <= best_len {
            return false;
        }
        if let Err(e) = check_candidate(&candidate) {
            debug!("discarding candidate of length {}: {e}", candidate.len());
            return false;
        }
        self.best = Some(candidate);
        true
    }

    pub fn into_winner(self) -> Option<Blockchain> {
        self.best
    }
}

/// Ranking between two chains, ignoring validity. Longer chains outrank shorter ones; at equal
/// length the chain whose tip hash is numerically smaller wins, so that two nodes on competing
/// forks of the same height settle on the same one.
pub fn outranks(candidate: &Blockchain, current: &Blockchain) -> bool {
    match candidate.len().cmp(&current.len()) {
        Ordering::Greater => true,
        Ordering::Less => false,
        Ordering::Equal => match (candidate.tip(), current.tip()) {
            (Some(theirs), Some(ours)) => theirs.hash.as_u256() < ours.hash.as_u256(),
            _ => false,
        },
    }
}
