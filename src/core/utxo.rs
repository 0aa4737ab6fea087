//! UTXO ledger and applied block deltas
//!
//! The validator describes a block's effect as an `AppliedDelta` without
//! touching the ledger. Applying the delta removes the outputs it spent and
//! inserts the outputs it created; reverting does the exact opposite, so any
//! run of applies undone in reverse order restores the set and its total.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::address::Address;
use super::transaction::{OutPoint, TxOutput};
use super::window::WindowEntry;
use crate::crypto::hash::Hash;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("output {0} is not in the UTXO set")]
    MissingOutput(OutPoint),
    #[error("output {0} already exists")]
    OutputExists(OutPoint),
    #[error("stored output {0} does not match the delta")]
    OutputMismatch(OutPoint),
    #[error("reward window tail does not match block {0}")]
    WindowMismatch(u64),
    #[error("delta for height {got} applied at height {expected}")]
    HeightMismatch { expected: u64, got: u64 },
    #[error("supply accounting overflow")]
    SupplyOverflow,
}

/// Everything a block changes, computed before anything is committed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedDelta {
    #[serde(with = "hex::serde")]
    pub block_hash: Hash,
    pub height: u64,
    /// Outputs that existed before the block and are gone after it
    pub spent: Vec<(OutPoint, TxOutput)>,
    /// Outputs the block leaves unspent
    pub created: Vec<(OutPoint, TxOutput)>,
    /// New coins issued by the coinbase
    pub subsidy: u64,
    /// Burned transfer fees
    pub fees: u64,
    pub window_entry: WindowEntry,
    pub window_evicted: Option<WindowEntry>,
}

impl AppliedDelta {
    pub fn value_created(&self) -> Result<u64, LedgerError> {
        sum_amounts(&self.created)
    }

    pub fn value_spent(&self) -> Result<u64, LedgerError> {
        sum_amounts(&self.spent)
    }
}

fn sum_amounts(outputs: &[(OutPoint, TxOutput)]) -> Result<u64, LedgerError> {
    outputs
        .iter()
        .try_fold(0u64, |total, (_, o)| total.checked_add(o.amount))
        .ok_or(LedgerError::SupplyOverflow)
}

/// Outpoints listed twice in one side of a delta
fn first_duplicate(outputs: &[(OutPoint, TxOutput)]) -> Option<OutPoint> {
    let mut seen = HashSet::with_capacity(outputs.len());
    outputs
        .iter()
        .map(|(p, _)| *p)
        .find(|p| !seen.insert(*p))
}

/// `total - removed + added`, failing instead of wrapping
fn rebalance(total: u64, removed: u64, added: u64) -> Result<u64, LedgerError> {
    total
        .checked_sub(removed)
        .and_then(|t| t.checked_add(added))
        .ok_or(LedgerError::SupplyOverflow)
}

/// Authoritative set of spendable outputs
#[derive(Debug, Clone, Default)]
pub struct UtxoSet {
    outputs: HashMap<OutPoint, TxOutput>,
    total_value: u64,
}

impl UtxoSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, outpoint: &OutPoint) -> Option<&TxOutput> {
        self.outputs.get(outpoint)
    }

    pub fn contains(&self, outpoint: &OutPoint) -> bool {
        self.outputs.contains_key(outpoint)
    }

    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }

    /// Sum of every unspent output
    pub fn total_value(&self) -> u64 {
        self.total_value
    }

    pub fn balance(&self, address: &Address) -> u64 {
        self.outputs
            .values()
            .filter(|o| &o.address == address)
            .map(|o| o.amount)
            .sum()
    }

    /// Unspent outputs owned by `address`, sorted by outpoint
    pub fn outputs_for(&self, address: &Address) -> Vec<(OutPoint, TxOutput)> {
        let mut owned: Vec<_> = self
            .outputs
            .iter()
            .filter(|(_, o)| &o.address == address)
            .map(|(p, o)| (*p, *o))
            .collect();
        owned.sort_by_key(|(p, _)| *p);
        owned
    }

    /// Apply a delta. The set is left untouched when an error is returned.
    pub fn apply(&mut self, delta: &AppliedDelta) -> Result<(), LedgerError> {
        if let Some(outpoint) = first_duplicate(&delta.spent) {
            return Err(LedgerError::MissingOutput(outpoint));
        }
        if let Some(outpoint) = first_duplicate(&delta.created) {
            return Err(LedgerError::OutputExists(outpoint));
        }
        for (outpoint, output) in &delta.spent {
            match self.outputs.get(outpoint) {
                Some(existing) if existing == output => {}
                Some(_) => return Err(LedgerError::OutputMismatch(*outpoint)),
                None => return Err(LedgerError::MissingOutput(*outpoint)),
            }
        }
        for (outpoint, _) in &delta.created {
            if self.outputs.contains_key(outpoint) {
                return Err(LedgerError::OutputExists(*outpoint));
            }
        }
        let total = rebalance(
            self.total_value,
            delta.value_spent()?,
            delta.value_created()?,
        )?;

        for (outpoint, _) in &delta.spent {
            self.outputs.remove(outpoint);
        }
        for (outpoint, output) in &delta.created {
            self.outputs.insert(*outpoint, *output);
        }
        self.total_value = total;
        Ok(())
    }

    /// Undo `apply`. The set is left untouched when an error is returned.
    pub fn revert(&mut self, delta: &AppliedDelta) -> Result<(), LedgerError> {
        if let Some(outpoint) = first_duplicate(&delta.created) {
            return Err(LedgerError::MissingOutput(outpoint));
        }
        if let Some(outpoint) = first_duplicate(&delta.spent) {
            return Err(LedgerError::OutputExists(outpoint));
        }
        for (outpoint, output) in &delta.created {
            match self.outputs.get(outpoint) {
                Some(existing) if existing == output => {}
                Some(_) => return Err(LedgerError::OutputMismatch(*outpoint)),
                None => return Err(LedgerError::MissingOutput(*outpoint)),
            }
        }
        for (outpoint, _) in &delta.spent {
            if self.outputs.contains_key(outpoint) {
                return Err(LedgerError::OutputExists(*outpoint));
            }
        }
        let total = rebalance(
            self.total_value,
            delta.value_created()?,
            delta.value_spent()?,
        )?;

        for (outpoint, _) in &delta.created {
            self.outputs.remove(outpoint);
        }
        for (outpoint, output) in &delta.spent {
            self.outputs.insert(*outpoint, *output);
        }
        self.total_value = total;
        Ok(())
    }
}
