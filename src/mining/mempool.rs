//! Transaction pool (mempool) for pending transfers
//!
//! Holds signed transfers waiting for a block. Every entry spends confirmed
//! outputs only, and no two entries spend the same output, so any subset of
//! the pool forms a valid block body on top of the tip it was checked
//! against. Fees are burned by the ledger but still order the pool.

use std::collections::{HashMap, HashSet};

use log::{debug, warn};
use thiserror::Error;

use crate::core::block::MAX_BLOCK_TXS;
use crate::core::chain_state::ChainState;
use crate::core::transaction::{OutPoint, Transaction, TransactionBuilder, TransactionError, TxOutput};
use crate::core::Address;
use crate::crypto::hash::{short_hex, Hash};
use crate::crypto::KeyPair;

// =============================================================================
// Configuration
// =============================================================================

/// Default maximum mempool transaction count
pub const DEFAULT_MEMPOOL_SIZE: usize = 5_000;

/// Most transfers one block can take next to its coinbase
pub const MAX_BLOCK_TRANSFERS: usize = MAX_BLOCK_TXS - 1;

// =============================================================================
// Error Types
// =============================================================================

/// Mempool errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MempoolError {
    #[error("Transaction already exists")]
    DuplicateTransaction,
    #[error("Coinbase transactions only enter the chain through a block")]
    CoinbaseNotAllowed,
    #[error("Transaction validation error: {0}")]
    ValidationError(#[from] TransactionError),
    #[error("Output {0} is spent twice by the transaction")]
    DoubleSpend(OutPoint),
    #[error("Output {outpoint} is already spent by pending transaction {existing}")]
    Conflict { outpoint: OutPoint, existing: String },
    #[error("Output {0} does not exist or is already spent")]
    MissingInput(OutPoint),
    #[error("Input {0} is signed by a key that does not own the output")]
    NotOwner(usize),
    #[error("Transaction spends {outputs} but only has {inputs}")]
    InsufficientInputs { inputs: u64, outputs: u64 },
    #[error("Insufficient funds: have {have}, need {need}")]
    InsufficientFunds { have: u64, need: u64 },
    #[error("Mempool full")]
    MempoolFull,
}

// =============================================================================
// Mempool Entry
// =============================================================================

/// Entry in the mempool with metadata
#[derive(Debug, Clone)]
pub struct MempoolEntry {
    pub tx: Transaction,
    pub txid: Hash,
    /// Inputs minus outputs
    pub fee: u64,
    /// Arrival order, breaks fee ties
    pub sequence: u64,
}

// =============================================================================
// Mempool
// =============================================================================

/// Memory pool for pending transfers
#[derive(Debug)]
pub struct Mempool {
    entries: HashMap<Hash, MempoolEntry>,
    /// Which pending transaction spends each output
    spends: HashMap<OutPoint, Hash>,
    max_size: usize,
    next_sequence: u64,
}

impl Default for Mempool {
    fn default() -> Self {
        Self::new()
    }
}

impl Mempool {
    /// Create a new mempool
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MEMPOOL_SIZE)
    }

    /// Create a mempool holding at most `max_size` transactions
    pub fn with_capacity(max_size: usize) -> Self {
        Self {
            entries: HashMap::new(),
            spends: HashMap::new(),
            max_size,
            next_sequence: 0,
        }
    }

    /// Admit a transfer checked against the chain's unspent outputs.
    /// Returns its id.
    pub fn add_transaction(
        &mut self,
        tx: Transaction,
        chain: &ChainState,
    ) -> Result<Hash, MempoolError> {
        if tx.is_coinbase() {
            return Err(MempoolError::CoinbaseNotAllowed);
        }
        let txid = tx.txid();
        if self.entries.contains_key(&txid) {
            return Err(MempoolError::DuplicateTransaction);
        }

        tx.check_structure()?;
        tx.verify_signatures()?;

        let mut seen = HashSet::with_capacity(tx.inputs.len());
        let mut input_total: u64 = 0;
        for (index, input) in tx.inputs.iter().enumerate() {
            let outpoint = input.outpoint();
            if !seen.insert(outpoint) {
                return Err(MempoolError::DoubleSpend(outpoint));
            }
            if let Some(existing) = self.spends.get(&outpoint) {
                return Err(MempoolError::Conflict {
                    outpoint,
                    existing: short_hex(existing),
                });
            }

            let output = chain
                .utxo(&outpoint)
                .ok_or(MempoolError::MissingInput(outpoint))?;
            if input.signer_address() != output.address {
                return Err(MempoolError::NotOwner(index));
            }
            input_total = input_total
                .checked_add(output.amount)
                .ok_or(TransactionError::AmountOverflow)?;
        }

        let output_total = tx.total_output()?;
        if output_total > input_total {
            return Err(MempoolError::InsufficientInputs {
                inputs: input_total,
                outputs: output_total,
            });
        }
        let fee = input_total - output_total;

        // Evict the cheapest entry if at capacity
        if self.entries.len() >= self.max_size {
            match self.lowest_fee_entry() {
                Some((lowest, lowest_fee)) if lowest_fee < fee => {
                    self.remove_transaction(&lowest);
                }
                _ => return Err(MempoolError::MempoolFull),
            }
        }

        for input in &tx.inputs {
            self.spends.insert(input.outpoint(), txid);
        }
        debug!("Pooled transaction {} paying fee {}", short_hex(&txid), fee);
        self.entries.insert(
            txid,
            MempoolEntry {
                tx,
                txid,
                fee,
                sequence: self.next_sequence,
            },
        );
        self.next_sequence += 1;

        Ok(txid)
    }

    fn lowest_fee_entry(&self) -> Option<(Hash, u64)> {
        self.entries
            .values()
            .min_by_key(|e| (e.fee, std::cmp::Reverse(e.sequence)))
            .map(|e| (e.txid, e.fee))
    }

    /// Entries ordered for mining: highest fee first, then oldest first
    pub fn ordered(&self) -> Vec<&MempoolEntry> {
        let mut entries: Vec<&MempoolEntry> = self.entries.values().collect();
        entries.sort_by(|a, b| b.fee.cmp(&a.fee).then(a.sequence.cmp(&b.sequence)));
        entries
    }

    /// Get transactions for mining (highest fee first, up to limit)
    pub fn get_transactions(&self, limit: usize) -> Vec<Transaction> {
        self.ordered()
            .into_iter()
            .take(limit.min(MAX_BLOCK_TRANSFERS))
            .map(|e| e.tx.clone())
            .collect()
    }

    /// Remove a transaction from the pool
    pub fn remove_transaction(&mut self, txid: &Hash) -> Option<Transaction> {
        let entry = self.entries.remove(txid)?;
        for input in &entry.tx.inputs {
            self.spends.remove(&input.outpoint());
        }
        Some(entry.tx)
    }

    /// Drop every entry whose inputs are no longer all unspent on the
    /// chain: confirmed transfers, their conflicts, and anything a reorg
    /// invalidated. Returns how many were dropped.
    pub fn remove_conflicting(&mut self, chain: &ChainState) -> usize {
        let stale: Vec<Hash> = self
            .entries
            .values()
            .filter(|e| {
                e.tx
                    .inputs
                    .iter()
                    .any(|input| chain.utxo(&input.outpoint()).is_none())
            })
            .map(|e| e.txid)
            .collect();

        for txid in &stale {
            self.remove_transaction(txid);
        }
        stale.len()
    }

    /// Re-admit previously pooled transactions, skipping any the chain no
    /// longer accepts
    pub fn restore(&mut self, transactions: Vec<Transaction>, chain: &ChainState) {
        for tx in transactions {
            let txid = tx.txid();
            if let Err(e) = self.add_transaction(tx, chain) {
                warn!("Dropping pooled transaction {}: {}", short_hex(&txid), e);
            }
        }
    }

    /// Every pending transaction in mining order
    pub fn transactions(&self) -> Vec<Transaction> {
        self.ordered().into_iter().map(|e| e.tx.clone()).collect()
    }

    pub fn get_entry(&self, txid: &Hash) -> Option<&MempoolEntry> {
        self.entries.get(txid)
    }

    pub fn contains(&self, txid: &Hash) -> bool {
        self.entries.contains_key(txid)
    }

    /// Whether a pending transaction already spends `outpoint`
    pub fn is_spent(&self, outpoint: &OutPoint) -> bool {
        self.spends.contains_key(outpoint)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.spends.clear();
    }

    /// Get mempool statistics
    pub fn stats(&self) -> MempoolStats {
        let ordered = self.ordered();
        MempoolStats {
            tx_count: ordered.len(),
            total_fees: ordered.iter().map(|e| e.fee as u128).sum(),
            max_fee: ordered.first().map(|e| e.fee).unwrap_or(0),
            min_fee: ordered.last().map(|e| e.fee).unwrap_or(0),
        }
    }
}

/// Mempool statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MempoolStats {
    pub tx_count: usize,
    pub total_fees: u128,
    pub max_fee: u64,
    pub min_fee: u64,
}

// =============================================================================
// Coin selection
// =============================================================================

/// Pick confirmed outputs of `owner` covering `target`, oldest outpoint
/// first, skipping outputs a pending transaction already spends.
/// Returns the picks and their total.
pub fn select_coins(
    chain: &ChainState,
    pool: &Mempool,
    owner: &Address,
    target: u64,
) -> Result<(Vec<(OutPoint, TxOutput)>, u64), MempoolError> {
    let mut selected = Vec::new();
    let mut total: u64 = 0;

    for (outpoint, output) in chain.utxos_for(owner) {
        if total >= target && !selected.is_empty() {
            break;
        }
        if pool.is_spent(&outpoint) {
            continue;
        }
        total = total
            .checked_add(output.amount)
            .ok_or(TransactionError::AmountOverflow)?;
        selected.push((outpoint, output));
    }

    if total < target || selected.is_empty() {
        return Err(MempoolError::InsufficientFunds {
            have: total,
            need: target,
        });
    }
    Ok((selected, total))
}

/// Build and sign a transfer of `amount` to `recipient` paying `fee`,
/// with change returned to the sender
pub fn create_transfer(
    chain: &ChainState,
    pool: &Mempool,
    key_pair: &KeyPair,
    recipient: Address,
    amount: u64,
    fee: u64,
    timestamp: i64,
) -> Result<Transaction, MempoolError> {
    let sender = Address::from_public_key(&key_pair.public_key());
    let target = amount
        .checked_add(fee)
        .ok_or(TransactionError::AmountOverflow)?;
    let (selected, total) = select_coins(chain, pool, &sender, target)?;

    let mut builder = TransactionBuilder::new().timestamp(timestamp);
    for (outpoint, _) in &selected {
        builder = builder.add_input(*outpoint);
    }
    builder = builder.add_output(recipient, amount);

    let change = total - target;
    if change > 0 {
        builder = builder.add_output(sender, change);
    }

    Ok(builder.build_and_sign(key_pair))
}
