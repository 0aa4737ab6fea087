//! Chain State Management
//!
//! `ChainState` owns the authoritative ledger: the canonical chain, the UTXO
//! set, the rolling reward window and issued supply. It is the only thing
//! that mutates them, always through validated `AppliedDelta`s, and it
//! handles fork choice, atomic reorganizations and orphan blocks.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use log::{debug, info, warn};
use num_bigint::BigUint;
use num_traits::Zero;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::address::Address;
use super::block::{Block, BlockHeader};
use super::difficulty::{block_time_stats, next_target, BlockTimeStats, Target};
use super::params::ConsensusParams;
use super::reward::{compute_split, RewardSplit};
use super::transaction::{OutPoint, TxOutput};
use super::utxo::{AppliedDelta, LedgerError, UtxoSet};
use super::validation::{check_stateless, BlockValidator, StatelessChecks, ValidationError};
use super::window::{RollingWindow, WindowEntry};
use crate::crypto::hash::{short_hex, Hash};
use crate::mining::aequihash::AequiHash;

/// Maximum number of orphan blocks to keep in memory
pub const MAX_ORPHAN_BLOCKS: usize = 100;

/// Maximum time (in seconds) an orphan block can stay in the pool
pub const ORPHAN_BLOCK_EXPIRE_TIME: i64 = 3600; // 1 hour

// =============================================================================
// Errors and outcomes
// =============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChainError {
    #[error("Parent block {} is unknown", short_hex(.parent))]
    OrphanBlock { parent: Hash },
    #[error("Block rejected: {0}")]
    Rejected(#[from] ValidationError),
    #[error("Reorganization failed at block {}: {cause}; previous tip restored", short_hex(.at))]
    ReorgFailure { at: Hash, cause: ValidationError },
    #[error("Block {} is already known", short_hex(.0))]
    DuplicateBlock(Hash),
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),
    #[error("Chain data is inconsistent: {0}")]
    Corrupt(String),
}

impl ChainError {
    /// Only an orphan can become acceptable later, once its parent arrives
    pub fn is_retryable(&self) -> bool {
        matches!(self, ChainError::OrphanBlock { .. })
    }
}

/// Result of successfully processing a block
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockStatus {
    /// Block extended the best chain
    Extended { height: u64 },
    /// Block was stored on a branch with no more work than the best chain
    SideChain { height: u64 },
    /// Block made its branch the best chain
    Reorganized { disconnected: u64, connected: u64 },
}

/// Where the state machine currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChainPhase {
    Syncing,
    Validating,
    Extending,
    Rejected,
    Reorganizing,
}

impl fmt::Display for ChainPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChainPhase::Syncing => "syncing",
            ChainPhase::Validating => "validating",
            ChainPhase::Extending => "extending",
            ChainPhase::Rejected => "rejected",
            ChainPhase::Reorganizing => "reorganizing",
        };
        f.write_str(name)
    }
}

/// Represents a chain tip (end of a chain branch)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainTip {
    pub block_hash: Hash,
    pub height: u64,
    /// Total cumulative work on this branch
    pub chain_work: BigUint,
    pub first_seen: u64,
    /// Whether this is the active (best) chain
    pub is_active: bool,
}

// =============================================================================
// Orphan pool
// =============================================================================

/// An orphan block waiting for its parent
#[derive(Debug, Clone)]
pub struct OrphanBlock {
    pub block: Block,
    pub parent_hash: Hash,
    /// Unix seconds when the orphan was received
    pub received_at: i64,
}

impl OrphanBlock {
    pub fn new(block: Block, received_at: i64) -> Self {
        let parent_hash = block.header.prev_hash;
        Self {
            block,
            parent_hash,
            received_at,
        }
    }

    /// Check if this orphan has expired
    pub fn is_expired(&self, now: i64) -> bool {
        now - self.received_at > ORPHAN_BLOCK_EXPIRE_TIME
    }
}

/// Bounded pool of blocks whose parent is unknown
#[derive(Debug, Clone, Default)]
pub struct OrphanPool {
    orphans: HashMap<Hash, OrphanBlock>,
    /// Parent hash to orphan hashes, for quick lookup when the parent arrives
    by_parent: HashMap<Hash, Vec<Hash>>,
}

impl OrphanPool {
    pub fn len(&self) -> usize {
        self.orphans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orphans.is_empty()
    }

    pub fn contains(&self, hash: &Hash) -> bool {
        self.orphans.contains_key(hash)
    }

    /// Add an orphan; false if it is already pooled
    pub fn add(&mut self, block: Block, now: i64) -> bool {
        let hash = block.hash();
        if self.orphans.contains_key(&hash) {
            return false;
        }

        if self.orphans.len() >= MAX_ORPHAN_BLOCKS {
            self.prune(now);
        }
        if self.orphans.len() >= MAX_ORPHAN_BLOCKS {
            let oldest = self
                .orphans
                .iter()
                .min_by_key(|(h, o)| (o.received_at, **h))
                .map(|(h, _)| *h);
            if let Some(oldest) = oldest {
                self.remove(&oldest);
            }
        }

        let orphan = OrphanBlock::new(block, now);
        self.by_parent
            .entry(orphan.parent_hash)
            .or_default()
            .push(hash);
        self.orphans.insert(hash, orphan);
        true
    }

    /// Remove and return every orphan waiting on `parent`
    pub fn take_children(&mut self, parent: &Hash) -> Vec<Block> {
        let hashes = self.by_parent.remove(parent).unwrap_or_default();
        hashes
            .iter()
            .filter_map(|h| self.orphans.remove(h))
            .map(|o| o.block)
            .collect()
    }

    pub fn remove(&mut self, hash: &Hash) {
        if let Some(orphan) = self.orphans.remove(hash) {
            if let Some(siblings) = self.by_parent.get_mut(&orphan.parent_hash) {
                siblings.retain(|h| h != hash);
                if siblings.is_empty() {
                    self.by_parent.remove(&orphan.parent_hash);
                }
            }
        }
    }

    /// Remove expired orphans
    pub fn prune(&mut self, now: i64) {
        let expired: Vec<Hash> = self
            .orphans
            .iter()
            .filter(|(_, orphan)| orphan.is_expired(now))
            .map(|(hash, _)| *hash)
            .collect();

        for hash in expired {
            self.remove(&hash);
        }
    }
}

// =============================================================================
// Chain state
// =============================================================================

/// A block known to the index, canonical or not
#[derive(Debug, Clone)]
struct BlockEntry {
    block: Block,
    height: u64,
    cumulative_work: BigUint,
    first_seen: u64,
}

/// Chain statistics
#[derive(Debug, Clone)]
pub struct ChainStats {
    pub height: u64,
    pub tip_hash: Hash,
    pub known_blocks: usize,
    pub orphan_blocks: usize,
    pub utxo_count: usize,
    pub total_supply: u64,
    pub issued_supply: u128,
    pub target: Target,
    /// Multiple of the easiest allowed target
    pub difficulty: f64,
    pub chain_work: BigUint,
    pub block_times: Option<BlockTimeStats>,
    pub window_contributors: usize,
    pub phase: ChainPhase,
}

#[derive(Debug, Clone)]
pub struct ChainState {
    params: ConsensusParams,
    pow: Arc<AequiHash>,
    index: HashMap<Hash, BlockEntry>,
    /// Canonical block ids and headers by height; never empty
    canonical: Vec<Hash>,
    headers: Vec<BlockHeader>,
    /// Deltas of canonical blocks, kept for reverting
    deltas: HashMap<Hash, AppliedDelta>,
    utxo: UtxoSet,
    window: RollingWindow,
    issued: u128,
    orphans: OrphanPool,
    phase: ChainPhase,
    syncing: bool,
    next_seen: u64,
}

impl ChainState {
    /// Chain holding only the genesis block of `params`
    pub fn new(params: ConsensusParams) -> Result<Self, ChainError> {
        let pow = Arc::new(AequiHash::new(params.pow.clone()));
        Self::with_engine(params, pow)
    }

    /// Like `new`, sharing an existing AequiHash engine and its caches
    pub fn with_engine(params: ConsensusParams, pow: Arc<AequiHash>) -> Result<Self, ChainError> {
        let genesis = Block::genesis(&params);
        let hash = genesis.hash();
        let delta = genesis_delta(&genesis, &params);

        let mut state = Self {
            window: RollingWindow::new(params.reward_window),
            params,
            pow,
            index: HashMap::new(),
            canonical: Vec::new(),
            headers: Vec::new(),
            deltas: HashMap::new(),
            utxo: UtxoSet::new(),
            issued: 0,
            orphans: OrphanPool::default(),
            phase: ChainPhase::Validating,
            syncing: false,
            next_seen: 0,
        };

        state.connect(hash, genesis.header.clone(), delta)?;
        let work = genesis.header.difficulty_target.work();
        state.insert_entry(hash, genesis, 0, work);
        Ok(state)
    }

    /// Rebuild a chain from stored canonical `(block, delta)` records.
    ///
    /// Every block is validated again on top of the rebuilt ledger, taking
    /// only its proof of work on trust, and must reproduce its stored delta.
    pub fn restore(
        params: ConsensusParams,
        records: Vec<(Block, AppliedDelta)>,
    ) -> Result<Self, ChainError> {
        let mut state = Self::new(params)?;
        let mut records = records.into_iter();

        match records.next() {
            Some((genesis, delta))
                if genesis.hash() == state.tip_hash()
                    && state.deltas.get(&state.tip_hash()) == Some(&delta) => {}
            _ => {
                return Err(ChainError::Corrupt(
                    "stored chain does not start at this network's genesis".to_string(),
                ))
            }
        }

        for (block, stored) in records {
            let hash = block.hash();
            let height = state.height() + 1;
            if block.header.prev_hash != state.tip_hash() {
                return Err(ChainError::Corrupt(format!(
                    "stored block {} does not extend height {}",
                    short_hex(&hash),
                    state.height()
                )));
            }

            let delta = BlockValidator::new(&state, block.header.timestamp)
                .trusting_pow()
                .validate(&block)
                .map_err(|e| {
                    ChainError::Corrupt(format!(
                        "stored block {} at height {} is invalid: {}",
                        short_hex(&hash),
                        height,
                        e
                    ))
                })?;
            if delta != stored {
                return Err(ChainError::Corrupt(format!(
                    "stored delta for block {} does not match its transactions",
                    short_hex(&hash)
                )));
            }

            let work = state.tip_work() + block.header.difficulty_target.work();
            state.connect(hash, block.header.clone(), delta)?;
            state.insert_entry(hash, block, height, work);
        }

        info!(
            "Restored chain at height {} (tip {})",
            state.height(),
            short_hex(&state.tip_hash())
        );
        Ok(state)
    }

    // =========================================================================
    // Processing
    // =========================================================================

    /// Process a block using the system clock for the future-drift rule
    pub fn process_block(&mut self, block: Block) -> Result<BlockStatus, ChainError> {
        self.process_block_at(block, chrono::Utc::now().timestamp())
    }

    /// Process a block as if the current time were `now`
    pub fn process_block_at(&mut self, block: Block, now: i64) -> Result<BlockStatus, ChainError> {
        self.process_with(block, now, None)
    }

    pub(crate) fn process_with(
        &mut self,
        block: Block,
        now: i64,
        prechecked: Option<&StatelessChecks>,
    ) -> Result<BlockStatus, ChainError> {
        let hash = block.hash();
        if self.index.contains_key(&hash) || self.orphans.contains(&hash) {
            return Err(ChainError::DuplicateBlock(hash));
        }

        let parent = block.header.prev_hash;
        if !self.index.contains_key(&parent) {
            self.orphans.add(block, now);
            debug!(
                "Block {} is an orphan, waiting for {}",
                short_hex(&hash),
                short_hex(&parent)
            );
            return Err(ChainError::OrphanBlock { parent });
        }

        let prechecked = prechecked.filter(|c| c.block_hash == hash);
        let status = self.accept(hash, block, now, prechecked)?;
        self.connect_orphans(hash, now);
        Ok(status)
    }

    fn accept(
        &mut self,
        hash: Hash,
        block: Block,
        now: i64,
        prechecked: Option<&StatelessChecks>,
    ) -> Result<BlockStatus, ChainError> {
        let (parent_height, parent_work) = match self.index.get(&block.header.prev_hash) {
            Some(parent) => (parent.height, parent.cumulative_work.clone()),
            None => {
                return Err(ChainError::OrphanBlock {
                    parent: block.header.prev_hash,
                })
            }
        };
        let height = parent_height + 1;
        let work = parent_work + block.header.difficulty_target.work();
        self.phase = ChainPhase::Validating;

        if block.header.prev_hash == self.tip_hash() {
            let validated = BlockValidator::new(self, now)
                .with_prechecks(prechecked)
                .validate(&block);
            let delta = validated.map_err(|e| self.reject(&hash, height, e))?;

            self.connect(hash, block.header.clone(), delta)?;
            self.insert_entry(hash, block, height, work);
            self.phase = ChainPhase::Extending;
            info!("Block {} accepted at height {}", short_hex(&hash), height);
            return Ok(BlockStatus::Extended { height });
        }

        // Side branch: only what can be checked without its ledger
        check_stateless(&block, height, &self.params, &self.pow, prechecked)
            .map_err(|e| self.reject(&hash, height, e))?;
        self.insert_entry(hash, block, height, work.clone());

        if work > self.tip_work() {
            return self.reorganize(hash, now);
        }

        self.phase = ChainPhase::Validating;
        debug!(
            "Block {} stored on a side branch at height {}",
            short_hex(&hash),
            height
        );
        Ok(BlockStatus::SideChain { height })
    }

    fn reject(&mut self, hash: &Hash, height: u64, error: ValidationError) -> ChainError {
        self.phase = ChainPhase::Rejected;
        warn!(
            "Rejected block {} at height {}: {}",
            short_hex(hash),
            height,
            error
        );
        ChainError::Rejected(error)
    }

    /// Switch to the branch ending at `new_tip`, or leave the chain exactly
    /// as it was.
    fn reorganize(&mut self, new_tip: Hash, now: i64) -> Result<BlockStatus, ChainError> {
        self.phase = ChainPhase::Reorganizing;

        let mut branch = Vec::new();
        let mut cursor = new_tip;
        while !self.is_canonical(&cursor) {
            branch.push(cursor);
            cursor = self
                .index
                .get(&cursor)
                .map(|entry| entry.block.header.prev_hash)
                .ok_or_else(|| ChainError::Corrupt("branch leaves the index".to_string()))?;
        }
        branch.reverse();
        let fork_height = self
            .index
            .get(&cursor)
            .map(|entry| entry.height)
            .ok_or_else(|| ChainError::Corrupt("fork point missing".to_string()))?;

        let mut disconnected = Vec::new();
        while self.height() > fork_height {
            disconnected.push(self.disconnect_tip()?);
        }

        for (connected, hash) in branch.iter().enumerate() {
            let block = self
                .index
                .get(hash)
                .map(|entry| entry.block.clone())
                .ok_or_else(|| ChainError::Corrupt("branch block missing".to_string()))?;

            let validated = BlockValidator::new(self, now).validate(&block);
            match validated {
                Ok(delta) => self.connect(*hash, block.header, delta)?,
                Err(cause) => {
                    for _ in 0..connected {
                        self.disconnect_tip()?;
                    }
                    self.discard_branch(*hash);
                    for (old_hash, header, delta) in disconnected.into_iter().rev() {
                        self.connect(old_hash, header, delta)?;
                    }
                    self.phase = ChainPhase::Rejected;
                    warn!(
                        "Reorganization failed at block {}: {}; keeping tip {}",
                        short_hex(hash),
                        cause,
                        short_hex(&self.tip_hash())
                    );
                    return Err(ChainError::ReorgFailure { at: *hash, cause });
                }
            }
        }

        self.phase = ChainPhase::Extending;
        info!(
            "Chain reorganized at height {}: {} blocks disconnected, {} connected, new tip {}",
            fork_height,
            disconnected.len(),
            branch.len(),
            short_hex(&new_tip)
        );
        Ok(BlockStatus::Reorganized {
            disconnected: disconnected.len() as u64,
            connected: branch.len() as u64,
        })
    }

    /// Connect pooled orphans whose ancestry is now known
    fn connect_orphans(&mut self, parent: Hash, now: i64) {
        let mut ready = vec![parent];
        while let Some(parent) = ready.pop() {
            for orphan in self.orphans.take_children(&parent) {
                let hash = orphan.hash();
                match self.accept(hash, orphan, now, None) {
                    Ok(status) => {
                        debug!("Connected orphan {} ({:?})", short_hex(&hash), status);
                        ready.push(hash);
                    }
                    Err(e) => warn!("Dropped orphan {}: {}", short_hex(&hash), e),
                }
            }
        }
    }

    /// Forget `hash` and every indexed descendant
    fn discard_branch(&mut self, hash: Hash) {
        let mut doomed: HashSet<Hash> = HashSet::from([hash]);
        loop {
            let more: Vec<Hash> = self
                .index
                .iter()
                .filter(|(h, e)| !doomed.contains(*h) && doomed.contains(&e.block.header.prev_hash))
                .map(|(h, _)| *h)
                .collect();
            if more.is_empty() {
                break;
            }
            doomed.extend(more);
        }
        for h in &doomed {
            self.index.remove(h);
        }
        debug!("Discarded {} blocks from {}", doomed.len(), short_hex(&hash));
    }

    // =========================================================================
    // Ledger commit / revert
    // =========================================================================

    fn connect(
        &mut self,
        hash: Hash,
        header: BlockHeader,
        delta: AppliedDelta,
    ) -> Result<(), LedgerError> {
        let expected = self.canonical.len() as u64;
        if delta.height != expected {
            return Err(LedgerError::HeightMismatch {
                expected,
                got: delta.height,
            });
        }
        let issued = self
            .issued
            .checked_add(delta.subsidy as u128)
            .ok_or(LedgerError::SupplyOverflow)?;

        self.utxo.apply(&delta)?;
        let evicted = self.window.push(delta.window_entry);
        if evicted != delta.window_evicted {
            self.window.retreat(&delta.window_entry, evicted)?;
            self.utxo.revert(&delta)?;
            return Err(LedgerError::WindowMismatch(delta.height));
        }

        self.issued = issued;
        self.canonical.push(hash);
        self.headers.push(header);
        self.deltas.insert(hash, delta);
        Ok(())
    }

    fn disconnect_tip(&mut self) -> Result<(Hash, BlockHeader, AppliedDelta), ChainError> {
        if self.canonical.len() <= 1 {
            return Err(ChainError::Corrupt("cannot disconnect genesis".to_string()));
        }
        let hash = self.tip_hash();
        let delta = self
            .deltas
            .remove(&hash)
            .ok_or_else(|| ChainError::Corrupt(format!("no delta for {}", short_hex(&hash))))?;

        if let Err(e) = self.revert_delta(&delta) {
            self.deltas.insert(hash, delta);
            return Err(e.into());
        }
        self.canonical.pop();
        let header = self
            .headers
            .pop()
            .ok_or_else(|| ChainError::Corrupt("header list out of step".to_string()))?;
        Ok((hash, header, delta))
    }

    fn revert_delta(&mut self, delta: &AppliedDelta) -> Result<(), LedgerError> {
        let issued = self
            .issued
            .checked_sub(delta.subsidy as u128)
            .ok_or(LedgerError::SupplyOverflow)?;
        self.window.retreat(&delta.window_entry, delta.window_evicted)?;
        if let Err(e) = self.utxo.revert(delta) {
            self.window.push(delta.window_entry);
            return Err(e);
        }
        self.issued = issued;
        Ok(())
    }

    fn insert_entry(&mut self, hash: Hash, block: Block, height: u64, cumulative_work: BigUint) {
        let first_seen = self.next_seen;
        self.next_seen += 1;
        self.index.insert(
            hash,
            BlockEntry {
                block,
                height,
                cumulative_work,
                first_seen,
            },
        );
    }

    pub(crate) fn set_syncing(&mut self, syncing: bool) {
        self.syncing = syncing;
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub fn params(&self) -> &ConsensusParams {
        &self.params
    }

    pub fn pow(&self) -> &AequiHash {
        &self.pow
    }

    /// Shared handle to the AequiHash engine
    pub fn pow_engine(&self) -> Arc<AequiHash> {
        Arc::clone(&self.pow)
    }

    pub fn phase(&self) -> ChainPhase {
        if self.syncing {
            ChainPhase::Syncing
        } else {
            self.phase
        }
    }

    pub fn height(&self) -> u64 {
        self.canonical.len().saturating_sub(1) as u64
    }

    pub fn tip_hash(&self) -> Hash {
        self.canonical[self.canonical.len() - 1]
    }

    pub fn tip_header(&self) -> &BlockHeader {
        &self.headers[self.headers.len() - 1]
    }

    fn tip_work(&self) -> BigUint {
        self.index
            .get(&self.tip_hash())
            .map(|entry| entry.cumulative_work.clone())
            .unwrap_or_else(BigUint::zero)
    }

    /// Cumulative work of the best chain
    pub fn chain_work(&self) -> BigUint {
        self.tip_work()
    }

    /// The last `count` canonical headers in height order
    pub fn recent_headers(&self, count: usize) -> &[BlockHeader] {
        &self.headers[self.headers.len().saturating_sub(count)..]
    }

    /// Target the next block on the best chain must carry
    pub fn next_target(&self) -> Target {
        next_target(
            self.recent_headers(self.params.difficulty_window + 1),
            &self.params,
        )
    }

    pub fn is_canonical(&self, hash: &Hash) -> bool {
        self.index
            .get(hash)
            .and_then(|entry| self.canonical.get(entry.height as usize))
            .map_or(false, |canonical| canonical == hash)
    }

    pub fn contains(&self, hash: &Hash) -> bool {
        self.index.contains_key(hash)
    }

    pub fn block(&self, hash: &Hash) -> Option<&Block> {
        self.index.get(hash).map(|entry| &entry.block)
    }

    pub fn block_at_height(&self, height: u64) -> Option<&Block> {
        self.canonical
            .get(height as usize)
            .and_then(|hash| self.block(hash))
    }

    /// Delta a canonical block applied
    pub fn delta(&self, hash: &Hash) -> Option<&AppliedDelta> {
        self.deltas.get(hash)
    }

    /// Canonical blocks with their deltas, genesis first
    pub fn canonical_records(&self) -> Vec<(Block, AppliedDelta)> {
        self.canonical
            .iter()
            .filter_map(|hash| Some((self.block(hash)?.clone(), self.deltas.get(hash)?.clone())))
            .collect()
    }

    pub fn utxo_set(&self) -> &UtxoSet {
        &self.utxo
    }

    pub fn utxo(&self, outpoint: &OutPoint) -> Option<&TxOutput> {
        self.utxo.get(outpoint)
    }

    pub fn utxos_for(&self, address: &Address) -> Vec<(OutPoint, TxOutput)> {
        self.utxo.outputs_for(address)
    }

    pub fn balance(&self, address: &Address) -> u64 {
        self.utxo.balance(address)
    }

    /// Value held in unspent outputs; issued supply minus burned fees
    pub fn total_supply(&self) -> u64 {
        self.utxo.total_value()
    }

    /// Subsidy issued by all canonical coinbases
    pub fn issued_supply(&self) -> u128 {
        self.issued
    }

    pub fn window(&self) -> &RollingWindow {
        &self.window
    }

    /// Coinbase `miner` must carry in the next block
    pub fn expected_split(&self, miner: &Address) -> RewardSplit {
        compute_split(self.height() + 1, miner, &self.window, &self.params)
    }

    pub fn orphan_count(&self) -> usize {
        self.orphans.len()
    }

    /// Every branch end known to the index, best first
    pub fn chain_tips(&self) -> Vec<ChainTip> {
        let parents: HashSet<Hash> = self
            .index
            .values()
            .map(|entry| entry.block.header.prev_hash)
            .collect();
        let tip = self.tip_hash();

        let mut tips: Vec<ChainTip> = self
            .index
            .iter()
            .filter(|(hash, _)| !parents.contains(*hash))
            .map(|(hash, entry)| ChainTip {
                block_hash: *hash,
                height: entry.height,
                chain_work: entry.cumulative_work.clone(),
                first_seen: entry.first_seen,
                is_active: *hash == tip,
            })
            .collect();
        tips.sort_by(|a, b| {
            b.chain_work
                .cmp(&a.chain_work)
                .then(a.first_seen.cmp(&b.first_seen))
        });
        tips
    }

    pub fn stats(&self) -> ChainStats {
        let target = self.tip_header().difficulty_target;
        ChainStats {
            height: self.height(),
            tip_hash: self.tip_hash(),
            known_blocks: self.index.len(),
            orphan_blocks: self.orphans.len(),
            utxo_count: self.utxo.len(),
            total_supply: self.total_supply(),
            issued_supply: self.issued,
            target,
            difficulty: target.relative_difficulty(&self.params.pow_limit),
            chain_work: self.tip_work(),
            block_times: block_time_stats(self.recent_headers(self.params.difficulty_window + 1)),
            window_contributors: self.window.contributors(),
            phase: self.phase(),
        }
    }
}

/// Delta of the genesis block: one output, one window entry, no checks
fn genesis_delta(genesis: &Block, params: &ConsensusParams) -> AppliedDelta {
    let created = genesis
        .transactions
        .iter()
        .flat_map(|tx| {
            let txid = tx.txid();
            tx.outputs
                .iter()
                .enumerate()
                .map(move |(vout, output)| (OutPoint::new(txid, vout as u32), *output))
        })
        .collect();

    AppliedDelta {
        block_hash: genesis.hash(),
        height: 0,
        spent: Vec::new(),
        created,
        subsidy: params.genesis_subsidy,
        fees: 0,
        window_entry: WindowEntry {
            height: 0,
            address: params.genesis_address,
            subsidy: params.genesis_subsidy,
        },
        window_evicted: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::reward::{block_subsidy, SplitPolicy, Tier, COIN};
    use crate::core::transaction::TransactionBuilder;
    use crate::crypto::KeyPair;
    use crate::mining::miner::Miner;

    const NOW: i64 = 2_000_000_000;

    fn dev_chain() -> ChainState {
        ChainState::new(ConsensusParams::development()).unwrap()
    }

    fn miner(n: u8) -> Miner {
        Miner::new(Address::from_bytes([n; 20]))
    }

    /// Mine the next block for `miner` on `chain` without submitting it
    fn next_block(chain: &ChainState, miner: &Miner) -> Block {
        let timestamp = chain.tip_header().timestamp + chain.params().target_block_time;
        let candidate = miner.build_candidate(chain, vec![], timestamp);
        miner.seal(candidate, chain).unwrap().0
    }

    fn extend(chain: &mut ChainState, miner: &Miner, count: usize) -> Vec<Block> {
        (0..count)
            .map(|_| {
                let block = next_block(chain, miner);
                chain.process_block_at(block.clone(), NOW).unwrap();
                block
            })
            .collect()
    }

    fn ledger_snapshot(chain: &ChainState) -> (Hash, u64, u128, Vec<WindowEntry>, usize) {
        (
            chain.tip_hash(),
            chain.total_supply(),
            chain.issued_supply(),
            chain.window().entries().copied().collect(),
            chain.utxo_set().len(),
        )
    }

    #[test]
    fn test_genesis_state() {
        let chain = dev_chain();
        let params = chain.params().clone();
        let genesis = chain.block_at_height(0).unwrap();

        assert_eq!(chain.height(), 0);
        assert!(genesis.verify_merkle_root());
        let coinbase = genesis.coinbase().unwrap();
        assert_eq!(
            coinbase.outputs,
            vec![TxOutput::new(params.genesis_address, 50 * COIN)]
        );
        assert_eq!(chain.balance(&params.genesis_address), 50 * COIN);
        assert_eq!(chain.total_supply(), 50 * COIN);
        assert_eq!(chain.issued_supply(), 50 * COIN as u128);
        assert_eq!(chain.window().len(), 1);
    }

    #[test]
    fn test_genesis_is_deterministic() {
        assert_eq!(dev_chain().tip_hash(), dev_chain().tip_hash());
    }

    #[test]
    fn test_extend_chain() {
        let mut chain = dev_chain();
        let m = miner(1);
        let block = next_block(&chain, &m);
        assert_eq!(
            chain.process_block_at(block, NOW),
            Ok(BlockStatus::Extended { height: 1 })
        );
        extend(&mut chain, &m, 2);

        assert_eq!(chain.height(), 3);
        assert_eq!(chain.phase(), ChainPhase::Extending);
        assert_eq!(chain.issued_supply(), 4 * 50 * COIN as u128);
        assert_eq!(chain.total_supply(), 4 * 50 * COIN);
        assert!(chain.balance(&m.address) > 0);
    }

    #[test]
    fn test_coinbase_always_sums_to_subsidy() {
        for policy in SplitPolicy::ALL {
            let params = ConsensusParams::development().with_split_policy(policy);
            let mut chain = ChainState::new(params).unwrap();
            for n in 0..6u8 {
                for block in extend(&mut chain, &miner(n % 3 + 1), 1) {
                    let coinbase = block.coinbase().unwrap();
                    let height = chain.height();
                    assert_eq!(
                        coinbase.total_output().unwrap(),
                        block_subsidy(height, chain.params())
                    );
                }
            }
        }
    }

    #[test]
    fn test_tiers_differ_between_small_and_large_miner() {
        let params =
            ConsensusParams::development().with_split_policy(SplitPolicy::ProgressiveV2);
        let mut chain = ChainState::new(params).unwrap();
        let big = miner(1);
        extend(&mut chain, &big, 20);

        let small = miner(2);
        let small_split = chain.expected_split(&small.address);
        let big_split = chain.expected_split(&big.address);

        assert_eq!(small_split.tier, Tier::Small);
        assert_eq!(big_split.tier, Tier::UltraLarge);
        assert_eq!(small_split.total(), big_split.total());
        assert!(small_split.miner.amount < big_split.miner.amount);
        assert!(small_split.solidarity.amount > big_split.solidarity.amount);
        // Only the genesis address won less than the big miner
        assert_eq!(
            big_split.solidarity.address,
            chain.params().genesis_address
        );
    }

    #[test]
    fn test_duplicate_block() {
        let mut chain = dev_chain();
        let block = extend(&mut chain, &miner(1), 1).remove(0);
        let hash = block.hash();
        assert_eq!(
            chain.process_block_at(block, NOW),
            Err(ChainError::DuplicateBlock(hash))
        );
    }

    #[test]
    fn test_rejected_block_leaves_state_unchanged() {
        let mut chain = dev_chain();
        extend(&mut chain, &miner(1), 2);
        let before = ledger_snapshot(&chain);

        let mut block = next_block(&chain, &miner(2));
        block.header.merkle_root = [7u8; 32];
        let err = chain.process_block_at(block, NOW).unwrap_err();

        assert_eq!(err, ChainError::Rejected(ValidationError::InvalidMerkleRoot));
        assert!(!err.is_retryable());
        assert_eq!(chain.phase(), ChainPhase::Rejected);
        assert_eq!(ledger_snapshot(&chain), before);
    }

    #[test]
    fn test_double_spend_block_rejected() {
        let key = KeyPair::from_seed(&[5u8; 32]);
        let owner = Miner::new(Address::from_public_key(&key.public_key()));
        let mut chain = dev_chain();
        let funding = extend(&mut chain, &owner, 1).remove(0);
        let coinbase = &funding.transactions[0];
        let outpoint = OutPoint::new(coinbase.txid(), 0);
        let amount = coinbase.outputs[0].amount;

        let spend = |to: u8| {
            TransactionBuilder::new()
                .add_input(outpoint)
                .add_output(Address::from_bytes([to; 20]), amount)
                .build_and_sign(&key)
        };
        let timestamp = chain.tip_header().timestamp + 30;
        let candidate = owner.build_candidate(&chain, vec![spend(8), spend(9)], timestamp);
        let block = owner.seal(candidate, &chain).unwrap().0;

        assert_eq!(
            chain.process_block_at(block, NOW),
            Err(ChainError::Rejected(ValidationError::DoubleSpend(outpoint)))
        );
        assert_eq!(chain.height(), 1);
    }

    #[test]
    fn test_orphan_connects_when_parent_arrives() {
        let mut source = dev_chain();
        let blocks = extend(&mut source, &miner(1), 3);

        let mut chain = dev_chain();
        let err = chain
            .process_block_at(blocks[2].clone(), NOW)
            .unwrap_err();
        assert!(err.is_retryable());
        assert!(chain.process_block_at(blocks[1].clone(), NOW).is_err());
        assert_eq!(chain.orphan_count(), 2);

        assert_eq!(
            chain.process_block_at(blocks[0].clone(), NOW),
            Ok(BlockStatus::Extended { height: 1 })
        );
        assert_eq!(chain.height(), 3);
        assert_eq!(chain.tip_hash(), source.tip_hash());
        assert_eq!(chain.orphan_count(), 0);
    }

    #[test]
    fn test_orphan_pool_expiry_and_bound() {
        let mut pool = OrphanPool::default();
        let mut source = dev_chain();
        let blocks = extend(&mut source, &miner(1), 2);

        assert!(pool.add(blocks[1].clone(), 0));
        assert!(!pool.add(blocks[1].clone(), 0));
        pool.prune(ORPHAN_BLOCK_EXPIRE_TIME + 1);
        assert!(pool.is_empty());

        pool.add(blocks[1].clone(), 10);
        let parent = blocks[1].header.prev_hash;
        assert_eq!(pool.take_children(&parent), vec![blocks[1].clone()]);
        assert!(pool.is_empty());
    }

    #[test]
    fn test_first_seen_wins_ties() {
        let mut chain = dev_chain();
        let mut fork = chain.clone();

        let a1 = extend(&mut chain, &miner(1), 1).remove(0);
        let b1 = extend(&mut fork, &miner(2), 1).remove(0);

        assert_eq!(
            chain.process_block_at(b1, NOW),
            Ok(BlockStatus::SideChain { height: 1 })
        );
        assert_eq!(chain.tip_hash(), a1.hash());
        assert_eq!(chain.chain_tips().len(), 2);
        assert!(chain.chain_tips()[0].is_active);
    }

    #[test]
    fn test_reorganize_to_heavier_branch() {
        let mut chain = dev_chain();
        let mut fork = chain.clone();

        extend(&mut chain, &miner(1), 1);
        let branch = extend(&mut fork, &miner(2), 2);

        assert_eq!(
            chain.process_block_at(branch[0].clone(), NOW),
            Ok(BlockStatus::SideChain { height: 1 })
        );
        assert_eq!(
            chain.process_block_at(branch[1].clone(), NOW),
            Ok(BlockStatus::Reorganized {
                disconnected: 1,
                connected: 2
            })
        );

        assert_eq!(ledger_snapshot(&chain), ledger_snapshot(&fork));
        assert_eq!(chain.balance(&miner(1).address), 0);
        assert_eq!(
            chain.balance(&miner(2).address),
            fork.balance(&miner(2).address)
        );
        assert_eq!(chain.phase(), ChainPhase::Extending);
    }

    #[test]
    fn test_failed_reorg_restores_original_chain() {
        let mut chain = dev_chain();
        let mut fork = chain.clone();

        extend(&mut chain, &miner(1), 1);
        let before = ledger_snapshot(&chain);

        let b1 = extend(&mut fork, &miner(2), 1).remove(0);
        // b2 passes the stateless checks but pays the miner everything
        let timestamp = fork.tip_header().timestamp + 30;
        let mut b2 = miner(2).build_candidate(&fork, vec![], timestamp);
        let outputs = &mut b2.transactions[0].outputs;
        outputs[0].amount += outputs[1].amount + outputs[2].amount;
        outputs[1].amount = 0;
        outputs[2].amount = 0;
        b2.update_merkle_root();
        let b2 = miner(2).seal(b2, &fork).unwrap().0;

        chain.process_block_at(b1.clone(), NOW).unwrap();
        let err = chain.process_block_at(b2.clone(), NOW).unwrap_err();

        assert!(matches!(
            err,
            ChainError::ReorgFailure {
                at,
                cause: ValidationError::InvalidCoinbaseSplit(_)
            } if at == b2.hash()
        ));
        assert_eq!(ledger_snapshot(&chain), before);
        assert!(chain.contains(&b1.hash()));
        assert!(!chain.contains(&b2.hash()));
        assert_eq!(chain.phase(), ChainPhase::Rejected);
    }

    #[test]
    fn test_restore_from_records() {
        let mut chain = dev_chain();
        extend(&mut chain, &miner(1), 3);
        extend(&mut chain, &miner(2), 2);

        let restored =
            ChainState::restore(ConsensusParams::development(), chain.canonical_records())
                .unwrap();
        assert_eq!(ledger_snapshot(&restored), ledger_snapshot(&chain));
        assert_eq!(restored.chain_work(), chain.chain_work());
        assert_eq!(restored.next_target(), chain.next_target());
    }

    #[test]
    fn test_restore_rejects_foreign_genesis() {
        let chain = dev_chain();
        let mut other = ConsensusParams::development();
        other.genesis_timestamp += 1;
        assert!(matches!(
            ChainState::restore(other, chain.canonical_records()),
            Err(ChainError::Corrupt(_))
        ));
    }

    #[test]
    fn test_restore_rejects_minting_delta() {
        let chain = dev_chain();
        let genesis = chain.block_at_height(0).unwrap().clone();
        let mut header = genesis.header.clone();
        header.prev_hash = genesis.hash();
        let forged = Block {
            header,
            transactions: vec![],
        };

        let thief = Address::from_bytes([7u8; 20]);
        let minted = AppliedDelta {
            block_hash: forged.hash(),
            height: 1,
            spent: vec![],
            created: vec![(
                OutPoint::new([7u8; 32], 0),
                TxOutput::new(thief, 1_000_000 * COIN),
            )],
            subsidy: 0,
            fees: 0,
            window_entry: WindowEntry {
                height: 1,
                address: thief,
                subsidy: 0,
            },
            window_evicted: None,
        };

        let mut records = chain.canonical_records();
        records.push((forged, minted));
        assert!(matches!(
            ChainState::restore(ConsensusParams::development(), records),
            Err(ChainError::Corrupt(_))
        ));
    }

    #[test]
    fn test_restore_rejects_delta_that_differs_from_block() {
        let mut chain = dev_chain();
        extend(&mut chain, &miner(1), 2);

        let mut inflated = chain.canonical_records();
        inflated[2].1.created[0].1.amount += 1;
        assert!(matches!(
            ChainState::restore(ConsensusParams::development(), inflated),
            Err(ChainError::Corrupt(_))
        ));

        let mut bad_genesis = chain.canonical_records();
        bad_genesis[0].1.subsidy += 1;
        assert!(matches!(
            ChainState::restore(ConsensusParams::development(), bad_genesis),
            Err(ChainError::Corrupt(_))
        ));
    }

    #[test]
    fn test_reorg_across_window_evictions() {
        let mut params =
            ConsensusParams::development().with_split_policy(SplitPolicy::ProgressiveV2);
        params.reward_window = 3;
        let mut chain = ChainState::new(params.clone()).unwrap();
        // Window is full: genesis plus two blocks of miner 1
        extend(&mut chain, &miner(1), 2);
        let mut fork = chain.clone();

        // Both branches evict every earlier entry
        extend(&mut chain, &miner(2), 3);
        let branch = extend(&mut fork, &miner(3), 4);
        assert_eq!(chain.window().contributors(), 1);

        let (last, side) = branch.split_last().unwrap();
        for block in side {
            assert!(matches!(
                chain.process_block_at(block.clone(), NOW),
                Ok(BlockStatus::SideChain { .. })
            ));
        }
        assert_eq!(
            chain.process_block_at(last.clone(), NOW),
            Ok(BlockStatus::Reorganized {
                disconnected: 3,
                connected: 4
            })
        );

        let mut replay = ChainState::new(params).unwrap();
        for (block, _) in fork.canonical_records().into_iter().skip(1) {
            replay.process_block_at(block, NOW).unwrap();
        }

        assert_eq!(ledger_snapshot(&chain), ledger_snapshot(&replay));
        assert_eq!(chain.window().contributors(), replay.window().contributors());
        assert_eq!(chain.window().contributors(), 1);
        assert_eq!(chain.utxo_set().total_value(), replay.utxo_set().total_value());
        for n in 1..=3 {
            let address = miner(n).address;
            assert_eq!(
                chain.expected_split(&address),
                replay.expected_split(&address)
            );
        }
        assert_eq!(chain.expected_split(&miner(3).address).tier, Tier::UltraLarge);
        assert_eq!(chain.expected_split(&miner(2).address).tier, Tier::Small);
    }

    #[test]
    fn test_stats() {
        let mut chain = dev_chain();
        extend(&mut chain, &miner(1), 2);
        let stats = chain.stats();
        assert_eq!(stats.height, 2);
        assert_eq!(stats.known_blocks, 3);
        assert_eq!(stats.utxo_count, 7);
        assert_eq!(stats.block_times.map(|t| t.samples), Some(2));
        assert_eq!(stats.window_contributors, 2);
    }
}
