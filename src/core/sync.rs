//! Batch import for initial synchronization
//!
//! Merkle roots, AequiHash digests and signatures depend only on the block,
//! so they are computed for the whole batch in parallel. The blocks are then
//! fed one by one through the chain state machine with those results
//! attached.

use log::{info, warn};
use rayon::prelude::*;

use super::block::Block;
use super::chain_state::{BlockStatus, ChainError, ChainState};
use super::validation::StatelessChecks;
use crate::crypto::hash::{short_hex, Hash};

/// Outcome of importing a batch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub extended: usize,
    pub side_chain: usize,
    pub reorganizations: usize,
    /// Blocks parked until their parent arrives
    pub orphaned: usize,
    pub rejected: Vec<(Hash, ChainError)>,
}

impl SyncReport {
    pub fn accepted(&self) -> usize {
        self.extended + self.side_chain + self.reorganizations
    }
}

/// Import `blocks` in order, using the system clock
pub fn import_blocks(chain: &mut ChainState, blocks: Vec<Block>) -> SyncReport {
    import_blocks_at(chain, blocks, chrono::Utc::now().timestamp())
}

/// Import `blocks` in order as if the current time were `now`
pub fn import_blocks_at(chain: &mut ChainState, blocks: Vec<Block>, now: i64) -> SyncReport {
    chain.set_syncing(true);

    let pow = chain.pow_engine();
    let checks: Vec<StatelessChecks> = blocks
        .par_iter()
        .map(|block| StatelessChecks::compute(block, &pow))
        .collect();

    let mut report = SyncReport::default();
    for (block, check) in blocks.into_iter().zip(checks.iter()) {
        match chain.process_with(block, now, Some(check)) {
            Ok(BlockStatus::Extended { .. }) => report.extended += 1,
            Ok(BlockStatus::SideChain { .. }) => report.side_chain += 1,
            Ok(BlockStatus::Reorganized { .. }) => report.reorganizations += 1,
            Err(ChainError::OrphanBlock { .. }) => report.orphaned += 1,
            Err(e) => {
                warn!("Sync rejected block {}: {}", short_hex(&check.block_hash), e);
                report.rejected.push((check.block_hash, e));
            }
        }
    }

    chain.set_syncing(false);
    info!(
        "Imported {} blocks ({} rejected, {} orphaned), tip at height {}",
        report.accepted(),
        report.rejected.len(),
        report.orphaned,
        chain.height()
    );
    report
}
