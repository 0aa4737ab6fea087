//! Proof of work: AequiHash, its epoch memory, block mining, and the pool
//! of transfers waiting for a block

pub mod aequihash;
pub mod dataset;
pub mod mempool;
pub mod miner;

pub use aequihash::{hash_with, AequiHash, MixOp, MixProgram};
pub use dataset::{EpochCaches, FullDataset, LightCache, PageSource};
pub use mempool::{create_transfer, select_coins, Mempool, MempoolEntry, MempoolError, MempoolStats};
pub use miner::{Miner, MinerError, MiningStats};
