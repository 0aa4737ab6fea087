//! Aequitas: consensus core of a fair-reward proof-of-work ledger
//!
//! This crate provides:
//! - AequiHash, a memory-hard proof of work whose mixing program changes
//!   every epoch, with identical light (cache) and heavy (dataset) paths
//! - A UTXO ledger whose blocks apply and revert as explicit deltas
//! - Tiered solidarity rewards computed from a rolling window of recent miners
//! - Block validation, fork choice by cumulative work, reorgs and orphans
//! - Parallel batch import and JSON persistence
//!
//! # Example
//!
//! ```rust
//! use aequitas::core::{Address, ChainState, ConsensusParams};
//! use aequitas::mining::Miner;
//!
//! let mut chain = ChainState::new(ConsensusParams::development()).unwrap();
//! let miner = Miner::new(Address::from_bytes([7u8; 20]));
//!
//! let blocks = miner.mine_continuously(&mut chain, 2).unwrap();
//! assert_eq!(blocks.len(), 2);
//! assert_eq!(chain.height(), 2);
//! assert!(chain.balance(&miner.address) > 0);
//! ```

pub mod cli;
pub mod core;
pub mod crypto;
pub mod mining;
pub mod storage;

// Re-export commonly used types
pub use core::{
    Address, Block, BlockHeader, BlockStatus, ChainError, ChainState, ConsensusParams,
    Transaction, ValidationError,
};
pub use crypto::KeyPair;
pub use mining::{AequiHash, Mempool, Miner};
pub use storage::Storage;
