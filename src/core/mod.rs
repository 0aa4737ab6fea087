//! Consensus core
//!
//! This module contains the rules every node applies identically:
//! - Addresses, transactions and blocks (plus their wire encoding)
//! - Difficulty retargeting and cumulative work
//! - The UTXO ledger with reversible deltas
//! - Tiered solidarity rewards over a rolling contribution window
//! - Block validation and the chain state machine (forks, reorgs, orphans)
//! - Batch import with parallel prechecks

pub mod address;
pub mod block;
pub mod chain_state;
pub mod codec;
pub mod difficulty;
pub mod params;
pub mod reward;
pub mod sync;
pub mod transaction;
pub mod utxo;
pub mod validation;
pub mod window;

pub use address::{Address, AddressError, ADDRESS_PREFIX};
pub use block::{Block, BlockHeader, BLOCK_HEADER_SIZE, BLOCK_VERSION, MAX_BLOCK_TXS};
pub use chain_state::{
    BlockStatus, ChainError, ChainPhase, ChainState, ChainStats, ChainTip, OrphanBlock,
    OrphanPool, MAX_ORPHAN_BLOCKS, ORPHAN_BLOCK_EXPIRE_TIME,
};
pub use codec::{decode_block, encode_block, BlockCodec, CodecError, SignatureMode};
pub use difficulty::{next_target, timestamp_in_range, BlockTimeStats, Target};
pub use params::{ConsensusParams, ParamsError, PowParams};
pub use reward::{block_subsidy, compute_split, RewardSplit, SplitPolicy, Tier, COIN};
pub use sync::{import_blocks, import_blocks_at, SyncReport};
pub use transaction::{
    OutPoint, Transaction, TransactionBuilder, TransactionError, TxInput, TxOutput, TxType,
};
pub use utxo::{AppliedDelta, LedgerError, UtxoSet};
pub use validation::{BlockValidator, StatelessChecks, ValidationError};
pub use window::{RollingWindow, WindowEntry};
