//! Consensus parameters
//!
//! Every validating node must run with identical parameters. Mainnet values
//! are the `Default`; `development()` shrinks the proof-of-work memory and
//! opens the target so tests and local chains mine instantly.

use std::fs;
use std::path::Path;

use num_traits::Zero;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::address::Address;
use super::difficulty::Target;
use super::reward::{SplitPolicy, GENESIS_SUBSIDY, HALVING_INTERVAL, MAX_SUPPLY};

/// 2026-01-01T00:00:00Z
pub const GENESIS_TIMESTAMP: i64 = 1_767_225_600;

/// Target block interval in seconds
pub const TARGET_BLOCK_TIME: i64 = 30;

/// Blocks per AequiHash epoch
pub const EPOCH_LENGTH: u64 = 240;

/// Blocks in the rolling reward window
pub const REWARD_WINDOW: usize = 100;

#[derive(Error, Debug)]
pub enum ParamsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid parameters: {0}")]
    Invalid(String),
}

/// AequiHash memory and round parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PowParams {
    pub epoch_length: u64,
    /// Light cache size in bytes
    pub cache_bytes: usize,
    /// Full dataset size in bytes
    pub dataset_bytes: u64,
    pub mix_rounds: usize,
    /// Cache lookups folded into each dataset item
    pub dataset_parents: u32,
}

impl Default for PowParams {
    fn default() -> Self {
        Self {
            epoch_length: EPOCH_LENGTH,
            cache_bytes: 64 * 1024 * 1024,
            dataset_bytes: 4 * 1024 * 1024 * 1024,
            mix_rounds: 64,
            dataset_parents: 256,
        }
    }
}

/// A split policy and the first height it governs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyActivation {
    pub height: u64,
    pub policy: SplitPolicy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsensusParams {
    /// Network name, informational only
    pub network: String,
    pub genesis_timestamp: i64,
    pub genesis_address: Address,
    pub treasury_address: Address,

    pub target_block_time: i64,
    /// Solvetimes averaged by the retarget
    pub difficulty_window: usize,
    pub max_future_drift: i64,
    /// Easiest allowed target
    pub pow_limit: Target,
    pub pow: PowParams,

    pub genesis_subsidy: u64,
    pub halving_interval: u64,
    pub max_supply: u64,

    pub reward_window: usize,
    /// Share thresholds (basis points) separating the five tiers
    pub tier_thresholds_bps: [u32; 4],
    /// Sorted by activation height; the first entry must activate at 0
    pub split_policies: Vec<PolicyActivation>,
}

impl Default for ConsensusParams {
    fn default() -> Self {
        Self {
            network: "mainnet".to_string(),
            genesis_timestamp: GENESIS_TIMESTAMP,
            genesis_address: Address::genesis(),
            treasury_address: Address::treasury(),
            target_block_time: TARGET_BLOCK_TIME,
            difficulty_window: 60,
            max_future_drift: 120,
            pow_limit: Target::with_leading_zero_bits(16),
            pow: PowParams::default(),
            genesis_subsidy: GENESIS_SUBSIDY,
            halving_interval: HALVING_INTERVAL,
            max_supply: MAX_SUPPLY,
            reward_window: REWARD_WINDOW,
            tier_thresholds_bps: [200, 500, 1_500, 3_000],
            split_policies: vec![PolicyActivation {
                height: 0,
                policy: SplitPolicy::ProgressiveV2,
            }],
        }
    }
}

impl ConsensusParams {
    /// Tiny proof-of-work memory and the easiest target
    pub fn development() -> Self {
        Self {
            network: "development".to_string(),
            pow_limit: Target::MAX,
            pow: PowParams {
                cache_bytes: 16 * 1024,
                dataset_bytes: 256 * 1024,
                dataset_parents: 64,
                ..PowParams::default()
            },
            ..Self::default()
        }
    }

    /// Same parameters with a single policy active from genesis
    pub fn with_split_policy(mut self, policy: SplitPolicy) -> Self {
        self.split_policies = vec![PolicyActivation { height: 0, policy }];
        self
    }

    /// Policy governing the coinbase at `height`
    pub fn policy_at(&self, height: u64) -> SplitPolicy {
        self.split_policies
            .iter()
            .take_while(|activation| activation.height <= height)
            .last()
            .map(|activation| activation.policy)
            .unwrap_or(SplitPolicy::ProgressiveV2)
    }

    pub fn epoch_for_height(&self, height: u64) -> u64 {
        height / self.pow.epoch_length.max(1)
    }

    /// Reject parameter sets no chain could run under
    pub fn validate(&self) -> Result<(), ParamsError> {
        let fail = |msg: &str| Err(ParamsError::Invalid(msg.to_string()));

        if self.target_block_time <= 0 {
            return fail("target_block_time must be positive");
        }
        if self.difficulty_window == 0 || self.reward_window == 0 {
            return fail("windows must be non-empty");
        }
        if self.max_future_drift < 0 {
            return fail("max_future_drift must not be negative");
        }
        if self.pow_limit.to_biguint().is_zero() {
            return fail("pow_limit must be non-zero");
        }
        if self.pow.epoch_length == 0 || self.pow.mix_rounds == 0 {
            return fail("epoch_length and mix_rounds must be positive");
        }
        if self.pow.cache_bytes < 64 * 2 || self.pow.cache_bytes % 64 != 0 {
            return fail("cache_bytes must be a multiple of 64 holding at least two items");
        }
        if self.pow.dataset_bytes < 128 || self.pow.dataset_bytes % 128 != 0 {
            return fail("dataset_bytes must be a non-zero multiple of 128");
        }
        if self.halving_interval == 0 {
            return fail("halving_interval must be positive");
        }
        if self.genesis_subsidy > self.max_supply {
            return fail("genesis_subsidy exceeds max_supply");
        }
        if self.tier_thresholds_bps.windows(2).any(|w| w[0] >= w[1]) {
            return fail("tier thresholds must be strictly increasing");
        }
        match self.split_policies.first() {
            Some(first) if first.height == 0 => {}
            _ => return fail("split policy schedule must start at height 0"),
        }
        if self
            .split_policies
            .windows(2)
            .any(|w| w[0].height >= w[1].height)
        {
            return fail("split policy activations must be strictly increasing");
        }
        Ok(())
    }

    /// Load from a JSON file and validate
    pub fn load(path: &Path) -> Result<Self, ParamsError> {
        let data = fs::read_to_string(path)?;
        let params: Self = serde_json::from_str(&data)?;
        params.validate()?;
        Ok(params)
    }

    pub fn save(&self, path: &Path) -> Result<(), ParamsError> {
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}
