//! Emission schedule and the tiered solidarity reward split
//!
//! Every coinbase after genesis pays exactly the scheduled subsidy as three
//! outputs: the miner, the treasury and a solidarity beneficiary. The
//! percentages depend on the miner's tier, which is read from its share of
//! the rolling window, and on the split policy active at that height.

use serde::{Deserialize, Serialize};

use super::address::Address;
use super::params::ConsensusParams;
use super::transaction::TxOutput;
use super::window::RollingWindow;

// =============================================================================
// Emission
// =============================================================================

/// Base units per AEQ (nine decimals)
pub const COIN: u64 = 1_000_000_000;

/// Subsidy of the first era
pub const GENESIS_SUBSIDY: u64 = 50 * COIN;

/// Blocks per halving era
pub const HALVING_INTERVAL: u64 = 2_100_000;

/// Hard cap on issued units
pub const MAX_SUPPLY: u64 = 210_000_000 * COIN;

/// Basis-point denominator for split shares
pub const BPS_DENOMINATOR: u32 = 10_000;

/// Scheduled subsidy at `height`
pub fn block_subsidy(height: u64, params: &ConsensusParams) -> u64 {
    let halvings = height / params.halving_interval.max(1);
    if halvings >= 64 {
        0
    } else {
        params.genesis_subsidy >> halvings
    }
}

/// Total ever issued if every era runs to completion
pub fn total_scheduled_emission(params: &ConsensusParams) -> u128 {
    (0..64u32)
        .map(|era| (params.genesis_subsidy >> era) as u128 * params.halving_interval as u128)
        .sum()
}

// =============================================================================
// Tiers
// =============================================================================

/// Miner capacity class, ordered from smallest to largest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Tier {
    Small,
    Medium,
    Large,
    Industrial,
    UltraLarge,
}

impl Tier {
    pub const ALL: [Tier; 5] = [
        Tier::Small,
        Tier::Medium,
        Tier::Large,
        Tier::Industrial,
        Tier::UltraLarge,
    ];

    /// Classify a window share against increasing thresholds (basis points)
    pub fn classify(share_bps: u32, thresholds: &[u32; 4]) -> Tier {
        let index = thresholds.iter().take_while(|t| share_bps >= **t).count();
        Self::ALL[index]
    }

    pub fn name(&self) -> &'static str {
        match self {
            Tier::Small => "small",
            Tier::Medium => "medium",
            Tier::Large => "large",
            Tier::Industrial => "industrial",
            Tier::UltraLarge => "ultra-large",
        }
    }
}

// =============================================================================
// Split policies
// =============================================================================

/// Shares of a subsidy in basis points
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitShares {
    pub miner_bps: u32,
    pub solidarity_bps: u32,
    pub treasury_bps: u32,
}

impl SplitShares {
    const fn new(miner_bps: u32, solidarity_bps: u32, treasury_bps: u32) -> Self {
        Self {
            miner_bps,
            solidarity_bps,
            treasury_bps,
        }
    }

    pub fn total(&self) -> u32 {
        self.miner_bps + self.solidarity_bps + self.treasury_bps
    }
}

/// Versioned reward split policy.
///
/// Changing the active policy is a consensus change and is scheduled by
/// activation height in `ConsensusParams`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SplitPolicy {
    /// 98% miner, 1% solidarity, 1% treasury for every tier
    FlatV1,
    /// Smaller tiers give up more to solidarity, larger tiers to the treasury
    ProgressiveV2,
}

impl SplitPolicy {
    pub const ALL: [SplitPolicy; 2] = [SplitPolicy::FlatV1, SplitPolicy::ProgressiveV2];

    pub fn version(&self) -> u16 {
        match self {
            SplitPolicy::FlatV1 => 1,
            SplitPolicy::ProgressiveV2 => 2,
        }
    }

    pub fn shares(&self, tier: Tier) -> SplitShares {
        match self {
            SplitPolicy::FlatV1 => SplitShares::new(9_800, 100, 100),
            SplitPolicy::ProgressiveV2 => match tier {
                Tier::Small => SplitShares::new(5_500, 3_500, 1_000),
                Tier::Medium => SplitShares::new(6_000, 2_000, 2_000),
                Tier::Large => SplitShares::new(6_500, 1_000, 2_500),
                Tier::Industrial => SplitShares::new(6_800, 500, 2_700),
                Tier::UltraLarge => SplitShares::new(7_000, 200, 2_800),
            },
        }
    }
}

// =============================================================================
// Reward split
// =============================================================================

/// The coinbase a block at `height` must carry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardSplit {
    pub height: u64,
    pub subsidy: u64,
    pub policy: SplitPolicy,
    pub tier: Tier,
    /// Miner's window share that produced `tier`
    pub share_bps: u32,
    pub miner: TxOutput,
    pub treasury: TxOutput,
    pub solidarity: TxOutput,
}

impl RewardSplit {
    /// Canonical coinbase outputs: miner, treasury, solidarity
    pub fn outputs(&self) -> Vec<TxOutput> {
        vec![self.miner, self.treasury, self.solidarity]
    }

    pub fn total(&self) -> u64 {
        self.miner.amount + self.treasury.amount + self.solidarity.amount
    }
}

fn apply_bps(amount: u64, bps: u32) -> u64 {
    (amount as u128 * bps as u128 / BPS_DENOMINATOR as u128) as u64
}

/// Deterministic split for `miner` mining the block at `height` on top of
/// a chain whose rolling window is `window`.
///
/// Miners call this to build a coinbase and validators call it to check one.
pub fn compute_split(
    height: u64,
    miner: &Address,
    window: &RollingWindow,
    params: &ConsensusParams,
) -> RewardSplit {
    let subsidy = block_subsidy(height, params);
    let share_bps = window.share_bps(miner);
    let tier = Tier::classify(share_bps, &params.tier_thresholds_bps);
    let policy = params.policy_at(height);
    let shares = policy.shares(tier);

    let miner_amount = apply_bps(subsidy, shares.miner_bps);
    let solidarity_amount = apply_bps(subsidy, shares.solidarity_bps);
    // Rounding remainder lands on the treasury
    let treasury_amount = subsidy - miner_amount - solidarity_amount;

    let beneficiary = window
        .lowest_contributor(miner)
        .unwrap_or(params.treasury_address);

    RewardSplit {
        height,
        subsidy,
        policy,
        tier,
        share_bps,
        miner: TxOutput::new(*miner, miner_amount),
        treasury: TxOutput::new(params.treasury_address, treasury_amount),
        solidarity: TxOutput::new(beneficiary, solidarity_amount),
    }
}
