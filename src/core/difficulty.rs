//! Difficulty targets and retargeting
//!
//! A target is a 256-bit unsigned integer; a proof-of-work digest read as a
//! big-endian integer must not exceed it. Retargeting is a linearly weighted
//! moving average of recent solvetimes, scaled against the 30 second block
//! interval and clamped per block.

use std::fmt;

use num_bigint::BigUint;
use num_traits::{One, ToPrimitive, Zero};
use serde::{Deserialize, Serialize};

use super::block::BlockHeader;
use super::params::ConsensusParams;
use crate::crypto::hash::Hash;

/// Solvetimes inside the average are clamped to this many target intervals
pub const MAX_SOLVETIME_FACTOR: i64 = 6;

// =============================================================================
// Target
// =============================================================================

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Target(#[serde(with = "hex::serde")] [u8; 32]);

impl Target {
    /// The easiest possible target: every digest meets it
    pub const MAX: Target = Target([0xff; 32]);

    pub const fn from_be_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// `2^(256 - bits) - 1`, a target with `bits` leading zero bits
    pub fn with_leading_zero_bits(bits: u32) -> Self {
        if bits >= 256 {
            return Self([0u8; 32]);
        }
        let value = (BigUint::one() << (256 - bits)) - BigUint::one();
        Self::from_biguint(&value)
    }

    /// Convert from an integer, saturating at `Target::MAX`
    pub fn from_biguint(value: &BigUint) -> Self {
        let bytes = value.to_bytes_be();
        if bytes.len() > 32 {
            return Self::MAX;
        }
        let mut out = [0u8; 32];
        out[32 - bytes.len()..].copy_from_slice(&bytes);
        Self(out)
    }

    pub fn to_biguint(&self) -> BigUint {
        BigUint::from_bytes_be(&self.0)
    }

    /// `digest <= target` as unsigned big-endian integers
    pub fn is_met_by(&self, digest: &Hash) -> bool {
        // Equal-length big-endian byte strings order like the integers they encode
        digest <= &self.0
    }

    /// Expected hashes to find a block: `2^256 / (target + 1)`
    pub fn work(&self) -> BigUint {
        let two_256 = BigUint::one() << 256u32;
        two_256 / (self.to_biguint() + BigUint::one())
    }

    /// How many times harder than `limit` this target is
    pub fn relative_difficulty(&self, limit: &Target) -> f64 {
        let target = self.to_biguint();
        if target.is_zero() {
            return f64::INFINITY;
        }
        let limit = limit.to_biguint().to_f64().unwrap_or(f64::MAX);
        limit / target.to_f64().unwrap_or(f64::MAX)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Target({})", self)
    }
}

// =============================================================================
// Retargeting
// =============================================================================

/// Target required of the block following `recent`.
///
/// `recent` holds the tail of the chain in height order, ending at the
/// parent. Only the last `difficulty_window + 1` headers are read.
pub fn next_target(recent: &[BlockHeader], params: &ConsensusParams) -> Target {
    let Some(last) = recent.last() else {
        return params.pow_limit;
    };

    let window = params.difficulty_window.max(1);
    let headers = &recent[recent.len().saturating_sub(window + 1)..];
    if headers.len() < 2 {
        return last.difficulty_target;
    }

    let interval = params.target_block_time.max(1);
    let mut weighted_sum: u128 = 0;
    let mut weight_total: u128 = 0;
    for (i, pair) in headers.windows(2).enumerate() {
        let solvetime = (pair[1].timestamp.saturating_sub(pair[0].timestamp))
            .clamp(1, MAX_SOLVETIME_FACTOR * interval);
        let weight = (i + 1) as u128;
        weighted_sum += solvetime as u128 * weight;
        weight_total += weight;
    }

    let prev = last.difficulty_target.to_biguint();
    let scaled = &prev * BigUint::from(weighted_sum)
        / (BigUint::from(weight_total) * BigUint::from(interval as u128));

    let lower = &prev >> 1u32;
    let upper = &prev << 1u32;
    let bounded = scaled.max(lower).min(upper);

    let limit = params.pow_limit.to_biguint();
    Target::from_biguint(&bounded.max(BigUint::one()).min(limit))
}

/// Non-decreasing and at most `max_future_drift` seconds ahead of `now`
pub fn timestamp_in_range(
    prev_timestamp: i64,
    timestamp: i64,
    now: i64,
    params: &ConsensusParams,
) -> bool {
    timestamp >= prev_timestamp && timestamp <= now.saturating_add(params.max_future_drift)
}

// =============================================================================
// Block time statistics
// =============================================================================

/// Summary of recent inter-block times
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BlockTimeStats {
    pub average: f64,
    pub min: i64,
    pub max: i64,
    pub samples: usize,
}

pub fn block_time_stats(headers: &[BlockHeader]) -> Option<BlockTimeStats> {
    let times: Vec<i64> = headers
        .windows(2)
        .map(|pair| pair[1].timestamp - pair[0].timestamp)
        .collect();
    if times.is_empty() {
        return None;
    }

    Some(BlockTimeStats {
        average: times.iter().sum::<i64>() as f64 / times.len() as f64,
        min: times.iter().copied().min().unwrap_or(0),
        max: times.iter().copied().max().unwrap_or(0),
        samples: times.len(),
    })
}
