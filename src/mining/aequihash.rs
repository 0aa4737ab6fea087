//! AequiHash proof of work
//!
//! Each epoch derives its own sequence of mix operations from the epoch
//! seed. Evaluation reads one dataset page per round; the light path computes
//! pages from the cache on demand and the heavy path reads them from the
//! precomputed dataset. Both go through the same `hash_with`, so for any
//! header, nonce and epoch they produce the same digest.

use std::sync::Arc;

use crate::core::block::BlockHeader;
use crate::core::params::PowParams;
use crate::crypto::hash::{keccak256, keccak256_parts, Hash};

use super::dataset::{
    epoch_seed, fnv, words_from_bytes, words_to_bytes, EpochCaches, FullDataset, LightCache,
    PageSource, PAGE_WORDS,
};

/// Words in the evaluation mix, one page wide
pub const MIX_WORDS: usize = PAGE_WORDS;

/// Primitive applied between the mix and a dataset page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MixOp {
    Add,
    Mul,
    Sub,
    Xor,
    RotL,
    RotR,
    And,
    Or,
}

impl MixOp {
    pub const ALL: [MixOp; 8] = [
        MixOp::Add,
        MixOp::Mul,
        MixOp::Sub,
        MixOp::Xor,
        MixOp::RotL,
        MixOp::RotR,
        MixOp::And,
        MixOp::Or,
    ];

    pub fn from_byte(byte: u8) -> Self {
        Self::ALL[(byte % 8) as usize]
    }

    #[inline]
    pub fn apply(self, a: u32, b: u32) -> u32 {
        match self {
            MixOp::Add => a.wrapping_add(b),
            MixOp::Mul => a.wrapping_mul(b),
            MixOp::Sub => a.wrapping_sub(b),
            MixOp::Xor => a ^ b,
            MixOp::RotL => a.rotate_left(b % 32),
            MixOp::RotR => a.rotate_right(b % 32),
            MixOp::And => a & b,
            MixOp::Or => a | b,
        }
    }
}

/// Round-by-round operation sequence for one epoch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MixProgram {
    epoch: u64,
    ops: Vec<MixOp>,
}

impl MixProgram {
    pub fn for_epoch(epoch: u64, rounds: usize) -> Self {
        let seed = epoch_seed(epoch);
        let mut ops = Vec::with_capacity(rounds);
        let mut block = 0u64;
        while ops.len() < rounds {
            let stream = keccak256_parts(&[&seed, b"mix-program", &block.to_le_bytes()]);
            ops.extend(
                stream
                    .iter()
                    .take(rounds - ops.len())
                    .map(|b| MixOp::from_byte(*b)),
            );
            block += 1;
        }
        Self { epoch, ops }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn ops(&self) -> &[MixOp] {
        &self.ops
    }
}

/// Evaluate AequiHash over `source`.
///
/// `header_bytes` is the header encoding without the nonce.
pub fn hash_with<S: PageSource + ?Sized>(
    source: &S,
    program: &MixProgram,
    header_bytes: &[u8],
    nonce: u64,
) -> Hash {
    let header_hash = keccak256(header_bytes);
    let seed = keccak256_parts(&[&header_hash, &nonce.to_le_bytes()]);

    let mut seed_words = [0u32; 8];
    words_from_bytes(&seed, &mut seed_words);
    let mut mix = [0u32; MIX_WORDS];
    for (i, s) in seed_words.iter().enumerate() {
        mix[i] = *s;
        mix[i + 8] = s ^ 0x9e37_79b9;
        mix[i + 16] = s.wrapping_mul(0x85eb_ca6b);
        mix[i + 24] = s.wrapping_mul(0xc2b2_ae35);
    }

    let pages = source.page_count().max(1);
    for (round, op) in program.ops().iter().enumerate() {
        let selector = ((fnv(round as u32 ^ mix[0], mix[round % MIX_WORDS]) as u64) << 32)
            | mix[(round + 1) % MIX_WORDS] as u64;
        let page = source.page(selector % pages);

        for (m, p) in mix.iter_mut().zip(page.iter()) {
            *m = op.apply(*m, *p);
        }
        for j in 0..MIX_WORDS {
            mix[j] = fnv(mix[j], mix[(j + 1) % MIX_WORDS]);
        }
    }

    let mut hasher = blake3::Hasher::new();
    hasher.update(&header_hash);
    hasher.update(&nonce.to_le_bytes());
    hasher.update(&source.epoch().to_le_bytes());
    hasher.update(&words_to_bytes(&mix));
    *hasher.finalize().as_bytes()
}

/// Evaluator with shared epoch caches: light path for verification, memoized
/// full datasets for mining
#[derive(Debug)]
pub struct AequiHash {
    pow: PowParams,
    caches: EpochCaches,
}

impl AequiHash {
    pub fn new(pow: PowParams) -> Self {
        Self {
            caches: EpochCaches::new(pow.clone()),
            pow,
        }
    }

    pub fn params(&self) -> &PowParams {
        &self.pow
    }

    pub fn program(&self, epoch: u64) -> MixProgram {
        MixProgram::for_epoch(epoch, self.pow.mix_rounds)
    }

    pub fn light_cache(&self, epoch: u64) -> Arc<LightCache> {
        self.caches.light(epoch)
    }

    /// Full dataset for `epoch`. Generated on first use; miners only.
    pub fn dataset(&self, epoch: u64) -> Arc<FullDataset> {
        self.caches.full(epoch)
    }

    /// Epochs whose full dataset is currently held
    pub fn cached_datasets(&self) -> Vec<u64> {
        self.caches.cached_datasets()
    }

    /// Digest through the light cache
    pub fn hash(&self, header_bytes: &[u8], nonce: u64, epoch: u64) -> Hash {
        let cache = self.light_cache(epoch);
        hash_with(cache.as_ref(), &self.program(epoch), header_bytes, nonce)
    }

    /// Digest through a precomputed dataset
    pub fn hash_heavy(&self, dataset: &FullDataset, header_bytes: &[u8], nonce: u64) -> Hash {
        hash_with(dataset, &self.program(dataset.epoch()), header_bytes, nonce)
    }

    pub fn header_hash(&self, header: &BlockHeader) -> Hash {
        self.hash(&header.pow_bytes(), header.nonce, header.epoch)
    }

    /// True when the header's digest meets its own target
    pub fn verify(&self, header: &BlockHeader) -> bool {
        header.difficulty_target.is_met_by(&self.header_hash(header))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::difficulty::Target;
    use crate::core::params::ConsensusParams;

    fn engine() -> AequiHash {
        AequiHash::new(ConsensusParams::development().pow)
    }

    fn header(epoch: u64) -> BlockHeader {
        BlockHeader {
            version: 1,
            prev_hash: [7u8; 32],
            merkle_root: [9u8; 32],
            timestamp: 1_767_225_630,
            difficulty_target: Target::MAX,
            nonce: 0,
            epoch,
        }
    }

    #[test]
    fn test_light_and_heavy_agree() {
        let engine = engine();
        for epoch in [0, 1] {
            let dataset = engine.dataset(epoch);
            let bytes = header(epoch).pow_bytes();
            for nonce in [0u64, 1, 42, u64::MAX] {
                assert_eq!(
                    engine.hash(&bytes, nonce, epoch),
                    engine.hash_heavy(&dataset, &bytes, nonce),
                    "epoch {} nonce {}",
                    epoch,
                    nonce
                );
            }
        }
    }

    #[test]
    fn test_hash_is_deterministic() {
        let bytes = header(0).pow_bytes();
        assert_eq!(engine().hash(&bytes, 5, 0), engine().hash(&bytes, 5, 0));
    }

    #[test]
    fn test_nonce_and_epoch_change_digest() {
        let engine = engine();
        let bytes = header(0).pow_bytes();
        let base = engine.hash(&bytes, 5, 0);
        assert_ne!(base, engine.hash(&bytes, 6, 0));
        assert_ne!(base, engine.hash(&bytes, 5, 1));
    }

    #[test]
    fn test_programs_vary_by_epoch() {
        let a = MixProgram::for_epoch(0, 64);
        let b = MixProgram::for_epoch(1, 64);
        assert_eq!(a.ops().len(), 64);
        assert_ne!(a, b);
        assert_eq!(a, MixProgram::for_epoch(0, 64));
    }

    #[test]
    fn test_program_longer_than_one_stream_block() {
        let program = MixProgram::for_epoch(3, 100);
        assert_eq!(program.ops().len(), 100);
        assert_eq!(&program.ops()[..64], MixProgram::for_epoch(3, 64).ops());
    }

    #[test]
    fn test_mix_ops() {
        assert_eq!(MixOp::Add.apply(u32::MAX, 2), 1);
        assert_eq!(MixOp::Sub.apply(0, 1), u32::MAX);
        assert_eq!(MixOp::RotL.apply(1, 33), 2);
        assert_eq!(MixOp::RotR.apply(1, 1), 0x8000_0000);
        assert_eq!(MixOp::from_byte(9), MixOp::Mul);
    }

    #[test]
    fn test_verify_respects_target() {
        let engine = engine();
        let mut easy = header(0);
        assert!(engine.verify(&easy));

        easy.difficulty_target = Target::from_be_bytes([0u8; 32]);
        assert!(!engine.verify(&easy));
    }
}
