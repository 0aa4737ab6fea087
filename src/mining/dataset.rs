//! AequiHash memory: the per-epoch light cache and full dataset
//!
//! The cache is derived from the epoch seed alone. Every dataset item is a
//! pure function of the cache, so a verifier holding only the cache can
//! compute any page a miner would read from the full dataset.

use std::sync::{Arc, RwLock};
use std::time::Instant;

use log::{debug, info};
use rayon::prelude::*;

use crate::core::params::PowParams;
use crate::crypto::hash::{keccak256, keccak256_parts, Hash};

/// Words in a dataset item
pub const ITEM_WORDS: usize = 16;

/// Bytes in a dataset item
pub const ITEM_BYTES: usize = ITEM_WORDS * 4;

/// Words in a page, one dataset access per round
pub const PAGE_WORDS: usize = 2 * ITEM_WORDS;

/// Memory-hard passes over the cache after seeding it
const CACHE_ROUNDS: usize = 3;

/// Epoch caches kept warm: the current one and its predecessor
const MAX_CACHED_EPOCHS: usize = 2;

const FNV_PRIME: u32 = 0x0100_0193;

/// FNV-1 style combine used throughout AequiHash
#[inline]
pub fn fnv(a: u32, b: u32) -> u32 {
    a.wrapping_mul(FNV_PRIME) ^ b
}

/// Per-epoch seed: Keccak-256 of a domain tag and the epoch index
pub fn epoch_seed(epoch: u64) -> Hash {
    keccak256_parts(&[b"AequiHash Epoch Seed", &epoch.to_le_bytes()])
}

pub(crate) fn words_from_bytes(bytes: &[u8], out: &mut [u32]) {
    for (word, chunk) in out.iter_mut().zip(bytes.chunks_exact(4)) {
        *word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
    }
}

pub(crate) fn words_to_bytes(words: &[u32]) -> Vec<u8> {
    words.iter().flat_map(|w| w.to_le_bytes()).collect()
}

/// Anything AequiHash can read pages from
pub trait PageSource {
    fn epoch(&self) -> u64;

    fn page_count(&self) -> u64;

    fn page(&self, index: u64) -> [u32; PAGE_WORDS];
}

// =============================================================================
// Light cache
// =============================================================================

/// Verifier-side memory for one epoch
#[derive(Debug)]
pub struct LightCache {
    epoch: u64,
    words: Vec<u32>,
    dataset_items: u64,
    parents: u32,
}

impl LightCache {
    pub fn new(epoch: u64, pow: &PowParams) -> Self {
        let started = Instant::now();
        let item_count = (pow.cache_bytes / ITEM_BYTES).max(2);
        let mut words = vec![0u32; item_count * ITEM_WORDS];

        // Sequential Keccak chain from the epoch seed, eight words per link
        let mut link = keccak256(&epoch_seed(epoch));
        for (i, chunk) in words.chunks_mut(8).enumerate() {
            words_from_bytes(&link, chunk);
            link = keccak256_parts(&[&link, &(i as u64).to_le_bytes()]);
        }

        // Each item is rewritten from its predecessor and a data-dependent partner
        for _ in 0..CACHE_ROUNDS {
            for i in 0..item_count {
                let prev = (i + item_count - 1) % item_count;
                let partner = words[i * ITEM_WORDS] as usize % item_count;

                let mut mixed = [0u32; ITEM_WORDS];
                for (w, slot) in mixed.iter_mut().enumerate() {
                    *slot = words[prev * ITEM_WORDS + w] ^ words[partner * ITEM_WORDS + w];
                }
                let low = keccak256(&words_to_bytes(&mixed));
                let high = keccak256(&low);

                let item = &mut words[i * ITEM_WORDS..(i + 1) * ITEM_WORDS];
                words_from_bytes(&low, &mut item[..8]);
                words_from_bytes(&high, &mut item[8..]);
            }
        }

        debug!(
            "built light cache for epoch {} ({} KiB) in {:?}",
            epoch,
            item_count * ITEM_BYTES / 1024,
            started.elapsed()
        );

        Self {
            epoch,
            words,
            dataset_items: pow.dataset_bytes / ITEM_BYTES as u64,
            parents: pow.dataset_parents,
        }
    }

    fn item_count(&self) -> usize {
        self.words.len() / ITEM_WORDS
    }

    /// Number of items in the full dataset this cache expands to
    pub fn dataset_items(&self) -> u64 {
        self.dataset_items
    }

    /// Compute dataset item `index` from the cache
    pub fn item(&self, index: u64) -> [u32; ITEM_WORDS] {
        let n = self.item_count();
        let base = (index % n as u64) as usize * ITEM_WORDS;

        let mut mix = [0u32; ITEM_WORDS];
        mix.copy_from_slice(&self.words[base..base + ITEM_WORDS]);
        mix[0] ^= index as u32;
        mix[1] ^= (index >> 32) as u32;
        let whitened = keccak256(&words_to_bytes(&mix));
        words_from_bytes(&whitened, &mut mix[..8]);

        for p in 0..self.parents {
            let parent = fnv(index as u32 ^ p, mix[p as usize % ITEM_WORDS]) as usize % n;
            let parent_words = &self.words[parent * ITEM_WORDS..(parent + 1) * ITEM_WORDS];
            for (m, w) in mix.iter_mut().zip(parent_words) {
                *m = fnv(*m, *w);
            }
        }

        let digest = blake3::hash(&words_to_bytes(&mix));
        let mut folded = [0u32; 8];
        words_from_bytes(digest.as_bytes(), &mut folded);
        for (w, f) in folded.iter().enumerate() {
            mix[w] = *f;
            mix[w + 8] ^= *f;
        }
        mix
    }
}

impl PageSource for LightCache {
    fn epoch(&self) -> u64 {
        self.epoch
    }

    fn page_count(&self) -> u64 {
        self.dataset_items / 2
    }

    fn page(&self, index: u64) -> [u32; PAGE_WORDS] {
        let mut page = [0u32; PAGE_WORDS];
        page[..ITEM_WORDS].copy_from_slice(&self.item(2 * index));
        page[ITEM_WORDS..].copy_from_slice(&self.item(2 * index + 1));
        page
    }
}

// =============================================================================
// Full dataset
// =============================================================================

/// Miner-side memory for one epoch: every item precomputed
#[derive(Debug)]
pub struct FullDataset {
    epoch: u64,
    words: Vec<u32>,
}

impl FullDataset {
    /// Expand `cache` into the full dataset, items computed in parallel
    pub fn generate(cache: &LightCache) -> Self {
        let started = Instant::now();
        let items = cache.dataset_items() as usize;
        let mut words = vec![0u32; items * ITEM_WORDS];

        words
            .par_chunks_mut(ITEM_WORDS)
            .enumerate()
            .for_each(|(i, chunk)| chunk.copy_from_slice(&cache.item(i as u64)));

        info!(
            "Generated AequiHash dataset for epoch {} ({} MiB) in {:?}",
            cache.epoch(),
            items * ITEM_BYTES / (1024 * 1024),
            started.elapsed()
        );

        Self {
            epoch: cache.epoch(),
            words,
        }
    }

    pub fn size_bytes(&self) -> usize {
        self.words.len() * 4
    }
}

impl PageSource for FullDataset {
    fn epoch(&self) -> u64 {
        self.epoch
    }

    fn page_count(&self) -> u64 {
        (self.words.len() / PAGE_WORDS) as u64
    }

    fn page(&self, index: u64) -> [u32; PAGE_WORDS] {
        let start = index as usize * PAGE_WORDS;
        let mut page = [0u32; PAGE_WORDS];
        page.copy_from_slice(&self.words[start..start + PAGE_WORDS]);
        page
    }
}

// =============================================================================
// Cache manager
// =============================================================================

/// Shared, read-mostly store of recent light caches and full datasets
#[derive(Debug)]
pub struct EpochCaches {
    pow: PowParams,
    caches: RwLock<Vec<Arc<LightCache>>>,
    datasets: RwLock<Vec<Arc<FullDataset>>>,
}

impl EpochCaches {
    pub fn new(pow: PowParams) -> Self {
        Self {
            pow,
            caches: RwLock::new(Vec::new()),
            datasets: RwLock::new(Vec::new()),
        }
    }

    /// Light cache for `epoch`, built on first use
    pub fn light(&self, epoch: u64) -> Arc<LightCache> {
        {
            let caches = self.caches.read().unwrap_or_else(|e| e.into_inner());
            if let Some(cache) = caches.iter().find(|c| c.epoch == epoch) {
                return Arc::clone(cache);
            }
        }

        // Built outside the lock; a racing builder produces an identical cache
        let built = Arc::new(LightCache::new(epoch, &self.pow));

        let mut caches = self.caches.write().unwrap_or_else(|e| e.into_inner());
        if let Some(cache) = caches.iter().find(|c| c.epoch == epoch) {
            return Arc::clone(cache);
        }
        caches.insert(0, Arc::clone(&built));
        caches.truncate(MAX_CACHED_EPOCHS);
        built
    }

    /// Full dataset for `epoch`, generated once and then shared
    pub fn full(&self, epoch: u64) -> Arc<FullDataset> {
        {
            let datasets = self.datasets.read().unwrap_or_else(|e| e.into_inner());
            if let Some(dataset) = datasets.iter().find(|d| d.epoch == epoch) {
                return Arc::clone(dataset);
            }
        }

        // Generation holds the write lock so concurrent miners wait for one build
        let mut datasets = self.datasets.write().unwrap_or_else(|e| e.into_inner());
        if let Some(dataset) = datasets.iter().find(|d| d.epoch == epoch) {
            return Arc::clone(dataset);
        }
        let built = Arc::new(FullDataset::generate(&self.light(epoch)));
        datasets.insert(0, Arc::clone(&built));
        datasets.truncate(MAX_CACHED_EPOCHS);
        built
    }

    /// Epochs with a light cache, most recently built first
    pub fn cached_epochs(&self) -> Vec<u64> {
        self.caches
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|c| c.epoch)
            .collect()
    }

    /// Epochs with a full dataset, most recently built first
    pub fn cached_datasets(&self) -> Vec<u64> {
        self.datasets
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|d| d.epoch)
            .collect()
    }
}
