//! Cryptographic hashing utilities for the ledger
//!
//! SHA-256 is used for transaction ids, block ids and Merkle trees.
//! Keccak-256 is used for addresses and by the AequiHash seed schedule.

use sha2::{Digest, Sha256};
use sha3::Keccak256;

/// A 32-byte digest
pub type Hash = [u8; 32];

/// The all-zero hash, used as the genesis parent
pub const ZERO_HASH: Hash = [0u8; 32];

/// Computes SHA-256 hash of the input data
pub fn sha256(data: &[u8]) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Computes double SHA-256 hash (SHA-256 of SHA-256)
pub fn double_sha256(data: &[u8]) -> Hash {
    sha256(&sha256(data))
}

/// Computes Keccak-256 (the pre-standard SHA-3 padding)
pub fn keccak256(data: &[u8]) -> Hash {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Keccak-256 over several slices without concatenating them first
pub fn keccak256_parts(parts: &[&[u8]]) -> Hash {
    let mut hasher = Keccak256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

/// Hex rendering of a digest
pub fn to_hex(hash: &Hash) -> String {
    hex::encode(hash)
}

/// Parse a 64-character hex string into a digest
pub fn from_hex(s: &str) -> Option<Hash> {
    let bytes = hex::decode(s).ok()?;
    bytes.try_into().ok()
}

/// Short form for log lines
pub fn short_hex(hash: &Hash) -> String {
    hex::encode(&hash[..8])
}
