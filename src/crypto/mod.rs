//! Cryptographic utilities
//!
//! This module provides:
//! - SHA-256 and Keccak-256 hashing
//! - Ed25519 key management
//! - Merkle tree calculations and inclusion proofs

pub mod hash;
pub mod keys;
pub mod merkle;

pub use hash::{double_sha256, keccak256, keccak256_parts, sha256, Hash, ZERO_HASH};
pub use keys::{verify_signature, KeyError, KeyPair, PUBLIC_KEY_LENGTH, SIGNATURE_LENGTH};
pub use merkle::{build_merkle_tree, calculate_merkle_root, MerkleNode, MerkleProof};
