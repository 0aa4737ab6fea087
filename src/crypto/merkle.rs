//! Merkle tree implementation for transaction commitment
//!
//! Leaves are transaction ids. Odd levels duplicate their last node.

use serde::{Deserialize, Serialize};

use super::hash::{sha256, Hash, ZERO_HASH};

fn hash_pair(left: &Hash, right: &Hash) -> Hash {
    let mut data = [0u8; 64];
    data[..32].copy_from_slice(left);
    data[32..].copy_from_slice(right);
    sha256(&data)
}

fn next_level(level: &[Hash]) -> Vec<Hash> {
    level
        .chunks(2)
        .map(|chunk| match chunk {
            [left, right] => hash_pair(left, right),
            [only] => hash_pair(only, only),
            _ => unreachable!("chunks(2) yields one or two items"),
        })
        .collect()
}

/// Calculate the merkle root from a list of transaction hashes
pub fn calculate_merkle_root(hashes: &[Hash]) -> Hash {
    if hashes.is_empty() {
        return ZERO_HASH;
    }

    let mut current_level = hashes.to_vec();
    while current_level.len() > 1 {
        current_level = next_level(&current_level);
    }
    current_level[0]
}

/// A node in the merkle tree
#[derive(Debug, Clone)]
pub struct MerkleNode {
    pub hash: Hash,
    pub left: Option<Box<MerkleNode>>,
    pub right: Option<Box<MerkleNode>>,
}

impl MerkleNode {
    /// Create a leaf node
    pub fn leaf(hash: Hash) -> Self {
        Self {
            hash,
            left: None,
            right: None,
        }
    }

    /// Create an internal node from two children
    pub fn internal(left: MerkleNode, right: MerkleNode) -> Self {
        Self {
            hash: hash_pair(&left.hash, &right.hash),
            left: Some(Box::new(left)),
            right: Some(Box::new(right)),
        }
    }
}

/// Build a complete merkle tree and return the root node
pub fn build_merkle_tree(hashes: &[Hash]) -> Option<MerkleNode> {
    if hashes.is_empty() {
        return None;
    }

    let mut nodes: Vec<MerkleNode> = hashes.iter().map(|h| MerkleNode::leaf(*h)).collect();

    while nodes.len() > 1 {
        let mut next = Vec::with_capacity(nodes.len().div_ceil(2));
        let mut iter = nodes.into_iter();
        while let Some(left) = iter.next() {
            let right = iter.next().unwrap_or_else(|| left.clone());
            next.push(MerkleNode::internal(left, right));
        }
        nodes = next;
    }

    nodes.into_iter().next()
}

/// Merkle proof for verifying transaction inclusion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleProof {
    /// Sibling hashes from leaf to root, with `true` when the sibling is on the left
    pub siblings: Vec<(Hash, bool)>,
}

impl MerkleProof {
    /// Build the inclusion proof for the leaf at `index`
    pub fn build(hashes: &[Hash], index: usize) -> Option<Self> {
        if index >= hashes.len() {
            return None;
        }

        let mut siblings = Vec::new();
        let mut level = hashes.to_vec();
        let mut position = index;

        while level.len() > 1 {
            let sibling_pos = position ^ 1;
            let sibling = level.get(sibling_pos).copied().unwrap_or(level[position]);
            siblings.push((sibling, position % 2 == 1));
            level = next_level(&level);
            position /= 2;
        }

        Some(Self { siblings })
    }

    /// Verify the proof against a root hash
    pub fn verify(&self, leaf_hash: &Hash, root_hash: &Hash) -> bool {
        let current = self
            .siblings
            .iter()
            .fold(*leaf_hash, |current, (sibling, is_left)| {
                if *is_left {
                    hash_pair(sibling, &current)
                } else {
                    hash_pair(&current, sibling)
                }
            });

        current == *root_hash
    }
}
