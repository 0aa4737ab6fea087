//! Block implementation
//!
//! A block is a header plus an ordered transaction list whose first entry is
//! the coinbase. The header commits to the transactions through the Merkle
//! root and to the proof-of-work epoch.

use serde::{Deserialize, Serialize};

use super::codec::{encode_block, encode_header, encode_header_without_nonce};
use super::difficulty::Target;
use super::params::ConsensusParams;
use super::transaction::{Transaction, TxOutput};
use crate::crypto::hash::{double_sha256, Hash, ZERO_HASH};
use crate::crypto::{calculate_merkle_root, MerkleProof};

// =============================================================================
// Block Constants
// =============================================================================

/// Current block version
pub const BLOCK_VERSION: u32 = 1;

/// Maximum number of transactions per block
pub const MAX_BLOCK_TXS: usize = 10_000;

/// Encoded header size: version, prev, merkle, timestamp, target, nonce, epoch
pub const BLOCK_HEADER_SIZE: usize = 4 + 32 + 32 + 8 + 32 + 8 + 8;

/// Block header containing metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub version: u32,
    #[serde(with = "hex::serde")]
    pub prev_hash: Hash,
    #[serde(with = "hex::serde")]
    pub merkle_root: Hash,
    /// Unix seconds
    pub timestamp: i64,
    pub difficulty_target: Target,
    pub nonce: u64,
    pub epoch: u64,
}

impl BlockHeader {
    /// Block id: double SHA-256 of the encoded header
    pub fn hash(&self) -> Hash {
        double_sha256(&encode_header(self))
    }

    /// Bytes fed to AequiHash together with the nonce
    pub fn pow_bytes(&self) -> Vec<u8> {
        encode_header_without_nonce(self)
    }
}

/// A block in the chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
}

impl Block {
    /// Assemble an unmined block (nonce 0) over `transactions`
    pub fn new(
        prev_hash: Hash,
        transactions: Vec<Transaction>,
        timestamp: i64,
        difficulty_target: Target,
        epoch: u64,
    ) -> Self {
        let merkle_root = Self::calculate_merkle_root(&transactions);
        Self {
            header: BlockHeader {
                version: BLOCK_VERSION,
                prev_hash,
                merkle_root,
                timestamp,
                difficulty_target,
                nonce: 0,
                epoch,
            },
            transactions,
        }
    }

    /// The genesis block: a single 50 AEQ output to the genesis address.
    ///
    /// Genesis is fixed by the parameters and never checked against its
    /// proof of work.
    pub fn genesis(params: &ConsensusParams) -> Self {
        let coinbase = Transaction::coinbase(
            0,
            vec![TxOutput::new(params.genesis_address, params.genesis_subsidy)],
            params.genesis_timestamp,
        );
        Self::new(
            ZERO_HASH,
            vec![coinbase],
            params.genesis_timestamp,
            params.pow_limit,
            0,
        )
    }

    pub fn hash(&self) -> Hash {
        self.header.hash()
    }

    pub fn coinbase(&self) -> Option<&Transaction> {
        self.transactions.first().filter(|tx| tx.is_coinbase())
    }

    pub fn tx_ids(&self) -> Vec<Hash> {
        self.transactions.iter().map(Transaction::txid).collect()
    }

    /// Calculate merkle root from transactions
    pub fn calculate_merkle_root(transactions: &[Transaction]) -> Hash {
        let ids: Vec<Hash> = transactions.iter().map(Transaction::txid).collect();
        calculate_merkle_root(&ids)
    }

    /// Recompute the root and compare with the header
    pub fn verify_merkle_root(&self) -> bool {
        Self::calculate_merkle_root(&self.transactions) == self.header.merkle_root
    }

    /// Refresh the header's merkle root after editing transactions
    pub fn update_merkle_root(&mut self) {
        self.header.merkle_root = Self::calculate_merkle_root(&self.transactions);
    }

    /// Inclusion proof for the transaction at `index`
    pub fn merkle_proof(&self, index: usize) -> Option<MerkleProof> {
        MerkleProof::build(&self.tx_ids(), index)
    }

    /// Size of the wire encoding in bytes
    pub fn encoded_size(&self) -> usize {
        encode_block(self).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::address::Address;
    use crate::core::reward::COIN;

    #[test]
    fn test_genesis_block() {
        let params = ConsensusParams::default();
        let genesis = Block::genesis(&params);

        assert_eq!(genesis.header.prev_hash, ZERO_HASH);
        assert_eq!(genesis.header.epoch, 0);
        assert_eq!(genesis.transactions.len(), 1);

        let coinbase = genesis.coinbase().unwrap();
        assert_eq!(coinbase.outputs.len(), 1);
        assert_eq!(coinbase.outputs[0].address, Address::genesis());
        assert_eq!(coinbase.outputs[0].amount, 50 * COIN);
    }

    #[test]
    fn test_genesis_merkle_root_matches_header() {
        let genesis = Block::genesis(&ConsensusParams::default());
        assert!(genesis.verify_merkle_root());
    }

    #[test]
    fn test_genesis_is_deterministic() {
        let a = Block::genesis(&ConsensusParams::default());
        let b = Block::genesis(&ConsensusParams::default());
        assert_eq!(a.hash(), b.hash());
        assert_ne!(a.hash(), Block::genesis(&ConsensusParams::development()).hash());
    }

    #[test]
    fn test_header_hash_covers_nonce() {
        let mut block = Block::genesis(&ConsensusParams::development());
        let before = block.hash();
        let pow_before = block.header.pow_bytes();
        block.header.nonce += 1;
        assert_ne!(block.hash(), before);
        assert_eq!(block.header.pow_bytes(), pow_before);
    }

    #[test]
    fn test_tampered_transaction_breaks_merkle_root() {
        let mut block = Block::genesis(&ConsensusParams::development());
        block.transactions[0].outputs[0].amount += 1;
        assert!(!block.verify_merkle_root());
        block.update_merkle_root();
        assert!(block.verify_merkle_root());
    }

    #[test]
    fn test_merkle_proof_for_coinbase() {
        let block = Block::genesis(&ConsensusParams::development());
        let proof = block.merkle_proof(0).unwrap();
        assert!(proof.verify(&block.transactions[0].txid(), &block.header.merkle_root));
    }

    #[test]
    fn test_encoded_size_includes_header() {
        let block = Block::genesis(&ConsensusParams::development());
        assert!(block.encoded_size() > BLOCK_HEADER_SIZE);
    }
}
