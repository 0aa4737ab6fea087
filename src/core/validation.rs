//! Block validation
//!
//! A candidate block is checked against the current tip in a fixed order:
//!
//! 1. structure
//! 2. Merkle root
//! 3. proof of work
//! 4. timestamp and difficulty
//! 5. transfers
//! 6. coinbase split
//!
//! The first failing check decides the error. Nothing is mutated; on success
//! the caller receives the `AppliedDelta` to commit.

use std::collections::{HashMap, HashSet};

use log::debug;
use thiserror::Error;

use super::address::Address;
use super::block::{Block, BLOCK_VERSION, MAX_BLOCK_TXS};
use super::chain_state::ChainState;
use super::difficulty::{timestamp_in_range, Target};
use super::params::ConsensusParams;
use super::reward::{block_subsidy, compute_split};
use super::transaction::{coinbase_memo, OutPoint, Transaction, TransactionError, TxOutput};
use super::utxo::AppliedDelta;
use super::window::WindowEntry;
use crate::crypto::hash::{short_hex, Hash};
use crate::crypto::calculate_merkle_root;
use crate::mining::aequihash::AequiHash;

// =============================================================================
// Error Types
// =============================================================================

/// Why a block was rejected. Every variant is final for that block.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Malformed block: {0}")]
    MalformedBlock(String),
    #[error("Invalid transaction {index}: {reason}")]
    InvalidTransaction {
        index: usize,
        #[source]
        reason: TransactionError,
    },
    #[error("Merkle root does not match the transactions")]
    InvalidMerkleRoot,
    #[error("AequiHash digest does not meet the target")]
    InvalidProofOfWork,
    #[error("Difficulty target {got} does not match required {expected}")]
    DifficultyMismatch { expected: Target, got: Target },
    #[error("Timestamp {timestamp} outside [{min}, {max}]")]
    TimestampOutOfRange { timestamp: i64, min: i64, max: i64 },
    #[error("Output {0} is spent twice in the block")]
    DoubleSpend(OutPoint),
    #[error("Output {0} does not exist or is already spent")]
    MissingInput(OutPoint),
    #[error("Invalid signature on transaction {tx} input {input}")]
    InvalidSignature { tx: usize, input: usize },
    #[error("Transaction {tx} spends {outputs} but only has {inputs}")]
    InsufficientInputs { tx: usize, inputs: u64, outputs: u64 },
    #[error("Invalid coinbase split: {0}")]
    InvalidCoinbaseSplit(String),
    #[error("Solidarity output pays {got}, expected {expected}")]
    InvalidSolidarityRecipient { expected: Address, got: Address },
    #[error("Subsidy {subsidy} would push issued supply {issued} past the cap {cap}")]
    SupplyCapExceeded { issued: u128, subsidy: u64, cap: u64 },
}

// =============================================================================
// Stateless prechecks
// =============================================================================

/// Results of the checks that need nothing but the block itself.
///
/// Computed ahead of time (in parallel during sync) and handed to the
/// validator, which reports them at their usual position in the order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatelessChecks {
    pub block_hash: Hash,
    pub merkle_ok: bool,
    pub pow_ok: bool,
    /// Per transaction, per input Ed25519 verdicts
    pub signatures: Vec<Vec<bool>>,
}

impl StatelessChecks {
    pub fn compute(block: &Block, pow: &AequiHash) -> Self {
        Self {
            block_hash: block.hash(),
            merkle_ok: block.verify_merkle_root(),
            pow_ok: pow.verify(&block.header),
            signatures: block
                .transactions
                .iter()
                .map(Transaction::signature_results)
                .collect(),
        }
    }

    /// Like `compute`, but records the proof of work as met without
    /// evaluating AequiHash
    pub fn without_pow(block: &Block) -> Self {
        Self {
            block_hash: block.hash(),
            merkle_ok: block.verify_merkle_root(),
            pow_ok: true,
            signatures: block
                .transactions
                .iter()
                .map(Transaction::signature_results)
                .collect(),
        }
    }
}

/// Structural rules; returns the transaction ids for the later steps
pub fn check_structure(
    block: &Block,
    height: u64,
    params: &ConsensusParams,
) -> Result<Vec<Hash>, ValidationError> {
    let malformed = |msg: String| Err(ValidationError::MalformedBlock(msg));

    if block.header.version != BLOCK_VERSION {
        return malformed(format!("unknown block version {}", block.header.version));
    }
    if block.transactions.is_empty() {
        return malformed("no transactions".to_string());
    }
    if block.transactions.len() > MAX_BLOCK_TXS {
        return malformed(format!(
            "{} transactions exceeds the limit of {}",
            block.transactions.len(),
            MAX_BLOCK_TXS
        ));
    }

    let expected_epoch = params.epoch_for_height(height);
    if block.header.epoch != expected_epoch {
        return malformed(format!(
            "epoch {} at height {}, expected {}",
            block.header.epoch, height, expected_epoch
        ));
    }

    if !block.transactions[0].is_coinbase() {
        return malformed("first transaction is not a coinbase".to_string());
    }
    if let Some(extra) = block.transactions[1..].iter().position(Transaction::is_coinbase) {
        return malformed(format!("second coinbase at index {}", extra + 1));
    }
    if block.transactions[0].memo != coinbase_memo(height) {
        return malformed("coinbase memo does not name this height".to_string());
    }

    for (index, tx) in block.transactions.iter().enumerate() {
        tx.check_structure()
            .map_err(|reason| ValidationError::InvalidTransaction { index, reason })?;
    }

    let txids = block.tx_ids();
    let mut seen = HashSet::with_capacity(txids.len());
    for txid in &txids {
        if !seen.insert(*txid) {
            return malformed(format!("duplicate transaction {}", short_hex(txid)));
        }
    }
    Ok(txids)
}

/// Steps 1 to 3: everything that does not depend on the ledger
pub fn check_stateless(
    block: &Block,
    height: u64,
    params: &ConsensusParams,
    pow: &AequiHash,
    prechecked: Option<&StatelessChecks>,
) -> Result<Vec<Hash>, ValidationError> {
    let txids = check_structure(block, height, params)?;

    let merkle_ok = match prechecked {
        Some(checks) => checks.merkle_ok,
        None => calculate_merkle_root(&txids) == block.header.merkle_root,
    };
    if !merkle_ok {
        return Err(ValidationError::InvalidMerkleRoot);
    }

    let pow_ok = match prechecked {
        Some(checks) => checks.pow_ok,
        None => pow.verify(&block.header),
    };
    if !pow_ok {
        return Err(ValidationError::InvalidProofOfWork);
    }

    Ok(txids)
}

// =============================================================================
// Full validation
// =============================================================================

/// Validates blocks that extend the current tip of a chain
pub struct BlockValidator<'a> {
    chain: &'a ChainState,
    now: i64,
    prechecked: Option<&'a StatelessChecks>,
    trust_pow: bool,
}

/// Ledger effect of the transfers in a block
struct TransferEffect {
    spent: Vec<(OutPoint, TxOutput)>,
    created: Vec<(OutPoint, TxOutput)>,
    fees: u64,
}

impl<'a> BlockValidator<'a> {
    pub fn new(chain: &'a ChainState, now: i64) -> Self {
        Self {
            chain,
            now,
            prechecked: None,
            trust_pow: false,
        }
    }

    /// Use precomputed stateless results; ignored if they describe another block
    pub fn with_prechecks(mut self, checks: Option<&'a StatelessChecks>) -> Self {
        self.prechecked = checks;
        self
    }

    /// Skip AequiHash evaluation. Only for blocks this node already
    /// accepted once, such as a stored snapshot being replayed.
    pub fn trusting_pow(mut self) -> Self {
        self.trust_pow = true;
        self
    }

    pub fn validate(&self, block: &Block) -> Result<AppliedDelta, ValidationError> {
        if block.header.prev_hash != self.chain.tip_hash() {
            return Err(ValidationError::MalformedBlock(
                "parent is not the current tip".to_string(),
            ));
        }

        let params = self.chain.params();
        let height = self.chain.height() + 1;
        let block_hash = block.hash();
        let own_checks;
        let prechecked = if self.trust_pow {
            own_checks = StatelessChecks::without_pow(block);
            Some(&own_checks)
        } else {
            self.prechecked.filter(|c| {
                c.block_hash == block_hash && c.signatures.len() == block.transactions.len()
            })
        };

        let txids = check_stateless(block, height, params, self.chain.pow(), prechecked)?;
        debug!("block {} passed stateless checks", short_hex(&block_hash));

        self.check_timing(block)?;
        let effect = self.check_transfers(block, &txids, prechecked)?;
        let window_entry = self.check_coinbase(block, height)?;

        debug!(
            "block {} valid at height {} ({} spent, {} created)",
            short_hex(&block_hash),
            height,
            effect.spent.len(),
            effect.created.len()
        );

        Ok(AppliedDelta {
            block_hash,
            height,
            spent: effect.spent,
            created: effect.created,
            subsidy: window_entry.subsidy,
            fees: effect.fees,
            window_evicted: self.chain.window().next_eviction(),
            window_entry,
        })
    }

    /// Step 4
    fn check_timing(&self, block: &Block) -> Result<(), ValidationError> {
        let params = self.chain.params();
        let parent = self.chain.tip_header();
        let timestamp = block.header.timestamp;

        if !timestamp_in_range(parent.timestamp, timestamp, self.now, params) {
            return Err(ValidationError::TimestampOutOfRange {
                timestamp,
                min: parent.timestamp,
                max: self.now.saturating_add(params.max_future_drift),
            });
        }

        let expected = self.chain.next_target();
        if block.header.difficulty_target != expected {
            return Err(ValidationError::DifficultyMismatch {
                expected,
                got: block.header.difficulty_target,
            });
        }
        Ok(())
    }

    /// Step 5. Later transactions may spend outputs of earlier ones.
    fn check_transfers(
        &self,
        block: &Block,
        txids: &[Hash],
        prechecked: Option<&StatelessChecks>,
    ) -> Result<TransferEffect, ValidationError> {
        let utxo = self.chain.utxo_set();
        let mut in_block: HashMap<OutPoint, TxOutput> = HashMap::new();
        let mut consumed: HashSet<OutPoint> = HashSet::new();
        let mut spent = Vec::new();
        let mut fees: u64 = 0;

        for (index, (tx, txid)) in block.transactions.iter().zip(txids).enumerate() {
            if !tx.is_coinbase() {
                let verdicts = match prechecked {
                    Some(checks) => checks.signatures[index].clone(),
                    None => tx.signature_results(),
                };

                let mut input_total: u64 = 0;
                for (input_index, input) in tx.inputs.iter().enumerate() {
                    let outpoint = input.outpoint();
                    if !consumed.insert(outpoint) {
                        return Err(ValidationError::DoubleSpend(outpoint));
                    }

                    let output = if let Some(output) = in_block.remove(&outpoint) {
                        output
                    } else if let Some(output) = utxo.get(&outpoint) {
                        spent.push((outpoint, *output));
                        *output
                    } else {
                        return Err(ValidationError::MissingInput(outpoint));
                    };

                    let signed = verdicts.get(input_index).copied().unwrap_or(false);
                    if !signed || input.signer_address() != output.address {
                        return Err(ValidationError::InvalidSignature {
                            tx: index,
                            input: input_index,
                        });
                    }

                    input_total = input_total.checked_add(output.amount).ok_or(
                        ValidationError::InvalidTransaction {
                            index,
                            reason: TransactionError::AmountOverflow,
                        },
                    )?;
                }

                let output_total = tx
                    .total_output()
                    .map_err(|reason| ValidationError::InvalidTransaction { index, reason })?;
                if output_total > input_total {
                    return Err(ValidationError::InsufficientInputs {
                        tx: index,
                        inputs: input_total,
                        outputs: output_total,
                    });
                }
                fees = fees.saturating_add(input_total - output_total);
            }

            for (vout, output) in tx.outputs.iter().enumerate() {
                in_block.insert(OutPoint::new(*txid, vout as u32), *output);
            }
        }

        let mut created: Vec<_> = in_block.into_iter().collect();
        created.sort_by_key(|(outpoint, _)| *outpoint);

        Ok(TransferEffect {
            spent,
            created,
            fees,
        })
    }

    /// Step 6: supply cap, output shape, beneficiary, exact split
    fn check_coinbase(&self, block: &Block, height: u64) -> Result<WindowEntry, ValidationError> {
        let params = self.chain.params();
        let coinbase = &block.transactions[0];

        let subsidy = block_subsidy(height, params);
        let issued = self.chain.issued_supply();
        if issued + subsidy as u128 > params.max_supply as u128 {
            return Err(ValidationError::SupplyCapExceeded {
                issued,
                subsidy,
                cap: params.max_supply,
            });
        }

        if coinbase.outputs.len() != 3 {
            return Err(ValidationError::InvalidCoinbaseSplit(format!(
                "expected 3 outputs, found {}",
                coinbase.outputs.len()
            )));
        }
        let paid = coinbase
            .total_output()
            .map_err(|reason| ValidationError::InvalidTransaction { index: 0, reason })?;
        if paid != subsidy {
            return Err(ValidationError::InvalidCoinbaseSplit(format!(
                "pays {} but the subsidy at height {} is {}",
                paid, height, subsidy
            )));
        }

        let miner = coinbase.outputs[0].address;
        let expected = compute_split(height, &miner, self.chain.window(), params);

        if coinbase.outputs[2].address != expected.solidarity.address {
            return Err(ValidationError::InvalidSolidarityRecipient {
                expected: expected.solidarity.address,
                got: coinbase.outputs[2].address,
            });
        }
        if coinbase.outputs != expected.outputs() {
            return Err(ValidationError::InvalidCoinbaseSplit(format!(
                "outputs differ from the {} tier split under {:?}",
                expected.tier.name(),
                expected.policy
            )));
        }

        Ok(WindowEntry {
            height,
            address: miner,
            subsidy,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::params::ConsensusParams;
    use crate::core::reward::{SplitPolicy, COIN};
    use crate::core::transaction::{TransactionBuilder, TxType};
    use crate::crypto::KeyPair;
    use crate::mining::miner::Miner;

    const NOW: i64 = 2_000_000_000;

    struct Fixture {
        chain: ChainState,
        key: KeyPair,
        miner: Miner,
    }

    impl Fixture {
        fn new() -> Self {
            let key = KeyPair::from_seed(&[11u8; 32]);
            let miner = Miner::new(Address::from_public_key(&key.public_key()));
            Self {
                chain: ChainState::new(ConsensusParams::development()).unwrap(),
                key,
                miner,
            }
        }

        fn timestamp(&self) -> i64 {
            self.chain.tip_header().timestamp + 30
        }

        fn candidate(&self, txs: Vec<Transaction>) -> Block {
            self.miner
                .build_candidate(&self.chain, txs, self.timestamp())
        }

        fn seal(&self, block: Block) -> Block {
            self.miner.seal(block, &self.chain).unwrap().0
        }

        fn mine(&mut self, txs: Vec<Transaction>) -> Block {
            let block = self.seal(self.candidate(txs));
            self.chain.process_block_at(block.clone(), NOW).unwrap();
            block
        }

        fn validate(&self, block: &Block) -> Result<AppliedDelta, ValidationError> {
            BlockValidator::new(&self.chain, NOW).validate(block)
        }

        /// Coinbase output 0 of `block`, spendable by the fixture key
        fn reward_outpoint(block: &Block) -> (OutPoint, u64) {
            let coinbase = &block.transactions[0];
            (OutPoint::new(coinbase.txid(), 0), coinbase.outputs[0].amount)
        }
    }

    #[test]
    fn test_valid_block_produces_delta() {
        let f = Fixture::new();
        let block = f.seal(f.candidate(vec![]));
        let delta = f.validate(&block).unwrap();

        assert_eq!(delta.height, 1);
        assert_eq!(delta.block_hash, block.hash());
        assert_eq!(delta.subsidy, 50 * COIN);
        assert_eq!(delta.created.len(), 3);
        assert!(delta.spent.is_empty());
        assert_eq!(delta.value_created(), Ok(50 * COIN));
        assert_eq!(delta.window_entry.address, f.miner.address);
    }

    #[test]
    fn test_bad_merkle_root() {
        let f = Fixture::new();
        let mut block = f.candidate(vec![]);
        block.header.merkle_root = [1u8; 32];
        let block = f.seal(block);
        assert_eq!(f.validate(&block), Err(ValidationError::InvalidMerkleRoot));
    }

    #[test]
    fn test_wrong_difficulty() {
        let f = Fixture::new();
        let mut block = f.candidate(vec![]);
        block.header.difficulty_target = Target::with_leading_zero_bits(1);
        let block = f.seal(block);
        assert!(matches!(
            f.validate(&block),
            Err(ValidationError::DifficultyMismatch { .. })
        ));
    }

    #[test]
    fn test_proof_of_work_checked_before_difficulty() {
        let f = Fixture::new();
        let mut block = f.candidate(vec![]);
        // Unmeetable target: the PoW check fails first
        block.header.difficulty_target = Target::from_be_bytes([0u8; 32]);
        assert_eq!(f.validate(&block), Err(ValidationError::InvalidProofOfWork));
    }

    #[test]
    fn test_timestamp_bounds() {
        let f = Fixture::new();
        let parent = f.chain.tip_header().timestamp;

        let early = f.seal(f.miner.build_candidate(&f.chain, vec![], parent - 1));
        assert!(matches!(
            f.validate(&early),
            Err(ValidationError::TimestampOutOfRange { .. })
        ));

        let late = f.seal(f.miner.build_candidate(&f.chain, vec![], NOW + 121));
        assert!(matches!(
            f.validate(&late),
            Err(ValidationError::TimestampOutOfRange { max, .. }) if max == NOW + 120
        ));
    }

    #[test]
    fn test_epoch_must_match_height() {
        let f = Fixture::new();
        let mut block = f.candidate(vec![]);
        block.header.epoch = 1;
        let block = f.seal(block);
        assert!(matches!(
            f.validate(&block),
            Err(ValidationError::MalformedBlock(_))
        ));
    }

    #[test]
    fn test_missing_or_second_coinbase() {
        let f = Fixture::new();
        let mut block = f.candidate(vec![]);
        let extra = block.transactions[0].clone();
        block.transactions.push(extra);
        block.update_merkle_root();
        assert!(matches!(
            f.validate(&block),
            Err(ValidationError::MalformedBlock(_))
        ));

        let mut block = f.candidate(vec![]);
        block.transactions[0].tx_type = TxType::Transfer;
        block.update_merkle_root();
        assert!(matches!(
            f.validate(&block),
            Err(ValidationError::MalformedBlock(_))
        ));
    }

    #[test]
    fn test_spend_and_in_block_chaining() {
        let mut f = Fixture::new();
        let funding = f.mine(vec![]);
        let (outpoint, amount) = Fixture::reward_outpoint(&funding);
        let me = f.miner.address;
        let other = Address::from_bytes([3u8; 20]);

        let first = TransactionBuilder::new()
            .add_input(outpoint)
            .add_output(other, 10 * COIN)
            .add_output(me, amount - 10 * COIN - 1_000)
            .timestamp(f.timestamp())
            .build_and_sign(&f.key);
        let change = OutPoint::new(first.txid(), 1);
        let second = TransactionBuilder::new()
            .add_input(change)
            .add_output(other, amount - 10 * COIN - 1_000)
            .timestamp(f.timestamp())
            .build_and_sign(&f.key);

        let block = f.seal(f.candidate(vec![first.clone(), second.clone()]));
        let delta = f.validate(&block).unwrap();

        assert_eq!(delta.spent, vec![(outpoint, TxOutput::new(me, amount))]);
        assert_eq!(delta.fees, 1_000);
        // The chained change output was created and consumed inside the block
        assert!(delta.created.iter().all(|(p, _)| *p != change));
        assert!(delta
            .created
            .iter()
            .any(|(p, _)| *p == OutPoint::new(second.txid(), 0)));
    }

    #[test]
    fn test_double_spend_rejected() {
        let mut f = Fixture::new();
        let funding = f.mine(vec![]);
        let (outpoint, amount) = Fixture::reward_outpoint(&funding);

        let spend = |to: u8| {
            TransactionBuilder::new()
                .add_input(outpoint)
                .add_output(Address::from_bytes([to; 20]), amount)
                .timestamp(f.timestamp())
                .build_and_sign(&f.key)
        };
        let block = f.seal(f.candidate(vec![spend(4), spend(5)]));
        assert_eq!(
            f.validate(&block),
            Err(ValidationError::DoubleSpend(outpoint))
        );
    }

    #[test]
    fn test_missing_input_and_overspend() {
        let mut f = Fixture::new();
        let funding = f.mine(vec![]);
        let (outpoint, amount) = Fixture::reward_outpoint(&funding);
        let to = Address::from_bytes([4u8; 20]);

        let ghost = OutPoint::new([9u8; 32], 0);
        let tx = TransactionBuilder::new()
            .add_input(ghost)
            .add_output(to, 1)
            .timestamp(f.timestamp())
            .build_and_sign(&f.key);
        let block = f.seal(f.candidate(vec![tx]));
        assert_eq!(f.validate(&block), Err(ValidationError::MissingInput(ghost)));

        let tx = TransactionBuilder::new()
            .add_input(outpoint)
            .add_output(to, amount + 1)
            .timestamp(f.timestamp())
            .build_and_sign(&f.key);
        let block = f.seal(f.candidate(vec![tx]));
        assert!(matches!(
            f.validate(&block),
            Err(ValidationError::InsufficientInputs { tx: 1, .. })
        ));
    }

    #[test]
    fn test_foreign_key_cannot_spend() {
        let mut f = Fixture::new();
        let funding = f.mine(vec![]);
        let (outpoint, amount) = Fixture::reward_outpoint(&funding);

        let thief = KeyPair::from_seed(&[99u8; 32]);
        let tx = TransactionBuilder::new()
            .add_input(outpoint)
            .add_output(Address::from_public_key(&thief.public_key()), amount)
            .timestamp(f.timestamp())
            .build_and_sign(&thief);
        let block = f.seal(f.candidate(vec![tx]));
        assert_eq!(
            f.validate(&block),
            Err(ValidationError::InvalidSignature { tx: 1, input: 0 })
        );
    }

    #[test]
    fn test_tampered_signature_rejected() {
        let mut f = Fixture::new();
        let funding = f.mine(vec![]);
        let (outpoint, amount) = Fixture::reward_outpoint(&funding);

        let mut tx = TransactionBuilder::new()
            .add_input(outpoint)
            .add_output(Address::from_bytes([4u8; 20]), amount)
            .timestamp(f.timestamp())
            .build_and_sign(&f.key);
        tx.inputs[0].signature[0] ^= 0xff;
        let block = f.seal(f.candidate(vec![tx]));
        assert_eq!(
            f.validate(&block),
            Err(ValidationError::InvalidSignature { tx: 1, input: 0 })
        );
    }

    #[test]
    fn test_coinbase_split_checks() {
        let f = Fixture::new();

        // Miner keeps everything
        let mut block = f.candidate(vec![]);
        let outputs = &mut block.transactions[0].outputs;
        outputs[0].amount += outputs[1].amount;
        outputs[1].amount = 0;
        block.update_merkle_root();
        let block = f.seal(block);
        assert!(matches!(
            f.validate(&block),
            Err(ValidationError::InvalidCoinbaseSplit(_))
        ));

        // Solidarity redirected to the miner
        let mut block = f.candidate(vec![]);
        block.transactions[0].outputs[2].address = f.miner.address;
        block.update_merkle_root();
        let block = f.seal(block);
        assert!(matches!(
            f.validate(&block),
            Err(ValidationError::InvalidSolidarityRecipient { .. })
        ));

        // Overpaying coinbase
        let mut block = f.candidate(vec![]);
        block.transactions[0].outputs[0].amount += 1;
        block.update_merkle_root();
        let block = f.seal(block);
        assert!(matches!(
            f.validate(&block),
            Err(ValidationError::InvalidCoinbaseSplit(_))
        ));
    }

    #[test]
    fn test_supply_cap() {
        let mut params = ConsensusParams::development().with_split_policy(SplitPolicy::FlatV1);
        params.max_supply = 60 * COIN;
        let chain = ChainState::new(params).unwrap();
        let miner = Miner::new(Address::from_bytes([1u8; 20]));
        let block = miner.build_candidate(&chain, vec![], chain.tip_header().timestamp + 30);
        let block = miner.seal(block, &chain).unwrap().0;

        assert!(matches!(
            BlockValidator::new(&chain, NOW).validate(&block),
            Err(ValidationError::SupplyCapExceeded { .. })
        ));
    }

    #[test]
    fn test_prechecks_are_honoured_in_order() {
        let f = Fixture::new();
        let block = f.seal(f.candidate(vec![]));
        let mut checks = StatelessChecks::compute(&block, f.chain.pow());
        assert!(checks.merkle_ok && checks.pow_ok);

        checks.pow_ok = false;
        assert_eq!(
            BlockValidator::new(&f.chain, NOW)
                .with_prechecks(Some(&checks))
                .validate(&block),
            Err(ValidationError::InvalidProofOfWork)
        );

        // Checks for a different block are ignored
        checks.block_hash = [0u8; 32];
        assert!(BlockValidator::new(&f.chain, NOW)
            .with_prechecks(Some(&checks))
            .validate(&block)
            .is_ok());
    }
}
