//! Transaction model
//!
//! Transfers spend unspent outputs and carry one Ed25519 signature per input.
//! A coinbase has no inputs and pays the block subsidy split computed by the
//! reward engine. Identifiers are double SHA-256 over the canonical wire
//! encoding, so they never depend on serde formatting.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::address::Address;
use super::codec::{encode_transaction, SignatureMode};
use crate::crypto::hash::{double_sha256, short_hex, Hash};
use crate::crypto::{verify_signature, KeyPair, PUBLIC_KEY_LENGTH, SIGNATURE_LENGTH};

// =============================================================================
// Constants
// =============================================================================

/// Current transaction version
pub const TX_VERSION: u32 = 1;

/// Maximum memo length in bytes
pub const MAX_MEMO_SIZE: usize = 256;

/// Memo every coinbase carries; makes coinbase ids unique per height
pub fn coinbase_memo(height: u64) -> Vec<u8> {
    format!("Aequitas Block {}", height).into_bytes()
}

// =============================================================================
// Error Types
// =============================================================================

/// Transaction-related errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransactionError {
    #[error("Invalid signature on input {0}")]
    InvalidSignature(usize),
    #[error("Invalid transaction: {0}")]
    InvalidTransaction(String),
    #[error("Memo too long: {0} bytes (max {MAX_MEMO_SIZE})")]
    MemoTooLong(usize),
    #[error("Output amounts overflow")]
    AmountOverflow,
}

// =============================================================================
// Outputs and inputs
// =============================================================================

/// Reference to one output of a prior transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OutPoint {
    #[serde(with = "hex::serde")]
    pub txid: Hash,
    pub index: u32,
}

impl OutPoint {
    pub fn new(txid: Hash, index: u32) -> Self {
        Self { txid, index }
    }
}

impl fmt::Display for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", short_hex(&self.txid), self.index)
    }
}

/// Transaction output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    pub address: Address,
    /// Amount in base units (nine decimals)
    pub amount: u64,
}

impl TxOutput {
    pub fn new(address: Address, amount: u64) -> Self {
        Self { address, amount }
    }
}

/// Transaction input
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxInput {
    #[serde(with = "hex::serde")]
    pub txid: Hash,
    pub index: u32,
    /// Ed25519 public key whose address owns the referenced output
    #[serde(with = "hex::serde")]
    pub public_key: Vec<u8>,
    #[serde(with = "hex::serde")]
    pub signature: Vec<u8>,
}

impl TxInput {
    /// Unsigned input spending `outpoint`
    pub fn unsigned(outpoint: OutPoint) -> Self {
        Self {
            txid: outpoint.txid,
            index: outpoint.index,
            public_key: Vec::new(),
            signature: Vec::new(),
        }
    }

    pub fn outpoint(&self) -> OutPoint {
        OutPoint::new(self.txid, self.index)
    }

    /// Address the embedded public key hashes to
    pub fn signer_address(&self) -> Address {
        Address::from_public_key(&self.public_key)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxType {
    Transfer,
    Coinbase,
}

impl TxType {
    pub fn to_byte(self) -> u8 {
        match self {
            TxType::Transfer => 0,
            TxType::Coinbase => 1,
        }
    }

    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(TxType::Transfer),
            1 => Some(TxType::Coinbase),
            _ => None,
        }
    }
}

// =============================================================================
// Transaction
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub version: u32,
    pub tx_type: TxType,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
    /// Unix seconds
    pub timestamp: i64,
    #[serde(with = "hex::serde")]
    pub memo: Vec<u8>,
}

impl Transaction {
    /// Unsigned transfer
    pub fn transfer(inputs: Vec<TxInput>, outputs: Vec<TxOutput>, timestamp: i64) -> Self {
        Self {
            version: TX_VERSION,
            tx_type: TxType::Transfer,
            inputs,
            outputs,
            timestamp,
            memo: Vec::new(),
        }
    }

    /// Coinbase for `height`
    pub fn coinbase(height: u64, outputs: Vec<TxOutput>, timestamp: i64) -> Self {
        Self {
            version: TX_VERSION,
            tx_type: TxType::Coinbase,
            inputs: Vec::new(),
            outputs,
            timestamp,
            memo: coinbase_memo(height),
        }
    }

    pub fn is_coinbase(&self) -> bool {
        self.tx_type == TxType::Coinbase
    }

    /// Transaction id: double SHA-256 of the full encoding
    pub fn txid(&self) -> Hash {
        double_sha256(&encode_transaction(self, SignatureMode::Include))
    }

    /// Message every input signs: the encoding with signatures emptied
    pub fn signing_hash(&self) -> Hash {
        double_sha256(&encode_transaction(self, SignatureMode::Strip))
    }

    /// Sign every input with one key pair
    pub fn sign(&mut self, key_pair: &KeyPair) {
        let public_key = key_pair.public_key().to_vec();
        for input in &mut self.inputs {
            input.public_key = public_key.clone();
        }

        // Public keys are part of the signed message, signatures are not
        let message = self.signing_hash();
        let signature = key_pair.sign(&message).to_vec();
        for input in &mut self.inputs {
            input.signature = signature.clone();
        }
    }

    /// Sign a single input, leaving the others untouched
    pub fn sign_input(&mut self, index: usize, key_pair: &KeyPair) -> Result<(), TransactionError> {
        let input = self.inputs.get_mut(index).ok_or_else(|| {
            TransactionError::InvalidTransaction(format!("no input at index {}", index))
        })?;
        input.public_key = key_pair.public_key().to_vec();

        let message = self.signing_hash();
        self.inputs[index].signature = key_pair.sign(&message).to_vec();
        Ok(())
    }

    /// Check every input signature against its embedded public key.
    ///
    /// Whether that key owns the referenced output is a ledger question and
    /// is answered by the validator.
    pub fn verify_signatures(&self) -> Result<(), TransactionError> {
        if self.is_coinbase() {
            return Ok(());
        }

        let message = self.signing_hash();
        for (i, input) in self.inputs.iter().enumerate() {
            verify_signature(&input.public_key, &message, &input.signature)
                .map_err(|_| TransactionError::InvalidSignature(i))?;
        }
        Ok(())
    }

    /// Per-input signature verdicts, in input order
    pub fn signature_results(&self) -> Vec<bool> {
        if self.is_coinbase() {
            return Vec::new();
        }
        let message = self.signing_hash();
        self.inputs
            .iter()
            .map(|input| verify_signature(&input.public_key, &message, &input.signature).is_ok())
            .collect()
    }

    /// Sum of outputs with overflow detection
    pub fn total_output(&self) -> Result<u64, TransactionError> {
        self.outputs.iter().try_fold(0u64, |acc, o| {
            acc.checked_add(o.amount)
                .ok_or(TransactionError::AmountOverflow)
        })
    }

    /// Context-free shape rules
    pub fn check_structure(&self) -> Result<(), TransactionError> {
        if self.version != TX_VERSION {
            return Err(TransactionError::InvalidTransaction(format!(
                "unknown version {}",
                self.version
            )));
        }
        if self.memo.len() > MAX_MEMO_SIZE {
            return Err(TransactionError::MemoTooLong(self.memo.len()));
        }
        if self.outputs.is_empty() {
            return Err(TransactionError::InvalidTransaction(
                "no outputs".to_string(),
            ));
        }
        for (i, input) in self.inputs.iter().enumerate() {
            if input.public_key.len() != PUBLIC_KEY_LENGTH
                || input.signature.len() != SIGNATURE_LENGTH
            {
                return Err(TransactionError::InvalidTransaction(format!(
                    "input {} carries a {}-byte key and a {}-byte signature",
                    i,
                    input.public_key.len(),
                    input.signature.len()
                )));
            }
        }
        match self.tx_type {
            TxType::Coinbase if !self.inputs.is_empty() => Err(
                TransactionError::InvalidTransaction("coinbase with inputs".to_string()),
            ),
            TxType::Transfer if self.inputs.is_empty() => Err(
                TransactionError::InvalidTransaction("transfer without inputs".to_string()),
            ),
            _ => {
                self.total_output()?;
                Ok(())
            }
        }
    }
}

// =============================================================================
// Transaction Builder
// =============================================================================

/// Builder for signed transfers
#[derive(Debug, Clone, Default)]
pub struct TransactionBuilder {
    inputs: Vec<TxInput>,
    outputs: Vec<TxOutput>,
    timestamp: i64,
    memo: Vec<u8>,
}

impl TransactionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spend an output
    pub fn add_input(mut self, outpoint: OutPoint) -> Self {
        self.inputs.push(TxInput::unsigned(outpoint));
        self
    }

    /// Add an output
    pub fn add_output(mut self, address: Address, amount: u64) -> Self {
        self.outputs.push(TxOutput::new(address, amount));
        self
    }

    pub fn timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn memo(mut self, memo: impl Into<Vec<u8>>) -> Self {
        self.memo = memo.into();
        self
    }

    /// Build without signing
    pub fn build(self) -> Transaction {
        let mut tx = Transaction::transfer(self.inputs, self.outputs, self.timestamp);
        tx.memo = self.memo;
        tx
    }

    /// Build and sign every input with `key_pair`
    pub fn build_and_sign(self, key_pair: &KeyPair) -> Transaction {
        let mut tx = self.build();
        tx.sign(key_pair);
        tx
    }
}

// =============================================================================
// Tests
// =============================================================================
