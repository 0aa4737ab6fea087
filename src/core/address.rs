//! Account addresses
//!
//! An address is the last 20 bytes of Keccak-256 over an Ed25519 public key.
//! Its text form is `aeq1` followed by base58 of the 20 bytes and a 4-byte
//! Keccak checksum.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::crypto::hash::keccak256;

/// Human-readable prefix of every address
pub const ADDRESS_PREFIX: &str = "aeq1";

/// Raw address length
pub const ADDRESS_LENGTH: usize = 20;

const CHECKSUM_LENGTH: usize = 4;

/// Label hashed to obtain the genesis reward address
pub const GENESIS_LABEL: &str = "Aequitas Genesis 2026";

/// Label hashed to obtain the treasury address
pub const TREASURY_LABEL: &str = "Aequitas Treasury";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum AddressError {
    #[error("address must start with '{ADDRESS_PREFIX}'")]
    MissingPrefix,
    #[error("invalid base58: {0}")]
    Base58(String),
    #[error("invalid address length: {0} bytes")]
    InvalidLength(usize),
    #[error("address checksum mismatch")]
    BadChecksum,
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address([u8; ADDRESS_LENGTH]);

impl Address {
    pub const fn from_bytes(bytes: [u8; ADDRESS_LENGTH]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; ADDRESS_LENGTH] {
        &self.0
    }

    /// Derive the address owning an Ed25519 public key
    pub fn from_public_key(public_key: &[u8]) -> Self {
        Self::truncate(&keccak256(public_key))
    }

    /// Deterministic address for a well-known label (genesis, treasury)
    pub fn from_label(label: &str) -> Self {
        Self::truncate(&keccak256(label.as_bytes()))
    }

    pub fn genesis() -> Self {
        Self::from_label(GENESIS_LABEL)
    }

    pub fn treasury() -> Self {
        Self::from_label(TREASURY_LABEL)
    }

    fn truncate(digest: &[u8; 32]) -> Self {
        let mut bytes = [0u8; ADDRESS_LENGTH];
        bytes.copy_from_slice(&digest[32 - ADDRESS_LENGTH..]);
        Self(bytes)
    }

    fn checksum(&self) -> [u8; CHECKSUM_LENGTH] {
        let digest = keccak256(&self.0);
        let mut out = [0u8; CHECKSUM_LENGTH];
        out.copy_from_slice(&digest[..CHECKSUM_LENGTH]);
        out
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut payload = Vec::with_capacity(ADDRESS_LENGTH + CHECKSUM_LENGTH);
        payload.extend_from_slice(&self.0);
        payload.extend_from_slice(&self.checksum());
        write!(f, "{}{}", ADDRESS_PREFIX, bs58::encode(payload).into_string())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self)
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let body = s
            .strip_prefix(ADDRESS_PREFIX)
            .ok_or(AddressError::MissingPrefix)?;
        let payload = bs58::decode(body)
            .into_vec()
            .map_err(|e| AddressError::Base58(e.to_string()))?;
        if payload.len() != ADDRESS_LENGTH + CHECKSUM_LENGTH {
            return Err(AddressError::InvalidLength(payload.len()));
        }

        let mut bytes = [0u8; ADDRESS_LENGTH];
        bytes.copy_from_slice(&payload[..ADDRESS_LENGTH]);
        let address = Self(bytes);
        if payload[ADDRESS_LENGTH..] != address.checksum() {
            return Err(AddressError::BadChecksum);
        }
        Ok(address)
    }
}

impl TryFrom<String> for Address {
    type Error = AddressError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Address> for String {
    fn from(address: Address) -> Self {
        address.to_string()
    }
}
