//! Ed25519 key management
//!
//! Provides key pair generation, signing, and verification. Addresses are
//! derived from the 32-byte verifying key (see `core::address`).

use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use thiserror::Error;

/// Length of an encoded public key
pub const PUBLIC_KEY_LENGTH: usize = 32;

/// Length of an encoded signature
pub const SIGNATURE_LENGTH: usize = 64;

/// Errors that can occur during key operations
#[derive(Error, Debug, PartialEq, Eq)]
pub enum KeyError {
    #[error("Invalid private key")]
    InvalidPrivateKey,
    #[error("Invalid public key")]
    InvalidPublicKey,
    #[error("Invalid signature encoding")]
    InvalidSignature,
    #[error("Signature verification failed")]
    VerificationFailed,
}

/// A signing key with its verifying key
#[derive(Clone)]
pub struct KeyPair {
    signing_key: SigningKey,
}

impl KeyPair {
    /// Generate a new random key pair
    pub fn generate() -> Self {
        let mut rng = OsRng;
        Self {
            signing_key: SigningKey::generate(&mut rng),
        }
    }

    /// Deterministic key pair from a 32-byte seed
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(seed),
        }
    }

    /// Create a key pair from a hex-encoded private key
    pub fn from_private_key_hex(hex_key: &str) -> Result<Self, KeyError> {
        let bytes = hex::decode(hex_key).map_err(|_| KeyError::InvalidPrivateKey)?;
        let seed: [u8; 32] = bytes
            .try_into()
            .map_err(|_| KeyError::InvalidPrivateKey)?;
        Ok(Self::from_seed(&seed))
    }

    /// Get the private key as a hex string
    pub fn private_key_hex(&self) -> String {
        hex::encode(self.signing_key.to_bytes())
    }

    /// Raw verifying key bytes
    pub fn public_key(&self) -> [u8; PUBLIC_KEY_LENGTH] {
        self.signing_key.verifying_key().to_bytes()
    }

    /// Get the public key as a hex string
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.public_key())
    }

    /// Sign a message
    pub fn sign(&self, message: &[u8]) -> [u8; SIGNATURE_LENGTH] {
        self.signing_key.sign(message).to_bytes()
    }

    /// Verify a signature against this key pair's public key
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> Result<(), KeyError> {
        verify_signature(&self.public_key(), message, signature)
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key", &self.public_key_hex())
            .finish_non_exhaustive()
    }
}

/// Verify a signature against a raw public key
pub fn verify_signature(
    public_key: &[u8],
    message: &[u8],
    signature: &[u8],
) -> Result<(), KeyError> {
    let pk: [u8; PUBLIC_KEY_LENGTH] = public_key
        .try_into()
        .map_err(|_| KeyError::InvalidPublicKey)?;
    let sig: [u8; SIGNATURE_LENGTH] = signature
        .try_into()
        .map_err(|_| KeyError::InvalidSignature)?;

    // Strict verification refuses small-order keys and non-canonical R
    let verifying_key = VerifyingKey::from_bytes(&pk).map_err(|_| KeyError::InvalidPublicKey)?;
    verifying_key
        .verify_strict(message, &Signature::from_bytes(&sig))
        .map_err(|_| KeyError::VerificationFailed)
}
