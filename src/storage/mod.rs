//! Storage module for chain persistence

pub mod persistence;

pub use persistence::{Storage, StorageConfig, StorageError, StorageStats, StoredBlock};
