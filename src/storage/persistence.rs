//! Chain persistence layer
//!
//! The canonical chain is stored as `(block, delta)` records in one JSON
//! snapshot. Loading replays the deltas, so a restart never re-runs proof
//! of work.

use std::fs;
use std::io::{self, BufReader, BufWriter};
use std::path::PathBuf;

use log::info;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::block::Block;
use crate::core::chain_state::{ChainError, ChainState};
use crate::core::params::ConsensusParams;
use crate::core::transaction::Transaction;
use crate::core::utxo::AppliedDelta;
use crate::crypto::hash::Hash;

/// Storage errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
    #[error("Invalid data: {0}")]
    InvalidData(String),
    #[error("Stored chain does not replay: {0}")]
    Replay(#[from] ChainError),
}

/// Storage configuration
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    pub chain_file: String,
    /// Pending transfers, kept apart from the chain snapshot
    pub mempool_file: String,
    pub backup_enabled: bool,
    pub max_backups: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(".aequitas"),
            chain_file: "chain.json".to_string(),
            mempool_file: "mempool.json".to_string(),
            backup_enabled: true,
            max_backups: 5,
        }
    }
}

/// One canonical block and the delta it applied
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredBlock {
    pub block: Block,
    pub delta: AppliedDelta,
}

#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    network: String,
    height: u64,
    #[serde(with = "hex::serde")]
    tip: Hash,
    blocks: Vec<StoredBlock>,
}

/// Chain storage manager
pub struct Storage {
    config: StorageConfig,
}

impl Storage {
    /// Create a new storage manager
    pub fn new(config: StorageConfig) -> Result<Self, StorageError> {
        fs::create_dir_all(&config.data_dir)?;
        Ok(Self { config })
    }

    /// Create with default configuration
    pub fn with_defaults() -> Result<Self, StorageError> {
        Self::new(StorageConfig::default())
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    fn chain_path(&self) -> PathBuf {
        self.config.data_dir.join(&self.config.chain_file)
    }

    fn backup_path(&self, index: usize) -> PathBuf {
        self.config
            .data_dir
            .join(format!("{}.backup.{}", self.config.chain_file, index))
    }

    /// Save the canonical chain to disk
    pub fn save(&self, chain: &ChainState) -> Result<(), StorageError> {
        let path = self.chain_path();

        if self.config.backup_enabled && path.exists() {
            self.rotate_backups()?;
            fs::copy(&path, self.backup_path(0))?;
        }

        let snapshot = Snapshot {
            network: chain.params().network.clone(),
            height: chain.height(),
            tip: chain.tip_hash(),
            blocks: chain
                .canonical_records()
                .into_iter()
                .map(|(block, delta)| StoredBlock { block, delta })
                .collect(),
        };

        // Write to a temporary file, then rename over the old snapshot
        let temp_path = self
            .config
            .data_dir
            .join(format!("{}.tmp", self.config.chain_file));
        let mut writer = BufWriter::new(fs::File::create(&temp_path)?);
        serde_json::to_writer(&mut writer, &snapshot)?;
        let file = writer.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        fs::rename(&temp_path, &path)?;

        info!(
            "Saved chain at height {} to {}",
            snapshot.height,
            path.display()
        );
        Ok(())
    }

    /// Load the chain from disk and replay it under `params`
    pub fn load(&self, params: ConsensusParams) -> Result<ChainState, StorageError> {
        self.load_from(self.chain_path(), params)
    }

    /// Stored canonical blocks without replaying their deltas
    pub fn load_blocks(&self, params: &ConsensusParams) -> Result<Vec<Block>, StorageError> {
        let snapshot = self.read_snapshot(self.chain_path(), params)?;
        Ok(snapshot.blocks.into_iter().map(|stored| stored.block).collect())
    }

    fn read_snapshot(&self, path: PathBuf, params: &ConsensusParams) -> Result<Snapshot, StorageError> {
        if !path.exists() {
            return Err(StorageError::InvalidData(format!(
                "no chain stored at {}",
                path.display()
            )));
        }
        let reader = BufReader::new(fs::File::open(&path)?);
        let snapshot: Snapshot = serde_json::from_reader(reader)?;

        if snapshot.network != params.network {
            return Err(StorageError::InvalidData(format!(
                "stored chain belongs to network '{}', not '{}'",
                snapshot.network, params.network
            )));
        }
        Ok(snapshot)
    }

    fn load_from(&self, path: PathBuf, params: ConsensusParams) -> Result<ChainState, StorageError> {
        let snapshot = self.read_snapshot(path, &params)?;

        let records = snapshot
            .blocks
            .into_iter()
            .map(|stored| (stored.block, stored.delta))
            .collect();
        let chain = ChainState::restore(params, records)?;

        if chain.tip_hash() != snapshot.tip || chain.height() != snapshot.height {
            return Err(StorageError::InvalidData(
                "replayed tip differs from the recorded tip".to_string(),
            ));
        }
        Ok(chain)
    }

    /// Save pending transfers, replacing the previous list
    pub fn save_mempool(&self, transactions: &[Transaction]) -> Result<(), StorageError> {
        let path = self.config.data_dir.join(&self.config.mempool_file);
        let temp_path = self
            .config
            .data_dir
            .join(format!("{}.tmp", self.config.mempool_file));

        let mut writer = BufWriter::new(fs::File::create(&temp_path)?);
        serde_json::to_writer(&mut writer, transactions)?;
        let file = writer.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        fs::rename(&temp_path, &path)?;
        Ok(())
    }

    /// Load pending transfers; none stored yields an empty list
    pub fn load_mempool(&self) -> Result<Vec<Transaction>, StorageError> {
        let path = self.config.data_dir.join(&self.config.mempool_file);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let reader = BufReader::new(fs::File::open(&path)?);
        Ok(serde_json::from_reader(reader)?)
    }

    /// Check if a saved chain exists
    pub fn exists(&self) -> bool {
        self.chain_path().exists()
    }

    /// Delete the saved chain
    pub fn delete(&self) -> Result<(), StorageError> {
        let path = self.chain_path();
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }

    fn rotate_backups(&self) -> Result<(), StorageError> {
        if self.config.max_backups == 0 {
            return Ok(());
        }

        let oldest = self.backup_path(self.config.max_backups - 1);
        if oldest.exists() {
            fs::remove_file(&oldest)?;
        }

        for i in (0..self.config.max_backups - 1).rev() {
            let current = self.backup_path(i);
            if current.exists() {
                fs::rename(&current, self.backup_path(i + 1))?;
            }
        }

        Ok(())
    }

    /// Load a backup instead of the current snapshot
    pub fn restore_backup(
        &self,
        backup_index: usize,
        params: ConsensusParams,
    ) -> Result<ChainState, StorageError> {
        self.load_from(self.backup_path(backup_index), params)
    }

    /// List available backups
    pub fn list_backups(&self) -> Vec<usize> {
        (0..self.config.max_backups)
            .filter(|i| self.backup_path(*i).exists())
            .collect()
    }

    /// Get storage statistics
    pub fn stats(&self) -> Result<StorageStats, StorageError> {
        let path = self.chain_path();
        let file_size = if path.exists() {
            fs::metadata(&path)?.len()
        } else {
            0
        };

        Ok(StorageStats {
            file_size,
            backup_count: self.list_backups().len(),
            data_dir: self.config.data_dir.clone(),
        })
    }
}

/// Storage statistics
#[derive(Debug)]
pub struct StorageStats {
    pub file_size: u64,
    pub backup_count: usize,
    pub data_dir: PathBuf,
}
