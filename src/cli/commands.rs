//! CLI commands for the ledger
//!
//! Implements all command handlers for the CLI interface.

use std::path::{Path, PathBuf};

use crate::core::sync::import_blocks;
use crate::core::{Address, ChainState, ConsensusParams};
use crate::crypto::hash::to_hex;
use crate::crypto::KeyPair;
use crate::mining::mempool::MAX_BLOCK_TRANSFERS;
use crate::mining::{create_transfer, AequiHash, Mempool, Miner};
use crate::storage::{Storage, StorageConfig};

/// Result type for CLI operations
pub type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

/// Application state
pub struct AppState {
    pub chain: ChainState,
    pub mempool: Mempool,
    pub storage: Storage,
    pub data_dir: PathBuf,
}

impl AppState {
    /// Load the stored chain, creating it on first use
    pub fn new(data_dir: PathBuf, params: ConsensusParams) -> CliResult<Self> {
        let storage = open_storage(&data_dir)?;

        let chain = if storage.exists() {
            println!("📂 Loading existing chain...");
            storage.load(params)?
        } else {
            println!("🆕 Creating new chain...");
            let chain = ChainState::new(params)?;
            storage.save(&chain)?;
            chain
        };

        let mut mempool = Mempool::new();
        mempool.restore(storage.load_mempool()?, &chain);

        Ok(Self {
            chain,
            mempool,
            storage,
            data_dir,
        })
    }

    /// Save the current state
    pub fn save(&self) -> CliResult<()> {
        self.storage.save(&self.chain)?;
        self.storage.save_mempool(&self.mempool.transactions())?;
        Ok(())
    }
}

fn open_storage(data_dir: &Path) -> CliResult<Storage> {
    Ok(Storage::new(StorageConfig {
        data_dir: data_dir.to_path_buf(),
        ..Default::default()
    })?)
}

fn coins(amount: u64) -> String {
    format!("{:.9}", amount as f64 / crate::core::COIN as f64)
}

/// Initialize a new chain
pub fn cmd_init(data_dir: &Path, params: ConsensusParams) -> CliResult<()> {
    let storage = open_storage(data_dir)?;

    if storage.exists() {
        println!("⚠️  Chain already exists at {:?}", data_dir);
        return Ok(());
    }

    let chain = ChainState::new(params)?;
    storage.save(&chain)?;

    println!("✅ Chain initialized!");
    println!("   📁 Data directory: {:?}", data_dir);
    println!("   🌐 Network: {}", chain.params().network);
    println!("   🎯 Target: {}", chain.next_target());
    println!("   🧱 Genesis block hash: {}", to_hex(&chain.tip_hash()));

    Ok(())
}

/// Generate a fresh key pair and its address
pub fn cmd_keygen() -> CliResult<()> {
    let key_pair = KeyPair::generate();
    let address = Address::from_public_key(&key_pair.public_key());

    println!("🔐 New key pair");
    println!("   📍 Address: {}", address);
    println!("   🔑 Public key: {}", key_pair.public_key_hex());
    println!("   🗝️  Private key: {}", key_pair.private_key_hex());
    println!("\n   ⚠️  Store the private key safely, it is not written anywhere.");

    Ok(())
}

/// Mine new blocks
pub fn cmd_mine(state: &mut AppState, address: &str, count: u32) -> CliResult<()> {
    let address: Address = address.parse()?;
    let miner = Miner::new(address);

    println!("⛏️  Mining {} block(s) for address: {}", count, address);
    println!("   Current target: {}", state.chain.next_target());

    for _ in 0..count {
        let timestamp = chrono::Utc::now()
            .timestamp()
            .max(state.chain.tip_header().timestamp);
        let split = state.chain.expected_split(&address);
        let pending = state.mempool.get_transactions(MAX_BLOCK_TRANSFERS);
        let (block, stats) = miner.mine_block(&mut state.chain, pending, timestamp)?;
        state.mempool.remove_conflicting(&state.chain);

        println!("\n   Block {} mined!", state.chain.height());
        println!("   ├─ Hash: {}", to_hex(&block.hash()));
        println!("   ├─ Transfers: {}", block.transactions.len() - 1);
        println!("   ├─ Tier: {} ({:?})", split.tier.name(), split.policy);
        println!("   ├─ Miner reward: {}", coins(split.miner.amount));
        println!("   ├─ Time: {}ms", stats.time_ms);
        println!("   ├─ Attempts: {}", stats.hash_attempts);
        println!("   └─ Hash rate: {:.2} H/s", stats.hash_rate);

        // Save after each block
        state.save()?;
    }

    println!(
        "\n💰 New balance for miner: {} coins",
        coins(state.chain.balance(&address))
    );

    Ok(())
}

/// Sign a transfer from the key's coins and queue it for the next block
pub fn cmd_send(
    state: &mut AppState,
    private_key: &str,
    to: &str,
    amount: u64,
    fee: u64,
) -> CliResult<()> {
    let key_pair = KeyPair::from_private_key_hex(private_key)?;
    let sender = Address::from_public_key(&key_pair.public_key());
    let recipient: Address = to.parse()?;

    let timestamp = chrono::Utc::now().timestamp();
    let tx = create_transfer(
        &state.chain,
        &state.mempool,
        &key_pair,
        recipient,
        amount,
        fee,
        timestamp,
    )?;
    let inputs = tx.inputs.len();
    let txid = state.mempool.add_transaction(tx, &state.chain)?;
    state.save()?;

    println!("📤 Transfer queued");
    println!("   ├─ Id: {}", to_hex(&txid));
    println!("   ├─ From: {}", sender);
    println!("   ├─ To: {}", recipient);
    println!("   ├─ Amount: {} coins", coins(amount));
    println!("   ├─ Fee: {} base units (burned)", fee);
    println!("   ├─ Inputs: {}", inputs);
    println!("   └─ Pending transfers: {}", state.mempool.len());

    Ok(())
}

/// Display chain info
pub fn cmd_info(state: &AppState) -> CliResult<()> {
    let stats = state.chain.stats();
    let storage = state.storage.stats()?;

    println!("⛓️  Chain Info ({})", state.chain.params().network);
    println!("   ├─ Height: {}", stats.height);
    println!("   ├─ Tip: {}", to_hex(&stats.tip_hash));
    println!("   ├─ Known blocks: {}", stats.known_blocks);
    println!("   ├─ Orphans: {}", stats.orphan_blocks);
    println!("   ├─ UTXOs: {}", stats.utxo_count);
    println!("   ├─ Supply: {} coins", coins(stats.total_supply));
    println!("   ├─ Issued: {} base units", stats.issued_supply);
    println!("   ├─ Target: {}", stats.target);
    println!("   ├─ Difficulty: {:.3}", stats.difficulty);
    println!("   ├─ Chain work: {}", stats.chain_work);
    if let Some(times) = stats.block_times {
        println!(
            "   ├─ Block time: avg {:.1}s, min {}s, max {}s",
            times.average, times.min, times.max
        );
    }
    println!("   ├─ Window contributors: {}", stats.window_contributors);
    println!("   ├─ Pending transfers: {}", state.mempool.len());
    println!(
        "   └─ Snapshot: {} bytes, {} backup(s) in {:?}",
        storage.file_size, storage.backup_count, storage.data_dir
    );

    Ok(())
}

/// Get address balance
pub fn cmd_balance(state: &AppState, address: &str) -> CliResult<()> {
    let address: Address = address.parse()?;
    let utxos = state.chain.utxos_for(&address);

    println!("💰 Balance for {}", address);
    println!("   Total: {} coins", coins(state.chain.balance(&address)));
    println!("   UTXOs: {}", utxos.len());

    if !utxos.is_empty() {
        println!("\n   Transaction outputs:");
        for (outpoint, output) in utxos.iter().take(10) {
            println!("   └─ {} = {} coins", outpoint, coins(output.amount));
        }
        if utxos.len() > 10 {
            println!("   ... and {} more", utxos.len() - 10);
        }
    }

    Ok(())
}

/// Show the coinbase split the next block would carry for `address`
pub fn cmd_split(state: &AppState, address: &str) -> CliResult<()> {
    let address: Address = address.parse()?;
    let split = state.chain.expected_split(&address);

    println!("⚖️  Reward split for block {}", split.height);
    println!("   ├─ Policy: {:?}", split.policy);
    println!(
        "   ├─ Window share: {}.{:02}% -> {} tier",
        split.share_bps / 100,
        split.share_bps % 100,
        split.tier.name()
    );
    println!("   ├─ Subsidy: {} coins", coins(split.subsidy));
    println!("   ├─ Miner: {} -> {}", coins(split.miner.amount), split.miner.address);
    println!(
        "   ├─ Treasury: {} -> {}",
        coins(split.treasury.amount),
        split.treasury.address
    );
    println!(
        "   └─ Solidarity: {} -> {}",
        coins(split.solidarity.amount),
        split.solidarity.address
    );

    Ok(())
}

/// Re-validate the stored chain from genesis
pub fn cmd_verify(data_dir: &Path, params: ConsensusParams) -> CliResult<()> {
    let storage = open_storage(data_dir)?;
    let blocks = storage.load_blocks(&params)?;

    println!("🔍 Re-validating {} stored blocks...", blocks.len());

    let mut chain = ChainState::new(params)?;
    let genesis_matches = blocks.first().map(|genesis| genesis.hash()) == Some(chain.tip_hash());
    if !genesis_matches {
        println!("❌ Stored genesis does not match these consensus parameters");
        return Ok(());
    }

    let expected_tip = blocks.last().map(|block| block.hash());
    let report = import_blocks(&mut chain, blocks.into_iter().skip(1).collect());

    if report.rejected.is_empty() && report.orphaned == 0 && expected_tip == Some(chain.tip_hash())
    {
        println!("✅ Chain is valid!");
        println!("   {} blocks verified, tip at height {}", report.accepted(), chain.height());
    } else {
        println!("❌ Chain validation FAILED!");
        for (hash, error) in &report.rejected {
            println!("   └─ {}: {}", to_hex(hash), error);
        }
        if report.orphaned > 0 {
            println!("   {} block(s) never connected", report.orphaned);
        }
    }

    Ok(())
}

/// Evaluate AequiHash over raw header bytes
pub fn cmd_hash(params: &ConsensusParams, header_hex: &str, nonce: u64, epoch: u64) -> CliResult<()> {
    let header_bytes = hex::decode(header_hex)?;
    let engine = AequiHash::new(params.pow.clone());
    let digest = engine.hash(&header_bytes, nonce, epoch);

    println!("{}", to_hex(&digest));

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_state_creates_then_reloads() {
        let temp_dir = tempfile::tempdir().unwrap();
        let dir = temp_dir.path().to_path_buf();

        let mut state = AppState::new(dir.clone(), ConsensusParams::development()).unwrap();
        let address = Address::from_bytes([6u8; 20]).to_string();
        cmd_mine(&mut state, &address, 2).unwrap();
        let tip = state.chain.tip_hash();

        let reloaded = AppState::new(dir.clone(), ConsensusParams::development()).unwrap();
        assert_eq!(reloaded.chain.height(), 2);
        assert_eq!(reloaded.chain.tip_hash(), tip);
        cmd_verify(&dir, ConsensusParams::development()).unwrap();
    }

    #[test]
    fn test_send_then_mine_confirms_transfer() {
        let temp_dir = tempfile::tempdir().unwrap();
        let dir = temp_dir.path().to_path_buf();
        let key_pair = KeyPair::from_seed(&[12u8; 32]);
        let sender = Address::from_public_key(&key_pair.public_key());
        let recipient = Address::from_bytes([13u8; 20]);

        let mut state = AppState::new(dir.clone(), ConsensusParams::development()).unwrap();
        cmd_mine(&mut state, &sender.to_string(), 1).unwrap();
        let funded = state.chain.balance(&sender);

        cmd_send(&mut state, &key_pair.private_key_hex(), &recipient.to_string(), 1_000, 5)
            .unwrap();
        // Only one coin, and it is already pending
        assert!(cmd_send(&mut state, &key_pair.private_key_hex(), &recipient.to_string(), 1, 0)
            .is_err());

        // The pending transfer survives a restart
        let mut state = AppState::new(dir, ConsensusParams::development()).unwrap();
        assert_eq!(state.mempool.len(), 1);

        let miner = Address::from_bytes([14u8; 20]).to_string();
        cmd_mine(&mut state, &miner, 1).unwrap();
        assert!(state.mempool.is_empty());
        assert_eq!(state.chain.balance(&recipient), 1_000);
        assert_eq!(state.chain.balance(&sender), funded - 1_000 - 5);
    }

    #[test]
    fn test_mine_rejects_bad_address() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut state =
            AppState::new(temp_dir.path().to_path_buf(), ConsensusParams::development()).unwrap();
        assert!(cmd_mine(&mut state, "not-an-address", 1).is_err());
        assert_eq!(state.chain.height(), 0);
    }

    #[test]
    fn test_hash_rejects_bad_hex() {
        let params = ConsensusParams::development();
        assert!(cmd_hash(&params, "zz", 0, 0).is_err());
        assert!(cmd_hash(&params, "00ff", 7, 0).is_ok());
    }
}
