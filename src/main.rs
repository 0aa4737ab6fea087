//! Aequitas CLI Application
//!
//! A command-line interface for running the consensus core locally.

use std::path::PathBuf;

use aequitas::cli::{self, AppState};
use aequitas::core::ConsensusParams;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "aequitas")]
#[command(version = "0.1.0")]
#[command(about = "Aequitas proof-of-work ledger consensus core", long_about = None)]
struct Cli {
    /// Data directory for chain storage
    #[arg(short, long, default_value = ".aequitas")]
    data_dir: PathBuf,

    /// Consensus parameters as a JSON file
    #[arg(long, conflicts_with = "dev")]
    params: Option<PathBuf>,

    /// Use development parameters (tiny dataset, easiest target)
    #[arg(long)]
    dev: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new chain
    Init,

    /// Generate a key pair and print its address
    Keygen,

    /// Mine new blocks
    Mine {
        /// Miner's address for receiving rewards
        #[arg(short, long)]
        address: String,

        /// Number of blocks to mine
        #[arg(short, long, default_value = "1")]
        count: u32,
    },

    /// Queue a signed transfer for the next mined block
    Send {
        /// Sender's private key (hex)
        #[arg(short, long)]
        key: String,

        /// Recipient address
        #[arg(short, long)]
        to: String,

        /// Amount in base units
        #[arg(short, long)]
        amount: u64,

        /// Fee in base units, burned when mined
        #[arg(short, long, default_value = "0")]
        fee: u64,
    },

    /// Display chain information
    Info,

    /// Show the balance of an address
    Balance {
        #[arg(short, long)]
        address: String,
    },

    /// Show the coinbase split the next block would pay
    Split {
        #[arg(short, long)]
        address: String,
    },

    /// Re-validate the stored chain from genesis
    Verify,

    /// Evaluate AequiHash over hex-encoded header bytes
    Hash {
        #[arg(long)]
        header: String,

        #[arg(short, long, default_value = "0")]
        nonce: u64,

        #[arg(short, long, default_value = "0")]
        epoch: u64,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    let params = match (&cli.params, cli.dev) {
        (Some(path), _) => ConsensusParams::load(path)?,
        (None, true) => ConsensusParams::development(),
        (None, false) => ConsensusParams::default(),
    };

    // Commands that don't need the loaded chain
    match &cli.command {
        Commands::Init => return cli::cmd_init(&cli.data_dir, params),
        Commands::Keygen => return cli::cmd_keygen(),
        Commands::Verify => return cli::cmd_verify(&cli.data_dir, params),
        Commands::Hash {
            header,
            nonce,
            epoch,
        } => return cli::cmd_hash(&params, header, *nonce, *epoch),
        _ => {}
    }

    let mut state = AppState::new(cli.data_dir.clone(), params)?;

    match cli.command {
        Commands::Mine { address, count } => cli::cmd_mine(&mut state, &address, count)?,
        Commands::Send {
            key,
            to,
            amount,
            fee,
        } => cli::cmd_send(&mut state, &key, &to, amount, fee)?,
        Commands::Info => cli::cmd_info(&state)?,
        Commands::Balance { address } => cli::cmd_balance(&state, &address)?,
        Commands::Split { address } => cli::cmd_split(&state, &address)?,
        Commands::Init | Commands::Keygen | Commands::Verify | Commands::Hash { .. } => {}
    }

    Ok(())
}
