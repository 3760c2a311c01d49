use crate::blockchain::{Account, AccountError, MiningError, ProofOfWork};
use crate::node::{NetworkNodeAddress, SyncSettings};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Parser)]
#[command(author, version, about = "Run a proof-of-work ledger node")]
pub struct Args {
    /// Genesis file with the initial balances
    #[arg(short = 'g', long)]
    pub genesis_file_path: PathBuf,

    /// Block log, one JSON record per line (created if missing)
    #[arg(short = 'd', long)]
    pub blocks_file_path: PathBuf,

    /// Node registry (TOML)
    #[arg(short = 'n', long)]
    pub nodes_file_path: PathBuf,

    /// Account credited as the miner of locally mined blocks
    #[arg(short = 'm', long)]
    pub miner_address: String,

    /// Interface the HTTP server binds to
    #[arg(long, default_value = "127.0.0.1")]
    pub address: String,

    #[arg(short = 'p', long, default_value_t = 8080)]
    pub port: u16,

    /// IP peers reach this node on; defaults to the bind address
    #[arg(long)]
    pub public_ip: Option<String>,

    /// Leading zero bytes required in a block hash
    #[arg(long, default_value_t = 2)]
    pub complexity: usize,

    #[arg(long, default_value_t = 10)]
    pub sync_interval_secs: u64,

    #[arg(long, default_value_t = 5)]
    pub mine_interval_secs: u64,

    /// Slots in the new-transaction queue; submissions beyond it get a 503
    #[arg(long, default_value_t = 1000)]
    pub pool_capacity: usize,

    #[arg(long, default_value_t = 10)]
    pub peer_timeout_secs: u64,

    /// Log filter used when RUST_LOG is unset
    #[arg(short = 'l', long, default_value = "info")]
    pub log_level: String,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid miner address: {0}")]
    Miner(#[from] AccountError),

    #[error(transparent)]
    Complexity(#[from] MiningError),

    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

/// Everything the node needs to start, validated.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub genesis_path: PathBuf,
    pub blocks_path: PathBuf,
    pub nodes_path: PathBuf,
    pub miner: Account,
    pub bind_address: String,
    pub public_address: NetworkNodeAddress,
    pub pow: ProofOfWork,
    pub sync_interval: Duration,
    pub mine_interval: Duration,
    pub pool_capacity: usize,
    pub peer_timeout: Duration,
}

impl NodeConfig {
    pub fn sync_settings(&self) -> SyncSettings {
        SyncSettings {
            sync_interval: self.sync_interval,
            mine_interval: self.mine_interval,
            self_address: Some(self.public_address.clone()),
        }
    }
}

fn positive(value: u64, name: &'static str) -> Result<u64, ConfigError> {
    if value == 0 {
        return Err(ConfigError::Zero(name));
    }
    Ok(value)
}

impl TryFrom<Args> for NodeConfig {
    type Error = ConfigError;

    fn try_from(args: Args) -> Result<Self, Self::Error> {
        let miner = Account::new(args.miner_address)?;
        let pow = ProofOfWork::new(args.complexity)?;
        let sync_interval = positive(args.sync_interval_secs, "sync interval")?;
        let mine_interval = positive(args.mine_interval_secs, "mine interval")?;
        let peer_timeout = positive(args.peer_timeout_secs, "peer timeout")?;
        if args.pool_capacity == 0 {
            return Err(ConfigError::Zero("pool capacity"));
        }

        let public_ip = args.public_ip.unwrap_or_else(|| args.address.clone());
        Ok(NodeConfig {
            genesis_path: args.genesis_file_path,
            blocks_path: args.blocks_file_path,
            nodes_path: args.nodes_file_path,
            miner,
            bind_address: format!("{}:{}", args.address, args.port),
            public_address: NetworkNodeAddress::new(public_ip, args.port),
            pow,
            sync_interval: Duration::from_secs(sync_interval),
            mine_interval: Duration::from_secs(mine_interval),
            pool_capacity: args.pool_capacity,
            peer_timeout: Duration::from_secs(peer_timeout),
        })
    }
}
