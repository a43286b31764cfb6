//! Configuration management
//!
//! Consensus constants live here rather than in code so that test and
//! development networks can shorten ages and maturity.

use crate::amount::{Amount, COIN};
use crate::crypto::Address;
use crate::error::ChainError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub consensus: ConsensusConfig,
    #[serde(default)]
    pub genesis: GenesisConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub wallet: WalletConfig,
    #[serde(default)]
    pub mempool: MempoolConfig,
    #[serde(default)]
    pub persistence: PersistenceConfig,
    #[serde(default)]
    pub minter: MinterConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsensusConfig {
    /// Blocks that must be connected on top of a minted output before it can be spent.
    #[serde(default = "default_coinbase_maturity")]
    pub coinbase_maturity: u64,
    #[serde(default = "default_stake_min_age")]
    pub stake_min_age: u64,
    #[serde(default = "default_stake_max_age")]
    pub stake_max_age: u64,
    #[serde(default = "default_coinbase_reward")]
    pub coinbase_reward: Amount,
    #[serde(default = "default_stake_reward")]
    pub stake_reward: Amount,
    #[serde(default = "default_min_work_difficulty")]
    pub min_work_difficulty: u32,
    #[serde(default = "default_min_stake_difficulty")]
    pub min_stake_difficulty: u32,
    #[serde(default = "default_orphan_limit")]
    pub orphan_limit: usize,
    /// Seconds a block timestamp may run ahead of the local clock on arrival.
    #[serde(default = "default_max_future_drift")]
    pub max_future_drift_secs: u64,
    #[serde(default)]
    pub checkpoints: Vec<BlockCheckpoint>,
    #[serde(default)]
    pub modifier_checkpoints: Vec<ModifierCheckpoint>,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        ConsensusConfig {
            coinbase_maturity: default_coinbase_maturity(),
            stake_min_age: default_stake_min_age(),
            stake_max_age: default_stake_max_age(),
            coinbase_reward: default_coinbase_reward(),
            stake_reward: default_stake_reward(),
            min_work_difficulty: default_min_work_difficulty(),
            min_stake_difficulty: default_min_stake_difficulty(),
            orphan_limit: default_orphan_limit(),
            max_future_drift_secs: default_max_future_drift(),
            checkpoints: Vec::new(),
            modifier_checkpoints: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockCheckpoint {
    pub height: u64,
    /// Hex block hash.
    pub hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModifierCheckpoint {
    pub height: u64,
    pub checksum: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenesisConfig {
    #[serde(default = "default_genesis_time")]
    pub timestamp: u64,
    #[serde(default)]
    pub allocations: Vec<GenesisAllocation>,
}

impl Default for GenesisConfig {
    fn default() -> Self {
        GenesisConfig {
            timestamp: default_genesis_time(),
            allocations: Vec::new(),
        }
    }
}

impl GenesisConfig {
    pub fn parsed_allocations(&self) -> Result<Vec<(Address, Amount)>, ChainError> {
        self.allocations
            .iter()
            .map(|a| Ok((Address::from_hex(&a.address)?, a.amount)))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenesisAllocation {
    pub address: String,
    pub amount: Amount,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_data_dir")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        DatabaseConfig {
            path: default_data_dir(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletConfig {
    #[serde(default = "default_wallet_path")]
    pub path: String,
    #[serde(default = "default_keypool_size")]
    pub keypool_size: usize,
    #[serde(default)]
    pub kdf: KdfConfig,
}

impl Default for WalletConfig {
    fn default() -> Self {
        WalletConfig {
            path: default_wallet_path(),
            keypool_size: default_keypool_size(),
            kdf: KdfConfig::default(),
        }
    }
}

/// Argon2id cost parameters for passphrase key derivation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfConfig {
    #[serde(default = "default_kdf_memory_kib")]
    pub memory_kib: u32,
    #[serde(default = "default_kdf_iterations")]
    pub iterations: u32,
    #[serde(default = "default_kdf_parallelism")]
    pub parallelism: u32,
}

impl Default for KdfConfig {
    fn default() -> Self {
        KdfConfig {
            memory_kib: default_kdf_memory_kib(),
            iterations: default_kdf_iterations(),
            parallelism: default_kdf_parallelism(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MempoolConfig {
    #[serde(default = "default_mempool_max_transactions")]
    pub max_transactions: usize,
    #[serde(default = "default_block_tx_bytes")]
    pub max_block_tx_bytes: usize,
}

impl Default for MempoolConfig {
    fn default() -> Self {
        MempoolConfig {
            max_transactions: default_mempool_max_transactions(),
            max_block_tx_bytes: default_block_tx_bytes(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistenceConfig {
    #[serde(default = "default_max_write_attempts")]
    pub max_write_attempts: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        PersistenceConfig {
            max_write_attempts: default_max_write_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MinterConfig {
    /// Seconds scanned backwards from the current time when searching for a kernel.
    #[serde(default = "default_search_window")]
    pub search_window_secs: u64,
    /// Wallet value kept out of staking.
    #[serde(default)]
    pub reserve_balance: Amount,
    /// A young kernel at least this large is paid back as two outputs.
    #[serde(default = "default_split_threshold")]
    pub split_threshold: Amount,
    /// Fully aged coins below this value are merged into the coinstake.
    #[serde(default = "default_combine_threshold")]
    pub combine_threshold: Amount,
}

impl Default for MinterConfig {
    fn default() -> Self {
        MinterConfig {
            search_window_secs: default_search_window(),
            reserve_balance: 0,
            split_threshold: default_split_threshold(),
            combine_threshold: default_combine_threshold(),
        }
    }
}

impl Config {
    /// Rejects settings the engine cannot run with.
    pub fn validate(&self) -> Result<(), ChainError> {
        if self.database.path.is_empty() {
            return Err(ChainError::Config("database.path must be set".to_string()));
        }
        if self.wallet.path.is_empty() {
            return Err(ChainError::Config("wallet.path must be set".to_string()));
        }
        let c = &self.consensus;
        if c.stake_max_age < c.stake_min_age {
            return Err(ChainError::Config(format!(
                "consensus.stake_max_age ({}) is below stake_min_age ({})",
                c.stake_max_age, c.stake_min_age
            )));
        }
        if c.coinbase_reward < 0 || c.stake_reward < 0 {
            return Err(ChainError::Config("block rewards must not be negative".to_string()));
        }
        for checkpoint in &c.checkpoints {
            let bytes = hex::decode(&checkpoint.hash).map_err(|e| {
                ChainError::Config(format!("checkpoint at {} is not hex: {}", checkpoint.height, e))
            })?;
            if bytes.len() != 32 {
                return Err(ChainError::Config(format!(
                    "checkpoint at {} must be a 32-byte hash",
                    checkpoint.height
                )));
            }
        }
        self.genesis.parsed_allocations()?;
        if self.persistence.max_write_attempts == 0 {
            return Err(ChainError::Config(
                "persistence.max_write_attempts must be at least 1".to_string(),
            ));
        }
        let m = &self.minter;
        if m.reserve_balance < 0 || m.split_threshold < 0 || m.combine_threshold < 0 {
            return Err(ChainError::Config("minter amounts must not be negative".to_string()));
        }
        if self.wallet.kdf.iterations == 0 || self.wallet.kdf.parallelism == 0 {
            return Err(ChainError::Config("wallet.kdf costs must be positive".to_string()));
        }
        Ok(())
    }
}

/// Loads `path`, falling back to defaults when the file is absent.
pub fn load_config(path: impl AsRef<Path>) -> Result<Config, ChainError> {
    let path = path.as_ref();
    let config: Config = match fs::read_to_string(path) {
        Ok(contents) => toml::from_str(&contents)
            .map_err(|e| ChainError::Config(format!("{}: {}", path.display(), e)))?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Config::default(),
        Err(e) => return Err(e.into()),
    };
    config.validate()?;
    Ok(config)
}

fn default_coinbase_maturity() -> u64 {
    520
}

fn default_stake_min_age() -> u64 {
    60 * 60 * 24 * 30
}

fn default_stake_max_age() -> u64 {
    60 * 60 * 24 * 90
}

fn default_coinbase_reward() -> Amount {
    50 * COIN
}

fn default_stake_reward() -> Amount {
    COIN
}

fn default_min_work_difficulty() -> u32 {
    16
}

fn default_min_stake_difficulty() -> u32 {
    8
}

fn default_orphan_limit() -> usize {
    750
}

fn default_max_future_drift() -> u64 {
    2 * 60 * 60
}

fn default_genesis_time() -> u64 {
    1_672_531_200
}

fn default_data_dir() -> String {
    "./data/ledger.db".to_string()
}

fn default_wallet_path() -> String {
    "./data/wallet.json".to_string()
}

fn default_keypool_size() -> usize {
    100
}

fn default_kdf_memory_kib() -> u32 {
    19 * 1024
}

fn default_kdf_iterations() -> u32 {
    2
}

fn default_kdf_parallelism() -> u32 {
    1
}

fn default_mempool_max_transactions() -> usize {
    5_000
}

fn default_block_tx_bytes() -> usize {
    900_000
}

fn default_max_write_attempts() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    50
}

fn default_search_window() -> u64 {
    60
}

fn default_split_threshold() -> Amount {
    1_000 * COIN
}

fn default_combine_threshold() -> Amount {
    500 * COIN
}
