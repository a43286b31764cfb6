#![allow(dead_code)]

use stakeledger::amount::{Amount, COIN};
use stakeledger::blockchain::{Block, Proof, UtxoSet};
use stakeledger::config::{Config, ConsensusConfig, GenesisAllocation, KdfConfig};
use stakeledger::crypto::{Address, KeyPair};
use stakeledger::error::ChainError;
use stakeledger::persistence::InMemoryPersistence;
use stakeledger::transaction::{OutPoint, Transaction, TxInput, TxOutput, Unlock};
use stakeledger::wallet::KeyStore;
use stakeledger::LedgerEngine;
use std::path::Path;

pub const GENESIS_TIME: u64 = 1_700_000_000;
pub const STAKE_MIN_AGE: u64 = 60;
pub const WORK_REWARD: Amount = 50 * COIN;

pub fn fast_kdf() -> KdfConfig {
    KdfConfig {
        memory_kib: 64,
        iterations: 1,
        parallelism: 1,
    }
}

/// Difficulty floors at zero so tests never grind, short stake ages.
pub fn test_config(dir: &Path, allocations: &[(Address, Amount)], maturity: u64) -> Config {
    let mut config = Config {
        consensus: ConsensusConfig {
            coinbase_maturity: maturity,
            stake_min_age: STAKE_MIN_AGE,
            stake_max_age: 60 * 60 * 24,
            coinbase_reward: WORK_REWARD,
            stake_reward: COIN,
            min_work_difficulty: 0,
            min_stake_difficulty: 0,
            ..ConsensusConfig::default()
        },
        ..Config::default()
    };
    config.genesis.timestamp = GENESIS_TIME;
    config.genesis.allocations = allocations
        .iter()
        .map(|(address, amount)| GenesisAllocation {
            address: address.to_hex(),
            amount: *amount,
        })
        .collect();
    config.database.path = dir.join("ledger.db").to_string_lossy().into_owned();
    config.wallet.path = dir.join("wallet.json").to_string_lossy().into_owned();
    config.wallet.kdf = fast_kdf();
    config.wallet.keypool_size = 4;
    config.persistence.retry_backoff_ms = 1;
    config
}

pub fn memory_engine(config: Config, keystore: KeyStore) -> Result<LedgerEngine, ChainError> {
    LedgerEngine::new(config, Box::new(InMemoryPersistence::new()), keystore)
}

pub fn empty_keystore() -> KeyStore {
    KeyStore::new(fast_kdf(), 4)
}

pub fn genesis_of(engine: &LedgerEngine) -> Block {
    engine
        .with_ledger(|ledger| ledger.chain.block(&ledger.chain.genesis_hash()).cloned())
        .expect("genesis is always stored")
}

pub fn utxos_of(engine: &LedgerEngine) -> UtxoSet {
    engine.with_ledger(|ledger| ledger.chain.utxos().clone())
}

/// Genesis allocation `index` as an outpoint.
pub fn allocation(genesis: &Block, index: u32) -> OutPoint {
    OutPoint::new(genesis.transactions[0].txid(), index)
}

pub fn work_block(parent: &Block, extra: Vec<Transaction>, miner: Address) -> Block {
    let height = parent.header.height + 1;
    let timestamp = parent.header.timestamp + 1;
    let fees: Amount = extra.iter().map(|tx| tx.fee).sum();
    let mut txs = vec![Transaction::coinbase(
        height,
        timestamp,
        vec![TxOutput::pay_to(miner, WORK_REWARD + fees)],
    )];
    txs.extend(extra);
    Block::new(height, timestamp, parent.hash(), 0, Proof::Work { nonce: 0 }, txs)
}

/// `count` work blocks on top of `parent`, all paying `miner`.
pub fn work_chain(parent: &Block, count: usize, miner: Address) -> Vec<Block> {
    let mut blocks: Vec<Block> = Vec::with_capacity(count);
    for _ in 0..count {
        let tip = blocks.last().unwrap_or(parent);
        let block = work_block(tip, vec![], miner);
        blocks.push(block);
    }
    blocks
}

pub fn stake_block(
    parent: &Block,
    staker: &KeyPair,
    kernel: OutPoint,
    outputs: Vec<TxOutput>,
    timestamp: u64,
) -> Block {
    let mut coinstake = Transaction::coinstake(timestamp, vec![TxInput::new(kernel)], outputs);
    let signature = staker.sign(&coinstake.signature_hash(0)).unwrap();
    coinstake.inputs[0].unlock = Unlock::single(staker.public_key_bytes().to_vec(), signature.to_vec());
    Block::new(
        parent.header.height + 1,
        timestamp,
        parent.hash(),
        0,
        Proof::Stake { kernel },
        vec![coinstake],
    )
}

pub fn pay(owner: &KeyPair, outpoint: OutPoint, to: Address, value: Amount, fee: Amount) -> Transaction {
    let mut tx = Transaction::transfer(GENESIS_TIME, vec![TxInput::new(outpoint)], vec![TxOutput::pay_to(to, value)], fee);
    let signature = owner.sign(&tx.signature_hash(0)).unwrap();
    tx.inputs[0].unlock = Unlock::single(owner.public_key_bytes().to_vec(), signature.to_vec());
    tx
}

pub fn encode(block: &Block) -> Vec<u8> {
    bincode::serialize(block).unwrap()
}
