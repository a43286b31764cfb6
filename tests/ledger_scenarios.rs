mod common;

use common::*;
use stakeledger::amount::COIN;
use stakeledger::blockchain::{AcceptStatus, Block, BlockAcceptance, ChainTip, Sha256Hash, UtxoSet};
use stakeledger::config::Config;
use stakeledger::crypto::{Address, KeyPair};
use stakeledger::error::{ChainError, ErrorClass, KeyStoreError, TxError};
use stakeledger::events::{LedgerEvent, TxStatus};
use stakeledger::persistence::{InMemoryPersistence, Persistence, StateBatch};
use stakeledger::transaction::{OutPoint, Transaction, TxOutput};
use stakeledger::wallet::{FeePolicy, LockState, Recipient, UnlockScope};
use stakeledger::{LedgerEngine, Verdict};
use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

type TestResult = Result<(), Box<dyn std::error::Error>>;

const DAY: u64 = 86_400;

fn submit(engine: &LedgerEngine, block: &Block) -> Verdict<stakeledger::blockchain::BlockAcceptance> {
    engine.submit_block(&encode(block)).unwrap()
}

/// A branch of work blocks from `parent`, with `extra[i]` placed in block `i + 1`.
fn branch(parent: &Block, len: usize, miner: Address, mut extra: Vec<(usize, Transaction)>) -> Vec<Block> {
    let mut blocks: Vec<Block> = Vec::with_capacity(len);
    for position in 1..=len {
        let txs: Vec<Transaction> = extra
            .iter()
            .position(|(at, _)| *at == position)
            .map(|i| vec![extra.remove(i).1])
            .unwrap_or_default();
        let block = work_block(blocks.last().unwrap_or(parent), txs, miner);
        blocks.push(block);
    }
    blocks
}

#[test]
fn test_minted_stake_output_matures_after_520_blocks() -> TestResult {
    let dir = tempfile::tempdir()?;
    let staker = KeyPair::generate();
    let receiver = KeyPair::generate();
    let principal = 1_000_000 * COIN;
    let config = test_config(dir.path(), &[(staker.address(), principal)], 520);
    let engine = memory_engine(config, empty_keystore())?;
    let genesis = genesis_of(&engine);

    let block1 = stake_block(
        &genesis,
        &staker,
        allocation(&genesis, 0),
        vec![
            TxOutput::pay_to(staker.address(), principal),
            TxOutput::pay_to(receiver.address(), 100),
        ],
        GENESIS_TIME + STAKE_MIN_AGE + 1,
    );
    let verdict = submit(&engine, &block1);
    assert!(verdict.is_accepted(), "{:?}", verdict.rejection());
    let minted = stakeledger::transaction::OutPoint::new(block1.transactions[0].txid(), 1);

    let mut parent = block1;
    for height in 2..=521u64 {
        let block = work_block(&parent, vec![], Address([0xAA; 32]));
        assert!(submit(&engine, &block).is_accepted());
        parent = block;

        let balance = engine.get_balance(Some(&receiver.address()));
        if height <= 520 {
            assert_eq!(balance.immature, 100, "height {}", height);
            assert_eq!(balance.confirmed, 0, "height {}", height);
        } else {
            assert_eq!(balance.immature, 0);
            assert_eq!(balance.confirmed, 100);
        }

        if height == 520 {
            let early = pay(&receiver, minted, Address([1; 32]), 50, 0);
            let verdict = engine.submit_transaction(&bincode::serialize(&early)?)?;
            assert!(matches!(
                verdict.rejection().map(|r| r.reason.root_cause()),
                Some(ChainError::Transaction(TxError::ImmatureSpend { .. }))
            ));
        }
    }

    let spend = pay(&receiver, minted, Address([1; 32]), 50, 0);
    assert!(engine.submit_transaction(&bincode::serialize(&spend)?)?.is_accepted());
    Ok(())
}

#[test]
fn test_reorg_matches_fresh_replay_of_winning_branch() -> TestResult {
    let dir = tempfile::tempdir()?;
    let owner = KeyPair::generate();
    let allocations = [(owner.address(), 1_000 * COIN), (owner.address(), 500 * COIN)];
    let engine = memory_engine(test_config(dir.path(), &allocations, 2), empty_keystore())?;
    let genesis = genesis_of(&engine);

    let a_tx = pay(&owner, allocation(&genesis, 0), Address([0x0A; 32]), 10 * COIN, 0);
    let b_tx = pay(&owner, allocation(&genesis, 1), Address([0x0B; 32]), 20 * COIN, 0);
    let branch_a = branch(&genesis, 10, Address([0xA1; 32]), vec![(5, a_tx.clone())]);
    let branch_b = branch(&genesis, 12, Address([0xB1; 32]), vec![(3, b_tx)]);

    for block in &branch_a {
        assert!(submit(&engine, block).is_accepted());
    }
    assert_eq!(engine.get_chain_tip().hash, branch_a[9].hash());

    let mut statuses = Vec::new();
    for block in &branch_b {
        match submit(&engine, block) {
            Verdict::Accepted(acceptance) => statuses.push(acceptance.status),
            Verdict::Rejected(rejection) => panic!("branch B rejected: {}", rejection),
        }
    }
    assert_eq!(statuses[9], AcceptStatus::SideBranch);
    assert_eq!(statuses[10], AcceptStatus::Reorganized { disconnected: 10 });
    assert_eq!(statuses[11], AcceptStatus::Connected);
    assert_eq!(engine.get_chain_tip().hash, branch_b[11].hash());

    // the transfer only branch A confirmed is pending again
    assert!(engine.with_ledger(|ledger| ledger.mempool.contains(&a_tx.txid())));

    let replay = memory_engine(test_config(dir.path(), &allocations, 2), empty_keystore())?;
    for block in &branch_b {
        assert!(submit(&replay, block).is_accepted());
    }
    assert_eq!(replay.get_chain_tip(), engine.get_chain_tip());
    assert_eq!(utxos_of(&replay), utxos_of(&engine));
    Ok(())
}

#[test]
fn test_bad_signature_in_competing_branch_rolls_back() -> TestResult {
    let dir = tempfile::tempdir()?;
    let owner = KeyPair::generate();
    let allocations = [(owner.address(), 1_000 * COIN)];
    let engine = memory_engine(test_config(dir.path(), &allocations, 2), empty_keystore())?;
    let genesis = genesis_of(&engine);

    let branch_a = branch(&genesis, 10, Address([0xA1; 32]), vec![]);
    for block in &branch_a {
        assert!(submit(&engine, block).is_accepted());
    }
    let tip_a = engine.get_chain_tip();
    let utxos_a = utxos_of(&engine);

    let mut forged = pay(&owner, allocation(&genesis, 0), Address([0x0B; 32]), 10 * COIN, 0);
    forged.inputs[0].unlock.signatures[0].signature[5] ^= 0xFF;
    let branch_b = branch(&genesis, 12, Address([0xB1; 32]), vec![(5, forged)]);

    let verdicts: Vec<_> = branch_b.iter().map(|block| submit(&engine, block)).collect();
    assert!(verdicts[..10].iter().all(|v| v.is_accepted()));
    assert!(!verdicts[10].is_accepted());
    assert!(!verdicts[11].is_accepted());

    assert_eq!(engine.get_chain_tip(), tip_a);
    assert_eq!(utxos_of(&engine), utxos_a);
    Ok(())
}

#[test]
fn test_in_block_double_spend_rejected() -> TestResult {
    let dir = tempfile::tempdir()?;
    let owner = KeyPair::generate();
    let engine = memory_engine(
        test_config(dir.path(), &[(owner.address(), 1_000 * COIN)], 2),
        empty_keystore(),
    )?;
    let genesis = genesis_of(&engine);
    let before = utxos_of(&engine);

    let outpoint = allocation(&genesis, 0);
    let first = pay(&owner, outpoint, Address([1; 32]), COIN, 0);
    let second = pay(&owner, outpoint, Address([2; 32]), 2 * COIN, 0);
    let block = work_block(&genesis, vec![first, second], Address([0xAA; 32]));

    let rejection = submit(&engine, &block).rejection().cloned().expect("double spend must be rejected");
    assert_eq!(
        rejection.reason.root_cause(),
        &ChainError::Transaction(TxError::AlreadySpent(outpoint))
    );
    assert!(rejection.penalize);
    assert_eq!(engine.get_chain_tip().height, 0);
    assert_eq!(utxos_of(&engine), before);
    Ok(())
}

#[test]
fn test_undecodable_payloads_are_structural_rejections() -> TestResult {
    let dir = tempfile::tempdir()?;
    let engine = memory_engine(test_config(dir.path(), &[], 2), empty_keystore())?;

    let block = engine.submit_block(&[0xFF, 0x01])?;
    assert_eq!(block.rejection().map(|r| r.class), Some(ErrorClass::Structural));
    let tx = engine.submit_transaction(&[])?;
    assert_eq!(tx.rejection().map(|r| r.class), Some(ErrorClass::Structural));
    Ok(())
}

#[test]
fn test_ledger_reloads_from_database() -> TestResult {
    let dir = tempfile::tempdir()?;
    let owner = KeyPair::generate();
    let config = test_config(dir.path(), &[(owner.address(), 1_000 * COIN)], 2);

    let (tip, utxos) = {
        let engine = LedgerEngine::open(config.clone())?;
        let genesis = genesis_of(&engine);
        let spend = pay(&owner, allocation(&genesis, 0), Address([3; 32]), 400 * COIN, 0);
        for block in branch(&genesis, 4, Address([0xAA; 32]), vec![(2, spend)]) {
            assert!(submit(&engine, &block).is_accepted());
        }
        // a losing side block is stored too and must not disturb the reload
        let side = work_block(&genesis, vec![], Address([0xBB; 32]));
        assert!(submit(&engine, &side).is_accepted());
        (engine.get_chain_tip(), utxos_of(&engine))
    };

    let reopened = LedgerEngine::open(config)?;
    assert_eq!(reopened.get_chain_tip(), tip);
    assert_eq!(utxos_of(&reopened), utxos);
    Ok(())
}

#[test]
fn test_inconsistent_storage_is_corrupt() -> TestResult {
    let dir = tempfile::tempdir()?;
    let config = test_config(dir.path(), &[(Address([5; 32]), COIN)], 2);
    let storage = InMemoryPersistence::new();
    {
        let engine = LedgerEngine::new(config.clone(), Box::new(storage.clone()), empty_keystore())?;
        let genesis = genesis_of(&engine);
        for block in work_chain(&genesis, 2, Address([0xAA; 32])) {
            assert!(submit(&engine, &block).is_accepted());
        }
    }

    let mut other_genesis = config.clone();
    other_genesis.genesis.timestamp += 1;
    match LedgerEngine::new(other_genesis, Box::new(storage.clone()), empty_keystore()) {
        Err(ChainError::CorruptLedger(_)) => {}
        Err(err) => panic!("unexpected error {}", err),
        Ok(_) => panic!("a foreign genesis must not load"),
    }

    storage.save_batch(&StateBatch {
        tip: Some(ChainTip {
            height: 42,
            hash: [7; 32],
            cumulative_score: 0,
        }),
        ..StateBatch::default()
    })?;
    match LedgerEngine::new(config, Box::new(storage), empty_keystore()) {
        Err(err) => assert_eq!(err.class(), ErrorClass::Fatal),
        Ok(_) => panic!("a mismatched tip must not load"),
    }
    Ok(())
}

#[tokio::test]
async fn test_events_follow_transaction_lifecycle() -> TestResult {
    let dir = tempfile::tempdir()?;
    let owner = KeyPair::generate();
    let engine = memory_engine(
        test_config(dir.path(), &[(owner.address(), 1_000 * COIN)], 2),
        empty_keystore(),
    )?;
    let mut events = engine.subscribe();
    let genesis = genesis_of(&engine);

    let tx = pay(&owner, allocation(&genesis, 0), Address([3; 32]), 10 * COIN, 1_000);
    let txid = tx.txid();
    assert!(engine.submit_transaction(&bincode::serialize(&tx)?)?.is_accepted());
    assert_eq!(
        events.recv().await?,
        LedgerEvent::TransactionStatusChanged {
            txid,
            status: TxStatus::Pending
        }
    );

    let block = work_block(&genesis, vec![tx], Address([0xAA; 32]));
    assert!(submit(&engine, &block).is_accepted());
    assert_eq!(
        events.recv().await?,
        LedgerEvent::NewBlock {
            height: 1,
            hash: block.hash()
        }
    );
    assert_eq!(
        events.recv().await?,
        LedgerEvent::TransactionStatusChanged {
            txid,
            status: TxStatus::Confirmed { height: 1 }
        }
    );
    assert!(engine.with_ledger(|ledger| ledger.mempool.is_empty()));

    let _warning = engine.encrypt_wallet("correct horse")?;
    assert_eq!(
        events.recv().await?,
        LedgerEvent::WalletLockStateChanged(LockState::Locked)
    );
    engine.unlock_wallet("correct horse", None)?;
    assert_eq!(
        events.recv().await?,
        LedgerEvent::WalletLockStateChanged(LockState::Unlocked(UnlockScope::Full))
    );
    Ok(())
}

#[test]
fn test_wallet_mints_and_spends() -> TestResult {
    let dir = tempfile::tempdir()?;
    let mut keystore = empty_keystore();
    let staker = keystore.generate_key()?;
    let allocations = [(staker, 1_000_000 * COIN), (staker, 500 * COIN)];
    let engine = memory_engine(test_config(dir.path(), &allocations, 2), keystore)?;

    engine.encrypt_wallet("pw")?;
    assert_eq!(
        engine.mint_block(GENESIS_TIME + 120).err(),
        Some(ChainError::Custody(KeyStoreError::KeyStoreLocked))
    );

    engine.unlock_wallet_for_staking("pw", None)?;
    let acceptance = match engine.mint_block(GENESIS_TIME + 120)? {
        Some(Verdict::Accepted(acceptance)) => acceptance,
        other => panic!("expected a minted block, got {:?}", other),
    };
    assert_eq!(acceptance.height, 1);
    assert_eq!(acceptance.status, AcceptStatus::Connected);
    assert_eq!(
        engine.with_ledger(|ledger| ledger.chain.block(&acceptance.hash).map(Block::is_proof_of_stake)),
        Some(true)
    );
    // a young kernel above the split threshold comes back as two outputs
    let coinstake = coinstake_of(&engine, &acceptance)?;
    assert_eq!(coinstake.inputs.len(), 1);
    assert_eq!(coinstake.outputs.len(), 2);

    let balance = engine.get_balance(None);
    assert_eq!(balance.staked, 1_000_000 * COIN + COIN);
    assert_eq!(balance.confirmed, 500 * COIN);

    let recipients = [Recipient {
        address: Address([9; 32]),
        amount: 5 * COIN,
    }];
    assert_eq!(
        engine.send(&recipients, FeePolicy::Fixed(1_000)).err(),
        Some(ChainError::Custody(KeyStoreError::StakingOnly))
    );

    engine.unlock_wallet("pw", None)?;
    let txid = match engine.send(&recipients, FeePolicy::Fixed(1_000))? {
        Verdict::Accepted(txid) => txid,
        Verdict::Rejected(rejection) => panic!("send rejected: {}", rejection),
    };
    let pending = engine.get_balance(None);
    assert_eq!(pending.confirmed, 0);
    assert_eq!(pending.unconfirmed, 495 * COIN - 1_000);

    assert!(engine.mine_work_block(Address([0xAA; 32]), GENESIS_TIME + 200)?.is_accepted());
    assert!(!engine.with_ledger(|ledger| ledger.mempool.contains(&txid)));
    let settled = engine.get_balance(None);
    assert_eq!(settled.confirmed, 495 * COIN - 1_000);
    assert_eq!(settled.unconfirmed, 0);
    assert_eq!(engine.get_balance(Some(&Address([9; 32]))).confirmed, 5 * COIN);
    Ok(())
}

#[test]
fn test_import_handles_orphans_and_cancellation() -> TestResult {
    let dir = tempfile::tempdir()?;
    let config = test_config(dir.path(), &[(Address([5; 32]), COIN)], 2);
    let source = memory_engine(config.clone(), empty_keystore())?;
    let blocks = work_chain(&genesis_of(&source), 5, Address([0xAA; 32]));

    let cancelled = CancellationToken::new();
    cancelled.cancel();
    let summary = source.import_blocks(blocks.clone(), &cancelled)?;
    assert!(summary.cancelled);
    assert_eq!(summary.accepted, 0);
    assert_eq!(source.get_chain_tip().height, 0);

    let reversed: Vec<Block> = blocks.iter().rev().cloned().collect();
    let summary = source.import_blocks(reversed, &CancellationToken::new())?;
    assert!(!summary.cancelled);
    assert_eq!(summary.orphaned, 4);
    assert_eq!(summary.accepted, 1);
    assert_eq!(source.get_chain_tip().hash, blocks[4].hash());
    Ok(())
}

#[test]
fn test_verify_chain() -> TestResult {
    let dir = tempfile::tempdir()?;
    let owner = KeyPair::generate();
    let engine = memory_engine(
        test_config(dir.path(), &[(owner.address(), 1_000 * COIN)], 2),
        empty_keystore(),
    )?;
    let genesis = genesis_of(&engine);
    let spend = pay(&owner, allocation(&genesis, 0), Address([3; 32]), 10 * COIN, 0);
    for block in branch(&genesis, 6, Address([0xAA; 32]), vec![(3, spend)]) {
        assert!(submit(&engine, &block).is_accepted());
    }

    let report = engine.verify_chain(&CancellationToken::new())?;
    assert_eq!(report.height, 6);
    assert_eq!(report.utxos, utxos_of(&engine).len());

    let cancelled = CancellationToken::new();
    cancelled.cancel();
    assert_eq!(engine.verify_chain(&cancelled).err(), Some(ChainError::Cancelled));
    Ok(())
}

fn coinstake_of(engine: &LedgerEngine, acceptance: &BlockAcceptance) -> Result<Transaction, Box<dyn std::error::Error>> {
    let coinstake = engine.with_ledger(|ledger| {
        ledger
            .chain
            .block(&acceptance.hash)
            .and_then(|block| block.transactions.first().cloned())
    });
    Ok(coinstake.ok_or("minted block is not stored")?)
}

fn minted(result: Option<Verdict<BlockAcceptance>>) -> BlockAcceptance {
    match result {
        Some(Verdict::Accepted(acceptance)) => acceptance,
        other => panic!("expected a minted block, got {:?}", other),
    }
}

/// A wallet holding a 100 coin allocation and two 50 coin work rewards from
/// separate blocks, all mature.
fn aged_staking_engine(
    dir: &Path,
    configure: impl FnOnce(&mut Config),
) -> Result<(LedgerEngine, Address, Vec<OutPoint>), Box<dyn std::error::Error>> {
    let mut keystore = empty_keystore();
    let staker = keystore.generate_key()?;
    let mut config = test_config(dir, &[(staker, 100 * COIN)], 2);
    configure(&mut config);
    let engine = memory_engine(config, keystore)?;
    let genesis = genesis_of(&engine);

    let first = work_block(&genesis, vec![], staker);
    let second = work_block(&first, vec![], staker);
    let mut blocks = vec![first.clone(), second.clone()];
    blocks.extend(work_chain(&second, 3, Address([0xAA; 32])));
    for block in &blocks {
        assert!(submit(&engine, block).is_accepted());
    }
    let coins = vec![
        allocation(&genesis, 0),
        OutPoint::new(first.transactions[0].txid(), 0),
        OutPoint::new(second.transactions[0].txid(), 0),
    ];
    Ok((engine, staker, coins))
}

#[test]
fn test_minter_combines_small_aged_coins() -> TestResult {
    let dir = tempfile::tempdir()?;
    let (engine, staker, coins) = aged_staking_engine(dir.path(), |_| {})?;

    let acceptance = minted(engine.mint_block(GENESIS_TIME + 2 * DAY)?);
    let coinstake = coinstake_of(&engine, &acceptance)?;
    assert_eq!(coinstake.inputs[0].previous_output, coins[0]);
    let spent: HashSet<OutPoint> = coinstake.inputs.iter().map(|input| input.previous_output).collect();
    assert_eq!(spent, coins.iter().copied().collect());
    assert_eq!(coinstake.outputs.len(), 1);
    assert_eq!(coinstake.outputs[0].value, 201 * COIN);
    assert_eq!(engine.get_balance(Some(&staker)).staked, 201 * COIN);
    Ok(())
}

#[test]
fn test_minter_leaves_reserve_unstaked() -> TestResult {
    let dir = tempfile::tempdir()?;
    let (engine, _, coins) = aged_staking_engine(dir.path(), |config| {
        config.minter.reserve_balance = 150 * COIN;
    })?;

    let acceptance = minted(engine.mint_block(GENESIS_TIME + 2 * DAY)?);
    let coinstake = coinstake_of(&engine, &acceptance)?;
    assert_eq!(coinstake.inputs.len(), 1);
    assert!(coins[1..].contains(&coinstake.inputs[0].previous_output));
    assert_eq!(coinstake.outputs[0].value, 51 * COIN);
    assert!(utxos_of(&engine).get(&coins[0]).is_some());

    let (reserved, _, _) = aged_staking_engine(dir.path(), |config| {
        config.minter.reserve_balance = 200 * COIN;
    })?;
    assert!(reserved.mint_block(GENESIS_TIME + 2 * DAY)?.is_none());
    assert_eq!(reserved.get_chain_tip().height, 5);
    Ok(())
}

#[test]
fn test_block_beyond_clock_drift_is_retryable() -> TestResult {
    let dir = tempfile::tempdir()?;
    let engine = memory_engine(
        test_config(dir.path(), &[(Address([5; 32]), COIN)], 2),
        empty_keystore(),
    )?;
    let genesis = genesis_of(&engine);
    let drift = engine.config().consensus.max_future_drift_secs;
    let now = chrono::Utc::now().timestamp() as u64;

    let mut ahead = work_block(&genesis, vec![], Address([0xAA; 32]));
    ahead.header.timestamp = now + drift + 60 * 60;
    let verdict = submit(&engine, &ahead);
    let rejection = verdict.rejection().ok_or("future block was accepted")?;
    assert!(matches!(rejection.reason, ChainError::TimestampTooFar { .. }));
    assert!(!rejection.penalize);
    assert_eq!(engine.get_chain_tip().height, 0);
    assert!(engine.with_ledger(|ledger| ledger.chain.record(&ahead.hash()).is_none()));

    let on_time = work_block(&genesis, vec![], Address([0xAA; 32]));
    assert!(submit(&engine, &on_time).is_accepted());
    assert_eq!(engine.get_chain_tip().hash, on_time.hash());
    Ok(())
}

/// In-memory storage whose writes fail while `broken` is set.
#[derive(Clone, Default)]
struct FailingStorage {
    inner: InMemoryPersistence,
    broken: Arc<AtomicBool>,
}

impl Persistence for FailingStorage {
    fn save_batch(&self, batch: &StateBatch<'_>) -> Result<(), ChainError> {
        if self.broken.load(Ordering::SeqCst) {
            return Err(ChainError::DatabaseError("disk full".to_string()));
        }
        self.inner.save_batch(batch)
    }

    fn load_blocks(&self) -> Result<Vec<Block>, ChainError> {
        self.inner.load_blocks()
    }

    fn load_tip(&self) -> Result<Option<(Sha256Hash, u64)>, ChainError> {
        self.inner.load_tip()
    }

    fn load_utxo_set(&self) -> Result<UtxoSet, ChainError> {
        self.inner.load_utxo_set()
    }
}

#[test]
fn test_failed_write_halts_ledger() -> TestResult {
    let dir = tempfile::tempdir()?;
    let owner = KeyPair::generate();
    let mut config = test_config(dir.path(), &[(owner.address(), 1_000 * COIN)], 2);
    config.persistence.max_write_attempts = 2;
    let storage = FailingStorage::default();
    let engine = LedgerEngine::new(config.clone(), Box::new(storage.clone()), empty_keystore())?;
    let genesis = genesis_of(&engine);
    let blocks = work_chain(&genesis, 3, Address([0xAA; 32]));
    assert!(submit(&engine, &blocks[0]).is_accepted());

    storage.broken.store(true, Ordering::SeqCst);
    let failure = match engine.submit_block(&encode(&blocks[1])) {
        Err(err) => err,
        Ok(_) => panic!("a failed write must surface as an error"),
    };
    assert!(matches!(failure, ChainError::Persistence(_)));
    assert_eq!(failure.class(), ErrorClass::Fatal);

    // storage recovering does not unhalt the engine
    storage.broken.store(false, Ordering::SeqCst);
    assert_eq!(engine.submit_block(&encode(&blocks[2])).err(), Some(failure.clone()));
    let tx = pay(&owner, allocation(&genesis, 0), Address([3; 32]), 10 * COIN, 0);
    assert_eq!(engine.accept_transaction(tx).err(), Some(failure.clone()));
    assert_eq!(
        engine.mine_work_block(Address([0xAA; 32]), GENESIS_TIME + 100).err(),
        Some(failure.clone())
    );
    let summary = engine.import_blocks(blocks[2..].to_vec(), &CancellationToken::new());
    assert_eq!(summary.err(), Some(failure.clone()));
    assert_eq!(engine.halted(), Some(failure));

    let reloaded = LedgerEngine::new(config, Box::new(storage), empty_keystore())?;
    assert_eq!(reloaded.get_chain_tip().hash, blocks[0].hash());
    assert!(reloaded.halted().is_none());
    Ok(())
}
