//! The ledger engine: one entry point for block and transaction submission,
//! wallet custody and chain queries.
//!
//! Chain state and mempool live behind a single `RwLock`; every mutation is
//! one write-locked critical section. The key store has its own mutex and is
//! always locked after the ledger.
//!
//! A failed write halts the engine: storage no longer matches memory, so
//! every later mutation returns the original failure until a restart reloads
//! the ledger from what was actually stored.

use crate::blockchain::{AcceptStatus, Block, BlockAcceptance, BlockStatus, ChainState, ChainTip};
use crate::config::Config;
use crate::consensus::stake::{search_kernel, KernelCandidate, StakeParams};
use crate::crypto::Address;
use crate::error::{ChainError, ErrorClass, Rejection, Result, Verdict};
use crate::events::{EventBus, LedgerEvent, TxStatus};
use crate::mempool::Mempool;
use crate::miner;
use crate::persistence::{with_retry, Database, Persistence, StateBatch};
use crate::transaction::{Transaction, TxId, TxInput, TxOutput, Unlock};
use crate::wallet::{
    build_transaction, compute_balance, plan_coinstake, spendable_coins, stakeable_coins, Balance, FeePolicy,
    KeyStore, LockState, PassphraseWarning, Recipient, StakePolicy,
};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashSet, VecDeque};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub struct LedgerState {
    pub chain: ChainState,
    pub mempool: Mempool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub accepted: usize,
    pub orphaned: usize,
    pub rejected: usize,
    /// Set when the token fired before every block was processed.
    pub cancelled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerifyReport {
    pub height: u64,
    pub utxos: usize,
}

/// The genesis block described by the configuration.
pub fn genesis_block(config: &Config) -> Result<Block> {
    Ok(Block::genesis(
        config.genesis.timestamp,
        &config.genesis.parsed_allocations()?,
    ))
}

fn wall_clock() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}

pub struct LedgerEngine {
    config: Config,
    ledger: RwLock<LedgerState>,
    keystore: Mutex<KeyStore>,
    persistence: Box<dyn Persistence>,
    events: EventBus,
    /// First fatal failure; once set the ledger refuses mutations.
    halted: Mutex<Option<ChainError>>,
}

impl LedgerEngine {
    /// Opens the configured database and key store.
    pub fn open(config: Config) -> Result<Self> {
        let database = Database::open(&config.database.path)?;
        let keystore = KeyStore::open(&config.wallet.path, config.wallet.kdf, config.wallet.keypool_size)?;
        LedgerEngine::new(config, Box::new(database), keystore)
    }

    /// Rebuilds chain state by replaying stored blocks, then cross-checks the
    /// result against the stored tip and UTXO set.
    pub fn new(config: Config, persistence: Box<dyn Persistence>, keystore: KeyStore) -> Result<Self> {
        config.validate()?;
        let genesis = genesis_block(&config)?;
        let genesis_hash = genesis.hash();
        let mut chain = ChainState::new(genesis, config.consensus.clone())?;

        let stored = persistence.load_blocks()?;
        let fresh = stored.is_empty();
        for block in stored {
            if block.header.height == 0 {
                if block.hash() != genesis_hash {
                    return Err(ChainError::CorruptLedger(
                        "stored genesis block does not match the configured genesis".to_string(),
                    ));
                }
                continue;
            }
            let hash = block.hash();
            if let Err(err) = chain.accept_block(block) {
                if err.class() == ErrorClass::Fatal {
                    return Err(err);
                }
                warn!("stored block {} rejected on replay: {}", hex::encode(hash), err);
            }
        }

        let changes = chain.take_changes();
        if fresh {
            let blocks = changes.stored.iter().collect();
            let batch = StateBatch {
                blocks,
                tip: Some(chain.tip()),
                utxos_added: &changes.utxos_added,
                utxos_removed: &changes.utxos_removed,
            };
            with_retry(&config.persistence, "ledger initialisation", || persistence.save_batch(&batch))?;
            info!("initialised new ledger at genesis {}", hex::encode(genesis_hash));
        } else {
            let tip = chain.tip();
            match persistence.load_tip()? {
                Some((hash, height)) if hash == tip.hash && height == tip.height => {}
                Some((hash, height)) => {
                    return Err(ChainError::CorruptLedger(format!(
                        "stored tip {} at height {} differs from replayed tip {} at height {}",
                        hex::encode(hash),
                        height,
                        hex::encode(tip.hash),
                        tip.height
                    )));
                }
                None => {
                    return Err(ChainError::CorruptLedger("blocks stored without a tip".to_string()));
                }
            }
            if &persistence.load_utxo_set()? != chain.utxos() {
                return Err(ChainError::CorruptLedger(
                    "stored UTXO set differs from the replayed chain".to_string(),
                ));
            }
            info!("loaded ledger at height {} ({})", tip.height, hex::encode(tip.hash));
        }

        let mempool = Mempool::new(config.mempool.max_transactions);
        Ok(LedgerEngine {
            config,
            ledger: RwLock::new(LedgerState { chain, mempool }),
            keystore: Mutex::new(keystore),
            persistence,
            events: EventBus::default(),
            halted: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LedgerEvent> {
        self.events.subscribe()
    }

    pub fn get_chain_tip(&self) -> ChainTip {
        self.ledger.read().chain.tip()
    }

    /// Read access for queries that need more than the tip.
    pub fn with_ledger<T>(&self, f: impl FnOnce(&LedgerState) -> T) -> T {
        f(&self.ledger.read())
    }

    /// The failure that halted the engine, if any.
    pub fn halted(&self) -> Option<ChainError> {
        self.halted.lock().clone()
    }

    fn ensure_running(&self) -> Result<()> {
        match &*self.halted.lock() {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    /// Latches `err` so that every later mutation fails with it.
    fn halt(&self, err: ChainError) -> ChainError {
        let err = match err {
            ChainError::Persistence(reason) => ChainError::Persistence(format!(
                "{}; ledger halted, restart to reload from storage",
                reason
            )),
            other => other,
        };
        error!("halting ledger: {}", err);
        self.halted.lock().get_or_insert(err).clone()
    }

    // ------------------------------------------------------------------------
    // Submission
    // ------------------------------------------------------------------------

    /// Decodes and accepts a block. Validation failures are returned as
    /// `Verdict::Rejected`; only fatal errors are `Err`.
    pub fn submit_block(&self, bytes: &[u8]) -> Result<Verdict<BlockAcceptance>> {
        let block: Block = match bincode::deserialize(bytes) {
            Ok(block) => block,
            Err(e) => return Ok(Verdict::Rejected(Rejection::from_error(e.into()))),
        };
        self.accept_block(block)
    }

    /// Accepts a block arriving now; one timestamped beyond the allowed clock
    /// drift is rejected and may be submitted again later.
    pub fn accept_block(&self, block: Block) -> Result<Verdict<BlockAcceptance>> {
        let mut state = self.ledger.write();
        self.accept_locked(&mut state, block, wall_clock())
    }

    fn accept_locked(&self, state: &mut LedgerState, block: Block, arrival: u64) -> Result<Verdict<BlockAcceptance>> {
        self.ensure_running()?;
        let hash = block.hash();
        let result = state.chain.accept_block_at(block, arrival);
        if let Err(err) = &result {
            if err.class() == ErrorClass::Fatal {
                return Err(self.halt(err.clone()));
            }
        }
        self.commit_changes(state)?;
        match result {
            Ok(acceptance) => {
                if acceptance.status != AcceptStatus::Orphaned {
                    debug!("block {} accepted: {:?}", hex::encode(hash), acceptance.status);
                }
                Ok(Verdict::Accepted(acceptance))
            }
            Err(err) => {
                let rejection = Rejection::from_error(err);
                warn!("block {} rejected: {}", hex::encode(hash), rejection);
                Ok(Verdict::Rejected(rejection))
            }
        }
    }

    /// Decodes a transaction and admits it to the mempool.
    pub fn submit_transaction(&self, bytes: &[u8]) -> Result<Verdict<TxId>> {
        let tx: Transaction = match bincode::deserialize(bytes) {
            Ok(tx) => tx,
            Err(e) => return Ok(Verdict::Rejected(Rejection::from_error(e.into()))),
        };
        self.accept_transaction(tx)
    }

    pub fn accept_transaction(&self, tx: Transaction) -> Result<Verdict<TxId>> {
        let mut state = self.ledger.write();
        self.ensure_running()?;
        let LedgerState { chain, mempool } = &mut *state;
        let already_pending = mempool.contains(&tx.txid());
        let ctx = chain.validation_context();
        match mempool.add(tx, chain.utxos(), &ctx) {
            Ok(txid) => {
                if !already_pending {
                    self.events.publish(LedgerEvent::TransactionStatusChanged {
                        txid,
                        status: TxStatus::Pending,
                    });
                }
                Ok(Verdict::Accepted(txid))
            }
            Err(err) => Ok(Verdict::Rejected(Rejection::from_error(err))),
        }
    }

    /// Persists and publishes whatever the last chain operation changed, and
    /// brings the mempool in line with the new best chain.
    fn commit_changes(&self, state: &mut LedgerState) -> Result<()> {
        let LedgerState { chain, mempool } = state;
        let changes = chain.take_changes();
        if changes.is_empty() {
            return Ok(());
        }

        let blocks: Vec<&Block> = changes
            .stored
            .iter()
            .filter(|b| chain.record(&b.hash()).map_or(true, |r| r.status != BlockStatus::Invalid))
            .collect();
        let batch = StateBatch {
            blocks,
            tip: Some(chain.tip()),
            utxos_added: &changes.utxos_added,
            utxos_removed: &changes.utxos_removed,
        };
        if let Err(err) = with_retry(&self.config.persistence, "ledger write", || self.persistence.save_batch(&batch)) {
            return Err(self.halt(err));
        }

        let mut notifications = VecDeque::new();
        let mut confirmed_now = HashSet::new();
        for block in &changes.connected {
            let removal = mempool.remove_for_block(block);
            for txid in removal.confirmed {
                notifications.push_back(LedgerEvent::TransactionStatusChanged {
                    txid,
                    status: TxStatus::Confirmed {
                        height: block.header.height,
                    },
                });
            }
            for txid in removal.dropped {
                notifications.push_back(LedgerEvent::TransactionStatusChanged {
                    txid,
                    status: TxStatus::Dropped,
                });
            }
            confirmed_now.extend(block.transactions.iter().map(|tx| tx.txid()));
        }

        let ctx = chain.validation_context();
        if !changes.disconnected.is_empty() {
            for block in &changes.disconnected {
                let outcome = mempool.readmit(block, &confirmed_now, chain.utxos(), &ctx);
                for txid in outcome.readmitted {
                    notifications.push_back(LedgerEvent::TransactionStatusChanged {
                        txid,
                        status: TxStatus::Pending,
                    });
                }
                for txid in outcome.dropped {
                    notifications.push_back(LedgerEvent::TransactionStatusChanged {
                        txid,
                        status: TxStatus::Dropped,
                    });
                }
            }
            for txid in mempool.revalidate(chain.utxos(), &ctx) {
                notifications.push_back(LedgerEvent::TransactionStatusChanged {
                    txid,
                    status: TxStatus::Dropped,
                });
            }
        }

        for block in &changes.connected {
            self.events.publish(LedgerEvent::NewBlock {
                height: block.header.height,
                hash: block.hash(),
            });
        }
        for event in notifications {
            self.events.publish(event);
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Long-running jobs
    // ------------------------------------------------------------------------

    /// Accepts blocks in order, checking `cancel` between blocks.
    pub fn import_blocks(
        &self,
        blocks: impl IntoIterator<Item = Block>,
        cancel: &CancellationToken,
    ) -> Result<ImportSummary> {
        let mut summary = ImportSummary::default();
        for block in blocks {
            if cancel.is_cancelled() {
                summary.cancelled = true;
                break;
            }
            match self.accept_block(block)? {
                Verdict::Accepted(BlockAcceptance {
                    status: AcceptStatus::Orphaned,
                    ..
                }) => summary.orphaned += 1,
                Verdict::Accepted(_) => summary.accepted += 1,
                Verdict::Rejected(_) => summary.rejected += 1,
            }
        }
        info!(
            "import finished: {} accepted, {} orphaned, {} rejected{}",
            summary.accepted,
            summary.orphaned,
            summary.rejected,
            if summary.cancelled { " (cancelled)" } else { "" }
        );
        Ok(summary)
    }

    /// Re-validates the best chain from genesis into a scratch state and checks
    /// that it reproduces the live UTXO set.
    pub fn verify_chain(&self, cancel: &CancellationToken) -> Result<VerifyReport> {
        let (blocks, tip, utxos) = {
            let state = self.ledger.read();
            let blocks: Vec<Block> = state.chain.best_chain_blocks().cloned().collect();
            (blocks, state.chain.tip(), state.chain.utxos().clone())
        };
        let mut blocks = blocks.into_iter();
        let genesis = blocks
            .next()
            .ok_or_else(|| ChainError::CorruptLedger("best chain is empty".to_string()))?;
        let mut scratch = ChainState::new(genesis, self.config.consensus.clone())?;
        for block in blocks {
            if cancel.is_cancelled() {
                return Err(ChainError::Cancelled);
            }
            let hash = block.hash();
            scratch.accept_block(block).map_err(|e| {
                ChainError::CorruptLedger(format!("block {} no longer validates: {}", hex::encode(hash), e))
            })?;
        }
        if scratch.tip_hash() != tip.hash || scratch.utxos() != &utxos {
            return Err(ChainError::CorruptLedger(
                "replayed chain does not reproduce the live UTXO set".to_string(),
            ));
        }
        info!("verified {} blocks, {} unspent outputs", tip.height, utxos.len());
        Ok(VerifyReport {
            height: tip.height,
            utxos: utxos.len(),
        })
    }

    // ------------------------------------------------------------------------
    // Wallet
    // ------------------------------------------------------------------------

    fn publish_lock_state(&self, keystore: &mut KeyStore) {
        self.events
            .publish(LedgerEvent::WalletLockStateChanged(keystore.lock_state()));
    }

    pub fn wallet_lock_state(&self) -> LockState {
        self.keystore.lock().lock_state()
    }

    pub fn lock_wallet(&self) -> Result<()> {
        let mut keystore = self.keystore.lock();
        keystore.lock()?;
        self.publish_lock_state(&mut keystore);
        Ok(())
    }

    pub fn unlock_wallet(&self, passphrase: &str, timeout: Option<Duration>) -> Result<()> {
        let mut keystore = self.keystore.lock();
        keystore.unlock(passphrase, timeout)?;
        self.publish_lock_state(&mut keystore);
        Ok(())
    }

    pub fn unlock_wallet_for_staking(&self, passphrase: &str, timeout: Option<Duration>) -> Result<()> {
        let mut keystore = self.keystore.lock();
        keystore.unlock_for_staking(passphrase, timeout)?;
        self.publish_lock_state(&mut keystore);
        Ok(())
    }

    pub fn encrypt_wallet(&self, passphrase: &str) -> Result<PassphraseWarning> {
        let mut keystore = self.keystore.lock();
        let warning = keystore.encrypt(passphrase)?;
        self.publish_lock_state(&mut keystore);
        Ok(warning)
    }

    pub fn change_wallet_passphrase(&self, old: &str, new: &str) -> Result<()> {
        self.keystore.lock().change_passphrase(old, new)?;
        Ok(())
    }

    pub fn new_address(&self) -> Result<Address> {
        Ok(self.keystore.lock().new_address()?)
    }

    pub fn wallet_addresses(&self) -> Vec<Address> {
        self.keystore.lock().addresses()
    }

    /// Balance of one address, or of every wallet address when `None`.
    pub fn get_balance(&self, address: Option<&Address>) -> Balance {
        let state = self.ledger.read();
        let owned: HashSet<Address> = match address {
            Some(address) => [*address].into_iter().collect(),
            None => self.keystore.lock().addresses().into_iter().collect(),
        };
        compute_balance(
            state.chain.utxos(),
            &state.mempool,
            &owned,
            &state.chain.validation_context(),
        )
    }

    /// Builds and signs a payment from wallet coins. The result is not submitted.
    pub fn create_transaction(&self, recipients: &[Recipient], fee_policy: FeePolicy) -> Result<Transaction> {
        let state = self.ledger.read();
        let mut keystore = self.keystore.lock();
        let owned: HashSet<Address> = keystore.addresses().into_iter().collect();
        let coins = spendable_coins(
            state.chain.utxos(),
            &state.mempool,
            &owned,
            &state.chain.validation_context(),
        );
        build_transaction(&mut keystore, &coins, recipients, fee_policy, wall_clock())
    }

    /// Builds, signs and submits a payment.
    pub fn send(&self, recipients: &[Recipient], fee_policy: FeePolicy) -> Result<Verdict<TxId>> {
        let tx = self.create_transaction(recipients, fee_policy)?;
        self.accept_transaction(tx)
    }

    // ------------------------------------------------------------------------
    // Block production
    // ------------------------------------------------------------------------

    /// Searches wallet coins for a stake kernel valid at or before `now` and,
    /// on a hit, builds, signs and submits a proof-of-stake block. The
    /// coinstake follows the minter policy: the reserve balance is never
    /// offered, young large kernels are split and small aged coins combined.
    pub fn mint_block(&self, now: u64) -> Result<Option<Verdict<BlockAcceptance>>> {
        let mut state = self.ledger.write();
        self.ensure_running()?;
        let mut keystore = self.keystore.lock();

        let params = self.config.consensus.clone();
        let policy = StakePolicy::new(&self.config.minter, params.stake_max_age);
        let tip = state.chain.tip();
        let ctx = state.chain.validation_context();
        let owned: HashSet<Address> = keystore.addresses().into_iter().collect();
        let coins = spendable_coins(state.chain.utxos(), &state.mempool, &owned, &ctx);
        let stakeable = stakeable_coins(&coins, &policy);
        let candidates: Vec<KernelCandidate> = stakeable
            .coins
            .iter()
            .map(|(outpoint, utxo)| KernelCandidate {
                outpoint: *outpoint,
                amount: utxo.value(),
                block_time: utxo.block_time,
            })
            .collect();

        let hit = match search_kernel(
            &candidates,
            now,
            self.config.minter.search_window_secs,
            state.chain.median_time_past() + 1,
            state.chain.next_stake_modifier(),
            params.min_stake_difficulty,
            &StakeParams::from(&params),
        ) {
            Some(hit) => hit,
            None => {
                debug!("no stake kernel found among {} coins", candidates.len());
                return Ok(None);
            }
        };

        let transactions = state.mempool.select_for_block(self.config.mempool.max_block_tx_bytes);
        let fees = Mempool::total_fees(&transactions);
        let reward = params
            .stake_reward
            .checked_add(fees)
            .ok_or_else(|| ChainError::Malformed("coinstake value overflows".to_string()))?;
        let plan = plan_coinstake(hit.candidate.outpoint, &stakeable, hit.timestamp, reward, &policy)?;
        let public_key = keystore
            .public_key(&plan.owner)
            .map(<[u8]>::to_vec)
            .ok_or(ChainError::Custody(crate::error::KeyStoreError::UnknownKey(plan.owner)))?;

        let mut coinstake = Transaction::coinstake(
            hit.timestamp,
            plan.inputs.iter().map(|outpoint| TxInput::new(*outpoint)).collect(),
            plan.outputs.iter().map(|value| TxOutput::pay_to(plan.owner, *value)).collect(),
        );
        for index in 0..coinstake.inputs.len() {
            let signature = keystore.sign_stake(&plan.owner, &coinstake.signature_hash(index))?;
            coinstake.inputs[index].unlock = Unlock::single(public_key.clone(), signature.to_vec());
        }
        drop(keystore);

        let mut all = Vec::with_capacity(transactions.len() + 1);
        all.push(coinstake);
        all.extend(transactions);
        let block = Block::new(
            tip.height + 1,
            hit.timestamp,
            tip.hash,
            params.min_stake_difficulty,
            crate::blockchain::Proof::Stake {
                kernel: hit.candidate.outpoint,
            },
            all,
        );
        info!(
            "minting block at height {} with kernel {} (timestamp {}, {} inputs, {} outputs)",
            tip.height + 1,
            hit.candidate.outpoint,
            hit.timestamp,
            plan.inputs.len(),
            plan.outputs.len()
        );
        self.accept_locked(&mut state, block, wall_clock()).map(Some)
    }

    /// Mines a work block on the tip paying `beneficiary`. Development networks only.
    pub fn mine_work_block(&self, beneficiary: Address, timestamp: u64) -> Result<Verdict<BlockAcceptance>> {
        self.ensure_running()?;
        let template = {
            let state = self.ledger.read();
            let tip = state.chain.tip();
            let timestamp = timestamp.max(state.chain.median_time_past() + 1);
            miner::block_template(
                tip.height + 1,
                timestamp,
                tip.hash,
                self.config.consensus.min_work_difficulty,
                beneficiary,
                self.config.consensus.coinbase_reward,
                state.mempool.select_for_block(self.config.mempool.max_block_tx_bytes),
            )?
        };
        let block = miner::mine_block(template)?;
        self.accept_block(block)
    }
}
