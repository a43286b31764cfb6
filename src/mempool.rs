//! Pool of unconfirmed transactions waiting for a block

use crate::blockchain::{Block, UtxoSet};
use crate::error::{ChainError, TxError};
use crate::transaction::{validate, OutPoint, Transaction, TxId, ValidationContext};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct MempoolEntry {
    pub tx: Transaction,
    pub size: usize,
    /// Fee per 1000 serialized bytes.
    pub fee_rate: i64,
    sequence: u64,
}

/// Outcome of removing a connected block's transactions from the pool.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockRemoval {
    /// Pool transactions included in the block.
    pub confirmed: Vec<TxId>,
    /// Pool transactions conflicting with the block.
    pub dropped: Vec<TxId>,
}

/// Outcome of returning a disconnected block's transactions to the pool.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockReadmission {
    pub readmitted: Vec<TxId>,
    /// Transactions that no longer validate on the new tip.
    pub dropped: Vec<TxId>,
}

/// Unconfirmed transactions, validated against the best-chain UTXO set only.
#[derive(Debug)]
pub struct Mempool {
    entries: HashMap<TxId, MempoolEntry>,
    spends: HashMap<OutPoint, TxId>,
    max_transactions: usize,
    next_sequence: u64,
}

fn fee_rate(fee: i64, size: usize) -> i64 {
    if size == 0 {
        return 0;
    }
    fee.saturating_mul(1000) / size as i64
}

impl Mempool {
    pub fn new(max_transactions: usize) -> Self {
        Mempool {
            entries: HashMap::new(),
            spends: HashMap::new(),
            max_transactions: max_transactions.max(1),
            next_sequence: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, txid: &TxId) -> bool {
        self.entries.contains_key(txid)
    }

    pub fn get(&self, txid: &TxId) -> Option<&Transaction> {
        self.entries.get(txid).map(|e| &e.tx)
    }

    /// The pending transaction spending `outpoint`, if any.
    pub fn spender(&self, outpoint: &OutPoint) -> Option<TxId> {
        self.spends.get(outpoint).copied()
    }

    pub fn pending(&self) -> impl Iterator<Item = &Transaction> + '_ {
        self.entries.values().map(|e| &e.tx)
    }

    /// Validates and admits a transaction. Adding a transaction already in the
    /// pool is a no-op.
    pub fn add(
        &mut self,
        tx: Transaction,
        utxos: &UtxoSet,
        ctx: &ValidationContext,
    ) -> Result<TxId, ChainError> {
        if tx.is_minting() {
            return Err(ChainError::Malformed(
                "minting transactions are only valid inside a block".to_string(),
            ));
        }
        let txid = tx.txid();
        if self.entries.contains_key(&txid) {
            debug!("transaction {} already in mempool", hex::encode(txid));
            return Ok(txid);
        }
        for input in &tx.inputs {
            if self.spends.contains_key(&input.previous_output) {
                return Err(TxError::AlreadySpent(input.previous_output).into());
            }
        }
        validate(&tx, utxos, ctx)?;

        let size = tx.serialized_size();
        let rate = fee_rate(tx.fee, size);
        if self.entries.len() >= self.max_transactions {
            let lowest = self
                .entries
                .values()
                .min_by_key(|e| (e.fee_rate, std::cmp::Reverse(e.sequence)))
                .map(|e| (e.tx.txid(), e.fee_rate));
            match lowest {
                Some((victim, lowest_rate)) if lowest_rate < rate => {
                    debug!("evicting {} from full mempool", hex::encode(victim));
                    self.remove(&victim);
                }
                _ => {
                    return Err(ChainError::Malformed(format!(
                        "mempool full: fee rate {} does not beat the lowest pending rate",
                        rate
                    )));
                }
            }
        }

        for input in &tx.inputs {
            self.spends.insert(input.previous_output, txid);
        }
        self.entries.insert(
            txid,
            MempoolEntry {
                tx,
                size,
                fee_rate: rate,
                sequence: self.next_sequence,
            },
        );
        self.next_sequence += 1;
        Ok(txid)
    }

    pub fn remove(&mut self, txid: &TxId) -> Option<Transaction> {
        let entry = self.entries.remove(txid)?;
        for input in &entry.tx.inputs {
            if self.spends.get(&input.previous_output) == Some(txid) {
                self.spends.remove(&input.previous_output);
            }
        }
        Some(entry.tx)
    }

    /// Drops transactions a newly connected block confirmed or conflicts with.
    pub fn remove_for_block(&mut self, block: &Block) -> BlockRemoval {
        let mut removal = BlockRemoval::default();
        for tx in &block.transactions {
            let txid = tx.txid();
            if self.remove(&txid).is_some() {
                removal.confirmed.push(txid);
            }
            for input in &tx.inputs {
                if let Some(conflict) = self.spender(&input.previous_output) {
                    self.remove(&conflict);
                    removal.dropped.push(conflict);
                }
            }
        }
        removal
    }

    /// Returns transactions from a disconnected block to the pool when they
    /// are still valid on the new tip. Transactions in `confirmed` are already
    /// on the new best chain and are skipped.
    pub fn readmit(
        &mut self,
        block: &Block,
        confirmed: &HashSet<TxId>,
        utxos: &UtxoSet,
        ctx: &ValidationContext,
    ) -> BlockReadmission {
        let mut outcome = BlockReadmission::default();
        for tx in block.transactions.iter().filter(|tx| !tx.is_minting()) {
            let txid = tx.txid();
            if confirmed.contains(&txid) {
                continue;
            }
            match self.add(tx.clone(), utxos, ctx) {
                Ok(_) => outcome.readmitted.push(txid),
                Err(e) => {
                    debug!("transaction {} lost in reorganization: {}", tx.txid_hex(), e);
                    outcome.dropped.push(txid);
                }
            }
        }
        outcome
    }

    /// Re-checks every entry against the current tip, dropping the ones that no
    /// longer validate (spent inputs, lost maturity after a reorg).
    pub fn revalidate(&mut self, utxos: &UtxoSet, ctx: &ValidationContext) -> Vec<TxId> {
        let stale: Vec<TxId> = self
            .entries
            .iter()
            .filter(|(_, entry)| validate(&entry.tx, utxos, ctx).is_err())
            .map(|(txid, _)| *txid)
            .collect();
        for txid in &stale {
            self.remove(txid);
        }
        if !stale.is_empty() {
            info!("dropped {} stale transactions from mempool", stale.len());
        }
        stale
    }

    /// Highest fee rate first, ties by arrival, until `max_bytes` is filled.
    pub fn select_for_block(&self, max_bytes: usize) -> Vec<Transaction> {
        let mut ordered: Vec<&MempoolEntry> = self.entries.values().collect();
        ordered.sort_by(|a, b| b.fee_rate.cmp(&a.fee_rate).then(a.sequence.cmp(&b.sequence)));

        let mut selected = Vec::new();
        let mut used = 0usize;
        for entry in ordered {
            if used + entry.size > max_bytes {
                continue;
            }
            used += entry.size;
            selected.push(entry.tx.clone());
        }
        selected
    }

    /// Sum of fees of the given pending transactions.
    pub fn total_fees(txs: &[Transaction]) -> i64 {
        txs.iter().map(|tx| tx.fee).sum()
    }
}
