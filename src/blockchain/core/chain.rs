use super::block::{Block, BlockHeader, Sha256Hash};
use super::index::{BlockIndex, BlockRecord, BlockStatus};
use super::orphans::OrphanPool;
use super::state::{BlockChanges, BlockUndo, BlockView, Utxo, UtxoJournal, UtxoSet};
use super::validation::{
    check_block_structure, check_duplicate_transactions, check_minted_value, validate_no_double_spend,
};
use crate::amount::Amount;
use crate::config::ConsensusConfig;
use crate::consensus::checkpoints::Checkpoints;
use crate::consensus::modifier::{compute_next_stake_modifier, modifier_checksum};
use crate::consensus::stake::{check_coinstake, StakeParams};
use crate::consensus::{block_score, check_difficulty, check_proof_of_work, cumulative_score};
use crate::error::{ChainError, ErrorClass, Result, TxError};
use crate::transaction::validation::{check_inputs, verify_signature_jobs};
use crate::transaction::{OutPoint, ValidationContext};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AcceptStatus {
    /// Extended the best chain.
    Connected,
    /// Became the best chain after disconnecting this many blocks.
    Reorganized { disconnected: usize },
    /// Stored on a branch that does not (yet) outscore the best chain.
    SideBranch,
    /// Parent unknown; held until it arrives.
    Orphaned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockAcceptance {
    pub hash: Sha256Hash,
    pub height: u64,
    pub status: AcceptStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainTip {
    pub height: u64,
    pub hash: Sha256Hash,
    pub cumulative_score: u128,
}

/// Net effect of chain mutations since the last [`ChainState::take_changes`].
#[derive(Debug, Clone, Default)]
pub struct ChainChanges {
    /// Newly connected blocks, oldest first.
    pub connected: Vec<Block>,
    /// Blocks removed from the best chain, tip first.
    pub disconnected: Vec<Block>,
    /// Bodies newly added to the block store.
    pub stored: Vec<Block>,
    pub utxos_added: Vec<(OutPoint, Utxo)>,
    pub utxos_removed: Vec<OutPoint>,
}

impl ChainChanges {
    pub fn is_empty(&self) -> bool {
        self.connected.is_empty()
            && self.disconnected.is_empty()
            && self.stored.is_empty()
            && self.utxos_added.is_empty()
            && self.utxos_removed.is_empty()
    }
}

/// Header forest, block store, best chain and UTXO set.
pub struct ChainState {
    params: ConsensusConfig,
    checkpoints: Checkpoints,
    index: BlockIndex,
    bodies: HashMap<Sha256Hash, Block>,
    undo: HashMap<Sha256Hash, BlockUndo>,
    best_chain: Vec<Sha256Hash>,
    utxos: UtxoSet,
    orphans: OrphanPool,
    journal: UtxoJournal,
    changes: ChainChanges,
    /// Arrival time for the block being accepted; `None` during replay.
    arrival_time: Option<u64>,
}

impl ChainState {
    /// Starts a chain at `genesis`, whose outputs become immediately spendable allocations.
    pub fn new(genesis: Block, params: ConsensusConfig) -> Result<Self> {
        let checkpoints = Checkpoints::from_config(&params)?;
        if genesis.header.height != 0 {
            return Err(ChainError::Malformed("genesis block must have height 0".to_string()));
        }
        check_block_structure(&genesis)?;
        let hash = genesis.hash();
        if !checkpoints.check_block(0, &hash) {
            return Err(ChainError::CheckpointMismatch { height: 0 });
        }

        let mut index = BlockIndex::new();
        let checksum = modifier_checksum(0, &hash, false, 0);
        index.insert(
            genesis.header.clone(),
            block_score(genesis.header.difficulty),
            0,
            checksum,
        );
        index.set_status(&hash, BlockStatus::DataAvailable);

        let mut utxos = UtxoSet::new();
        let mut journal = UtxoJournal::default();
        let mut view = BlockView::new(&utxos);
        for tx in &genesis.transactions {
            view.add_outputs(tx, 0, genesis.header.timestamp)?;
        }
        let undo = view.into_changes().apply(&mut utxos, &mut journal);

        let orphan_limit = params.orphan_limit;
        let mut chain = ChainState {
            params,
            checkpoints,
            index,
            bodies: HashMap::new(),
            undo: HashMap::new(),
            best_chain: vec![hash],
            utxos,
            orphans: OrphanPool::new(orphan_limit),
            journal,
            changes: ChainChanges::default(),
            arrival_time: None,
        };
        chain.undo.insert(hash, undo);
        chain.bodies.insert(hash, genesis.clone());
        chain.changes.stored.push(genesis.clone());
        chain.changes.connected.push(genesis);
        Ok(chain)
    }

    pub fn params(&self) -> &ConsensusConfig {
        &self.params
    }

    pub fn genesis_hash(&self) -> Sha256Hash {
        self.best_chain[0]
    }

    pub fn tip_hash(&self) -> Sha256Hash {
        *self.best_chain.last().unwrap_or(&[0u8; 32])
    }

    pub fn height(&self) -> u64 {
        (self.best_chain.len() as u64).saturating_sub(1)
    }

    fn tip_record(&self) -> Result<&BlockRecord> {
        let hash = self.tip_hash();
        self.index
            .get(&hash)
            .ok_or_else(|| ChainError::CorruptLedger(format!("tip {} is not indexed", hex::encode(hash))))
    }

    pub fn tip(&self) -> ChainTip {
        let hash = self.tip_hash();
        ChainTip {
            height: self.height(),
            hash,
            cumulative_score: self.index.get(&hash).map_or(0, |r| r.cumulative_score),
        }
    }

    pub fn record(&self, hash: &Sha256Hash) -> Option<&BlockRecord> {
        self.index.get(hash)
    }

    pub fn block(&self, hash: &Sha256Hash) -> Option<&Block> {
        self.bodies.get(hash)
    }

    pub fn hash_at(&self, height: u64) -> Option<Sha256Hash> {
        self.best_chain.get(height as usize).copied()
    }

    pub fn is_on_best_chain(&self, hash: &Sha256Hash) -> bool {
        self.index
            .get(hash)
            .and_then(|r| self.hash_at(r.height()))
            .is_some_and(|h| h == *hash)
    }

    /// Blocks on the best chain at or after the block, counting the block itself.
    pub fn confirmations(&self, hash: &Sha256Hash) -> Option<u64> {
        if !self.is_on_best_chain(hash) {
            return None;
        }
        self.index.get(hash).map(|r| self.height() - r.height() + 1)
    }

    /// Best-chain blocks from genesis to tip.
    pub fn best_chain_blocks(&self) -> impl Iterator<Item = &Block> + '_ {
        self.best_chain.iter().filter_map(|hash| self.bodies.get(hash))
    }

    pub fn utxo(&self, outpoint: &OutPoint) -> Option<&Utxo> {
        self.utxos.get(outpoint)
    }

    pub fn utxos(&self) -> &UtxoSet {
        &self.utxos
    }

    pub fn orphan_count(&self) -> usize {
        self.orphans.len()
    }

    pub fn median_time_past(&self) -> u64 {
        self.index.median_time_past(&self.tip_hash())
    }

    /// Modifier a block built on the current tip must use for its kernel.
    pub fn next_stake_modifier(&self) -> u64 {
        compute_next_stake_modifier(&self.index, &self.tip_hash())
    }

    /// Context for validating a transaction destined for the next block.
    pub fn validation_context(&self) -> ValidationContext {
        ValidationContext::new(self.height(), self.params.coinbase_maturity)
    }

    /// Drains accumulated changes for persistence and notification.
    pub fn take_changes(&mut self) -> ChainChanges {
        let mut changes = std::mem::take(&mut self.changes);
        let (added, removed) = self.journal.drain();
        changes.utxos_added = added;
        changes.utxos_removed = removed;
        changes
    }

    fn note_connected(&mut self, block: Block) {
        let hash = block.hash();
        if self.changes.disconnected.last().map(|b| b.hash()) == Some(hash) {
            self.changes.disconnected.pop();
        } else {
            self.changes.connected.push(block);
        }
    }

    fn note_disconnected(&mut self, block: Block) {
        let hash = block.hash();
        if self.changes.connected.last().map(|b| b.hash()) == Some(hash) {
            self.changes.connected.pop();
        } else {
            self.changes.disconnected.push(block);
        }
    }

    /// Indexes a header: parent known, height and timestamp sane, difficulty
    /// above the floor, consistent with checkpoints, not below an invalid block.
    pub fn submit_header(&mut self, header: BlockHeader) -> Result<Sha256Hash> {
        let hash = header.hash();
        if self.index.contains(&hash) {
            return Err(ChainError::DuplicateHeader(hash));
        }
        let parent = self
            .index
            .get(&header.previous_hash)
            .ok_or(ChainError::OrphanHeader(header.previous_hash))?;
        if parent.status == BlockStatus::Invalid {
            return Err(ChainError::InvalidAncestor(header.previous_hash));
        }
        if header.height != parent.height() + 1 {
            return Err(ChainError::BadHeight {
                expected: parent.height() + 1,
                found: header.height,
            });
        }
        let median = self.index.median_time_past(&header.previous_hash);
        if header.timestamp <= median {
            return Err(ChainError::TimestampTooEarly {
                timestamp: header.timestamp,
                median,
            });
        }
        check_difficulty(&header, &self.params)?;
        check_proof_of_work(&header)?;
        if !self.checkpoints.check_block(header.height, &hash) {
            return Err(ChainError::CheckpointMismatch {
                height: header.height,
            });
        }

        let score = cumulative_score(parent.cumulative_score, header.difficulty);
        let parent_checksum = parent.modifier_checksum;
        let modifier = compute_next_stake_modifier(&self.index, &header.previous_hash);
        let checksum = modifier_checksum(parent_checksum, &hash, header.proof.is_stake(), modifier);
        if !self.checkpoints.check_modifier(header.height, checksum) {
            return Err(ChainError::ModifierChecksumMismatch {
                height: header.height,
            });
        }

        debug!(
            "indexed header {} at height {} (score {})",
            hex::encode(hash),
            header.height,
            score
        );
        Ok(self.index.insert(header, score, modifier, checksum))
    }

    /// Full validation of `block` against the current tip, without mutating state.
    fn validate_against_tip(&self, block: &Block, stake_modifier: u64) -> Result<BlockChanges> {
        check_block_structure(block)?;
        validate_no_double_spend(block)?;
        check_proof_of_work(&block.header)?;

        let ctx = self.validation_context();
        let mut view = BlockView::new(&self.utxos);
        if block.is_proof_of_stake() {
            check_coinstake(
                &view,
                &block.header,
                &block.transactions[0],
                stake_modifier,
                &ctx,
                &StakeParams::from(&self.params),
            )?;
        }

        let mut signature_jobs = Vec::new();
        let mut minted: Amount = 0;
        let mut fees: Amount = 0;
        for (position, tx) in block.transactions.iter().enumerate() {
            let check = check_inputs(tx, &view, &ctx)?;
            if position == 0 {
                minted = check.output_total - check.input_total;
            } else {
                fees = fees
                    .checked_add(tx.fee)
                    .ok_or(TxError::NegativeOrOverflowAmount)?;
            }
            signature_jobs.extend(check.signature_jobs);
            view.spend_inputs(tx)?;
            view.add_outputs(tx, block.header.height, block.header.timestamp)?;
        }

        check_minted_value(
            block,
            minted,
            fees,
            self.params.coinbase_reward,
            self.params.stake_reward,
        )?;
        verify_signature_jobs(&signature_jobs)?;
        Ok(view.into_changes())
    }

    /// Connects a block that extends the tip. All-or-nothing.
    pub fn connect_block(&mut self, block: &Block) -> Result<()> {
        let hash = block.hash();
        let tip = self.tip_hash();
        if block.header.previous_hash != tip {
            return Err(ChainError::NotExtendingTip {
                tip,
                parent: block.header.previous_hash,
            });
        }
        let stake_modifier = self
            .index
            .get(&hash)
            .ok_or(ChainError::UnknownBlock(hash))?
            .stake_modifier;

        let changes = self
            .validate_against_tip(block, stake_modifier)
            .map_err(|e| ChainError::invalid_block(hash, e))?;
        let undo = changes.apply(&mut self.utxos, &mut self.journal);
        self.undo.insert(hash, undo);
        self.best_chain.push(hash);
        self.note_connected(block.clone());
        debug!(
            "connected block {} at height {} ({} txs)",
            hex::encode(hash),
            block.header.height,
            block.transactions.len()
        );
        Ok(())
    }

    /// Exact inverse of [`ChainState::connect_block`] for the tip.
    pub fn disconnect_tip(&mut self) -> Result<Block> {
        let hash = self.tip_hash();
        if self.best_chain.len() <= 1 {
            return Err(ChainError::Malformed("cannot disconnect the genesis block".to_string()));
        }
        let block = self
            .bodies
            .get(&hash)
            .cloned()
            .ok_or(ChainError::MissingBlockData(hash))?;
        let undo = self.undo.remove(&hash).ok_or_else(|| {
            ChainError::CorruptLedger(format!("undo data missing for block {}", hex::encode(hash)))
        })?;

        for tx in block.transactions.iter().rev() {
            for (outpoint, _) in tx.outpoints() {
                if self.utxos.remove(&outpoint).is_some() {
                    self.journal.record_remove(outpoint);
                }
            }
        }
        for (outpoint, utxo) in undo.spent {
            self.journal.record_insert(outpoint, utxo.clone());
            self.utxos.insert(outpoint, utxo);
        }
        self.best_chain.pop();
        self.note_disconnected(block.clone());
        debug!("disconnected block {} at height {}", hex::encode(hash), block.header.height);
        Ok(block)
    }

    /// Last best-chain block shared with `hash`'s ancestry.
    fn find_fork(&self, hash: &Sha256Hash) -> Result<Sha256Hash> {
        self.index
            .ancestors(hash)
            .find(|record| self.hash_at(record.height()) == Some(record.hash))
            .map(|record| record.hash)
            .ok_or(ChainError::UnknownBlock(*hash))
    }

    /// Switches the best chain to end at `new_tip`. On failure the previous
    /// chain is restored; if that is impossible the ledger is corrupt.
    pub fn reorganize(&mut self, new_tip: Sha256Hash) -> Result<usize> {
        let fork = self.find_fork(&new_tip)?;
        let mut path: Vec<Sha256Hash> = self
            .index
            .ancestors(&new_tip)
            .take_while(|record| record.hash != fork)
            .map(|record| record.hash)
            .collect();
        path.reverse();
        if let Some(missing) = path.iter().find(|h| !self.bodies.contains_key(*h)) {
            return Err(ChainError::MissingBlockData(*missing));
        }

        let mut disconnected = Vec::new();
        while self.tip_hash() != fork {
            let block = self.disconnect_tip().map_err(|e| {
                ChainError::CorruptLedger(format!("failed to disconnect during reorganization: {}", e))
            })?;
            disconnected.push(block);
        }

        let mut connected = 0usize;
        for hash in path {
            let block = match self.bodies.get(&hash) {
                Some(block) => block.clone(),
                None => return Err(ChainError::MissingBlockData(hash)),
            };
            if let Err(err) = self.connect_block(&block) {
                warn!("block {} failed to connect: {}", hex::encode(hash), err);
                self.index.mark_invalid(&hash);
                self.restore_branch(connected, &disconnected)?;
                if disconnected.is_empty() {
                    return Err(err);
                }
                return Err(ChainError::ReorgFailed {
                    failed_block: hash,
                    reason: Box::new(err),
                });
            }
            connected += 1;
        }

        if !disconnected.is_empty() {
            info!(
                "reorganized: disconnected {} blocks, connected {}, new tip {} at height {}",
                disconnected.len(),
                connected,
                hex::encode(new_tip),
                self.height()
            );
        }
        Ok(disconnected.len())
    }

    fn restore_branch(&mut self, connected: usize, disconnected: &[Block]) -> Result<()> {
        for _ in 0..connected {
            self.disconnect_tip().map_err(|e| {
                ChainError::CorruptLedger(format!("failed to roll back reorganization: {}", e))
            })?;
        }
        for block in disconnected.iter().rev() {
            self.connect_block(block).map_err(|e| {
                ChainError::CorruptLedger(format!(
                    "failed to reconnect block {}: {}",
                    hex::encode(block.hash()),
                    e
                ))
            })?;
        }
        Ok(())
    }

    /// Moves the tip to the best fully-available chain under `root`, retrying
    /// from genesis after a failure so that a valid prefix is not stranded.
    fn activate_best_chain(&mut self, root: Sha256Hash) -> Result<usize> {
        let mut search_root = root;
        let mut first_error = None;
        loop {
            let tip_score = self.tip_record()?.cumulative_score;
            let candidate = match self.index.best_available_descendant(&search_root) {
                Some(record) if record.cumulative_score > tip_score => record.hash,
                _ => break,
            };
            match self.reorganize(candidate) {
                Ok(disconnected) => return Ok(disconnected),
                Err(err) if err.class() == ErrorClass::Fatal => return Err(err),
                Err(err) => {
                    first_error.get_or_insert(err);
                    search_root = self.genesis_hash();
                }
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(0),
        }
    }

    fn accept_one(&mut self, block: Block) -> Result<BlockAcceptance> {
        let hash = block.hash();
        let height = block.header.height;
        // Too far ahead of the clock: refused without a trace so it can be retried.
        if let Some(now) = self.arrival_time {
            let limit = now.saturating_add(self.params.max_future_drift_secs);
            if block.header.timestamp > limit {
                return Err(ChainError::TimestampTooFar {
                    timestamp: block.header.timestamp,
                    limit,
                });
            }
        }
        match self.index.get(&hash).map(|r| r.status) {
            Some(BlockStatus::Invalid) => {
                return Err(ChainError::invalid_block(hash, ChainError::InvalidAncestor(hash)));
            }
            Some(BlockStatus::DataAvailable) => return Err(ChainError::DuplicateHeader(hash)),
            Some(BlockStatus::HeaderOnly) => {}
            None => {
                if !self.index.contains(&block.header.previous_hash) {
                    if self.orphans.insert(block) {
                        debug!("holding orphan block {} at height {}", hex::encode(hash), height);
                    }
                    return Ok(BlockAcceptance {
                        hash,
                        height,
                        status: AcceptStatus::Orphaned,
                    });
                }
                self.submit_header(block.header.clone())?;
            }
        }

        // A body that does not match its header says nothing about the header.
        let (merkle_root, mutated) = Block::merkle_root_checked(&block.transactions);
        if merkle_root != block.header.merkle_root {
            return Err(ChainError::invalid_block(
                hash,
                ChainError::Malformed("body does not match header merkle root".to_string()),
            ));
        }
        if mutated {
            return Err(ChainError::invalid_block(
                hash,
                ChainError::Malformed("transaction list repeats a merkle branch".to_string()),
            ));
        }
        check_duplicate_transactions(&block).map_err(|err| ChainError::invalid_block(hash, err))?;
        if let Err(err) = check_block_structure(&block) {
            self.index.mark_invalid(&hash);
            return Err(ChainError::invalid_block(hash, err));
        }

        self.index.set_status(&hash, BlockStatus::DataAvailable);
        self.bodies.insert(hash, block.clone());
        self.changes.stored.push(block);

        let activation = self.activate_best_chain(hash);
        let on_best_chain = self.is_on_best_chain(&hash);
        let status = match activation {
            Ok(0) if on_best_chain => AcceptStatus::Connected,
            Ok(disconnected) if on_best_chain => AcceptStatus::Reorganized { disconnected },
            Ok(_) => AcceptStatus::SideBranch,
            Err(err) if err.class() == ErrorClass::Fatal || !on_best_chain => return Err(err),
            Err(err) => {
                warn!("accepted {} despite a failed competing branch: {}", hex::encode(hash), err);
                AcceptStatus::Connected
            }
        };
        Ok(BlockAcceptance { hash, height, status })
    }

    /// Header submission, body storage and fork choice. Orphans waiting on
    /// the block are processed afterwards.
    pub fn accept_block(&mut self, block: Block) -> Result<BlockAcceptance> {
        let acceptance = self.accept_one(block)?;
        if acceptance.status != AcceptStatus::Orphaned {
            self.process_orphans(acceptance.hash)?;
        }
        Ok(acceptance)
    }

    /// [`ChainState::accept_block`] for a block arriving at wall-clock time
    /// `now`, refusing it and any orphan it releases when timestamped more
    /// than the configured drift ahead.
    pub fn accept_block_at(&mut self, block: Block, now: u64) -> Result<BlockAcceptance> {
        self.arrival_time = Some(now);
        let result = self.accept_block(block);
        self.arrival_time = None;
        result
    }

    fn process_orphans(&mut self, parent: Sha256Hash) -> Result<()> {
        let mut queue = vec![parent];
        while let Some(parent) = queue.pop() {
            for orphan in self.orphans.take_children(&parent) {
                let hash = orphan.hash();
                match self.accept_one(orphan) {
                    Ok(_) => queue.push(hash),
                    Err(err) if err.class() == ErrorClass::Fatal => return Err(err),
                    Err(err) => warn!("discarding orphan block {}: {}", hex::encode(hash), err),
                }
            }
        }
        Ok(())
    }
}
