use crate::amount::Amount;
use crate::error::TxError;
use crate::transaction::{OutPoint, Transaction, TxKind, TxOutput, UtxoView};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Where an unspent output came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UtxoOrigin {
    /// Genesis allocation. Not minted, spendable immediately.
    Allocation,
    Transfer,
    Coinbase,
    /// `stake_return` marks outputs paying back to the kernel's owner.
    Coinstake { stake_return: bool },
}

impl UtxoOrigin {
    /// Minted outputs are subject to the maturity rule.
    pub fn is_minted(&self) -> bool {
        matches!(self, UtxoOrigin::Coinbase | UtxoOrigin::Coinstake { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utxo {
    pub output: TxOutput,
    pub height: u64,
    pub block_time: u64,
    pub origin: UtxoOrigin,
}

impl Utxo {
    pub fn value(&self) -> Amount {
        self.output.value
    }
}

/// The unspent-output set of the best chain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UtxoSet {
    entries: HashMap<OutPoint, Utxo>,
}

impl UtxoSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, outpoint: &OutPoint) -> Option<&Utxo> {
        self.entries.get(outpoint)
    }

    pub fn contains(&self, outpoint: &OutPoint) -> bool {
        self.entries.contains_key(outpoint)
    }

    pub fn insert(&mut self, outpoint: OutPoint, utxo: Utxo) -> Option<Utxo> {
        self.entries.insert(outpoint, utxo)
    }

    pub fn remove(&mut self, outpoint: &OutPoint) -> Option<Utxo> {
        self.entries.remove(outpoint)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&OutPoint, &Utxo)> {
        self.entries.iter()
    }
}

impl FromIterator<(OutPoint, Utxo)> for UtxoSet {
    fn from_iter<T: IntoIterator<Item = (OutPoint, Utxo)>>(iter: T) -> Self {
        UtxoSet {
            entries: iter.into_iter().collect(),
        }
    }
}

impl UtxoView for UtxoSet {
    fn utxo(&self, outpoint: &OutPoint) -> Option<&Utxo> {
        self.entries.get(outpoint)
    }
}

/// Entries a block removed from the set, restored on disconnect.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockUndo {
    pub spent: Vec<(OutPoint, Utxo)>,
}

/// Overlay of one block's effects on top of the base set.
///
/// Outputs created earlier in the block are visible to later transactions;
/// nothing touches the base until [`BlockChanges::apply`].
pub struct BlockView<'a> {
    base: &'a UtxoSet,
    created: HashMap<OutPoint, Utxo>,
    spent_base: HashMap<OutPoint, Utxo>,
    spent_created: HashSet<OutPoint>,
}

impl<'a> BlockView<'a> {
    pub fn new(base: &'a UtxoSet) -> Self {
        BlockView {
            base,
            created: HashMap::new(),
            spent_base: HashMap::new(),
            spent_created: HashSet::new(),
        }
    }

    /// Marks every input of `tx` spent.
    pub fn spend_inputs(&mut self, tx: &Transaction) -> Result<(), TxError> {
        for input in &tx.inputs {
            let outpoint = input.previous_output;
            if self.created.remove(&outpoint).is_some() {
                self.spent_created.insert(outpoint);
                continue;
            }
            if self.is_spent(&outpoint) {
                return Err(TxError::AlreadySpent(outpoint));
            }
            let utxo = self
                .base
                .get(&outpoint)
                .ok_or(TxError::UnknownInput(outpoint))?;
            self.spent_base.insert(outpoint, utxo.clone());
        }
        Ok(())
    }

    /// Adds the outputs of `tx`, refusing to overwrite an unspent entry.
    pub fn add_outputs(
        &mut self,
        tx: &Transaction,
        height: u64,
        block_time: u64,
    ) -> Result<(), TxError> {
        let kernel_lock = match tx.kind {
            TxKind::Coinstake => tx
                .inputs
                .first()
                .and_then(|input| self.spent_base.get(&input.previous_output))
                .map(|utxo| utxo.output.lock.clone()),
            _ => None,
        };
        for (outpoint, output) in tx.outpoints() {
            if self.base.contains(&outpoint) || self.created.contains_key(&outpoint) {
                return Err(TxError::Malformed(format!("output {} already exists", outpoint)));
            }
            let origin = match tx.kind {
                _ if height == 0 => UtxoOrigin::Allocation,
                TxKind::Transfer => UtxoOrigin::Transfer,
                TxKind::Coinbase { .. } => UtxoOrigin::Coinbase,
                TxKind::Coinstake => UtxoOrigin::Coinstake {
                    stake_return: kernel_lock.as_ref() == Some(&output.lock),
                },
            };
            self.created.insert(
                outpoint,
                Utxo {
                    output: output.clone(),
                    height,
                    block_time,
                    origin,
                },
            );
        }
        Ok(())
    }

    /// Releases the borrow of the base set, keeping only the net changes.
    pub fn into_changes(self) -> BlockChanges {
        let mut spent: Vec<(OutPoint, Utxo)> = self.spent_base.into_iter().collect();
        spent.sort_by_key(|(outpoint, _)| *outpoint);
        let mut created: Vec<(OutPoint, Utxo)> = self.created.into_iter().collect();
        created.sort_by_key(|(outpoint, _)| *outpoint);
        BlockChanges { spent, created }
    }
}

/// Net effect of one validated block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockChanges {
    pub spent: Vec<(OutPoint, Utxo)>,
    pub created: Vec<(OutPoint, Utxo)>,
}

impl BlockChanges {
    /// Applies the changes to `base`, returning undo data.
    pub fn apply(self, base: &mut UtxoSet, journal: &mut UtxoJournal) -> BlockUndo {
        for (outpoint, _) in &self.spent {
            base.remove(outpoint);
            journal.record_remove(*outpoint);
        }
        for (outpoint, utxo) in self.created {
            journal.record_insert(outpoint, utxo.clone());
            base.insert(outpoint, utxo);
        }
        BlockUndo { spent: self.spent }
    }
}

impl UtxoView for BlockView<'_> {
    fn utxo(&self, outpoint: &OutPoint) -> Option<&Utxo> {
        if let Some(utxo) = self.created.get(outpoint) {
            return Some(utxo);
        }
        if self.spent_base.contains_key(outpoint) {
            return None;
        }
        self.base.get(outpoint)
    }

    fn is_spent(&self, outpoint: &OutPoint) -> bool {
        self.spent_base.contains_key(outpoint) || self.spent_created.contains(outpoint)
    }
}

/// Net UTXO changes since the last flush, for incremental persistence.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UtxoJournal {
    changes: HashMap<OutPoint, Option<Utxo>>,
}

impl UtxoJournal {
    pub fn record_insert(&mut self, outpoint: OutPoint, utxo: Utxo) {
        self.changes.insert(outpoint, Some(utxo));
    }

    pub fn record_remove(&mut self, outpoint: OutPoint) {
        self.changes.insert(outpoint, None);
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Splits the journal into upserts and deletions.
    pub fn drain(&mut self) -> (Vec<(OutPoint, Utxo)>, Vec<OutPoint>) {
        let mut added = Vec::new();
        let mut removed = Vec::new();
        for (outpoint, change) in self.changes.drain() {
            match change {
                Some(utxo) => added.push((outpoint, utxo)),
                None => removed.push(outpoint),
            }
        }
        (added, removed)
    }
}
