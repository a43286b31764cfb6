use super::block::{BlockHeader, Sha256Hash};
use std::collections::HashMap;

/// Number of ancestors (inclusive) used for median time past.
pub const MEDIAN_TIME_SPAN: usize = 11;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockStatus {
    HeaderOnly,
    /// Body stored and structurally sound.
    DataAvailable,
    /// Failed validation, or descends from a block that did.
    Invalid,
}

/// One node of the header forest.
#[derive(Debug, Clone)]
pub struct BlockRecord {
    pub hash: Sha256Hash,
    pub header: BlockHeader,
    pub cumulative_score: u128,
    /// Modifier the kernel of this block is hashed with.
    pub stake_modifier: u64,
    pub modifier_checksum: u32,
    pub status: BlockStatus,
    /// Arrival order, used to break score ties.
    pub sequence: u64,
}

impl BlockRecord {
    pub fn height(&self) -> u64 {
        self.header.height
    }

    pub fn is_proof_of_stake(&self) -> bool {
        self.header.proof.is_stake()
    }
}

/// Every known header, rooted at genesis.
#[derive(Debug, Default)]
pub struct BlockIndex {
    records: HashMap<Sha256Hash, BlockRecord>,
    children: HashMap<Sha256Hash, Vec<Sha256Hash>>,
    next_sequence: u64,
}

impl BlockIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, hash: &Sha256Hash) -> Option<&BlockRecord> {
        self.records.get(hash)
    }

    pub fn contains(&self, hash: &Sha256Hash) -> bool {
        self.records.contains_key(hash)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn insert(
        &mut self,
        header: BlockHeader,
        cumulative_score: u128,
        stake_modifier: u64,
        modifier_checksum: u32,
    ) -> Sha256Hash {
        let hash = header.hash();
        if header.height > 0 {
            self.children.entry(header.previous_hash).or_default().push(hash);
        }
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.records.insert(
            hash,
            BlockRecord {
                hash,
                header,
                cumulative_score,
                stake_modifier,
                modifier_checksum,
                status: BlockStatus::HeaderOnly,
                sequence,
            },
        );
        hash
    }

    pub fn set_status(&mut self, hash: &Sha256Hash, status: BlockStatus) {
        if let Some(record) = self.records.get_mut(hash) {
            record.status = status;
        }
    }

    /// Marks `hash` and every known descendant invalid.
    pub fn mark_invalid(&mut self, hash: &Sha256Hash) -> usize {
        let mut stack = vec![*hash];
        let mut marked = 0;
        while let Some(current) = stack.pop() {
            if let Some(record) = self.records.get_mut(&current) {
                if record.status != BlockStatus::Invalid {
                    record.status = BlockStatus::Invalid;
                    marked += 1;
                }
            }
            if let Some(children) = self.children.get(&current) {
                stack.extend(children.iter().copied());
            }
        }
        marked
    }

    pub fn children(&self, hash: &Sha256Hash) -> &[Sha256Hash] {
        self.children.get(hash).map_or(&[], |c| c.as_slice())
    }

    /// Walks from `hash` towards genesis, starting with `hash` itself.
    pub fn ancestors<'a>(&'a self, hash: &Sha256Hash) -> Ancestors<'a> {
        Ancestors {
            index: self,
            next: self.records.get(hash),
        }
    }

    /// Median timestamp of `hash` and up to ten of its ancestors.
    pub fn median_time_past(&self, hash: &Sha256Hash) -> u64 {
        let mut times: Vec<u64> = self
            .ancestors(hash)
            .take(MEDIAN_TIME_SPAN)
            .map(|record| record.header.timestamp)
            .collect();
        if times.is_empty() {
            return 0;
        }
        times.sort_unstable();
        times[times.len() / 2]
    }

    /// Highest-score descendant of `hash` (inclusive) reachable through
    /// blocks whose bodies are all available. Earlier arrivals win ties.
    pub fn best_available_descendant(&self, hash: &Sha256Hash) -> Option<&BlockRecord> {
        let root = self.records.get(hash)?;
        if root.status != BlockStatus::DataAvailable {
            return None;
        }
        let mut best = root;
        let mut stack = vec![*hash];
        while let Some(current) = stack.pop() {
            for child in self.children(&current) {
                if let Some(record) = self.records.get(child) {
                    if record.status != BlockStatus::DataAvailable {
                        continue;
                    }
                    if record.cumulative_score > best.cumulative_score
                        || (record.cumulative_score == best.cumulative_score
                            && record.sequence < best.sequence)
                    {
                        best = record;
                    }
                    stack.push(*child);
                }
            }
        }
        Some(best)
    }
}

pub struct Ancestors<'a> {
    index: &'a BlockIndex,
    next: Option<&'a BlockRecord>,
}

impl<'a> Iterator for Ancestors<'a> {
    type Item = &'a BlockRecord;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;
        self.next = if current.height() == 0 {
            None
        } else {
            self.index.records.get(&current.header.previous_hash)
        };
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::Proof;

    fn header(height: u64, previous_hash: Sha256Hash, timestamp: u64, nonce: u64) -> BlockHeader {
        BlockHeader {
            version: 1,
            height,
            timestamp,
            previous_hash,
            merkle_root: [0; 32],
            difficulty: 0,
            proof: Proof::Work { nonce },
        }
    }

    fn linear_index(len: u64) -> (BlockIndex, Vec<Sha256Hash>) {
        let mut index = BlockIndex::new();
        let mut hashes = Vec::new();
        let mut prev = [0u8; 32];
        for h in 0..len {
            let hash = index.insert(header(h, prev, 100 + h * 10, 0), h as u128 + 1, 0, 0);
            index.set_status(&hash, BlockStatus::DataAvailable);
            hashes.push(hash);
            prev = hash;
        }
        (index, hashes)
    }

    #[test]
    fn test_median_time_past() {
        let (index, hashes) = linear_index(20);
        // timestamps of heights 9..=19 are 190..=290, median is height 14
        assert_eq!(index.median_time_past(&hashes[19]), 240);
        assert_eq!(index.median_time_past(&hashes[0]), 100);
    }

    #[test]
    fn test_ancestor_walk() {
        let (index, hashes) = linear_index(10);
        let walked: Vec<Sha256Hash> = index.ancestors(&hashes[4]).map(|record| record.hash).collect();
        assert_eq!(walked, hashes[..5].iter().rev().copied().collect::<Vec<_>>());
    }

    #[test]
    fn test_mark_invalid_propagates_to_descendants() {
        let (mut index, hashes) = linear_index(6);
        assert_eq!(index.mark_invalid(&hashes[3]), 3);
        assert_eq!(index.get(&hashes[5]).unwrap().status, BlockStatus::Invalid);
        assert_eq!(index.get(&hashes[2]).unwrap().status, BlockStatus::DataAvailable);
        assert_eq!(index.best_available_descendant(&hashes[0]).unwrap().hash, hashes[2]);
    }

    #[test]
    fn test_first_seen_wins_equal_score() {
        let (mut index, hashes) = linear_index(2);
        let a = index.insert(header(2, hashes[1], 200, 1), 3, 0, 0);
        let b = index.insert(header(2, hashes[1], 200, 2), 3, 0, 0);
        index.set_status(&a, BlockStatus::DataAvailable);
        index.set_status(&b, BlockStatus::DataAvailable);
        assert_eq!(index.best_available_descendant(&hashes[0]).unwrap().hash, a);
    }
}
