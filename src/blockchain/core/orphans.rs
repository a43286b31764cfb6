use super::block::{Block, Sha256Hash};
use std::collections::{HashMap, VecDeque};
use tracing::debug;

/// Blocks whose parent has not arrived yet. Oldest entries are evicted first.
#[derive(Debug)]
pub struct OrphanPool {
    blocks: HashMap<Sha256Hash, Block>,
    by_parent: HashMap<Sha256Hash, Vec<Sha256Hash>>,
    arrival: VecDeque<Sha256Hash>,
    limit: usize,
}

impl OrphanPool {
    pub fn new(limit: usize) -> Self {
        OrphanPool {
            blocks: HashMap::new(),
            by_parent: HashMap::new(),
            arrival: VecDeque::new(),
            limit,
        }
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn contains(&self, hash: &Sha256Hash) -> bool {
        self.blocks.contains_key(hash)
    }

    /// Returns false if the block was already held.
    pub fn insert(&mut self, block: Block) -> bool {
        let hash = block.hash();
        if self.limit == 0 || self.blocks.contains_key(&hash) {
            return false;
        }
        while self.blocks.len() >= self.limit {
            match self.arrival.pop_front() {
                Some(oldest) => {
                    debug!("evicting orphan block {}", hex::encode(oldest));
                    self.remove(&oldest);
                }
                None => break,
            }
        }
        self.by_parent
            .entry(block.header.previous_hash)
            .or_default()
            .push(hash);
        self.arrival.push_back(hash);
        self.blocks.insert(hash, block);
        true
    }

    /// Removes and returns the orphans waiting on `parent`, in arrival order.
    pub fn take_children(&mut self, parent: &Sha256Hash) -> Vec<Block> {
        let hashes = self.by_parent.remove(parent).unwrap_or_default();
        let mut blocks = Vec::with_capacity(hashes.len());
        for hash in hashes {
            if let Some(block) = self.blocks.remove(&hash) {
                self.arrival.retain(|h| *h != hash);
                blocks.push(block);
            }
        }
        blocks
    }

    fn remove(&mut self, hash: &Sha256Hash) {
        if let Some(block) = self.blocks.remove(hash) {
            if let Some(siblings) = self.by_parent.get_mut(&block.header.previous_hash) {
                siblings.retain(|h| h != hash);
                if siblings.is_empty() {
                    self.by_parent.remove(&block.header.previous_hash);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::Proof;

    fn orphan(parent: u8, nonce: u64) -> Block {
        Block::new(5, 0, [parent; 32], 0, Proof::Work { nonce }, vec![])
    }

    #[test]
    fn test_children_released_in_arrival_order() {
        let mut pool = OrphanPool::new(10);
        let a = orphan(1, 1);
        let b = orphan(1, 2);
        assert!(pool.insert(a.clone()));
        assert!(pool.insert(b.clone()));
        assert!(!pool.insert(a.clone()));

        let released = pool.take_children(&[1; 32]);
        assert_eq!(released, vec![a, b]);
        assert!(pool.is_empty());
    }

    #[test]
    fn test_oldest_evicted_at_limit() {
        let mut pool = OrphanPool::new(2);
        let first = orphan(1, 1);
        pool.insert(first.clone());
        pool.insert(orphan(2, 2));
        pool.insert(orphan(3, 3));
        assert_eq!(pool.len(), 2);
        assert!(!pool.contains(&first.hash()));
        assert!(pool.take_children(&[1; 32]).is_empty());
    }
}
