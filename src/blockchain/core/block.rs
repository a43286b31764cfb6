use crate::amount::Amount;
use crate::crypto::Address;
use crate::transaction::{OutPoint, Transaction, TxOutput};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub type Sha256Hash = [u8; 32];

pub const BLOCK_VERSION: u32 = 1;

/// Serialized block size limit, in bytes.
pub const MAX_BLOCK_SIZE: usize = 1_000_000;

/// How a block proves it may extend the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Proof {
    Work { nonce: u64 },
    /// The kernel is the coin whose age and weight satisfied the stake target.
    Stake { kernel: OutPoint },
}

impl Proof {
    pub fn is_stake(&self) -> bool {
        matches!(self, Proof::Stake { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub version: u32,
    pub height: u64,
    /// Unix seconds.
    pub timestamp: u64,
    pub previous_hash: Sha256Hash,
    pub merkle_root: Sha256Hash,
    /// Leading zero bits required of the work hash, or the per-coin-day stake target shift.
    pub difficulty: u32,
    pub proof: Proof,
}

impl BlockHeader {
    pub fn hash(&self) -> Sha256Hash {
        let mut hasher = Sha256::new();
        hasher.update(self.version.to_le_bytes());
        hasher.update(self.height.to_le_bytes());
        hasher.update(self.timestamp.to_le_bytes());
        hasher.update(self.previous_hash);
        hasher.update(self.merkle_root);
        hasher.update(self.difficulty.to_le_bytes());
        match self.proof {
            Proof::Work { nonce } => {
                hasher.update([0u8]);
                hasher.update(nonce.to_le_bytes());
            }
            Proof::Stake { kernel } => {
                hasher.update([1u8]);
                hasher.update(kernel.txid);
                hasher.update(kernel.index.to_le_bytes());
            }
        }
        hasher.finalize().into()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
}

impl Block {
    /// Assembles a block over `transactions`, filling in the merkle root.
    pub fn new(
        height: u64,
        timestamp: u64,
        previous_hash: Sha256Hash,
        difficulty: u32,
        proof: Proof,
        transactions: Vec<Transaction>,
    ) -> Self {
        let merkle_root = Block::calculate_merkle_root(&transactions);
        Block {
            header: BlockHeader {
                version: BLOCK_VERSION,
                height,
                timestamp,
                previous_hash,
                merkle_root,
                difficulty,
                proof,
            },
            transactions,
        }
    }

    /// Genesis block: a single allocation transaction. Its outputs are not minted.
    pub fn genesis(timestamp: u64, allocations: &[(Address, Amount)]) -> Self {
        let outputs = allocations
            .iter()
            .map(|(address, value)| TxOutput::pay_to(*address, *value))
            .collect();
        let allocation = Transaction::coinbase(0, timestamp, outputs);
        Block::new(0, timestamp, [0u8; 32], 0, Proof::Work { nonce: 0 }, vec![allocation])
    }

    pub fn hash(&self) -> Sha256Hash {
        self.header.hash()
    }

    pub fn height(&self) -> u64 {
        self.header.height
    }

    pub fn calculate_merkle_root(transactions: &[Transaction]) -> Sha256Hash {
        Self::merkle_root_checked(transactions).0
    }

    /// Merkle root plus a flag set when two sibling hashes at any level are
    /// equal. Such a list hashes to the same root as a shorter one with the
    /// trailing entries dropped, so the root alone does not pin the body.
    pub fn merkle_root_checked(transactions: &[Transaction]) -> (Sha256Hash, bool) {
        let mut layer: Vec<Sha256Hash> = transactions.iter().map(|tx| tx.txid()).collect();
        if layer.is_empty() {
            return ([0u8; 32], false);
        }
        let mut mutated = false;
        while layer.len() > 1 {
            layer = layer
                .chunks(2)
                .map(|pair| {
                    let right = match pair.get(1) {
                        Some(right) => {
                            mutated |= *right == pair[0];
                            right
                        }
                        None => &pair[0],
                    };
                    let mut hasher = Sha256::new();
                    hasher.update(pair[0]);
                    hasher.update(right);
                    hasher.finalize().into()
                })
                .collect();
        }
        (layer[0], mutated)
    }

    /// 256-bit target for a leading-zero-bits difficulty.
    pub fn hash_to_target(difficulty: u32) -> [u8; 32] {
        let mut target = [0xFF; 32];
        let leading_zeros = (difficulty / 8).min(32);
        let partial_bits = difficulty % 8;

        for item in target.iter_mut().take(leading_zeros as usize) {
            *item = 0;
        }

        if leading_zeros < 32 && partial_bits > 0 {
            target[leading_zeros as usize] = 0xFF >> partial_bits;
        }
        target
    }

    pub fn serialized_size(&self) -> usize {
        bincode::serialized_size(self).map_or(usize::MAX, |size| size as usize)
    }

    pub fn is_proof_of_stake(&self) -> bool {
        self.header.proof.is_stake()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amount::COIN;

    #[test]
    fn test_hash_to_target() {
        assert_eq!(Block::hash_to_target(0), [0xFF; 32]);
        let t = Block::hash_to_target(12);
        assert_eq!(t[0], 0);
        assert_eq!(t[1], 0x0F);
        assert_eq!(t[2], 0xFF);
        assert_eq!(Block::hash_to_target(300), [0u8; 32]);
    }

    #[test]
    fn test_header_hash_changes_with_proof() {
        let genesis = Block::genesis(1_600_000_000, &[(Address([1; 32]), 10 * COIN)]);
        let mut header = genesis.header.clone();
        header.proof = Proof::Work { nonce: 1 };
        assert_ne!(header.hash(), genesis.hash());
    }

    #[test]
    fn test_merkle_root_depends_on_order() {
        let a = Transaction::coinbase(1, 0, vec![TxOutput::pay_to(Address([1; 32]), 1)]);
        let b = Transaction::coinbase(2, 0, vec![TxOutput::pay_to(Address([1; 32]), 1)]);
        let ab = Block::calculate_merkle_root(&[a.clone(), b.clone()]);
        let ba = Block::calculate_merkle_root(&[b, a.clone()]);
        assert_ne!(ab, ba);
        assert_eq!(Block::calculate_merkle_root(&[a.clone()]), a.txid());
    }

    #[test]
    fn test_merkle_root_flags_duplicated_tail() {
        let tx = |n: u64| Transaction::coinbase(n, 0, vec![TxOutput::pay_to(Address([1; 32]), 1)]);
        let genuine = [tx(1), tx(2), tx(3)];
        let padded = [tx(1), tx(2), tx(3), tx(3)];

        let (root, mutated) = Block::merkle_root_checked(&genuine);
        assert!(!mutated);
        let (padded_root, padded_mutated) = Block::merkle_root_checked(&padded);
        assert_eq!(root, padded_root);
        assert!(padded_mutated);
    }
}
