//! Stake modifier derivation
//!
//! The modifier scrambles kernel hashes so a staker cannot precompute future
//! proofs when the coin is confirmed. Each block's modifier is assembled
//! bit by bit from the entropy of ancestors selected by a hash lottery.

use crate::blockchain::{BlockIndex, BlockRecord, Sha256Hash};
use crate::consensus::stake::hash_to_u128;
use sha2::{Digest, Sha256};
use std::collections::HashSet;

/// Ancestors considered, and bits produced, per modifier.
pub const MODIFIER_ROUNDS: usize = 64;

/// Stake blocks get their selection hash shifted down by this many bits.
const STAKE_SELECTION_SHIFT: u32 = 32;

fn selection_hash(record: &BlockRecord, previous_modifier: u64) -> u128 {
    let mut hasher = Sha256::new();
    hasher.update(record.hash);
    hasher.update(previous_modifier.to_le_bytes());
    let hash: Sha256Hash = hasher.finalize().into();
    let value = hash_to_u128(&hash);
    if record.is_proof_of_stake() {
        value >> STAKE_SELECTION_SHIFT
    } else {
        value
    }
}

pub fn entropy_bit(hash: &Sha256Hash) -> u64 {
    (hash[31] & 1) as u64
}

/// Modifier for a block whose parent is `parent_hash`. The parent's own
/// modifier seeds the selection lottery.
pub fn compute_next_stake_modifier(index: &BlockIndex, parent_hash: &Sha256Hash) -> u64 {
    let previous_modifier = match index.get(parent_hash) {
        Some(parent) => parent.stake_modifier,
        None => return 0,
    };

    let mut candidates: Vec<&BlockRecord> = index.ancestors(parent_hash).take(MODIFIER_ROUNDS).collect();
    candidates.sort_by(|a, b| {
        a.header
            .timestamp
            .cmp(&b.header.timestamp)
            .then_with(|| a.hash.cmp(&b.hash))
    });

    let total = candidates.len();
    let rounds = total.min(MODIFIER_ROUNDS);
    let mut selected: HashSet<Sha256Hash> = HashSet::with_capacity(rounds);
    let mut modifier = 0u64;
    for round in 0..rounds {
        let window = ((round + 1) * total).div_ceil(rounds);
        let winner = candidates[..window]
            .iter()
            .filter(|record| !selected.contains(&record.hash))
            .min_by_key(|record| (selection_hash(record, previous_modifier), record.hash));
        if let Some(record) = winner {
            selected.insert(record.hash);
            modifier |= entropy_bit(&record.hash) << round;
        }
    }
    modifier
}

/// Chained checksum over every modifier, compared against hard checkpoints.
pub fn modifier_checksum(
    previous_checksum: u32,
    block_hash: &Sha256Hash,
    is_proof_of_stake: bool,
    modifier: u64,
) -> u32 {
    let flags = u8::from(is_proof_of_stake) | ((entropy_bit(block_hash) as u8) << 1);
    let mut hasher = Sha256::new();
    hasher.update(previous_checksum.to_le_bytes());
    hasher.update([flags]);
    hasher.update(block_hash);
    hasher.update(modifier.to_le_bytes());
    let digest = hasher.finalize();
    u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::{BlockHeader, Proof};

    fn build_index(len: u64) -> (BlockIndex, Vec<Sha256Hash>) {
        let mut index = BlockIndex::new();
        let mut hashes = Vec::new();
        let mut prev = [0u8; 32];
        for height in 0..len {
            let modifier = if height == 0 {
                0
            } else {
                compute_next_stake_modifier(&index, &prev)
            };
            let header = BlockHeader {
                version: 1,
                height,
                timestamp: 1_000 + height * 60,
                previous_hash: prev,
                merkle_root: [height as u8; 32],
                difficulty: 0,
                proof: Proof::Work { nonce: height },
            };
            prev = index.insert(header, height as u128 + 1, modifier, 0);
            hashes.push(prev);
        }
        (index, hashes)
    }

    #[test]
    fn test_modifier_is_deterministic() {
        let (a, hashes_a) = build_index(80);
        let (b, hashes_b) = build_index(80);
        assert_eq!(hashes_a, hashes_b);
        assert_eq!(
            compute_next_stake_modifier(&a, &hashes_a[79]),
            compute_next_stake_modifier(&b, &hashes_b[79])
        );
    }

    #[test]
    fn test_modifier_depends_on_history() {
        let (index, hashes) = build_index(80);
        let modifiers: HashSet<u64> = (40..80)
            .map(|h| compute_next_stake_modifier(&index, &hashes[h]))
            .collect();
        assert!(modifiers.len() > 1);
    }

    #[test]
    fn test_modifier_uses_only_available_bits() {
        let (index, hashes) = build_index(3);
        let modifier = compute_next_stake_modifier(&index, &hashes[2]);
        assert!(modifier < 8);
    }

    #[test]
    fn test_checksum_chains() {
        let first = modifier_checksum(0, &[1; 32], false, 5);
        let second = modifier_checksum(first, &[2; 32], true, 9);
        assert_ne!(first, second);
        assert_ne!(second, modifier_checksum(0, &[2; 32], true, 9));
    }
}
