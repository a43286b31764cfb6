//! Consensus rules shared by header and block validation

pub mod checkpoints;
pub mod modifier;
pub mod stake;

use crate::blockchain::{Block, BlockHeader, Proof};
use crate::config::ConsensusConfig;
use crate::error::ChainError;

/// Score bits are capped so one block cannot dominate; cumulative scores saturate.
pub const MAX_SCORE_BITS: u32 = 120;

/// Chain-selection weight of one block: `2^min(difficulty, 120)`.
pub fn block_score(difficulty: u32) -> u128 {
    1u128 << difficulty.min(MAX_SCORE_BITS)
}

/// Cumulative score of a child of a block scoring `parent`.
pub fn cumulative_score(parent: u128, difficulty: u32) -> u128 {
    parent.saturating_add(block_score(difficulty))
}

/// Configured floor for the header's proof kind.
pub fn minimum_difficulty(proof: &Proof, params: &ConsensusConfig) -> u32 {
    match proof {
        Proof::Work { .. } => params.min_work_difficulty,
        Proof::Stake { .. } => params.min_stake_difficulty,
    }
}

pub fn check_difficulty(header: &BlockHeader, params: &ConsensusConfig) -> Result<(), ChainError> {
    let minimum = minimum_difficulty(&header.proof, params);
    if header.difficulty < minimum {
        return Err(ChainError::DifficultyTooLow {
            found: header.difficulty,
            minimum,
        });
    }
    Ok(())
}

/// Work headers must hash at or below their own difficulty target.
pub fn check_proof_of_work(header: &BlockHeader) -> Result<(), ChainError> {
    if !matches!(header.proof, Proof::Work { .. }) {
        return Ok(());
    }
    let target = Block::hash_to_target(header.difficulty);
    if header.hash() <= target {
        Ok(())
    } else {
        Err(ChainError::BadProofOfWork)
    }
}
