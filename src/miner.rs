//! Proof-of-work block production for development and test networks

use crate::amount::Amount;
use crate::blockchain::{Block, Proof, Sha256Hash};
use crate::crypto::Address;
use crate::error::ChainError;
use crate::transaction::{Transaction, TxOutput};
use rayon::prelude::*;
use tracing::debug;

/// Nonces tried per parallel round.
const NONCE_CHUNK: u64 = 1 << 16;

/// The coinbase for a work block: reward plus collected fees to one address.
pub fn build_coinbase(
    height: u64,
    time: u64,
    beneficiary: Address,
    reward: Amount,
    fees: Amount,
) -> Result<Transaction, ChainError> {
    let value = reward
        .checked_add(fees)
        .ok_or_else(|| ChainError::Malformed("coinbase value overflows".to_string()))?;
    Ok(Transaction::coinbase(height, time, vec![TxOutput::pay_to(beneficiary, value)]))
}

/// Assembles an unsolved work block on top of `previous_hash`.
pub fn block_template(
    height: u64,
    timestamp: u64,
    previous_hash: Sha256Hash,
    difficulty: u32,
    beneficiary: Address,
    reward: Amount,
    transactions: Vec<Transaction>,
) -> Result<Block, ChainError> {
    let fees: Amount = transactions.iter().map(|tx| tx.fee).sum();
    let mut all = Vec::with_capacity(transactions.len() + 1);
    all.push(build_coinbase(height, timestamp, beneficiary, reward, fees)?);
    all.extend(transactions);
    Ok(Block::new(
        height,
        timestamp,
        previous_hash,
        difficulty,
        Proof::Work { nonce: 0 },
        all,
    ))
}

/// Grinds the header nonce until the hash meets the block's own difficulty.
pub fn mine_block(mut block: Block) -> Result<Block, ChainError> {
    if block.header.proof.is_stake() {
        return Err(ChainError::Malformed("cannot mine a proof-of-stake block".to_string()));
    }
    let target = Block::hash_to_target(block.header.difficulty);
    let mut start = 0u64;
    loop {
        let end = start.saturating_add(NONCE_CHUNK);
        let header = &block.header;
        let found = (start..end).into_par_iter().find_first(|nonce| {
            let mut candidate = header.clone();
            candidate.proof = Proof::Work { nonce: *nonce };
            candidate.hash() <= target
        });
        if let Some(nonce) = found {
            block.header.proof = Proof::Work { nonce };
            debug!(
                "mined block at height {} with nonce {} (difficulty {})",
                block.header.height, nonce, block.header.difficulty
            );
            return Ok(block);
        }
        if end == u64::MAX {
            return Err(ChainError::BadProofOfWork);
        }
        start = end;
    }
}
