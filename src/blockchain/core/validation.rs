use super::block::{Block, Proof, MAX_BLOCK_SIZE};
use crate::amount::Amount;
use crate::error::{ChainError, TxError};
use std::collections::HashSet;

/// Context-free block checks: merkle root, size, minting-transaction placement
/// and duplicate transactions.
pub fn check_block_structure(block: &Block) -> Result<(), ChainError> {
    if block.transactions.is_empty() {
        return Err(ChainError::Malformed("block has no transactions".to_string()));
    }

    let size = block.serialized_size();
    if size > MAX_BLOCK_SIZE {
        return Err(ChainError::Malformed(format!(
            "block too large: {} bytes (max: {})",
            size, MAX_BLOCK_SIZE
        )));
    }

    let (expected_merkle_root, mutated) = Block::merkle_root_checked(&block.transactions);
    if mutated {
        return Err(ChainError::Malformed(
            "transaction list repeats a merkle branch".to_string(),
        ));
    }
    if expected_merkle_root != block.header.merkle_root {
        return Err(ChainError::Malformed(format!(
            "Merkle root mismatch. Expected {}, but got {}.",
            hex::encode(expected_merkle_root),
            hex::encode(block.header.merkle_root)
        )));
    }

    let minting = &block.transactions[0];
    let kind_matches = match block.header.proof {
        Proof::Work { .. } => minting.is_coinbase(),
        Proof::Stake { .. } => minting.is_coinstake(),
    };
    if !kind_matches {
        return Err(ChainError::Malformed(
            "first transaction must be the minting transaction matching the block proof".to_string(),
        ));
    }
    if let crate::transaction::TxKind::Coinbase { height } = minting.kind {
        if height != block.header.height {
            return Err(ChainError::Malformed(format!(
                "coinbase height {} does not match block height {}",
                height, block.header.height
            )));
        }
    }
    if block.transactions[1..].iter().any(|tx| tx.is_minting()) {
        return Err(ChainError::Malformed(
            "minting transaction outside the first position".to_string(),
        ));
    }

    check_duplicate_transactions(block)
}

pub fn check_duplicate_transactions(block: &Block) -> Result<(), ChainError> {
    let mut txids = HashSet::with_capacity(block.transactions.len());
    for tx in &block.transactions {
        if !txids.insert(tx.txid()) {
            return Err(ChainError::Malformed(format!(
                "duplicate transaction {} in block",
                tx.txid_hex()
            )));
        }
    }
    Ok(())
}

/// Rejects a block in which two transactions spend the same outpoint.
pub fn validate_no_double_spend(block: &Block) -> Result<(), ChainError> {
    let mut seen_inputs = HashSet::new();
    for tx in &block.transactions {
        for input in &tx.inputs {
            if !seen_inputs.insert(input.previous_output) {
                return Err(TxError::AlreadySpent(input.previous_output).into());
            }
        }
    }
    Ok(())
}

/// Caps the value a block's minting transaction may create.
pub fn check_minted_value(
    block: &Block,
    minted: Amount,
    fees: Amount,
    coinbase_reward: Amount,
    stake_reward: Amount,
) -> Result<(), ChainError> {
    let reward = if block.is_proof_of_stake() {
        stake_reward
    } else {
        coinbase_reward
    };
    let allowed = reward.saturating_add(fees);
    if minted > allowed {
        return Err(ChainError::ExcessiveMint { minted, allowed });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amount::COIN;
    use crate::crypto::Address;
    use crate::transaction::{OutPoint, Transaction, TxInput, TxOutput};

    fn coinbase(height: u64) -> Transaction {
        Transaction::coinbase(height, 0, vec![TxOutput::pay_to(Address([1; 32]), COIN)])
    }

    fn spend(outpoint: OutPoint, time: u64) -> Transaction {
        Transaction::transfer(
            time,
            vec![TxInput::new(outpoint)],
            vec![TxOutput::pay_to(Address([2; 32]), 1)],
            0,
        )
    }

    #[test]
    fn test_structure_accepts_well_formed_block() {
        let block = Block::new(3, 0, [0; 32], 0, Proof::Work { nonce: 0 }, vec![coinbase(3)]);
        assert!(check_block_structure(&block).is_ok());
    }

    #[test]
    fn test_merkle_mismatch_rejected() {
        let mut block = Block::new(3, 0, [0; 32], 0, Proof::Work { nonce: 0 }, vec![coinbase(3)]);
        block.transactions.push(spend(OutPoint::new([1; 32], 0), 0));
        assert!(matches!(check_block_structure(&block), Err(ChainError::Malformed(_))));
    }

    #[test]
    fn test_minting_kind_must_match_proof() {
        let block = Block::new(
            3,
            0,
            [0; 32],
            0,
            Proof::Stake {
                kernel: OutPoint::new([1; 32], 0),
            },
            vec![coinbase(3)],
        );
        assert!(check_block_structure(&block).is_err());

        let two_coinbases = Block::new(
            3,
            0,
            [0; 32],
            0,
            Proof::Work { nonce: 0 },
            vec![coinbase(3), coinbase(4)],
        );
        assert!(check_block_structure(&two_coinbases).is_err());
    }

    #[test]
    fn test_double_spend_in_block() {
        let outpoint = OutPoint::new([8; 32], 0);
        let block = Block::new(
            1,
            0,
            [0; 32],
            0,
            Proof::Work { nonce: 0 },
            vec![coinbase(1), spend(outpoint, 1), spend(outpoint, 2)],
        );
        assert_eq!(
            validate_no_double_spend(&block),
            Err(ChainError::Transaction(TxError::AlreadySpent(outpoint)))
        );
    }

    #[test]
    fn test_minted_value_limit() {
        let block = Block::new(1, 0, [0; 32], 0, Proof::Work { nonce: 0 }, vec![coinbase(1)]);
        assert!(check_minted_value(&block, 51 * COIN, COIN, 50 * COIN, COIN).is_ok());
        assert!(matches!(
            check_minted_value(&block, 52 * COIN, COIN, 50 * COIN, COIN),
            Err(ChainError::ExcessiveMint { .. })
        ));
    }
}
