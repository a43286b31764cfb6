//! Coinstake shaping for the minter: reserve, split and combine.

use crate::amount::{Amount, CENT};
use crate::blockchain::Utxo;
use crate::config::MinterConfig;
use crate::crypto::Address;
use crate::error::ChainError;
use crate::transaction::OutPoint;
use tracing::debug;

/// Most inputs a coinstake may gather.
pub const MAX_COINSTAKE_INPUTS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StakePolicy {
    pub reserve_balance: Amount,
    pub split_threshold: Amount,
    pub combine_threshold: Amount,
    /// Coin age at which weight stops growing.
    pub max_age: u64,
}

impl StakePolicy {
    pub fn new(minter: &MinterConfig, max_age: u64) -> Self {
        StakePolicy {
            reserve_balance: minter.reserve_balance,
            split_threshold: minter.split_threshold,
            combine_threshold: minter.combine_threshold,
            max_age,
        }
    }
}

/// Coins offered for staking, with the most value a coinstake may consume.
#[derive(Debug, Clone, Default)]
pub struct StakeableCoins {
    pub coins: Vec<(OutPoint, Utxo)>,
    pub limit: Amount,
}

/// Picks coins from `coins` (largest first) so that at least
/// `reserve_balance` of the wallet stays out of staking.
pub fn stakeable_coins(coins: &[(OutPoint, Utxo)], policy: &StakePolicy) -> StakeableCoins {
    let balance = coins.iter().fold(0 as Amount, |sum, (_, utxo)| sum.saturating_add(utxo.value()));
    let limit = balance.saturating_sub(policy.reserve_balance);
    if limit <= 0 {
        debug!("balance {} does not exceed the stake reserve", balance);
        return StakeableCoins::default();
    }
    let mut selected = Vec::new();
    let mut total: Amount = 0;
    for (outpoint, utxo) in coins {
        if total >= limit {
            break;
        }
        if utxo.value() > limit {
            continue;
        }
        total += utxo.value();
        selected.push((*outpoint, utxo.clone()));
    }
    StakeableCoins { coins: selected, limit }
}

/// Inputs and output values of a coinstake, all paying back to `owner`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoinstakePlan {
    pub owner: Address,
    /// Kernel first.
    pub inputs: Vec<OutPoint>,
    pub outputs: Vec<Amount>,
}

/// Shapes the coinstake around `kernel`: a young kernel above the split
/// threshold is returned as two outputs, otherwise small fully aged coins of
/// the same owner are merged in. `reward` is added to the staked value.
pub fn plan_coinstake(
    kernel: OutPoint,
    stakeable: &StakeableCoins,
    timestamp: u64,
    reward: Amount,
    policy: &StakePolicy,
) -> Result<CoinstakePlan, ChainError> {
    let (_, kernel_utxo) = stakeable
        .coins
        .iter()
        .find(|(outpoint, _)| *outpoint == kernel)
        .ok_or_else(|| ChainError::Malformed(format!("kernel {} is not a stakeable coin", kernel)))?;
    let owner = kernel_utxo
        .output
        .lock
        .address()
        .copied()
        .ok_or_else(|| ChainError::Malformed("kernel coin is not a single-key output".to_string()))?;

    let mut credit = kernel_utxo.value();
    if credit > stakeable.limit {
        return Err(ChainError::Malformed(format!("kernel {} would stake into the reserve", kernel)));
    }
    let kernel_age = timestamp.saturating_sub(kernel_utxo.block_time);
    let split = credit >= policy.split_threshold && kernel_age < policy.max_age;

    let mut inputs = vec![kernel];
    if !split {
        for (outpoint, utxo) in &stakeable.coins {
            if outpoint.txid == kernel.txid || utxo.output.lock.address() != Some(&owner) {
                continue;
            }
            if inputs.len() >= MAX_COINSTAKE_INPUTS || credit > policy.combine_threshold {
                break;
            }
            if credit.saturating_add(utxo.value()) > stakeable.limit {
                break;
            }
            if utxo.value() > policy.combine_threshold {
                continue;
            }
            if timestamp.saturating_sub(utxo.block_time) < policy.max_age {
                continue;
            }
            inputs.push(*outpoint);
            credit += utxo.value();
        }
    }

    let total = credit
        .checked_add(reward)
        .ok_or_else(|| ChainError::Malformed("coinstake value overflows".to_string()))?;
    let outputs = if split {
        let first = total / 2 / CENT * CENT;
        vec![first, total - first]
    } else {
        vec![total]
    };
    if inputs.len() > 1 || split {
        debug!(
            "coinstake gathers {} inputs into {} outputs ({} total)",
            inputs.len(),
            outputs.len(),
            total
        );
    }
    Ok(CoinstakePlan { owner, inputs, outputs })
}
