//! Proof-of-stake kernel rules
//!
//! A kernel is an unspent output whose hash, mixed with the stake modifier and
//! a candidate timestamp, falls under the per-coin-day target scaled by the
//! coin's age-weighted value.

use crate::amount::{Amount, COIN};
use crate::blockchain::{BlockHeader, Proof, Sha256Hash};
use crate::config::ConsensusConfig;
use crate::error::StakeError;
use crate::transaction::{OutPoint, Transaction, UtxoView, ValidationContext};
use sha2::{Digest, Sha256};

const SECONDS_PER_DAY: u128 = 86_400;

/// The coin a staker offers as kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelCandidate {
    pub outpoint: OutPoint,
    pub amount: Amount,
    /// Timestamp of the block that created the coin.
    pub block_time: u64,
}

/// A kernel that met the target at `timestamp`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelHit {
    pub candidate: KernelCandidate,
    pub timestamp: u64,
    pub hash: Sha256Hash,
}

/// Age thresholds for kernel eligibility and weight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StakeParams {
    pub min_age: u64,
    pub max_age: u64,
}

impl From<&ConsensusConfig> for StakeParams {
    fn from(config: &ConsensusConfig) -> Self {
        StakeParams {
            min_age: config.stake_min_age,
            max_age: config.stake_max_age,
        }
    }
}

pub fn kernel_hash(modifier: u64, candidate: &KernelCandidate, timestamp: u64) -> Sha256Hash {
    let mut hasher = Sha256::new();
    hasher.update(modifier.to_le_bytes());
    hasher.update(candidate.block_time.to_le_bytes());
    hasher.update(candidate.outpoint.txid);
    hasher.update(candidate.outpoint.index.to_le_bytes());
    hasher.update(candidate.amount.to_le_bytes());
    hasher.update(timestamp.to_le_bytes());
    hasher.finalize().into()
}

/// Upper 128 bits of a hash, big-endian.
pub fn hash_to_u128(hash: &Sha256Hash) -> u128 {
    let mut high = [0u8; 16];
    high.copy_from_slice(&hash[..16]);
    u128::from_be_bytes(high)
}

/// Target a single coin-day must beat at `difficulty` bits.
pub fn target_per_coin_day(difficulty: u32) -> u128 {
    if difficulty >= 128 {
        0
    } else {
        u128::MAX >> difficulty
    }
}

/// Coin-days: `amount * min(age, max_age)`, in whole coins times days.
pub fn coin_day_weight(amount: Amount, age: u64, max_age: u64) -> u128 {
    let amount = amount.max(0) as u128;
    let age = age.min(max_age) as u128;
    amount * age / (COIN as u128 * SECONDS_PER_DAY)
}

/// Checks that `candidate` is a valid kernel at `timestamp`.
pub fn check_kernel(
    candidate: &KernelCandidate,
    timestamp: u64,
    stake_modifier: u64,
    difficulty: u32,
    params: &StakeParams,
) -> Result<Sha256Hash, StakeError> {
    if timestamp < candidate.block_time {
        return Err(StakeError::TimestampViolation {
            timestamp,
            block_time: candidate.block_time,
        });
    }
    let age = timestamp - candidate.block_time;
    if age < params.min_age {
        return Err(StakeError::MinAgeViolation {
            age,
            min_age: params.min_age,
        });
    }
    let weight = coin_day_weight(candidate.amount, age, params.max_age);
    let target = target_per_coin_day(difficulty).saturating_mul(weight);
    let hash = kernel_hash(stake_modifier, candidate, timestamp);
    if hash_to_u128(&hash) > target {
        return Err(StakeError::KernelTooHigh {
            hash: hex::encode(hash),
        });
    }
    Ok(hash)
}

/// Validates a block's coinstake against the header and the pre-block view.
pub fn check_coinstake<V: UtxoView + ?Sized>(
    view: &V,
    header: &BlockHeader,
    coinstake: &Transaction,
    stake_modifier: u64,
    ctx: &ValidationContext,
    params: &StakeParams,
) -> Result<Sha256Hash, StakeError> {
    let kernel = match header.proof {
        Proof::Stake { kernel } => kernel,
        Proof::Work { .. } => return Err(StakeError::MissingCoinstake),
    };
    if !coinstake.is_coinstake() {
        return Err(StakeError::MissingCoinstake);
    }
    match coinstake.inputs.first() {
        Some(input) if input.previous_output == kernel => {}
        _ => return Err(StakeError::KernelMismatch),
    }
    if coinstake.time != header.timestamp {
        return Err(StakeError::CoinstakeTimeMismatch {
            tx_time: coinstake.time,
            block_time: header.timestamp,
        });
    }
    let utxo = view.utxo(&kernel).ok_or(StakeError::UnknownKernel(kernel))?;
    if !ctx.is_mature(utxo) {
        return Err(StakeError::ImmatureKernel(kernel));
    }
    let candidate = KernelCandidate {
        outpoint: kernel,
        amount: utxo.output.value,
        block_time: utxo.block_time,
    };
    check_kernel(&candidate, header.timestamp, stake_modifier, header.difficulty, params)
}

/// Scans each candidate backwards from `time` over `window` seconds, never
/// going below `earliest`. Returns the first hit.
pub fn search_kernel(
    candidates: &[KernelCandidate],
    time: u64,
    window: u64,
    earliest: u64,
    stake_modifier: u64,
    difficulty: u32,
    params: &StakeParams,
) -> Option<KernelHit> {
    let lowest = time.saturating_sub(window).max(earliest);
    if lowest > time {
        return None;
    }
    for candidate in candidates {
        for timestamp in (lowest..=time).rev() {
            if timestamp < candidate.block_time.saturating_add(params.min_age) {
                break;
            }
            if let Ok(hash) = check_kernel(candidate, timestamp, stake_modifier, difficulty, params) {
                return Some(KernelHit {
                    candidate: *candidate,
                    timestamp,
                    hash,
                });
            }
        }
    }
    None
}
