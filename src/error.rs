//! Error types for the ledger engine

use crate::amount::Amount;
use crate::blockchain::Sha256Hash;
use crate::crypto::Address;
use crate::transaction::OutPoint;
use std::fmt;
use thiserror::Error;

/// How a failure must be treated by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ErrorClass {
    /// Malformed block or transaction shape. Reject, never retry.
    Structural,
    /// Kernel, difficulty, maturity or signature failure. Reject and flag the source.
    Consensus,
    /// Reorg failure or snapshot mismatch. The in-progress operation was rolled back.
    State,
    /// Wrong passphrase, locked store. Surfaced to the caller verbatim.
    Custody,
    /// Unrecoverable persistence corruption.
    Fatal,
}

/// Failures of a single transaction against a UTXO snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TxError {
    #[error("input {0} is not in the unspent set")]
    UnknownInput(OutPoint),
    #[error("input {0} was already spent")]
    AlreadySpent(OutPoint),
    #[error("signature for input {input} does not satisfy the locking condition")]
    BadSignature { input: usize },
    #[error("input {outpoint} is immature: {confirmations} of {required} confirmations")]
    ImmatureSpend {
        outpoint: OutPoint,
        confirmations: u64,
        required: u64,
    },
    #[error("negative or overflowing amount")]
    NegativeOrOverflowAmount,
    #[error("insufficient input: inputs {inputs}, outputs {outputs}, fee {fee}")]
    InsufficientInput {
        inputs: Amount,
        outputs: Amount,
        fee: Amount,
    },
    #[error("malformed transaction: {0}")]
    Malformed(String),
}

impl TxError {
    pub fn class(&self) -> ErrorClass {
        match self {
            TxError::Malformed(_) | TxError::NegativeOrOverflowAmount => ErrorClass::Structural,
            _ => ErrorClass::Consensus,
        }
    }
}

/// Proof-of-stake kernel failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StakeError {
    #[error("kernel hash {hash} exceeds weighted target")]
    KernelTooHigh { hash: String },
    #[error("stake kernel age {age}s is below the minimum {min_age}s")]
    MinAgeViolation { age: u64, min_age: u64 },
    #[error("stake timestamp {timestamp} precedes kernel block time {block_time}")]
    TimestampViolation { timestamp: u64, block_time: u64 },
    #[error("stake kernel {0} is not in the unspent set")]
    UnknownKernel(OutPoint),
    #[error("stake kernel {0} is immature")]
    ImmatureKernel(OutPoint),
    #[error("header kernel does not match coinstake input")]
    KernelMismatch,
    #[error("coinstake time {tx_time} differs from block time {block_time}")]
    CoinstakeTimeMismatch { tx_time: u64, block_time: u64 },
    #[error("proof-of-stake block without a coinstake transaction")]
    MissingCoinstake,
}

/// Key custody failures. Never carries passphrase material.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyStoreError {
    #[error("key store is already encrypted")]
    AlreadyEncrypted,
    #[error("key store is not encrypted")]
    NotEncrypted,
    #[error("the passphrase entered was incorrect")]
    WrongPassphrase,
    #[error("key store is locked")]
    KeyStoreLocked,
    #[error("key store is unlocked for staking only")]
    StakingOnly,
    #[error("unknown key {0}")]
    UnknownKey(Address),
    #[error("key pool is empty and the store is locked")]
    KeyPoolExhausted,
    #[error("key store crypto failure: {0}")]
    Crypto(String),
    #[error("key store file error: {0}")]
    Io(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainError {
    Malformed(String),
    CryptoError(String),
    OrphanHeader(Sha256Hash),
    DuplicateHeader(Sha256Hash),
    UnknownBlock(Sha256Hash),
    MissingBlockData(Sha256Hash),
    InvalidBlock {
        hash: Sha256Hash,
        reason: Box<ChainError>,
    },
    InvalidAncestor(Sha256Hash),
    Transaction(TxError),
    Stake(StakeError),
    BadProofOfWork,
    BadHeight { expected: u64, found: u64 },
    TimestampTooEarly { timestamp: u64, median: u64 },
    TimestampTooFar { timestamp: u64, limit: u64 },
    DifficultyTooLow { found: u32, minimum: u32 },
    CheckpointMismatch { height: u64 },
    ModifierChecksumMismatch { height: u64 },
    ExcessiveMint { minted: Amount, allowed: Amount },
    NotExtendingTip { tip: Sha256Hash, parent: Sha256Hash },
    ReorgFailed {
        failed_block: Sha256Hash,
        reason: Box<ChainError>,
    },
    Custody(KeyStoreError),
    InsufficientFunds { needed: Amount, available: Amount },
    Cancelled,
    DatabaseError(String),
    Persistence(String),
    CorruptLedger(String),
    Config(String),
    IoError(String),
}

impl ChainError {
    /// Classify the failure for the propagation policy.
    pub fn class(&self) -> ErrorClass {
        match self {
            ChainError::Malformed(_)
            | ChainError::CryptoError(_)
            | ChainError::OrphanHeader(_)
            | ChainError::DuplicateHeader(_)
            | ChainError::BadHeight { .. }
            | ChainError::TimestampTooFar { .. } => ErrorClass::Structural,
            ChainError::InvalidBlock { reason, .. } => match reason.class() {
                ErrorClass::Structural => ErrorClass::Structural,
                _ => ErrorClass::Consensus,
            },
            ChainError::Transaction(e) => e.class(),
            ChainError::InvalidAncestor(_)
            | ChainError::Stake(_)
            | ChainError::BadProofOfWork
            | ChainError::TimestampTooEarly { .. }
            | ChainError::DifficultyTooLow { .. }
            | ChainError::CheckpointMismatch { .. }
            | ChainError::ModifierChecksumMismatch { .. }
            | ChainError::ExcessiveMint { .. } => ErrorClass::Consensus,
            ChainError::UnknownBlock(_)
            | ChainError::MissingBlockData(_)
            | ChainError::NotExtendingTip { .. }
            | ChainError::ReorgFailed { .. }
            | ChainError::Cancelled
            | ChainError::DatabaseError(_)
            | ChainError::Config(_)
            | ChainError::IoError(_) => ErrorClass::State,
            ChainError::Custody(_) | ChainError::InsufficientFunds { .. } => ErrorClass::Custody,
            ChainError::Persistence(_) | ChainError::CorruptLedger(_) => ErrorClass::Fatal,
        }
    }

    /// Wrap a validation failure as the rejection of a whole block.
    pub fn invalid_block(hash: Sha256Hash, reason: ChainError) -> Self {
        ChainError::InvalidBlock {
            hash,
            reason: Box::new(reason),
        }
    }

    /// The innermost cause, looking through block and reorg wrappers.
    pub fn root_cause(&self) -> &ChainError {
        match self {
            ChainError::InvalidBlock { reason, .. } | ChainError::ReorgFailed { reason, .. } => {
                reason.root_cause()
            }
            other => other,
        }
    }
}

impl fmt::Display for ChainError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ChainError::Malformed(msg) => write!(f, "Malformed data: {}", msg),
            ChainError::CryptoError(msg) => write!(f, "Cryptographic error: {}", msg),
            ChainError::OrphanHeader(h) => write!(f, "Orphan header: parent {} unknown", hex::encode(h)),
            ChainError::DuplicateHeader(h) => write!(f, "Duplicate header {}", hex::encode(h)),
            ChainError::UnknownBlock(h) => write!(f, "Unknown block {}", hex::encode(h)),
            ChainError::MissingBlockData(h) => write!(f, "Block data missing for {}", hex::encode(h)),
            ChainError::InvalidBlock { hash, reason } => {
                write!(f, "Invalid block {}: {}", hex::encode(hash), reason)
            }
            ChainError::InvalidAncestor(h) => write!(f, "Block descends from invalid block {}", hex::encode(h)),
            ChainError::Transaction(e) => write!(f, "Invalid transaction: {}", e),
            ChainError::Stake(e) => write!(f, "Invalid proof of stake: {}", e),
            ChainError::BadProofOfWork => write!(f, "Invalid proof of work"),
            ChainError::BadHeight { expected, found } => {
                write!(f, "Invalid block height. Expected {}, but got {}", expected, found)
            }
            ChainError::TimestampTooEarly { timestamp, median } => {
                write!(f, "Block timestamp {} is not after median time past {}", timestamp, median)
            }
            ChainError::TimestampTooFar { timestamp, limit } => {
                write!(f, "Block timestamp {} is beyond the allowed future limit {}", timestamp, limit)
            }
            ChainError::DifficultyTooLow { found, minimum } => {
                write!(f, "Difficulty {} is below the minimum {}", found, minimum)
            }
            ChainError::CheckpointMismatch { height } => write!(f, "Block at height {} contradicts a checkpoint", height),
            ChainError::ModifierChecksumMismatch { height } => {
                write!(f, "Stake modifier checksum at height {} contradicts a checkpoint", height)
            }
            ChainError::ExcessiveMint { minted, allowed } => {
                write!(f, "Minting transaction creates {} but only {} is allowed", minted, allowed)
            }
            ChainError::NotExtendingTip { tip, parent } => write!(
                f,
                "Block parent {} does not extend tip {}",
                hex::encode(parent),
                hex::encode(tip)
            ),
            ChainError::ReorgFailed { failed_block, reason } => write!(
                f,
                "Reorganization failed at block {}: {}; previous tip restored",
                hex::encode(failed_block),
                reason
            ),
            ChainError::Custody(e) => write!(f, "Wallet error: {}", e),
            ChainError::InsufficientFunds { needed, available } => {
                write!(f, "Insufficient funds: need {}, have {}", needed, available)
            }
            ChainError::Cancelled => write!(f, "Operation cancelled"),
            ChainError::DatabaseError(msg) => write!(f, "Database error: {}", msg),
            ChainError::Persistence(msg) => write!(
                f,
                "Persistence failure: {}. The node cannot continue safely; check disk space and permissions, then restart",
                msg
            ),
            ChainError::CorruptLedger(msg) => write!(
                f,
                "Ledger database is corrupt ({}). Restore it from a backup or delete it and resynchronize",
                msg
            ),
            ChainError::Config(msg) => write!(f, "Configuration error: {}", msg),
            ChainError::IoError(msg) => write!(f, "IO error: {}", msg),
        }
    }
}

impl std::error::Error for ChainError {}

impl From<TxError> for ChainError {
    fn from(err: TxError) -> Self {
        ChainError::Transaction(err)
    }
}

impl From<StakeError> for ChainError {
    fn from(err: StakeError) -> Self {
        ChainError::Stake(err)
    }
}

impl From<KeyStoreError> for ChainError {
    fn from(err: KeyStoreError) -> Self {
        ChainError::Custody(err)
    }
}

impl From<std::io::Error> for ChainError {
    fn from(err: std::io::Error) -> Self {
        ChainError::IoError(err.to_string())
    }
}

impl From<Box<bincode::ErrorKind>> for ChainError {
    fn from(err: Box<bincode::ErrorKind>) -> Self {
        ChainError::Malformed(format!("undecodable payload: {}", err))
    }
}

/// Why a submitted block or transaction was turned away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub class: ErrorClass,
    pub reason: ChainError,
    /// Set for consensus failures so the network layer can score the sender.
    pub penalize: bool,
}

impl Rejection {
    pub fn from_error(reason: ChainError) -> Self {
        let class = reason.class();
        Rejection {
            class,
            penalize: class == ErrorClass::Consensus,
            reason,
        }
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}: {}", self.class, self.reason)
    }
}

/// Outcome of a submission: validation failures are values, not errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict<T> {
    Accepted(T),
    Rejected(Rejection),
}

impl<T> Verdict<T> {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Verdict::Accepted(_))
    }

    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            Verdict::Rejected(r) => Some(r),
            Verdict::Accepted(_) => None,
        }
    }
}

/// Convenience alias used across the crate
pub type Result<T> = std::result::Result<T, ChainError>;
