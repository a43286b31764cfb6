//! StakeLedger - A proof-of-stake ledger validation and wallet custody engine
//!
//! # Architecture
//!
//! The crate is organized into logical modules:
//!
//! ## Core Ledger
//! - [`blockchain`] - Block index, fork choice, UTXO state and reorganization
//! - [`transaction`] - Transaction types and validation
//! - [`mempool`] - Pending transaction pool
//! - [`amount`] - Monetary units and range checks
//!
//! ## Consensus
//! - [`consensus`] - Stake kernels, stake modifiers, checkpoints and difficulty
//! - [`miner`] - Proof-of-work block production for development networks
//!
//! ## Cryptography
//! - [`crypto`] - Keys, addresses and signatures (secp256k1)
//!
//! ## State Management
//! - [`wallet`] - Encrypted key store, balances and transaction building
//! - [`persistence`] - Database layer (SQLite)
//!
//! ## Engine & Integration
//! - [`engine`] - The ledger engine tying chain, mempool and wallet together
//! - [`events`] - Broadcast notifications for subscribers
//!
//! ## Configuration & Utilities
//! - [`config`] - Configuration management
//! - [`error`] - Error types and rejection verdicts

#![forbid(unsafe_code)]

// ============================================================================
// Core Ledger
// ============================================================================
pub mod amount;
pub mod blockchain;
pub mod mempool;
pub mod transaction;

// ============================================================================
// Consensus & Mining
// ============================================================================
pub mod consensus;
pub mod miner;

// ============================================================================
// Cryptography
// ============================================================================
pub mod crypto;

// ============================================================================
// State Management
// ============================================================================
pub mod persistence;
pub mod wallet;

// ============================================================================
// Engine & Integration
// ============================================================================
pub mod engine;
pub mod events;

// ============================================================================
// Configuration & Utilities
// ============================================================================
pub mod config;
pub mod error;

pub use engine::{ImportSummary, LedgerEngine, VerifyReport};
pub use error::{ChainError, Rejection, Verdict};
