//! Transactions: types, identity and validation against a UTXO snapshot

pub mod types;
pub mod validation;

pub use types::*;
pub use validation::{validate, UtxoView, ValidationContext};
