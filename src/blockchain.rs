// Thin re-export module: the implementation lives in `blockchain/core` and is
// split by responsibility (blocks, header index, UTXO state, chain management).

pub mod core;
pub use core::*;
