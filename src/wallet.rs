//! Wallet: key custody, balance projection, transaction building and stake shaping

pub mod balance;
pub mod builder;
pub mod keystore;
pub mod staking;

pub use balance::{compute_balance, spendable_coins, Balance};
pub use builder::{build_transaction, FeePolicy, Recipient};
pub use keystore::{KeyStore, LockState, PassphraseWarning, UnlockScope};
pub use staking::{plan_coinstake, stakeable_coins, CoinstakePlan, StakePolicy, StakeableCoins};
