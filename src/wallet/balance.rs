use crate::amount::Amount;
use crate::blockchain::{Utxo, UtxoOrigin, UtxoSet};
use crate::crypto::Address;
use crate::mempool::Mempool;
use crate::transaction::{OutPoint, ValidationContext};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Wallet funds split by spendability.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    /// Mature outputs not spent by a pending transaction.
    pub confirmed: Amount,
    /// Pending outputs paying the wallet.
    pub unconfirmed: Amount,
    /// Minted outputs still short of maturity.
    pub immature: Amount,
    /// Immature coinstake outputs returning a staked principal.
    pub staked: Amount,
}

impl Balance {
    pub fn total(&self) -> Amount {
        self.confirmed + self.unconfirmed + self.immature + self.staked
    }
}

fn owned_by(utxo: &Utxo, owned: &HashSet<Address>) -> bool {
    utxo.output.lock.address().is_some_and(|a| owned.contains(a))
}

pub fn compute_balance(
    utxos: &UtxoSet,
    mempool: &Mempool,
    owned: &HashSet<Address>,
    ctx: &ValidationContext,
) -> Balance {
    let mut balance = Balance::default();
    for (outpoint, utxo) in utxos.iter() {
        if !owned_by(utxo, owned) {
            continue;
        }
        if !ctx.is_mature(utxo) {
            match utxo.origin {
                UtxoOrigin::Coinstake { stake_return: true } => balance.staked += utxo.value(),
                _ => balance.immature += utxo.value(),
            }
        } else if mempool.spender(outpoint).is_none() {
            balance.confirmed += utxo.value();
        }
    }
    for tx in mempool.pending() {
        balance.unconfirmed += tx
            .outputs
            .iter()
            .filter(|o| o.lock.address().is_some_and(|a| owned.contains(a)))
            .map(|o| o.value)
            .sum::<Amount>();
    }
    balance
}

/// Mature, unreserved single-key coins of the wallet, largest first.
pub fn spendable_coins(
    utxos: &UtxoSet,
    mempool: &Mempool,
    owned: &HashSet<Address>,
    ctx: &ValidationContext,
) -> Vec<(OutPoint, Utxo)> {
    let mut coins: Vec<(OutPoint, Utxo)> = utxos
        .iter()
        .filter(|(outpoint, utxo)| {
            owned_by(utxo, owned) && ctx.is_mature(utxo) && mempool.spender(outpoint).is_none()
        })
        .map(|(outpoint, utxo)| (*outpoint, utxo.clone()))
        .collect();
    coins.sort_by(|a, b| b.1.value().cmp(&a.1.value()).then(a.0.cmp(&b.0)));
    coins
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amount::COIN;
    use crate::transaction::TxOutput;

    fn utxo(owner: Address, value: Amount, height: u64, origin: UtxoOrigin) -> Utxo {
        Utxo {
            output: TxOutput::pay_to(owner, value),
            height,
            block_time: 0,
            origin,
        }
    }

    #[test]
    fn test_balance_buckets() {
        let me = Address([1; 32]);
        let other = Address([2; 32]);
        let utxos: UtxoSet = vec![
            (OutPoint::new([1; 32], 0), utxo(me, 10 * COIN, 0, UtxoOrigin::Allocation)),
            (OutPoint::new([2; 32], 0), utxo(me, 3 * COIN, 9, UtxoOrigin::Coinbase)),
            (OutPoint::new([3; 32], 0), utxo(me, 7 * COIN, 9, UtxoOrigin::Coinstake { stake_return: true })),
            (OutPoint::new([3; 32], 1), utxo(me, COIN, 9, UtxoOrigin::Coinstake { stake_return: false })),
            (OutPoint::new([4; 32], 0), utxo(other, 99 * COIN, 0, UtxoOrigin::Transfer)),
        ]
        .into_iter()
        .collect();
        let owned: HashSet<Address> = [me].into_iter().collect();
        let ctx = ValidationContext::new(10, 5);

        let balance = compute_balance(&utxos, &Mempool::new(10), &owned, &ctx);
        assert_eq!(
            balance,
            Balance {
                confirmed: 10 * COIN,
                unconfirmed: 0,
                immature: 4 * COIN,
                staked: 7 * COIN,
            }
        );

        let later = ValidationContext::new(14, 5);
        let balance = compute_balance(&utxos, &Mempool::new(10), &owned, &later);
        assert_eq!(balance.confirmed, 21 * COIN);
        assert_eq!(balance.immature + balance.staked, 0);
        assert_eq!(spendable_coins(&utxos, &Mempool::new(10), &owned, &later)[0].1.value(), 10 * COIN);
    }
}
