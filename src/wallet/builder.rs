use crate::amount::{checked_sum, money_range, Amount};
use crate::blockchain::Utxo;
use crate::crypto::Address;
use crate::error::ChainError;
use crate::transaction::{OutPoint, Transaction, TxInput, TxOutput, Unlock};
use crate::wallet::keystore::KeyStore;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Compressed public key plus compact signature, for size estimates.
const PLACEHOLDER_PUBLIC_KEY: [u8; 33] = [0u8; 33];
const PLACEHOLDER_SIGNATURE: [u8; 64] = [0u8; 64];
const MAX_FEE_ROUNDS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    pub address: Address,
    pub amount: Amount,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeePolicy {
    Fixed(Amount),
    /// Fee per started 1000 bytes of the signed transaction.
    PerKilobyte(Amount),
}

struct Draft {
    inputs: Vec<(OutPoint, Address)>,
    outputs: Vec<TxOutput>,
    change: Amount,
    fee: Amount,
}

/// Largest-first selection covering `target`.
fn select<'a>(
    coins: &'a [(OutPoint, Utxo)],
    target: Amount,
) -> Option<(Vec<&'a (OutPoint, Utxo)>, Amount)> {
    let mut selected = Vec::new();
    let mut total: Amount = 0;
    for coin in coins {
        if total >= target {
            break;
        }
        total = total.checked_add(coin.1.value())?;
        selected.push(coin);
    }
    (total >= target).then_some((selected, total))
}

fn make_draft(
    coins: &[(OutPoint, Utxo)],
    recipients: &[Recipient],
    payment: Amount,
    fee: Amount,
) -> Result<Draft, ChainError> {
    let needed = payment
        .checked_add(fee)
        .filter(|n| money_range(*n))
        .ok_or_else(|| ChainError::Malformed("payment plus fee is out of range".to_string()))?;
    let available: Amount = coins.iter().map(|(_, u)| u.value()).sum();
    let (selected, total) = select(coins, needed).ok_or(ChainError::InsufficientFunds { needed, available })?;

    let mut inputs = Vec::with_capacity(selected.len());
    for (outpoint, utxo) in selected {
        let owner = utxo
            .output
            .lock
            .address()
            .copied()
            .ok_or_else(|| ChainError::Malformed(format!("coin {} is not a single-key output", outpoint)))?;
        inputs.push((*outpoint, owner));
    }
    Ok(Draft {
        inputs,
        outputs: recipients.iter().map(|r| TxOutput::pay_to(r.address, r.amount)).collect(),
        change: total - needed,
        fee,
    })
}

fn assemble(draft: &Draft, change_address: Address, time: u64, placeholder: bool) -> Transaction {
    let inputs = draft
        .inputs
        .iter()
        .map(|(outpoint, _)| {
            let mut input = TxInput::new(*outpoint);
            if placeholder {
                input.unlock = Unlock::single(PLACEHOLDER_PUBLIC_KEY.to_vec(), PLACEHOLDER_SIGNATURE.to_vec());
            }
            input
        })
        .collect();
    let mut outputs = draft.outputs.clone();
    if draft.change > 0 {
        outputs.push(TxOutput::pay_to(change_address, draft.change));
    }
    Transaction::transfer(time, inputs, outputs, draft.fee)
}

/// Builds and signs a transfer paying `recipients` from `coins`, which must be
/// ordered largest first. Change goes to a fresh pool key.
pub fn build_transaction(
    keystore: &mut KeyStore,
    coins: &[(OutPoint, Utxo)],
    recipients: &[Recipient],
    fee_policy: FeePolicy,
    time: u64,
) -> Result<Transaction, ChainError> {
    if recipients.is_empty() {
        return Err(ChainError::Malformed("no recipients".to_string()));
    }
    if recipients.iter().any(|r| r.amount <= 0 || !money_range(r.amount)) {
        return Err(ChainError::Malformed("recipient amounts must be positive".to_string()));
    }
    let payment = checked_sum(recipients.iter().map(|r| r.amount))
        .ok_or_else(|| ChainError::Malformed("payment total overflows".to_string()))?;

    let draft = match fee_policy {
        FeePolicy::Fixed(fee) if fee < 0 => {
            return Err(ChainError::Malformed("fee must not be negative".to_string()));
        }
        FeePolicy::Fixed(fee) => make_draft(coins, recipients, payment, fee)?,
        FeePolicy::PerKilobyte(rate) => {
            let mut fee = 0;
            let mut current = make_draft(coins, recipients, payment, fee)?;
            for _ in 0..MAX_FEE_ROUNDS {
                let size = assemble(&current, Address([0; 32]), time, true).serialized_size() as i64;
                let required = rate.saturating_mul((size + 999) / 1000);
                if required <= fee {
                    break;
                }
                fee = required;
                current = make_draft(coins, recipients, payment, fee)?;
            }
            current
        }
    };

    let change_address = if draft.change > 0 {
        Some(keystore.reserve_key()?)
    } else {
        None
    };
    let mut tx = assemble(&draft, change_address.unwrap_or(Address([0; 32])), time, false);

    let signed = sign_inputs(keystore, &mut tx, &draft.inputs);
    if let Err(err) = signed {
        if let Some(address) = change_address {
            keystore.return_key(address)?;
        }
        return Err(err);
    }
    debug!(
        "built transaction {} with {} inputs, fee {}",
        tx.txid_hex(),
        tx.inputs.len(),
        tx.fee
    );
    Ok(tx)
}

fn sign_inputs(
    keystore: &mut KeyStore,
    tx: &mut Transaction,
    owners: &[(OutPoint, Address)],
) -> Result<(), ChainError> {
    for (index, (_, owner)) in owners.iter().enumerate() {
        let sighash = tx.signature_hash(index);
        let signature = keystore.sign(owner, &sighash)?;
        let public_key = keystore
            .public_key(owner)
            .ok_or(ChainError::Custody(crate::error::KeyStoreError::UnknownKey(*owner)))?
            .to_vec();
        tx.inputs[index].unlock = Unlock::single(public_key, signature.to_vec());
    }
    Ok(())
}
