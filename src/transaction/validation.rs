/// Validation of a single transaction against a UTXO snapshot
use crate::amount::{checked_sum, money_range, Amount};
use crate::blockchain::{Sha256Hash, Utxo};
use crate::crypto::{verify_signature, Address};
use crate::error::TxError;
use crate::transaction::types::{
    LockCondition, OutPoint, Transaction, TxKind, Unlock, MAX_MULTISIG_KEYS,
};
use rayon::prelude::*;
use std::collections::HashSet;

/// Read access to unspent outputs.
pub trait UtxoView {
    fn utxo(&self, outpoint: &OutPoint) -> Option<&Utxo>;

    /// True when the outpoint existed in this view but has been consumed.
    fn is_spent(&self, _outpoint: &OutPoint) -> bool {
        false
    }
}

/// Chain position a transaction is evaluated at. No wall clock is involved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidationContext {
    /// Height of the block the transaction's block would be built on.
    pub tip_height: u64,
    pub maturity: u64,
}

impl ValidationContext {
    pub fn new(tip_height: u64, maturity: u64) -> Self {
        ValidationContext {
            tip_height,
            maturity,
        }
    }

    /// Blocks connected on top of an output created at `height`.
    pub fn confirmations_on_top(&self, height: u64) -> u64 {
        self.tip_height.saturating_sub(height)
    }

    pub fn is_mature(&self, utxo: &Utxo) -> bool {
        !utxo.origin.is_minted() || self.confirmations_on_top(utxo.height) >= self.maturity
    }
}

/// A deferred signature check, run after all state checks pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureJob {
    pub input: usize,
    pub sighash: Sha256Hash,
    pub lock: LockCondition,
    pub unlock: Unlock,
}

impl SignatureJob {
    pub fn verify(&self) -> Result<(), TxError> {
        if unlock_satisfies(&self.lock, &self.unlock, &self.sighash) {
            Ok(())
        } else {
            Err(TxError::BadSignature { input: self.input })
        }
    }
}

/// Value summary of a transaction that passed input checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputCheck {
    pub input_total: Amount,
    pub output_total: Amount,
    pub signature_jobs: Vec<SignatureJob>,
}

/// Shape checks that need no chain state.
pub fn check_structure(tx: &Transaction) -> Result<(), TxError> {
    if tx.outputs.is_empty() {
        return Err(TxError::Malformed("transaction has no outputs".to_string()));
    }
    match tx.kind {
        TxKind::Transfer if tx.inputs.is_empty() => {
            return Err(TxError::Malformed("transfer has no inputs".to_string()));
        }
        TxKind::Coinbase { .. } if !tx.inputs.is_empty() => {
            return Err(TxError::Malformed("coinbase must not spend inputs".to_string()));
        }
        TxKind::Coinstake if tx.inputs.is_empty() => {
            return Err(TxError::Malformed("coinstake has no kernel input".to_string()));
        }
        _ => {}
    }
    if tx.fee < 0 {
        return Err(TxError::Malformed(format!("negative fee {}", tx.fee)));
    }
    if tx.is_minting() && tx.fee != 0 {
        return Err(TxError::Malformed("minting transaction declares a fee".to_string()));
    }
    if !money_range(tx.fee) {
        return Err(TxError::NegativeOrOverflowAmount);
    }
    if tx.outputs.iter().any(|o| !money_range(o.value)) || tx.output_total().is_none() {
        return Err(TxError::NegativeOrOverflowAmount);
    }
    for output in &tx.outputs {
        if let LockCondition::MultiSig { required, keys } = &output.lock {
            if *required == 0 || *required as usize > keys.len() || keys.len() > MAX_MULTISIG_KEYS {
                return Err(TxError::Malformed(format!(
                    "invalid {}-of-{} multisig lock",
                    required,
                    keys.len()
                )));
            }
        }
    }
    tx.validate_size()?;

    let mut seen = HashSet::with_capacity(tx.inputs.len());
    for input in &tx.inputs {
        if !seen.insert(input.previous_output) {
            return Err(TxError::AlreadySpent(input.previous_output));
        }
    }
    Ok(())
}

/// Structural, existence, maturity and amount checks. Signatures are returned
/// as jobs so a block can verify all of them in one parallel pass.
pub fn check_inputs<V: UtxoView + ?Sized>(
    tx: &Transaction,
    view: &V,
    ctx: &ValidationContext,
) -> Result<InputCheck, TxError> {
    check_structure(tx)?;

    let mut values = Vec::with_capacity(tx.inputs.len());
    let mut signature_jobs = Vec::with_capacity(tx.inputs.len());
    for (index, input) in tx.inputs.iter().enumerate() {
        let outpoint = input.previous_output;
        if view.is_spent(&outpoint) {
            return Err(TxError::AlreadySpent(outpoint));
        }
        let utxo = view
            .utxo(&outpoint)
            .ok_or(TxError::UnknownInput(outpoint))?;
        if !ctx.is_mature(utxo) {
            return Err(TxError::ImmatureSpend {
                outpoint,
                confirmations: ctx.confirmations_on_top(utxo.height),
                required: ctx.maturity,
            });
        }
        values.push(utxo.output.value);
        signature_jobs.push(SignatureJob {
            input: index,
            sighash: tx.signature_hash(index),
            lock: utxo.output.lock.clone(),
            unlock: input.unlock.clone(),
        });
    }

    let input_total = checked_sum(values).ok_or(TxError::NegativeOrOverflowAmount)?;
    let output_total = tx.output_total().ok_or(TxError::NegativeOrOverflowAmount)?;
    if !tx.is_minting() && input_total - tx.fee < output_total {
        return Err(TxError::InsufficientInput {
            inputs: input_total,
            outputs: output_total,
            fee: tx.fee,
        });
    }

    Ok(InputCheck {
        input_total,
        output_total,
        signature_jobs,
    })
}

/// Verifies signature jobs in parallel, reporting the lowest failing input.
pub fn verify_signature_jobs(jobs: &[SignatureJob]) -> Result<(), TxError> {
    let failure = jobs
        .par_iter()
        .filter_map(|job| job.verify().err().map(|e| (job.input, e)))
        .min_by_key(|(input, _)| *input);
    match failure {
        Some((_, err)) => Err(err),
        None => Ok(()),
    }
}

/// Full validation of one transaction. Deterministic.
pub fn validate<V: UtxoView + ?Sized>(
    tx: &Transaction,
    view: &V,
    ctx: &ValidationContext,
) -> Result<InputCheck, TxError> {
    let check = check_inputs(tx, view, ctx)?;
    verify_signature_jobs(&check.signature_jobs)?;
    Ok(check)
}

/// True when `unlock` carries valid signatures over `sighash` for `lock`.
pub fn unlock_satisfies(lock: &LockCondition, unlock: &Unlock, sighash: &Sha256Hash) -> bool {
    match lock {
        LockCondition::PayToKey(address) => match unlock.signatures.as_slice() {
            [sig] => {
                Address::from_public_key_bytes(&sig.public_key) == *address
                    && verify_signature(&sig.public_key, sighash, &sig.signature).is_ok()
            }
            _ => false,
        },
        LockCondition::MultiSig { required, keys } => {
            if unlock.signatures.len() > keys.len() {
                return false;
            }
            let mut used = HashSet::new();
            let mut valid = 0usize;
            for sig in &unlock.signatures {
                let address = Address::from_public_key_bytes(&sig.public_key);
                if !keys.contains(&address) || !used.insert(address) {
                    return false;
                }
                if verify_signature(&sig.public_key, sighash, &sig.signature).is_err() {
                    return false;
                }
                valid += 1;
            }
            valid >= *required as usize
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amount::COIN;
    use crate::blockchain::{UtxoOrigin, UtxoSet};
    use crate::crypto::KeyPair;
    use crate::transaction::types::{TxInput, TxOutput};

    fn funded_set(owner: &KeyPair, origin: UtxoOrigin, height: u64) -> (UtxoSet, OutPoint) {
        let mut set = UtxoSet::new();
        let outpoint = OutPoint::new([7u8; 32], 0);
        set.insert(
            outpoint,
            Utxo {
                output: TxOutput::pay_to(owner.address(), 10 * COIN),
                height,
                block_time: 1_000,
                origin,
            },
        );
        (set, outpoint)
    }

    fn signed_spend(owner: &KeyPair, outpoint: OutPoint, value: i64, fee: i64) -> Transaction {
        let recipient = KeyPair::generate().address();
        let mut tx = Transaction::transfer(
            5,
            vec![TxInput::new(outpoint)],
            vec![TxOutput::pay_to(recipient, value)],
            fee,
        );
        let signature = owner.sign(&tx.signature_hash(0)).unwrap();
        tx.inputs[0].unlock = Unlock::single(owner.public_key_bytes().to_vec(), signature.to_vec());
        tx
    }

    #[test]
    fn test_valid_transfer() {
        let owner = KeyPair::generate();
        let (set, outpoint) = funded_set(&owner, UtxoOrigin::Transfer, 1);
        let tx = signed_spend(&owner, outpoint, 9 * COIN, COIN);
        let check = validate(&tx, &set, &ValidationContext::new(1, 520)).unwrap();
        assert_eq!(check.input_total, 10 * COIN);
        assert_eq!(check.output_total, 9 * COIN);
    }

    #[test]
    fn test_unknown_input() {
        let owner = KeyPair::generate();
        let set = UtxoSet::new();
        let tx = signed_spend(&owner, OutPoint::new([1u8; 32], 3), COIN, 0);
        assert_eq!(
            validate(&tx, &set, &ValidationContext::new(1, 520)),
            Err(TxError::UnknownInput(OutPoint::new([1u8; 32], 3)))
        );
    }

    #[test]
    fn test_wrong_signer_is_bad_signature() {
        let owner = KeyPair::generate();
        let thief = KeyPair::generate();
        let (set, outpoint) = funded_set(&owner, UtxoOrigin::Transfer, 1);
        let tx = signed_spend(&thief, outpoint, COIN, 0);
        assert_eq!(
            validate(&tx, &set, &ValidationContext::new(1, 520)),
            Err(TxError::BadSignature { input: 0 })
        );
    }

    #[test]
    fn test_tampered_output_invalidates_signature() {
        let owner = KeyPair::generate();
        let (set, outpoint) = funded_set(&owner, UtxoOrigin::Transfer, 1);
        let mut tx = signed_spend(&owner, outpoint, COIN, 0);
        tx.outputs[0].value = 2 * COIN;
        assert_eq!(
            validate(&tx, &set, &ValidationContext::new(1, 520)),
            Err(TxError::BadSignature { input: 0 })
        );
    }

    #[test]
    fn test_immature_minted_output() {
        let owner = KeyPair::generate();
        let (set, outpoint) = funded_set(&owner, UtxoOrigin::Coinbase, 10);
        let tx = signed_spend(&owner, outpoint, COIN, 0);

        let err = validate(&tx, &set, &ValidationContext::new(529, 520)).unwrap_err();
        assert_eq!(
            err,
            TxError::ImmatureSpend {
                outpoint,
                confirmations: 519,
                required: 520
            }
        );
        assert!(validate(&tx, &set, &ValidationContext::new(530, 520)).is_ok());
    }

    #[test]
    fn test_insufficient_input() {
        let owner = KeyPair::generate();
        let (set, outpoint) = funded_set(&owner, UtxoOrigin::Transfer, 1);
        let tx = signed_spend(&owner, outpoint, 10 * COIN, 1);
        assert!(matches!(
            validate(&tx, &set, &ValidationContext::new(1, 520)),
            Err(TxError::InsufficientInput { .. })
        ));
    }

    #[test]
    fn test_duplicate_input_in_one_transaction() {
        let owner = KeyPair::generate();
        let (set, outpoint) = funded_set(&owner, UtxoOrigin::Transfer, 1);
        let mut tx = signed_spend(&owner, outpoint, COIN, 0);
        tx.inputs.push(tx.inputs[0].clone());
        assert_eq!(
            validate(&tx, &set, &ValidationContext::new(1, 520)),
            Err(TxError::AlreadySpent(outpoint))
        );
    }

    #[test]
    fn test_structural_failures() {
        let mut tx = Transaction::transfer(0, vec![], vec![TxOutput::pay_to(Address([1; 32]), 1)], 0);
        assert!(matches!(check_structure(&tx), Err(TxError::Malformed(_))));

        tx.inputs.push(TxInput::new(OutPoint::new([2; 32], 0)));
        tx.fee = -1;
        assert!(matches!(check_structure(&tx), Err(TxError::Malformed(_))));

        tx.fee = 0;
        tx.outputs[0].value = -5;
        assert_eq!(check_structure(&tx), Err(TxError::NegativeOrOverflowAmount));
    }

    #[test]
    fn test_multisig_two_of_three() {
        let keys: Vec<KeyPair> = (0..3).map(|_| KeyPair::generate()).collect();
        let lock = LockCondition::MultiSig {
            required: 2,
            keys: keys.iter().map(|k| k.address()).collect(),
        };
        let sighash = [9u8; 32];
        let sign = |k: &KeyPair| crate::transaction::KeySignature {
            public_key: k.public_key_bytes().to_vec(),
            signature: k.sign(&sighash).unwrap().to_vec(),
        };

        let two = Unlock {
            signatures: vec![sign(&keys[0]), sign(&keys[2])],
        };
        assert!(unlock_satisfies(&lock, &two, &sighash));

        let one = Unlock {
            signatures: vec![sign(&keys[1])],
        };
        assert!(!unlock_satisfies(&lock, &one, &sighash));

        let repeated = Unlock {
            signatures: vec![sign(&keys[0]), sign(&keys[0])],
        };
        assert!(!unlock_satisfies(&lock, &repeated, &sighash));
    }
}
