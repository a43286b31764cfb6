/// Transaction types
use crate::amount::{checked_sum, Amount};
use crate::blockchain::Sha256Hash;
use crate::crypto::Address;
use crate::error::TxError;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Maximum transaction size in bytes (100KB) to prevent DoS
pub const MAX_TRANSACTION_SIZE: usize = 100_000;

/// Upper bound on keys in a bare multisig lock.
pub const MAX_MULTISIG_KEYS: usize = 16;

pub const TRANSACTION_VERSION: u32 = 1;

pub type TxId = Sha256Hash;

/// Reference to one output of a previous transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OutPoint {
    pub txid: TxId,
    pub index: u32,
}

impl OutPoint {
    pub fn new(txid: TxId, index: u32) -> Self {
        OutPoint { txid, index }
    }
}

impl fmt::Display for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", hex::encode(self.txid), self.index)
    }
}

/// Spending conditions. The set is closed: there is no script interpreter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LockCondition {
    PayToKey(Address),
    /// Bare m-of-n over key addresses.
    MultiSig { required: u8, keys: Vec<Address> },
}

impl LockCondition {
    pub fn pay_to(address: Address) -> Self {
        LockCondition::PayToKey(address)
    }

    /// The single owning address, if this is a pay-to-key lock.
    pub fn address(&self) -> Option<&Address> {
        match self {
            LockCondition::PayToKey(address) => Some(address),
            LockCondition::MultiSig { .. } => None,
        }
    }

    fn hash_into(&self, hasher: &mut Sha256) {
        match self {
            LockCondition::PayToKey(address) => {
                hasher.update([0u8]);
                hasher.update(address.as_bytes());
            }
            LockCondition::MultiSig { required, keys } => {
                hasher.update([1u8, *required]);
                hasher.update((keys.len() as u32).to_le_bytes());
                for key in keys {
                    hasher.update(key.as_bytes());
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    pub value: Amount,
    pub lock: LockCondition,
}

impl TxOutput {
    pub fn new(value: Amount, lock: LockCondition) -> Self {
        TxOutput { value, lock }
    }

    pub fn pay_to(address: Address, value: Amount) -> Self {
        TxOutput {
            value,
            lock: LockCondition::PayToKey(address),
        }
    }
}

/// One (public key, signature) pair of an unlock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeySignature {
    pub public_key: Vec<u8>,
    pub signature: Vec<u8>,
}

/// Data that satisfies a locking condition.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unlock {
    pub signatures: Vec<KeySignature>,
}

impl Unlock {
    pub fn single(public_key: Vec<u8>, signature: Vec<u8>) -> Self {
        Unlock {
            signatures: vec![KeySignature {
                public_key,
                signature,
            }],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxInput {
    pub previous_output: OutPoint,
    pub unlock: Unlock,
}

impl TxInput {
    pub fn new(previous_output: OutPoint) -> Self {
        TxInput {
            previous_output,
            unlock: Unlock::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxKind {
    Transfer,
    /// Work reward. The height makes every coinbase txid unique.
    Coinbase { height: u64 },
    /// Stake reward: spends the kernel and re-issues principal plus reward.
    Coinstake,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub version: u32,
    pub time: u64,
    pub kind: TxKind,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
    pub fee: Amount,
}

impl Transaction {
    pub fn transfer(time: u64, inputs: Vec<TxInput>, outputs: Vec<TxOutput>, fee: Amount) -> Self {
        Transaction {
            version: TRANSACTION_VERSION,
            time,
            kind: TxKind::Transfer,
            inputs,
            outputs,
            fee,
        }
    }

    pub fn coinbase(height: u64, time: u64, outputs: Vec<TxOutput>) -> Self {
        Transaction {
            version: TRANSACTION_VERSION,
            time,
            kind: TxKind::Coinbase { height },
            inputs: Vec::new(),
            outputs,
            fee: 0,
        }
    }

    pub fn coinstake(time: u64, inputs: Vec<TxInput>, outputs: Vec<TxOutput>) -> Self {
        Transaction {
            version: TRANSACTION_VERSION,
            time,
            kind: TxKind::Coinstake,
            inputs,
            outputs,
            fee: 0,
        }
    }

    pub fn is_coinbase(&self) -> bool {
        matches!(self.kind, TxKind::Coinbase { .. })
    }

    pub fn is_coinstake(&self) -> bool {
        self.kind == TxKind::Coinstake
    }

    /// Coinbase and coinstake create value; their limits are enforced per block.
    pub fn is_minting(&self) -> bool {
        self.is_coinbase() || self.is_coinstake()
    }

    /// Transaction identity: hash of every field including unlocks.
    pub fn txid(&self) -> TxId {
        let mut hasher = Sha256::new();
        self.hash_fields(&mut hasher, true);
        hasher.finalize().into()
    }

    pub fn txid_hex(&self) -> String {
        hex::encode(self.txid())
    }

    /// Message signed by input `input_index`: the transaction without unlocks,
    /// bound to the input position.
    pub fn signature_hash(&self, input_index: usize) -> Sha256Hash {
        let mut hasher = Sha256::new();
        hasher.update(b"sighash");
        self.hash_fields(&mut hasher, false);
        hasher.update((input_index as u64).to_le_bytes());
        hasher.finalize().into()
    }

    fn hash_fields(&self, hasher: &mut Sha256, include_unlocks: bool) {
        hasher.update(self.version.to_le_bytes());
        hasher.update(self.time.to_le_bytes());
        match self.kind {
            TxKind::Transfer => hasher.update([0u8]),
            TxKind::Coinbase { height } => {
                hasher.update([1u8]);
                hasher.update(height.to_le_bytes());
            }
            TxKind::Coinstake => hasher.update([2u8]),
        }
        hasher.update((self.inputs.len() as u32).to_le_bytes());
        for input in &self.inputs {
            hasher.update(input.previous_output.txid);
            hasher.update(input.previous_output.index.to_le_bytes());
            if include_unlocks {
                hasher.update((input.unlock.signatures.len() as u32).to_le_bytes());
                for sig in &input.unlock.signatures {
                    hasher.update((sig.public_key.len() as u32).to_le_bytes());
                    hasher.update(&sig.public_key);
                    hasher.update((sig.signature.len() as u32).to_le_bytes());
                    hasher.update(&sig.signature);
                }
            }
        }
        hasher.update((self.outputs.len() as u32).to_le_bytes());
        for output in &self.outputs {
            hasher.update(output.value.to_le_bytes());
            output.lock.hash_into(hasher);
        }
        hasher.update(self.fee.to_le_bytes());
    }

    /// Sum of output values, `None` if any value or the total is out of range.
    pub fn output_total(&self) -> Option<Amount> {
        checked_sum(self.outputs.iter().map(|o| o.value))
    }

    pub fn serialized_size(&self) -> usize {
        bincode::serialized_size(self).map_or(usize::MAX, |size| size as usize)
    }

    /// Validate transaction size to prevent DoS attacks
    pub fn validate_size(&self) -> Result<(), TxError> {
        let size = self.serialized_size();
        if size > MAX_TRANSACTION_SIZE {
            return Err(TxError::Malformed(format!(
                "transaction too large: {} bytes (max: {})",
                size, MAX_TRANSACTION_SIZE
            )));
        }
        Ok(())
    }

    pub fn outpoints(&self) -> impl Iterator<Item = (OutPoint, &TxOutput)> + '_ {
        let txid = self.txid();
        self.outputs
            .iter()
            .enumerate()
            .map(move |(index, output)| (OutPoint::new(txid, index as u32), output))
    }
}
