//! Private key custody
//!
//! Keys are held either in plaintext (an unencrypted store) or sealed with
//! AES-256-GCM under a random master key. The master key is itself sealed
//! under a key derived from the passphrase with Argon2id. Unlocking keeps the
//! master key in memory until the session expires or the store is locked.

use crate::config::KdfConfig;
use crate::crypto::{Address, CompactSignature, KeyPair};
use crate::error::KeyStoreError;
use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use argon2::{Algorithm, Argon2, Params, Version};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use zeroize::{Zeroize, Zeroizing};

const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;
const KEYSTORE_VERSION: u32 = 1;

pub const PASSPHRASE_WARNING: &str = "Wallet encrypted. Remember your passphrase: if you lose it you lose \
access to your coins. Previous backups contain unencrypted keys and should be destroyed; the key pool has \
been regenerated, so back up the wallet file again.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnlockScope {
    Full,
    /// Only stake-kernel signing is allowed.
    StakingOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LockState {
    Unencrypted,
    Locked,
    Unlocked(UnlockScope),
}

/// Returned by [`KeyStore::encrypt`]; must be shown to the user.
#[must_use = "the passphrase warning must be shown to the user"]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PassphraseWarning {
    pub message: &'static str,
}

enum Secret {
    Plain(Zeroizing<[u8; KEY_LEN]>),
    Sealed {
        nonce: [u8; NONCE_LEN],
        ciphertext: Vec<u8>,
    },
}

struct KeyEntry {
    public_key: Vec<u8>,
    secret: Secret,
    created_at: i64,
}

struct MasterKeyRecord {
    salt: [u8; SALT_LEN],
    nonce: [u8; NONCE_LEN],
    sealed: Vec<u8>,
    kdf: KdfConfig,
}

struct UnlockedSession {
    master: Zeroizing<[u8; KEY_LEN]>,
    scope: UnlockScope,
    until: Option<Instant>,
}

impl UnlockedSession {
    fn expired(&self) -> bool {
        self.until.is_some_and(|deadline| Instant::now() >= deadline)
    }
}

fn random_bytes<const N: usize>() -> [u8; N] {
    let mut bytes = [0u8; N];
    OsRng.fill_bytes(&mut bytes);
    bytes
}

fn derive_key(
    passphrase: &str,
    salt: &[u8],
    kdf: &KdfConfig,
) -> Result<Zeroizing<[u8; KEY_LEN]>, KeyStoreError> {
    let params = Params::new(kdf.memory_kib, kdf.iterations, kdf.parallelism, Some(KEY_LEN))
        .map_err(|e| KeyStoreError::Crypto(format!("invalid key derivation parameters: {}", e)))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    argon2
        .hash_password_into(passphrase.as_bytes(), salt, key.as_mut_slice())
        .map_err(|e| KeyStoreError::Crypto(format!("key derivation failed: {}", e)))?;
    Ok(key)
}

fn seal(key: &[u8; KEY_LEN], plaintext: &[u8], aad: &[u8]) -> Result<([u8; NONCE_LEN], Vec<u8>), KeyStoreError> {
    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|_| KeyStoreError::Crypto("invalid cipher key".to_string()))?;
    let nonce_bytes = random_bytes::<NONCE_LEN>();
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce_bytes), Payload { msg: plaintext, aad })
        .map_err(|_| KeyStoreError::Crypto("encryption failed".to_string()))?;
    Ok((nonce_bytes, ciphertext))
}

/// Any authentication failure means the key was wrong.
fn unseal(key: &[u8; KEY_LEN], nonce: &[u8; NONCE_LEN], ciphertext: &[u8], aad: &[u8]) -> Result<Zeroizing<Vec<u8>>, KeyStoreError> {
    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|_| KeyStoreError::Crypto("invalid cipher key".to_string()))?;
    cipher
        .decrypt(Nonce::from_slice(nonce), Payload { msg: ciphertext, aad })
        .map(Zeroizing::new)
        .map_err(|_| KeyStoreError::WrongPassphrase)
}

fn to_secret(bytes: &[u8]) -> Result<Zeroizing<[u8; KEY_LEN]>, KeyStoreError> {
    if bytes.len() != KEY_LEN {
        return Err(KeyStoreError::Crypto("sealed secret has the wrong length".to_string()));
    }
    let mut secret = Zeroizing::new([0u8; KEY_LEN]);
    secret.copy_from_slice(bytes);
    Ok(secret)
}

pub struct KeyStore {
    keys: BTreeMap<Address, KeyEntry>,
    pool: VecDeque<Address>,
    pool_target: usize,
    kdf: KdfConfig,
    master: Option<MasterKeyRecord>,
    session: Option<UnlockedSession>,
    path: Option<PathBuf>,
}

impl KeyStore {
    /// An empty, unencrypted, in-memory store.
    pub fn new(kdf: KdfConfig, pool_target: usize) -> Self {
        KeyStore {
            keys: BTreeMap::new(),
            pool: VecDeque::new(),
            pool_target,
            kdf,
            master: None,
            session: None,
            path: None,
        }
    }

    /// Loads the store at `path`, creating an empty one if the file is absent.
    /// Every later mutation is written back to `path`.
    pub fn open(path: impl AsRef<Path>, kdf: KdfConfig, pool_target: usize) -> Result<Self, KeyStoreError> {
        let path = path.as_ref();
        let mut store = if path.exists() {
            let mut store = KeyStore::load(path)?;
            store.pool_target = pool_target;
            store
        } else {
            let mut store = KeyStore::new(kdf, pool_target);
            store.path = Some(path.to_path_buf());
            store.save()?;
            store
        };
        store.path = Some(path.to_path_buf());
        Ok(store)
    }

    pub fn is_encrypted(&self) -> bool {
        self.master.is_some()
    }

    fn active_session(&mut self) -> Option<&UnlockedSession> {
        if self.session.as_ref().is_some_and(UnlockedSession::expired) {
            self.session = None;
            info!("wallet unlock period elapsed, keys locked");
        }
        self.session.as_ref()
    }

    pub fn lock_state(&mut self) -> LockState {
        if !self.is_encrypted() {
            return LockState::Unencrypted;
        }
        match self.active_session() {
            Some(session) => LockState::Unlocked(session.scope),
            None => LockState::Locked,
        }
    }

    fn is_locked(&mut self) -> bool {
        self.lock_state() == LockState::Locked
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.keys.contains_key(address)
    }

    pub fn addresses(&self) -> Vec<Address> {
        self.keys.keys().copied().collect()
    }

    pub fn public_key(&self, address: &Address) -> Option<&[u8]> {
        self.keys.get(address).map(|k| k.public_key.as_slice())
    }

    pub fn keypool_size(&self) -> usize {
        self.pool.len()
    }

    fn master_key(&mut self) -> Result<Option<[u8; KEY_LEN]>, KeyStoreError> {
        if !self.is_encrypted() {
            return Ok(None);
        }
        match self.active_session() {
            Some(session) => Ok(Some(*session.master)),
            None => Err(KeyStoreError::KeyStoreLocked),
        }
    }

    fn insert_key(&mut self, keypair: &KeyPair) -> Result<Address, KeyStoreError> {
        let address = keypair.address();
        let public_key = keypair.public_key_bytes().to_vec();
        let mut secret_bytes = keypair.secret_bytes();
        let secret = match self.master_key()? {
            Some(mut master) => {
                let sealed = seal(&master, &secret_bytes, &public_key);
                master.zeroize();
                let (nonce, ciphertext) = sealed?;
                Secret::Sealed { nonce, ciphertext }
            }
            None => Secret::Plain(Zeroizing::new(secret_bytes)),
        };
        secret_bytes.zeroize();
        self.keys.insert(
            address,
            KeyEntry {
                public_key,
                secret,
                created_at: chrono::Utc::now().timestamp(),
            },
        );
        Ok(address)
    }

    /// Adds one fresh key directly to the store, bypassing the pool.
    pub fn generate_key(&mut self) -> Result<Address, KeyStoreError> {
        let address = self.insert_key(&KeyPair::generate())?;
        self.persist()?;
        Ok(address)
    }

    /// Refills the pool to its target size. Generates nothing while locked.
    pub fn top_up(&mut self) -> Result<usize, KeyStoreError> {
        if self.is_locked() {
            if self.pool.len() < self.pool_target {
                warn!(
                    "key pool below target ({} of {}) but the wallet is locked; unlock it to refill",
                    self.pool.len(),
                    self.pool_target
                );
            }
            return Ok(0);
        }
        let mut added = 0;
        while self.pool.len() < self.pool_target {
            let address = self.insert_key(&KeyPair::generate())?;
            self.pool.push_back(address);
            added += 1;
        }
        if added > 0 {
            debug!("key pool topped up with {} keys", added);
            self.persist()?;
        }
        Ok(added)
    }

    /// Withdraws the oldest pooled key.
    pub fn reserve_key(&mut self) -> Result<Address, KeyStoreError> {
        self.top_up()?;
        match self.pool.pop_front() {
            Some(address) => {
                self.persist()?;
                Ok(address)
            }
            None if self.is_locked() => Err(KeyStoreError::KeyPoolExhausted),
            None => self.generate_key(),
        }
    }

    /// Puts a reserved but unused key back at the front of the pool.
    pub fn return_key(&mut self, address: Address) -> Result<(), KeyStoreError> {
        if !self.keys.contains_key(&address) {
            return Err(KeyStoreError::UnknownKey(address));
        }
        if !self.pool.contains(&address) {
            self.pool.push_front(address);
            self.persist()?;
        }
        Ok(())
    }

    /// A receiving address taken from the pool.
    pub fn new_address(&mut self) -> Result<Address, KeyStoreError> {
        self.reserve_key()
    }

    /// Encrypts every key under a new passphrase and leaves the store locked.
    pub fn encrypt(&mut self, passphrase: &str) -> Result<PassphraseWarning, KeyStoreError> {
        if self.is_encrypted() {
            return Err(KeyStoreError::AlreadyEncrypted);
        }
        let master = Zeroizing::new(random_bytes::<KEY_LEN>());
        let salt = random_bytes::<SALT_LEN>();
        let derived = derive_key(passphrase, &salt, &self.kdf)?;
        let (nonce, sealed) = seal(&derived, master.as_slice(), &salt)?;

        let mut resealed = BTreeMap::new();
        for (address, entry) in &self.keys {
            if let Secret::Plain(secret) = &entry.secret {
                let (nonce, ciphertext) = seal(&master, secret.as_slice(), &entry.public_key)?;
                resealed.insert(*address, Secret::Sealed { nonce, ciphertext });
            }
        }
        for (address, secret) in resealed {
            if let Some(entry) = self.keys.get_mut(&address) {
                entry.secret = secret;
            }
        }
        self.master = Some(MasterKeyRecord {
            salt,
            nonce,
            sealed,
            kdf: self.kdf,
        });

        // Pool keys existed in plaintext before; replace them with fresh ones.
        self.pool.clear();
        self.session = Some(UnlockedSession {
            master,
            scope: UnlockScope::Full,
            until: None,
        });
        let refill = self.top_up();
        self.session = None;
        refill?;
        self.persist()?;

        warn!("{}", PASSPHRASE_WARNING);
        Ok(PassphraseWarning {
            message: PASSPHRASE_WARNING,
        })
    }

    fn open_master(&self, passphrase: &str) -> Result<Zeroizing<[u8; KEY_LEN]>, KeyStoreError> {
        let record = self.master.as_ref().ok_or(KeyStoreError::NotEncrypted)?;
        let derived = derive_key(passphrase, &record.salt, &record.kdf)?;
        let plain = unseal(&derived, &record.nonce, &record.sealed, &record.salt)?;
        to_secret(&plain).map_err(|_| KeyStoreError::WrongPassphrase)
    }

    fn unlock_with_scope(
        &mut self,
        passphrase: &str,
        timeout: Option<Duration>,
        scope: UnlockScope,
    ) -> Result<(), KeyStoreError> {
        let master = self.open_master(passphrase)?;
        // A master key that opens but does not match the keys is still wrong.
        if let Some((_, entry)) = self.keys.iter().next() {
            if let Secret::Sealed { nonce, ciphertext } = &entry.secret {
                let secret = unseal(&master, nonce, ciphertext, &entry.public_key)?;
                let keypair = KeyPair::from_secret_bytes(&secret).map_err(|_| KeyStoreError::WrongPassphrase)?;
                if keypair.public_key_bytes().as_slice() != entry.public_key.as_slice() {
                    return Err(KeyStoreError::WrongPassphrase);
                }
            }
        }
        self.session = Some(UnlockedSession {
            master,
            scope,
            until: timeout.map(|t| Instant::now() + t),
        });
        info!("wallet unlocked ({:?})", scope);
        if scope == UnlockScope::Full {
            self.top_up()?;
        }
        Ok(())
    }

    /// Unlocks for all operations, optionally relocking after `timeout`.
    pub fn unlock(&mut self, passphrase: &str, timeout: Option<Duration>) -> Result<(), KeyStoreError> {
        self.unlock_with_scope(passphrase, timeout, UnlockScope::Full)
    }

    /// Unlocks for stake signing only.
    pub fn unlock_for_staking(&mut self, passphrase: &str, timeout: Option<Duration>) -> Result<(), KeyStoreError> {
        self.unlock_with_scope(passphrase, timeout, UnlockScope::StakingOnly)
    }

    pub fn lock(&mut self) -> Result<(), KeyStoreError> {
        if !self.is_encrypted() {
            return Err(KeyStoreError::NotEncrypted);
        }
        self.session = None;
        info!("wallet locked");
        Ok(())
    }

    /// Reseals the master key under `new`; key material is untouched.
    pub fn change_passphrase(&mut self, old: &str, new: &str) -> Result<(), KeyStoreError> {
        let master = self.open_master(old)?;
        let salt = random_bytes::<SALT_LEN>();
        let derived = derive_key(new, &salt, &self.kdf)?;
        let (nonce, sealed) = seal(&derived, master.as_slice(), &salt)?;
        self.master = Some(MasterKeyRecord {
            salt,
            nonce,
            sealed,
            kdf: self.kdf,
        });
        self.persist()?;
        info!("wallet passphrase changed");
        Ok(())
    }

    fn keypair_for(&mut self, address: &Address, staking: bool) -> Result<KeyPair, KeyStoreError> {
        if !self.keys.contains_key(address) {
            return Err(KeyStoreError::UnknownKey(*address));
        }
        let scope = match self.lock_state() {
            LockState::Unencrypted => None,
            LockState::Locked => return Err(KeyStoreError::KeyStoreLocked),
            LockState::Unlocked(scope) => Some(scope),
        };
        if scope == Some(UnlockScope::StakingOnly) && !staking {
            return Err(KeyStoreError::StakingOnly);
        }
        let entry = self.keys.get(address).ok_or(KeyStoreError::UnknownKey(*address))?;
        let secret = match &entry.secret {
            Secret::Plain(secret) => secret.clone(),
            Secret::Sealed { nonce, ciphertext } => {
                let session = self.session.as_ref().ok_or(KeyStoreError::KeyStoreLocked)?;
                let plain = unseal(&session.master, nonce, ciphertext, &entry.public_key)
                    .map_err(|_| KeyStoreError::Crypto("stored key failed to decrypt".to_string()))?;
                to_secret(&plain)?
            }
        };
        KeyPair::from_secret_bytes(secret.as_slice()).map_err(|e| KeyStoreError::Crypto(e.to_string()))
    }

    /// Signs `message` with the key behind `address`. Requires a full unlock.
    pub fn sign(&mut self, address: &Address, message: &[u8]) -> Result<CompactSignature, KeyStoreError> {
        let keypair = self.keypair_for(address, false)?;
        keypair.sign(message).map_err(|e| KeyStoreError::Crypto(e.to_string()))
    }

    /// Signs a coinstake; also allowed under a staking-only unlock.
    pub fn sign_stake(&mut self, address: &Address, message: &[u8]) -> Result<CompactSignature, KeyStoreError> {
        let keypair = self.keypair_for(address, true)?;
        keypair.sign(message).map_err(|e| KeyStoreError::Crypto(e.to_string()))
    }

    fn persist(&self) -> Result<(), KeyStoreError> {
        if self.path.is_some() {
            self.save()?;
        }
        Ok(())
    }

    /// Writes the store as JSON. Plaintext secrets appear only when unencrypted.
    pub fn save(&self) -> Result<(), KeyStoreError> {
        let path = self
            .path
            .as_ref()
            .ok_or_else(|| KeyStoreError::Io("key store has no file path".to_string()))?;
        let file = KeyStoreFile::from_store(self);
        let json = Zeroizing::new(
            serde_json::to_string_pretty(&file).map_err(|e| KeyStoreError::Io(e.to_string()))?,
        );
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| KeyStoreError::Io(e.to_string()))?;
        }
        fs::write(path, json.as_bytes()).map_err(|e| KeyStoreError::Io(format!("{}: {}", path.display(), e)))
    }

    /// Reads a store written by [`KeyStore::save`]. The result is locked.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, KeyStoreError> {
        let path = path.as_ref();
        let json = Zeroizing::new(
            fs::read_to_string(path).map_err(|e| KeyStoreError::Io(format!("{}: {}", path.display(), e)))?,
        );
        let file: KeyStoreFile = serde_json::from_str(&json).map_err(|e| KeyStoreError::Io(e.to_string()))?;
        let mut store = file.into_store()?;
        store.path = Some(path.to_path_buf());
        Ok(store)
    }
}

// ----------------------------------------------------------------------------
// File format
// ----------------------------------------------------------------------------

#[derive(Serialize, Deserialize)]
struct MasterKeyFile {
    salt: String,
    nonce: String,
    sealed: String,
    kdf: KdfConfig,
}

#[derive(Serialize, Deserialize)]
struct KeyFileEntry {
    address: String,
    public_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    secret: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    nonce: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    ciphertext: Option<String>,
    created_at: i64,
}

#[derive(Serialize, Deserialize)]
struct KeyStoreFile {
    version: u32,
    kdf: KdfConfig,
    pool_target: usize,
    #[serde(default)]
    master: Option<MasterKeyFile>,
    keys: Vec<KeyFileEntry>,
    pool: Vec<String>,
}

impl Drop for KeyFileEntry {
    fn drop(&mut self) {
        if let Some(secret) = self.secret.as_mut() {
            secret.zeroize();
        }
    }
}

fn decode_array<const N: usize>(field: &str, value: &str) -> Result<[u8; N], KeyStoreError> {
    hex::decode(value)
        .ok()
        .and_then(|bytes| bytes.try_into().ok())
        .ok_or_else(|| KeyStoreError::Io(format!("key store field {} is malformed", field)))
}

impl KeyStoreFile {
    fn from_store(store: &KeyStore) -> Self {
        let keys = store
            .keys
            .iter()
            .map(|(address, entry)| {
                let (secret, nonce, ciphertext) = match &entry.secret {
                    Secret::Plain(secret) => (Some(hex::encode(secret.as_slice())), None, None),
                    Secret::Sealed { nonce, ciphertext } => {
                        (None, Some(hex::encode(nonce)), Some(hex::encode(ciphertext)))
                    }
                };
                KeyFileEntry {
                    address: address.to_hex(),
                    public_key: hex::encode(&entry.public_key),
                    secret,
                    nonce,
                    ciphertext,
                    created_at: entry.created_at,
                }
            })
            .collect();
        KeyStoreFile {
            version: KEYSTORE_VERSION,
            kdf: store.kdf,
            pool_target: store.pool_target,
            master: store.master.as_ref().map(|m| MasterKeyFile {
                salt: hex::encode(m.salt),
                nonce: hex::encode(m.nonce),
                sealed: hex::encode(&m.sealed),
                kdf: m.kdf,
            }),
            keys,
            pool: store.pool.iter().map(Address::to_hex).collect(),
        }
    }

    fn into_store(self) -> Result<KeyStore, KeyStoreError> {
        if self.version != KEYSTORE_VERSION {
            return Err(KeyStoreError::Io(format!("unsupported key store version {}", self.version)));
        }
        let master = match &self.master {
            Some(m) => Some(MasterKeyRecord {
                salt: decode_array("salt", &m.salt)?,
                nonce: decode_array("nonce", &m.nonce)?,
                sealed: hex::decode(&m.sealed).map_err(|e| KeyStoreError::Io(e.to_string()))?,
                kdf: m.kdf,
            }),
            None => None,
        };

        let mut keys = BTreeMap::new();
        for entry in &self.keys {
            let address = Address::from_hex(&entry.address).map_err(|e| KeyStoreError::Io(e.to_string()))?;
            let public_key = hex::decode(&entry.public_key).map_err(|e| KeyStoreError::Io(e.to_string()))?;
            if Address::from_public_key_bytes(&public_key) != address {
                return Err(KeyStoreError::Io(format!("key {} does not match its address", entry.address)));
            }
            let secret = match (&entry.secret, &entry.nonce, &entry.ciphertext) {
                (Some(secret), None, None) if master.is_none() => {
                    let bytes = Zeroizing::new(hex::decode(secret).map_err(|e| KeyStoreError::Io(e.to_string()))?);
                    Secret::Plain(to_secret(&bytes)?)
                }
                (None, Some(nonce), Some(ciphertext)) if master.is_some() => Secret::Sealed {
                    nonce: decode_array("nonce", nonce)?,
                    ciphertext: hex::decode(ciphertext).map_err(|e| KeyStoreError::Io(e.to_string()))?,
                },
                _ => {
                    return Err(KeyStoreError::Io(format!(
                        "key {} has secret material inconsistent with the encryption state",
                        entry.address
                    )))
                }
            };
            keys.insert(
                address,
                KeyEntry {
                    public_key,
                    secret,
                    created_at: entry.created_at,
                },
            );
        }

        let mut pool = VecDeque::with_capacity(self.pool.len());
        for hex_address in &self.pool {
            let address = Address::from_hex(hex_address).map_err(|e| KeyStoreError::Io(e.to_string()))?;
            if keys.contains_key(&address) {
                pool.push_back(address);
            }
        }

        Ok(KeyStore {
            keys,
            pool,
            pool_target: self.pool_target,
            kdf: self.kdf,
            master,
            session: None,
            path: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_kdf() -> KdfConfig {
        KdfConfig {
            memory_kib: 64,
            iterations: 1,
            parallelism: 1,
        }
    }

    #[test]
    fn test_pool_tops_up_and_reserves_oldest() {
        let mut store = KeyStore::new(fast_kdf(), 3);
        assert_eq!(store.top_up().unwrap(), 3);
        let first = store.pool[0];
        assert_eq!(store.reserve_key().unwrap(), first);
        assert_eq!(store.keypool_size(), 2);
        store.return_key(first).unwrap();
        assert_eq!(store.reserve_key().unwrap(), first);
    }

    #[test]
    fn test_locked_store_refuses_to_sign() {
        let mut store = KeyStore::new(fast_kdf(), 1);
        let address = store.generate_key().unwrap();
        let _ = store.encrypt("pass").unwrap();
        assert_eq!(store.lock_state(), LockState::Locked);
        assert_eq!(store.sign(&address, b"m"), Err(KeyStoreError::KeyStoreLocked));
        assert_eq!(store.sign(&Address([0; 32]), b"m"), Err(KeyStoreError::UnknownKey(Address([0; 32]))));
    }

    #[test]
    fn test_unlock_expires() {
        let mut store = KeyStore::new(fast_kdf(), 0);
        store.generate_key().unwrap();
        let _ = store.encrypt("pass").unwrap();
        store.unlock("pass", Some(Duration::from_millis(0))).unwrap();
        assert_eq!(store.lock_state(), LockState::Locked);
    }

    #[test]
    fn test_lock_requires_encryption() {
        let mut store = KeyStore::new(fast_kdf(), 0);
        assert_eq!(store.lock(), Err(KeyStoreError::NotEncrypted));
        assert_eq!(store.lock_state(), LockState::Unencrypted);
        let _ = store.encrypt("a").unwrap();
        assert_eq!(store.encrypt("b"), Err(KeyStoreError::AlreadyEncrypted));
    }

    #[test]
    fn test_change_passphrase() {
        let mut store = KeyStore::new(fast_kdf(), 0);
        let address = store.generate_key().unwrap();
        let _ = store.encrypt("old").unwrap();
        assert_eq!(store.change_passphrase("wrong", "new"), Err(KeyStoreError::WrongPassphrase));
        store.change_passphrase("old", "new").unwrap();
        assert_eq!(store.unlock("old", None), Err(KeyStoreError::WrongPassphrase));
        store.unlock("new", None).unwrap();
        assert!(store.sign(&address, b"m").is_ok());
    }
}
