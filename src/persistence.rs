//! Database persistence layer for the ledger

use crate::blockchain::{Block, ChainTip, Sha256Hash, Utxo, UtxoSet};
use crate::config::PersistenceConfig;
use crate::error::{ChainError, ErrorClass};
use crate::transaction::OutPoint;
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tracing::warn;

/// Everything one chain mutation wrote, committed as a unit.
#[derive(Debug, Clone, Default)]
pub struct StateBatch<'a> {
    pub blocks: Vec<&'a Block>,
    pub tip: Option<ChainTip>,
    pub utxos_added: &'a [(OutPoint, Utxo)],
    pub utxos_removed: &'a [OutPoint],
}

/// Abstraction for persistence backends. Implementations must apply a
/// [`StateBatch`] atomically.
pub trait Persistence: Send + Sync {
    fn save_batch(&self, batch: &StateBatch<'_>) -> Result<(), ChainError>;
    /// Stored blocks in the order they were first saved.
    fn load_blocks(&self) -> Result<Vec<Block>, ChainError>;
    fn load_tip(&self) -> Result<Option<(Sha256Hash, u64)>, ChainError>;
    fn load_utxo_set(&self) -> Result<UtxoSet, ChainError>;
}

fn encode<T: serde::Serialize>(value: &T, what: &str) -> Result<Vec<u8>, ChainError> {
    bincode::serialize(value).map_err(|e| ChainError::DatabaseError(format!("Failed to serialize {}: {}", what, e)))
}

fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8], what: &str) -> Result<T, ChainError> {
    bincode::deserialize(bytes).map_err(|e| ChainError::CorruptLedger(format!("undecodable {}: {}", what, e)))
}

fn poisoned<T>(_: T) -> ChainError {
    ChainError::DatabaseError("Mutex poisoned".to_string())
}

pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn open(path: &str) -> Result<Self, ChainError> {
        if let Some(parent) = std::path::Path::new(path).parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)
            .map_err(|e| ChainError::DatabaseError(format!("Failed to open database: {}", e)))?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS blocks (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                hash BLOB NOT NULL UNIQUE,
                height INTEGER NOT NULL,
                data BLOB NOT NULL
            );
            CREATE TABLE IF NOT EXISTS utxo_set (
                outpoint BLOB PRIMARY KEY,
                data BLOB NOT NULL
            );
            CREATE TABLE IF NOT EXISTS metadata (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );",
        )
        .map_err(|e| ChainError::DatabaseError(format!("Failed to create tables: {}", e)))?;

        Ok(Database { conn: Mutex::new(conn) })
    }

    fn insert_block(conn: &Connection, block: &Block) -> Result<(), ChainError> {
        conn.execute(
            "INSERT OR IGNORE INTO blocks (hash, height, data) VALUES (?1, ?2, ?3)",
            params![
                block.hash().to_vec(),
                block.header.height as i64,
                encode(block, "block")?
            ],
        )
        .map_err(|e| ChainError::DatabaseError(format!("Failed to save block: {}", e)))?;
        Ok(())
    }
}

impl Persistence for Database {
    fn save_batch(&self, batch: &StateBatch<'_>) -> Result<(), ChainError> {
        let conn_guard = self.conn.lock().map_err(poisoned)?;
        let tx = conn_guard
            .unchecked_transaction()
            .map_err(|e| ChainError::DatabaseError(format!("Failed to start transaction: {}", e)))?;

        for block in &batch.blocks {
            Database::insert_block(&tx, block)?;
        }
        for outpoint in batch.utxos_removed {
            tx.execute(
                "DELETE FROM utxo_set WHERE outpoint = ?1",
                params![encode(outpoint, "outpoint")?],
            )
            .map_err(|e| ChainError::DatabaseError(format!("Failed to delete UTXO: {}", e)))?;
        }
        for (outpoint, utxo) in batch.utxos_added {
            tx.execute(
                "INSERT OR REPLACE INTO utxo_set (outpoint, data) VALUES (?1, ?2)",
                params![encode(outpoint, "outpoint")?, encode(utxo, "UTXO")?],
            )
            .map_err(|e| ChainError::DatabaseError(format!("Failed to save UTXO: {}", e)))?;
        }
        if let Some(tip) = &batch.tip {
            tx.execute(
                "INSERT OR REPLACE INTO metadata (key, value) VALUES ('tip_hash', ?1), ('tip_height', ?2)",
                params![hex::encode(tip.hash), tip.height.to_string()],
            )
            .map_err(|e| ChainError::DatabaseError(format!("Failed to save tip: {}", e)))?;
        }

        tx.commit()
            .map_err(|e| ChainError::DatabaseError(format!("Failed to commit transaction: {}", e)))?;
        Ok(())
    }

    fn load_blocks(&self) -> Result<Vec<Block>, ChainError> {
        let conn_guard = self.conn.lock().map_err(poisoned)?;
        let mut stmt = conn_guard
            .prepare("SELECT data FROM blocks ORDER BY seq ASC")
            .map_err(|e| ChainError::DatabaseError(format!("Failed to prepare query: {}", e)))?;
        let rows = stmt
            .query_map([], |row| row.get::<_, Vec<u8>>(0))
            .map_err(|e| ChainError::DatabaseError(format!("Failed to query blocks: {}", e)))?;

        let mut blocks = Vec::new();
        for row in rows {
            let data = row.map_err(|e| ChainError::DatabaseError(format!("Failed to load block: {}", e)))?;
            blocks.push(decode(&data, "block")?);
        }
        Ok(blocks)
    }

    fn load_tip(&self) -> Result<Option<(Sha256Hash, u64)>, ChainError> {
        let conn_guard = self.conn.lock().map_err(poisoned)?;
        let read = |key: &str| -> Result<Option<String>, ChainError> {
            conn_guard
                .query_row("SELECT value FROM metadata WHERE key = ?1", params![key], |row| row.get(0))
                .optional()
                .map_err(|e| ChainError::DatabaseError(format!("Failed to read {}: {}", key, e)))
        };
        let (hash, height) = match (read("tip_hash")?, read("tip_height")?) {
            (Some(hash), Some(height)) => (hash, height),
            (None, None) => return Ok(None),
            _ => return Err(ChainError::CorruptLedger("tip metadata is incomplete".to_string())),
        };
        let hash: Sha256Hash = hex::decode(&hash)
            .ok()
            .and_then(|b| b.try_into().ok())
            .ok_or_else(|| ChainError::CorruptLedger(format!("bad tip hash {}", hash)))?;
        let height = height
            .parse::<u64>()
            .map_err(|_| ChainError::CorruptLedger(format!("bad tip height {}", height)))?;
        Ok(Some((hash, height)))
    }

    fn load_utxo_set(&self) -> Result<UtxoSet, ChainError> {
        let conn_guard = self.conn.lock().map_err(poisoned)?;
        let mut stmt = conn_guard
            .prepare("SELECT outpoint, data FROM utxo_set")
            .map_err(|e| ChainError::DatabaseError(format!("Failed to prepare query: {}", e)))?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, Vec<u8>>(0)?, row.get::<_, Vec<u8>>(1)?)))
            .map_err(|e| ChainError::DatabaseError(format!("Failed to query UTXO set: {}", e)))?;

        let mut utxos = UtxoSet::new();
        for row in rows {
            let (outpoint, data) =
                row.map_err(|e| ChainError::DatabaseError(format!("Failed to read row: {}", e)))?;
            utxos.insert(decode(&outpoint, "outpoint")?, decode(&data, "UTXO")?);
        }
        Ok(utxos)
    }
}

/// Simple in-memory persistence implementation useful for tests and ephemeral runs.
#[derive(Clone, Default)]
pub struct InMemoryPersistence {
    blocks: Arc<Mutex<Vec<Block>>>,
    tip: Arc<Mutex<Option<(Sha256Hash, u64)>>>,
    utxos: Arc<Mutex<UtxoSet>>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Persistence for InMemoryPersistence {
    fn save_batch(&self, batch: &StateBatch<'_>) -> Result<(), ChainError> {
        let mut blocks = self.blocks.lock().map_err(poisoned)?;
        let mut tip = self.tip.lock().map_err(poisoned)?;
        let mut utxos = self.utxos.lock().map_err(poisoned)?;
        for block in &batch.blocks {
            let hash = block.hash();
            if !blocks.iter().any(|b| b.hash() == hash) {
                blocks.push((*block).clone());
            }
        }
        for outpoint in batch.utxos_removed {
            utxos.remove(outpoint);
        }
        for (outpoint, utxo) in batch.utxos_added {
            utxos.insert(*outpoint, utxo.clone());
        }
        if let Some(new_tip) = &batch.tip {
            *tip = Some((new_tip.hash, new_tip.height));
        }
        Ok(())
    }

    fn load_blocks(&self) -> Result<Vec<Block>, ChainError> {
        Ok(self.blocks.lock().map_err(poisoned)?.clone())
    }

    fn load_tip(&self) -> Result<Option<(Sha256Hash, u64)>, ChainError> {
        Ok(*self.tip.lock().map_err(poisoned)?)
    }

    fn load_utxo_set(&self) -> Result<UtxoSet, ChainError> {
        Ok(self.utxos.lock().map_err(poisoned)?.clone())
    }
}

/// Runs a write, retrying transient database failures with linear backoff.
/// Exhausting the attempts is fatal.
pub fn with_retry<T>(
    config: &PersistenceConfig,
    what: &str,
    mut op: impl FnMut() -> Result<T, ChainError>,
) -> Result<T, ChainError> {
    let attempts = config.max_write_attempts.max(1);
    let mut last_error = None;
    for attempt in 1..=attempts {
        match op() {
            Ok(value) => return Ok(value),
            Err(err) if err.class() == ErrorClass::Fatal => return Err(err),
            Err(err) => {
                warn!("{} failed (attempt {} of {}): {}", what, attempt, attempts, err);
                last_error = Some(err);
                if attempt < attempts {
                    thread::sleep(Duration::from_millis(config.retry_backoff_ms * attempt as u64));
                }
            }
        }
    }
    Err(ChainError::Persistence(format!(
        "{} failed after {} attempts: {}",
        what,
        attempts,
        last_error.map_or_else(|| "unknown error".to_string(), |e| e.to_string())
    )))
}
