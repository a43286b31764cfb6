//! Ledger notifications delivered over a broadcast channel

use crate::blockchain::Sha256Hash;
use crate::transaction::TxId;
use crate::wallet::LockState;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

/// Events buffered per subscriber before the slowest one starts lagging.
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxStatus {
    Pending,
    Confirmed { height: u64 },
    /// Evicted, conflicted or invalidated by a reorganization.
    Dropped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerEvent {
    NewBlock { height: u64, hash: Sha256Hash },
    TransactionStatusChanged { txid: TxId, status: TxStatus },
    WalletLockStateChanged(LockState),
}

#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<LedgerEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        EventBus { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LedgerEvent> {
        self.sender.subscribe()
    }

    /// Publishing never fails; with no subscribers the event is discarded.
    pub fn publish(&self, event: LedgerEvent) {
        if self.sender.send(event).is_err() {
            debug!("no event subscribers");
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        EventBus::new(EVENT_CHANNEL_CAPACITY)
    }
}
