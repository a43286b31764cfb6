//! Hard checkpoints for block hashes and stake-modifier checksums

use crate::blockchain::Sha256Hash;
use crate::config::ConsensusConfig;
use crate::error::ChainError;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Checkpoints {
    blocks: BTreeMap<u64, Sha256Hash>,
    modifiers: BTreeMap<u64, u32>,
}

impl Checkpoints {
    pub fn from_config(config: &ConsensusConfig) -> Result<Self, ChainError> {
        let mut blocks = BTreeMap::new();
        for checkpoint in &config.checkpoints {
            let bytes = hex::decode(&checkpoint.hash)
                .map_err(|e| ChainError::Config(format!("bad checkpoint hash: {}", e)))?;
            let hash: Sha256Hash = bytes.try_into().map_err(|_| {
                ChainError::Config(format!("checkpoint at {} is not 32 bytes", checkpoint.height))
            })?;
            blocks.insert(checkpoint.height, hash);
        }
        let modifiers = config
            .modifier_checkpoints
            .iter()
            .map(|c| (c.height, c.checksum))
            .collect();
        Ok(Checkpoints { blocks, modifiers })
    }

    pub fn add_block(&mut self, height: u64, hash: Sha256Hash) {
        self.blocks.insert(height, hash);
    }

    pub fn add_modifier(&mut self, height: u64, checksum: u32) {
        self.modifiers.insert(height, checksum);
    }

    /// False only when a checkpoint exists at `height` and names another block.
    pub fn check_block(&self, height: u64, hash: &Sha256Hash) -> bool {
        self.blocks.get(&height).map_or(true, |expected| expected == hash)
    }

    pub fn check_modifier(&self, height: u64, checksum: u32) -> bool {
        self.modifiers
            .get(&height)
            .map_or(true, |expected| *expected == checksum)
    }

    pub fn last_checkpoint_height(&self) -> Option<u64> {
        self.blocks.keys().next_back().copied()
    }
}
