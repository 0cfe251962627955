use super::BlockHeight;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Selects a block either by height or by hash.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BlockId {
    Number(BlockHeight),
    Hash(String),
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockId::Number(height) => write!(f, "#{height}"),
            BlockId::Hash(hash) => f.write_str(hash),
        }
    }
}

impl From<BlockHeight> for BlockId {
    fn from(height: BlockHeight) -> Self {
        BlockId::Number(height)
    }
}

/// Header data for one block. Unique by `number` and by `hash`; a redelivered
/// height overwrites the stored record instead of appending.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRecord {
    pub number: BlockHeight,
    pub hash: String,
    pub parent_hash: String,
    pub timestamp: u64,
    pub gas_used: u64,
    pub gas_limit: u64,
    pub transaction_hashes: Vec<String>,
    pub network: String,
}

impl BlockRecord {
    pub fn transaction_count(&self) -> usize {
        self.transaction_hashes.len()
    }
}
