use crate::model::{unix_millis_now, BlockHeight, TransactionRecord};
use serde::{Deserialize, Serialize};

/// Minimal projection of a stored transaction sent to the outbound stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionEvent {
    pub hash: String,
    pub from: String,
    pub to: Option<String>,
    pub value: String,
    pub block_hash: String,
    pub block_number: BlockHeight,
    pub network: String,
    /// Wall-clock publish time, milliseconds since the Unix epoch.
    pub published_at: u64,
}

impl TransactionEvent {
    pub fn from_record(record: &TransactionRecord) -> Self {
        Self::at(record, unix_millis_now())
    }

    pub fn at(record: &TransactionRecord, published_at: u64) -> Self {
        Self {
            hash: record.hash.clone(),
            from: record.from.clone(),
            to: record.to.clone(),
            value: record.value.clone(),
            block_hash: record.block_hash.clone(),
            block_number: record.block_number,
            network: record.network.clone(),
            published_at,
        }
    }

    /// Idempotency key used by the stream's dedup window.
    pub fn idempotency_key(&self) -> &str {
        &self.hash
    }
}
