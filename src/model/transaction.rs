use super::BlockHeight;
use serde::{Deserialize, Serialize};

/// Processing status of a stored transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxStatus {
    Pending,
    Processed,
    Failed,
}

/// One transaction, unique by `hash`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub hash: String,
    pub block_hash: String,
    pub block_number: BlockHeight,
    pub transaction_index: u64,
    pub from: String,
    pub to: Option<String>,
    /// Wei amount as the node reported it (hex quantity).
    pub value: String,
    pub gas: u64,
    pub gas_price: Option<u64>,
    pub gas_used: Option<u64>,
    pub receipt_status: Option<bool>,
    pub status: TxStatus,
    pub processed_at: Option<u64>,
    pub network: String,
}

impl TransactionRecord {
    /// Moves the record to `processed`, stamping the transition time.
    pub fn mark_processed(&mut self, at_millis: u64) {
        self.status = TxStatus::Processed;
        self.processed_at = Some(at_millis);
    }

    pub fn mark_failed(&mut self) {
        self.status = TxStatus::Failed;
        self.processed_at = None;
    }

    pub fn is_processed(&self) -> bool {
        self.status == TxStatus::Processed
    }
}
