//! Persistence contract for blocks and transactions.

pub mod memory;

pub use memory::MemoryStore;

use crate::model::{BlockHeight, BlockRecord, TransactionRecord};
use anyhow::Result;
use futures::future::BoxFuture;
use std::collections::HashSet;

/// A single record the backend refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteFailure {
    pub hash: String,
    pub reason: String,
}

/// Per-item outcome of a batch write. A returned `Err` from the batch call
/// itself means the transport failed and nothing can be assumed written.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchWriteReport {
    pub written: Vec<String>,
    pub failures: Vec<WriteFailure>,
}

impl BatchWriteReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn merge(&mut self, other: BatchWriteReport) {
        self.written.extend(other.written);
        self.failures.extend(other.failures);
    }
}

pub trait BlockStore: Send + Sync {
    /// Unordered upsert keyed by hash; one bad record does not stop the rest.
    fn upsert_transactions(
        &self,
        transactions: Vec<TransactionRecord>,
    ) -> BoxFuture<'_, Result<BatchWriteReport>>;

    /// Ordered insert; stops at the first rejected record.
    fn insert_transactions(
        &self,
        transactions: Vec<TransactionRecord>,
    ) -> BoxFuture<'_, Result<BatchWriteReport>>;

    fn upsert_transaction(&self, transaction: TransactionRecord) -> BoxFuture<'_, Result<()>>;

    /// Upsert keyed by `number`; the hash must not belong to another height.
    fn upsert_block(&self, block: BlockRecord) -> BoxFuture<'_, Result<()>>;

    /// Subset of `hashes` already stored.
    fn existing_transactions(&self, hashes: Vec<String>) -> BoxFuture<'_, Result<HashSet<String>>>;

    fn transaction(&self, hash: String) -> BoxFuture<'_, Result<Option<TransactionRecord>>>;

    fn block_by_number(&self, height: BlockHeight) -> BoxFuture<'_, Result<Option<BlockRecord>>>;

    /// Highest stored block number, used to resume after a restart.
    fn last_processed_height(&self) -> BoxFuture<'_, Result<Option<BlockHeight>>>;
}
