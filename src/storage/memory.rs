//! In-process [`BlockStore`] enforcing the same uniqueness rules as a real
//! backend: one transaction per hash, one block per number and per hash.

use super::{BatchWriteReport, BlockStore, WriteFailure};
use crate::error::IngestError;
use crate::model::{is_valid_hash, BlockHeight, BlockRecord, TransactionRecord};
use anyhow::Result;
use futures::future::{self, BoxFuture};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;

#[derive(Debug, Default)]
struct MemoryState {
    transactions: HashMap<String, TransactionRecord>,
    blocks: BTreeMap<BlockHeight, BlockRecord>,
    block_heights_by_hash: HashMap<String, BlockHeight>,
}

impl MemoryState {
    fn check_transaction(record: &TransactionRecord) -> std::result::Result<(), String> {
        if !is_valid_hash(&record.hash) {
            return Err(format!("malformed transaction hash {:?}", record.hash));
        }
        Ok(())
    }

    fn upsert_transaction(&mut self, record: TransactionRecord) -> std::result::Result<(), String> {
        Self::check_transaction(&record)?;
        self.transactions.insert(record.hash.clone(), record);
        Ok(())
    }

    fn insert_transaction(&mut self, record: TransactionRecord) -> std::result::Result<(), String> {
        Self::check_transaction(&record)?;
        if self.transactions.contains_key(&record.hash) {
            return Err(format!("duplicate key: transaction {} already stored", record.hash));
        }
        self.transactions.insert(record.hash.clone(), record);
        Ok(())
    }

    fn upsert_block(&mut self, block: BlockRecord) -> Result<()> {
        if !is_valid_hash(&block.hash) {
            return Err(IngestError::Persistence(format!(
                "malformed block hash {:?} at {}",
                block.hash, block.number
            ))
            .into());
        }
        if let Some(owner) = self.block_heights_by_hash.get(&block.hash) {
            if *owner != block.number {
                return Err(IngestError::Persistence(format!(
                    "block hash {} already stored at height {owner}",
                    block.hash
                ))
                .into());
            }
        }

        if let Some(previous) = self.blocks.get(&block.number) {
            if previous.hash != block.hash {
                tracing::info!(
                    height = %block.number,
                    previous = %previous.hash,
                    replacement = %block.hash,
                    "overwriting block header with a different hash"
                );
                self.block_heights_by_hash.remove(&previous.hash);
            }
        }

        self.block_heights_by_hash
            .insert(block.hash.clone(), block.number);
        self.blocks.insert(block.number, block);
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn transaction_count(&self) -> usize {
        self.lock_state().transactions.len()
    }

    pub fn block_count(&self) -> usize {
        self.lock_state().blocks.len()
    }

    pub fn get_transaction(&self, hash: &str) -> Option<TransactionRecord> {
        self.lock_state().transactions.get(hash).cloned()
    }

    pub fn get_block(&self, height: BlockHeight) -> Option<BlockRecord> {
        self.lock_state().blocks.get(&height).cloned()
    }

    /// Stored block heights, ascending.
    pub fn block_heights(&self) -> Vec<BlockHeight> {
        self.lock_state().blocks.keys().copied().collect()
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().expect("memory store mutex poisoned")
    }
}

impl BlockStore for MemoryStore {
    fn upsert_transactions(
        &self,
        transactions: Vec<TransactionRecord>,
    ) -> BoxFuture<'_, Result<BatchWriteReport>> {
        let mut state = self.lock_state();
        let mut report = BatchWriteReport::default();
        for record in transactions {
            let hash = record.hash.clone();
            match state.upsert_transaction(record) {
                Ok(()) => report.written.push(hash),
                Err(reason) => report.failures.push(WriteFailure { hash, reason }),
            }
        }
        Box::pin(future::ready(Ok(report)))
    }

    fn insert_transactions(
        &self,
        transactions: Vec<TransactionRecord>,
    ) -> BoxFuture<'_, Result<BatchWriteReport>> {
        let mut state = self.lock_state();
        let mut report = BatchWriteReport::default();
        let mut halted = false;
        for record in transactions {
            let hash = record.hash.clone();
            if halted {
                report.failures.push(WriteFailure {
                    hash,
                    reason: "not attempted after earlier failure in ordered insert".to_string(),
                });
                continue;
            }
            match state.insert_transaction(record) {
                Ok(()) => report.written.push(hash),
                Err(reason) => {
                    halted = true;
                    report.failures.push(WriteFailure { hash, reason });
                }
            }
        }
        Box::pin(future::ready(Ok(report)))
    }

    fn upsert_transaction(&self, transaction: TransactionRecord) -> BoxFuture<'_, Result<()>> {
        let outcome: Result<()> = self
            .lock_state()
            .upsert_transaction(transaction)
            .map_err(|reason| IngestError::Persistence(reason).into());
        Box::pin(future::ready(outcome))
    }

    fn upsert_block(&self, block: BlockRecord) -> BoxFuture<'_, Result<()>> {
        let outcome = self.lock_state().upsert_block(block);
        Box::pin(future::ready(outcome))
    }

    fn existing_transactions(&self, hashes: Vec<String>) -> BoxFuture<'_, Result<HashSet<String>>> {
        let state = self.lock_state();
        let existing: HashSet<String> = hashes
            .into_iter()
            .filter(|hash| state.transactions.contains_key(hash))
            .collect();
        Box::pin(future::ready(Ok(existing)))
    }

    fn transaction(&self, hash: String) -> BoxFuture<'_, Result<Option<TransactionRecord>>> {
        Box::pin(future::ready(Ok(self.get_transaction(&hash))))
    }

    fn block_by_number(&self, height: BlockHeight) -> BoxFuture<'_, Result<Option<BlockRecord>>> {
        Box::pin(future::ready(Ok(self.get_block(height))))
    }

    fn last_processed_height(&self) -> BoxFuture<'_, Result<Option<BlockHeight>>> {
        let last = self.lock_state().blocks.keys().next_back().copied();
        Box::pin(future::ready(Ok(last)))
    }
}
