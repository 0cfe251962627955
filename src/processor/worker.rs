//! Per-height processing: fetch the block and its transactions, persist them,
//! hand the written transactions to the publisher, then upsert the header.

use super::backoff::{retry_with_policy, RetryCancelled, RetryPolicy};
use crate::error::IngestError;
use crate::model::{unix_millis_now, BlockHeight, BlockRecord, TransactionRecord, TxStatus};
use crate::publisher::EventPublisher;
use crate::rpc::{ChainLink, FullBlock};
use crate::runtime::telemetry::Telemetry;
use crate::storage::{BatchWriteReport, BlockStore, WriteFailure};
use anyhow::Result;
use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy)]
pub struct WorkerSettings {
    pub include_receipts: bool,
    pub retry: RetryPolicy,
    pub batch_size: usize,
    pub use_upsert: bool,
    pub upsert_fallback: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockOutcome {
    /// Header stored; transaction counts describe this attempt only.
    Processed {
        written: usize,
        failed: usize,
        published: usize,
    },
    /// Fetch or header write exhausted its retries; the height was dropped.
    /// Transactions written before a failed header write are still published.
    Abandoned,
    Cancelled,
}

#[derive(Clone)]
pub struct BlockWorker {
    chain: Arc<dyn ChainLink>,
    store: Arc<dyn BlockStore>,
    publisher: EventPublisher,
    telemetry: Arc<Telemetry>,
    settings: WorkerSettings,
}

impl BlockWorker {
    pub fn new(
        chain: Arc<dyn ChainLink>,
        store: Arc<dyn BlockStore>,
        publisher: EventPublisher,
        telemetry: Arc<Telemetry>,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            chain,
            store,
            publisher,
            telemetry,
            settings,
        }
    }

    /// `abort` interrupts retries and backoff; in-flight I/O is not cancelled.
    pub async fn process(&self, height: BlockHeight, abort: &CancellationToken) -> BlockOutcome {
        self.telemetry.record_block_attempt();

        let FullBlock {
            block,
            transactions,
        } = match self.fetch(height, abort).await {
            Ok(fetched) => fetched,
            Err(err) if err.downcast_ref::<RetryCancelled>().is_some() => {
                return BlockOutcome::Cancelled
            }
            Err(err) => {
                let err = IngestError::Fetch {
                    height,
                    reason: format!("{err:#}"),
                };
                tracing::error!(height = %height, error = %err, "abandoning block after fetch retries");
                self.telemetry.record_block_failure();
                return BlockOutcome::Abandoned;
            }
        };

        let (written, failed) = self.persist_transactions(height, transactions, abort).await;
        // Stored transactions are published whatever happens to the header.
        let published = self.publish(height, &written).await;

        if let Err(err) = self.persist_block(&block, abort).await {
            if err.downcast_ref::<RetryCancelled>().is_some() {
                return BlockOutcome::Cancelled;
            }
            tracing::error!(
                height = %height,
                written = written.len(),
                published,
                error = %err,
                "abandoning block after header write retries"
            );
            self.telemetry.record_persist_failure();
            self.telemetry.record_block_failure();
            return BlockOutcome::Abandoned;
        }

        self.telemetry.record_block_processed(height);
        tracing::debug!(
            height = %height,
            hash = %block.hash,
            written = written.len(),
            failed,
            published,
            "block processed"
        );

        BlockOutcome::Processed {
            written: written.len(),
            failed,
            published,
        }
    }

    async fn fetch(&self, height: BlockHeight, abort: &CancellationToken) -> Result<FullBlock> {
        retry_with_policy(
            self.settings.retry,
            Some(abort),
            |_| {
                self.chain
                    .fetch_full_block(height, self.settings.include_receipts)
            },
            |attempt, delay, err, will_retry| {
                if will_retry {
                    self.telemetry.record_fetch_retry();
                    tracing::warn!(
                        height = %height,
                        attempt,
                        retry_in_ms = delay.as_millis() as u64,
                        error = %err,
                        "block fetch failed; retrying"
                    );
                }
            },
        )
        .await
    }

    /// Returns the records that were written and the number that were not.
    async fn persist_transactions(
        &self,
        height: BlockHeight,
        mut transactions: Vec<TransactionRecord>,
        abort: &CancellationToken,
    ) -> (Vec<TransactionRecord>, usize) {
        if transactions.is_empty() {
            return (Vec::new(), 0);
        }

        let processed_at = unix_millis_now();
        for record in transactions.iter_mut() {
            if record.status != TxStatus::Failed {
                record.mark_processed(processed_at);
            }
        }

        let mut report = BatchWriteReport::default();
        for chunk in transactions.chunks(self.settings.batch_size.max(1)) {
            match self.write_chunk(chunk.to_vec(), abort).await {
                Ok(chunk_report) => report.merge(chunk_report),
                Err(err) => {
                    if err.downcast_ref::<RetryCancelled>().is_none() {
                        tracing::error!(
                            height = %height,
                            count = chunk.len(),
                            error = %err,
                            "transaction batch write failed"
                        );
                        self.telemetry.record_persist_failure();
                    }
                    report.failures.extend(chunk.iter().map(|record| WriteFailure {
                        hash: record.hash.clone(),
                        reason: format!("{err:#}"),
                    }));
                }
            }
        }

        for failure in &report.failures {
            tracing::warn!(height = %height, tx = %failure.hash, reason = %failure.reason, "transaction not persisted");
        }

        let written_hashes: HashSet<&str> = report.written.iter().map(String::as_str).collect();
        let written: Vec<TransactionRecord> = transactions
            .iter()
            .filter(|record| written_hashes.contains(record.hash.as_str()))
            .cloned()
            .collect();
        let failed = transactions.len() - written.len();

        self.telemetry.record_transactions_written(written.len());
        self.telemetry.record_transactions_failed(failed);
        (written, failed)
    }

    async fn write_chunk(
        &self,
        chunk: Vec<TransactionRecord>,
        abort: &CancellationToken,
    ) -> Result<BatchWriteReport> {
        retry_with_policy(
            self.settings.retry,
            Some(abort),
            |_| {
                let chunk = chunk.clone();
                async move {
                    if self.settings.use_upsert {
                        self.upsert_chunk(chunk).await
                    } else {
                        self.insert_chunk(chunk).await
                    }
                }
            },
            |attempt, delay, err, will_retry| {
                if will_retry {
                    tracing::warn!(
                        attempt,
                        retry_in_ms = delay.as_millis() as u64,
                        error = %err,
                        "transaction write failed; retrying"
                    );
                }
            },
        )
        .await
    }

    async fn upsert_chunk(&self, chunk: Vec<TransactionRecord>) -> Result<BatchWriteReport> {
        let err = match self.store.upsert_transactions(chunk.clone()).await {
            Ok(report) => return Ok(report),
            Err(err) => err,
        };
        if !self.settings.upsert_fallback {
            return Err(err);
        }

        tracing::warn!(
            count = chunk.len(),
            error = %err,
            "batch upsert failed; falling back to per-transaction upserts"
        );
        let mut report = BatchWriteReport::default();
        for record in chunk {
            let hash = record.hash.clone();
            match self.store.upsert_transaction(record).await {
                Ok(()) => report.written.push(hash),
                Err(err) => report.failures.push(WriteFailure {
                    hash,
                    reason: format!("{err:#}"),
                }),
            }
        }
        Ok(report)
    }

    /// Ordered insert of the records not yet stored; existing hashes count
    /// as written.
    async fn insert_chunk(&self, chunk: Vec<TransactionRecord>) -> Result<BatchWriteReport> {
        let hashes = chunk.iter().map(|record| record.hash.clone()).collect();
        let existing = self.store.existing_transactions(hashes).await?;

        let (already_stored, fresh): (Vec<_>, Vec<_>) = chunk
            .into_iter()
            .partition(|record| existing.contains(&record.hash));
        if !already_stored.is_empty() {
            tracing::debug!(count = already_stored.len(), "skipping transactions already stored");
        }

        let mut report = if fresh.is_empty() {
            BatchWriteReport::default()
        } else {
            self.store.insert_transactions(fresh).await?
        };
        report
            .written
            .extend(already_stored.into_iter().map(|record| record.hash));
        Ok(report)
    }

    async fn persist_block(&self, block: &BlockRecord, abort: &CancellationToken) -> Result<()> {
        retry_with_policy(
            self.settings.retry,
            Some(abort),
            |_| self.store.upsert_block(block.clone()),
            |attempt, delay, err, will_retry| {
                if will_retry {
                    tracing::warn!(
                        height = %block.number,
                        attempt,
                        retry_in_ms = delay.as_millis() as u64,
                        error = %err,
                        "block header write failed; retrying"
                    );
                }
            },
        )
        .await
    }

    async fn publish(&self, height: BlockHeight, written: &[TransactionRecord]) -> usize {
        let publishable: Vec<TransactionRecord> = written
            .iter()
            .filter(|record| record.is_processed())
            .cloned()
            .collect();

        match self.publisher.publish_many(&publishable).await {
            Ok(delivered) => {
                self.telemetry.record_published(delivered);
                delivered
            }
            Err(IngestError::Publish { failed, total }) => {
                tracing::warn!(height = %height, failed, total, "some transaction events were not published");
                self.telemetry.record_published(total - failed);
                self.telemetry.record_publish_failures(failed);
                total - failed
            }
            Err(err) => {
                tracing::warn!(height = %height, error = %err, "transaction events not published");
                self.telemetry.record_publish_failures(publishable.len());
                0
            }
        }
    }
}
