//! Chain Link: the node-facing fetch contract and its JSON-RPC implementation.

pub mod client;
pub mod metrics;
pub mod options;
pub(crate) mod wire;

pub use client::{ChainRpcClient, RpcError};
pub use metrics::RpcMetricsSnapshot;
pub use options::RpcClientOptions;

use crate::model::{BlockHeight, BlockId, BlockRecord, TransactionRecord};
use anyhow::{bail, Result};
use futures::future::BoxFuture;

/// Header and transactions of one block, taken from the same node response
/// when the link supports it.
#[derive(Debug, Clone)]
pub struct FullBlock {
    pub block: BlockRecord,
    pub transactions: Vec<TransactionRecord>,
}

/// Fetch-side contract against the chain node. The push side lives in
/// [`crate::subscription`].
pub trait ChainLink: Send + Sync {
    fn latest_height(&self) -> BoxFuture<'_, Result<BlockHeight>>;

    /// Header and transaction hashes of one block.
    fn fetch_block(&self, block: BlockId) -> BoxFuture<'_, Result<BlockRecord>>;

    fn fetch_transactions(
        &self,
        height: BlockHeight,
        include_receipts: bool,
    ) -> BoxFuture<'_, Result<Vec<TransactionRecord>>>;

    /// Header plus transactions of the block at `height`. The default makes
    /// two calls and rejects transactions linked to a different header hash.
    fn fetch_full_block(
        &self,
        height: BlockHeight,
        include_receipts: bool,
    ) -> BoxFuture<'_, Result<FullBlock>> {
        Box::pin(async move {
            let block = self.fetch_block(BlockId::Number(height)).await?;
            let transactions = self.fetch_transactions(height, include_receipts).await?;
            if let Some(foreign) = transactions.iter().find(|tx| tx.block_hash != block.hash) {
                bail!(
                    "transaction {} belongs to {} but header at {height} is {}; block changed between fetches",
                    foreign.hash,
                    foreign.block_hash,
                    block.hash
                );
            }
            Ok(FullBlock {
                block,
                transactions,
            })
        })
    }
}
