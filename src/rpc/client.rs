//! HTTP JSON-RPC client for Ethereum-compatible nodes. Houses the
//! `ChainRpcClient`, its error type, and the `ChainLink` implementation
//! consumed by the poll loop and the block workers.

use crate::model::{BlockHeight, BlockId, BlockRecord, TransactionRecord};
use crate::rpc::metrics::{RpcMetrics, RpcMetricsSnapshot};
use crate::rpc::options::RpcClientOptions;
use crate::rpc::wire::{RpcBlock, RpcReceipt};
use crate::rpc::{ChainLink, FullBlock};
use anyhow::{anyhow, bail, Context, Result};
use futures::future::BoxFuture;
use jsonrpsee::core::{
    client::{ClientT, Error as JsonRpcError},
    http_helpers::HttpError,
    params::{ArrayParams, BatchRequestBuilder},
};
use jsonrpsee::http_client::transport::Error as HttpTransportError;
use jsonrpsee::http_client::{HttpClient, HttpClientBuilder};
use jsonrpsee::rpc_params;
use jsonrpsee::types::ErrorObject;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use tokio::time::{timeout, Instant};

const BLOCK_NUMBER: &str = "eth_blockNumber";
const BLOCK_BY_NUMBER: &str = "eth_getBlockByNumber";
const BLOCK_BY_HASH: &str = "eth_getBlockByHash";
const TRANSACTION_RECEIPT: &str = "eth_getTransactionReceipt";

#[derive(Debug)]
pub enum RpcError {
    Timeout { method: &'static str },
    BlockNotFound { block: BlockId },
    ResponseTooLarge { method: &'static str },
}

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RpcError::Timeout { method } => write!(f, "rpc method {method} timed out"),
            RpcError::BlockNotFound { block } => write!(f, "block {block} is not known to the node"),
            RpcError::ResponseTooLarge { method } => {
                write!(f, "rpc {method} response exceeded HTTP size limits")
            }
        }
    }
}

impl std::error::Error for RpcError {}

#[derive(Debug, Clone)]
pub struct ChainRpcClient {
    rpc_url: Arc<String>,
    network: Arc<String>,
    client: HttpClient,
    options: RpcClientOptions,
    metrics: Arc<RpcMetrics>,
}

impl ChainLink for ChainRpcClient {
    fn latest_height(&self) -> BoxFuture<'_, Result<BlockHeight>> {
        Box::pin(self.latest_height())
    }

    fn fetch_block(&self, block: BlockId) -> BoxFuture<'_, Result<BlockRecord>> {
        Box::pin(async move { self.fetch_block(&block).await })
    }

    fn fetch_transactions(
        &self,
        height: BlockHeight,
        include_receipts: bool,
    ) -> BoxFuture<'_, Result<Vec<TransactionRecord>>> {
        Box::pin(self.fetch_transactions(height, include_receipts))
    }

    fn fetch_full_block(
        &self,
        height: BlockHeight,
        include_receipts: bool,
    ) -> BoxFuture<'_, Result<FullBlock>> {
        Box::pin(self.fetch_full_block(height, include_receipts))
    }
}

impl ChainRpcClient {
    pub fn new(url: impl Into<String>, network: impl Into<String>) -> Result<Self> {
        Self::with_options(url, network, RpcClientOptions::default())
    }

    pub fn with_options(
        url: impl Into<String>,
        network: impl Into<String>,
        options: RpcClientOptions,
    ) -> Result<Self> {
        options.validate()?;

        let rpc_url = url.into();
        let max_request_body_size = options.max_request_body_bytes.min(u32::MAX as usize) as u32;
        let max_response_body_size = options.max_response_body_bytes.min(u32::MAX as usize) as u32;

        let client = HttpClientBuilder::default()
            .request_timeout(options.request_timeout)
            .max_concurrent_requests(options.max_concurrent_requests)
            .max_request_size(max_request_body_size)
            .max_response_size(max_response_body_size)
            .build(&rpc_url)
            .map_err(|err| anyhow!("failed to build RPC client: {err}"))?;

        Ok(Self {
            rpc_url: Arc::new(rpc_url),
            network: Arc::new(network.into()),
            client,
            options,
            metrics: Arc::new(RpcMetrics::default()),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.rpc_url
    }

    pub fn network(&self) -> &str {
        &self.network
    }

    pub fn metrics(&self) -> RpcMetricsSnapshot {
        self.metrics.snapshot()
    }

    pub async fn latest_height(&self) -> Result<BlockHeight> {
        let raw: String = self.call(BLOCK_NUMBER, rpc_params![]).await?;
        let height = BlockHeight::parse(&raw).context("node returned a malformed block number")?;
        tracing::trace!(height = %height, "fetched latest height");
        Ok(height)
    }

    /// Header plus transaction hashes.
    pub async fn fetch_block(&self, block: &BlockId) -> Result<BlockRecord> {
        let rpc = self.fetch_rpc_block(block, false).await?;
        rpc.to_record(&self.network)
            .with_context(|| format!("malformed header for block {block}"))
    }

    /// Full transactions of the block at `height`, optionally enriched with
    /// receipts.
    pub async fn fetch_transactions(
        &self,
        height: BlockHeight,
        include_receipts: bool,
    ) -> Result<Vec<TransactionRecord>> {
        Ok(self.fetch_full_block(height, include_receipts).await?.transactions)
    }

    /// Header and transactions from one `eth_getBlockByNumber` call with full
    /// objects. A transaction whose receipt is missing or undecodable is
    /// returned marked failed rather than failing the whole block.
    pub async fn fetch_full_block(
        &self,
        height: BlockHeight,
        include_receipts: bool,
    ) -> Result<FullBlock> {
        let block_id = BlockId::Number(height);
        let rpc = self.fetch_rpc_block(&block_id, true).await?;
        let block = rpc
            .to_record(&self.network)
            .with_context(|| format!("malformed header for block {block_id}"))?;

        let mut transactions = Vec::new();
        for tx in rpc.into_transactions()? {
            let record = tx
                .to_record(&block)
                .with_context(|| format!("malformed transaction {} in block {height}", tx.hash))?;
            transactions.push(record);
        }

        if include_receipts && !transactions.is_empty() {
            self.attach_receipts(&mut transactions).await?;
        }

        Ok(FullBlock {
            block,
            transactions,
        })
    }

    async fn fetch_rpc_block(&self, block: &BlockId, full: bool) -> Result<RpcBlock> {
        let found: Option<RpcBlock> = match block {
            BlockId::Number(height) => {
                self.call(BLOCK_BY_NUMBER, rpc_params![height.to_quantity(), full])
                    .await?
            }
            BlockId::Hash(hash) => {
                self.call(BLOCK_BY_HASH, rpc_params![hash.as_str(), full])
                    .await?
            }
        };

        found.ok_or_else(|| {
            RpcError::BlockNotFound {
                block: block.clone(),
            }
            .into()
        })
    }

    async fn attach_receipts(&self, records: &mut [TransactionRecord]) -> Result<()> {
        let mut batch = BatchRequestBuilder::new();
        for record in records.iter() {
            batch
                .insert(TRANSACTION_RECEIPT, rpc_params![record.hash.as_str()])
                .context("failed to serialize eth_getTransactionReceipt params")?;
        }

        let start = Instant::now();
        let response = timeout(
            self.options.request_timeout,
            self.client.batch_request::<Value>(batch),
        )
        .await
        .map_err(|_| {
            self.metrics.record_timeout(start.elapsed());
            RpcError::Timeout {
                method: TRANSACTION_RECEIPT,
            }
        })?
        .map_err(|err| {
            self.metrics.record_failure(start.elapsed());
            map_rpc_error(TRANSACTION_RECEIPT, err)
        })?;
        self.metrics.record_success(start.elapsed());

        let entries: Vec<_> = response.into_iter().collect();
        if entries.len() != records.len() {
            bail!(
                "RPC returned mismatched receipt count (expected {}, got {})",
                records.len(),
                entries.len()
            );
        }

        let mut failed = 0usize;
        for (record, entry) in records.iter_mut().zip(entries) {
            let outcome = match entry {
                Ok(Value::Null) => Err(anyhow!("receipt not available")),
                Ok(value) => serde_json::from_value::<RpcReceipt>(value)
                    .context("undecodable receipt")
                    .and_then(|receipt| receipt.apply_to(record)),
                Err(err) => Err(map_rpc_batch_error(TRANSACTION_RECEIPT, &err)),
            };

            if let Err(err) = outcome {
                tracing::warn!(tx = %record.hash, error = %err, "marking transaction failed");
                record.mark_failed();
                failed += 1;
            }
        }

        tracing::debug!(
            method = TRANSACTION_RECEIPT,
            count = records.len(),
            failed,
            "batch RPC call completed"
        );
        Ok(())
    }

    async fn call<R>(&self, method: &'static str, params: ArrayParams) -> Result<R>
    where
        R: DeserializeOwned,
    {
        let start = Instant::now();
        let outcome = timeout(self.options.request_timeout, self.client.request(method, params))
            .await;

        match outcome {
            Err(_) => {
                self.metrics.record_timeout(start.elapsed());
                Err(RpcError::Timeout { method }.into())
            }
            Ok(Err(err)) => {
                self.metrics.record_failure(start.elapsed());
                Err(map_rpc_error(method, err))
            }
            Ok(Ok(value)) => {
                self.metrics.record_success(start.elapsed());
                Ok(value)
            }
        }
    }
}

fn map_rpc_error(label: &'static str, err: JsonRpcError) -> anyhow::Error {
    if response_too_large(&err) {
        return RpcError::ResponseTooLarge { method: label }.into();
    }
    anyhow!("rpc {label} call failed: {err}")
}

fn map_rpc_batch_error(label: &str, err: &ErrorObject<'_>) -> anyhow::Error {
    if let Some(data) = err.data() {
        anyhow!(
            "rpc {label} call failed (code={}, message={}, data={})",
            err.code(),
            err.message(),
            data.get()
        )
    } else {
        anyhow!(
            "rpc {label} call failed (code={}, message={})",
            err.code(),
            err.message()
        )
    }
}

fn response_too_large(err: &JsonRpcError) -> bool {
    match err {
        JsonRpcError::Transport(inner) => match inner.downcast_ref::<HttpTransportError>() {
            Some(HttpTransportError::Http(http_err)) => matches!(http_err, HttpError::TooLarge),
            Some(HttpTransportError::RequestTooLarge) => true,
            _ => false,
        },
        _ => false,
    }
}
