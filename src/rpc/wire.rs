//! Ethereum JSON-RPC payloads and their conversion into storage records.

use crate::model::{normalize_hash, BlockHeight, BlockRecord, TransactionRecord, TxStatus};
use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RpcBlock {
    pub(crate) number: Option<String>,
    pub(crate) hash: Option<String>,
    pub(crate) parent_hash: String,
    pub(crate) timestamp: String,
    pub(crate) gas_used: String,
    pub(crate) gas_limit: String,
    #[serde(default)]
    pub(crate) transactions: BlockTransactions,
}

/// `eth_getBlockBy*` returns hashes or full objects depending on the flag.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum BlockTransactions {
    Hashes(Vec<String>),
    Full(Vec<RpcTransaction>),
}

impl Default for BlockTransactions {
    fn default() -> Self {
        BlockTransactions::Hashes(Vec::new())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RpcTransaction {
    pub(crate) hash: String,
    pub(crate) block_hash: Option<String>,
    pub(crate) block_number: Option<String>,
    pub(crate) transaction_index: Option<String>,
    pub(crate) from: String,
    pub(crate) to: Option<String>,
    pub(crate) value: String,
    pub(crate) gas: String,
    pub(crate) gas_price: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RpcReceipt {
    pub(crate) transaction_hash: String,
    pub(crate) status: Option<String>,
    pub(crate) gas_used: Option<String>,
}

pub(crate) fn quantity(raw: &str, field: &str) -> Result<u64> {
    let digits = raw
        .strip_prefix("0x")
        .or_else(|| raw.strip_prefix("0X"))
        .ok_or_else(|| anyhow!("{field} {raw:?} is not a hex quantity"))?;
    if digits.is_empty() {
        bail!("{field} {raw:?} has no digits");
    }
    u64::from_str_radix(digits, 16).with_context(|| format!("invalid {field} {raw:?}"))
}

fn optional_quantity(raw: Option<&str>, field: &str) -> Result<Option<u64>> {
    raw.map(|raw| quantity(raw, field)).transpose()
}

impl RpcBlock {
    /// Header record; pending blocks without number or hash are rejected.
    pub(crate) fn to_record(&self, network: &str) -> Result<BlockRecord> {
        let number = self
            .number
            .as_deref()
            .ok_or_else(|| anyhow!("block has no number (pending block?)"))?;
        let hash = self
            .hash
            .as_deref()
            .ok_or_else(|| anyhow!("block has no hash (pending block?)"))?;

        let transaction_hashes = match &self.transactions {
            BlockTransactions::Hashes(hashes) => {
                hashes.iter().map(|hash| normalize_hash(hash)).collect()
            }
            BlockTransactions::Full(transactions) => transactions
                .iter()
                .map(|tx| normalize_hash(&tx.hash))
                .collect(),
        };

        Ok(BlockRecord {
            number: BlockHeight::parse(number)?,
            hash: normalize_hash(hash),
            parent_hash: normalize_hash(&self.parent_hash),
            timestamp: quantity(&self.timestamp, "timestamp")?,
            gas_used: quantity(&self.gas_used, "gasUsed")?,
            gas_limit: quantity(&self.gas_limit, "gasLimit")?,
            transaction_hashes,
            network: network.to_owned(),
        })
    }

    pub(crate) fn into_transactions(self) -> Result<Vec<RpcTransaction>> {
        match self.transactions {
            BlockTransactions::Full(transactions) => Ok(transactions),
            BlockTransactions::Hashes(hashes) if hashes.is_empty() => Ok(Vec::new()),
            BlockTransactions::Hashes(_) => {
                bail!("node returned transaction hashes where full objects were requested")
            }
        }
    }
}

impl RpcTransaction {
    /// Converts into a pending record, filling block linkage from `block`
    /// where the node omitted it.
    pub(crate) fn to_record(&self, block: &BlockRecord) -> Result<TransactionRecord> {
        let block_number = match self.block_number.as_deref() {
            Some(raw) => BlockHeight::parse(raw)?,
            None => block.number,
        };
        let transaction_index =
            optional_quantity(self.transaction_index.as_deref(), "transactionIndex")?
                .unwrap_or_default();

        Ok(TransactionRecord {
            hash: normalize_hash(&self.hash),
            block_hash: self
                .block_hash
                .as_deref()
                .map(normalize_hash)
                .unwrap_or_else(|| block.hash.clone()),
            block_number,
            transaction_index,
            from: normalize_hash(&self.from),
            to: self.to.as_deref().map(normalize_hash),
            value: normalize_hash(&self.value),
            gas: quantity(&self.gas, "gas")?,
            gas_price: optional_quantity(self.gas_price.as_deref(), "gasPrice")?,
            gas_used: None,
            receipt_status: None,
            status: TxStatus::Pending,
            processed_at: None,
            network: block.network.clone(),
        })
    }
}

impl RpcReceipt {
    /// Copies execution results onto `record`.
    pub(crate) fn apply_to(&self, record: &mut TransactionRecord) -> Result<()> {
        if normalize_hash(&self.transaction_hash) != record.hash {
            bail!(
                "receipt for {} returned for transaction {}",
                self.transaction_hash,
                record.hash
            );
        }
        record.gas_used = optional_quantity(self.gas_used.as_deref(), "gasUsed")?;
        record.receipt_status = optional_quantity(self.status.as_deref(), "status")?
            .map(|status| status == 1);
        Ok(())
    }
}
