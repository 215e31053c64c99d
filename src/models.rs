// src/models.rs
use alloy::primitives::{Address, Bytes, B256, U256};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Header announced by the chain feed. Never stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainHeader {
    pub number: u64,
    pub hash: B256,
    pub timestamp: u64,
}

/// A transaction as it appears inside a fetched block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainTransaction {
    pub hash: B256,
    pub from: Address,
    pub to: Option<Address>, // None for contract creation
    pub nonce: u64,
    pub gas_price: U256,
    pub gas_limit: u64,
    pub value: U256,
    pub input: Bytes,
}

/// Full block, fetched once per header and dropped after filtering.
#[derive(Debug, Clone)]
pub struct Block {
    pub header: ChainHeader,
    pub transactions: Vec<ChainTransaction>, // on-chain order
    pub base_fee_per_gas: Option<U256>,
}

/// Canonical unit written to the durable log, the queue and the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRecord {
    pub hash: String,
    pub to: String,
    pub from: String,
    pub nonce: u64,
    pub gas_price: String,  // decimal wei
    pub gas_limit: u64,
    pub value: String,      // decimal wei
    #[serde(rename = "timestamp")]
    pub block_timestamp: i64,
    pub input_data: String, // 0x-prefixed hex
    pub base_fee_per_gas: String,
}

impl TransactionRecord {
    /// Builds the record for `tx` mined in a block with the given timestamp and base fee.
    /// Contract creations have no destination and yield `None`.
    pub fn from_chain(
        tx: &ChainTransaction,
        block_timestamp: u64,
        base_fee_per_gas: Option<U256>,
    ) -> Option<Self> {
        let to = tx.to?;
        Some(Self {
            hash: format!("{:#x}", tx.hash),
            to: to.to_checksum(None),
            from: tx.from.to_checksum(None),
            nonce: tx.nonce,
            gas_price: tx.gas_price.to_string(),
            gas_limit: tx.gas_limit,
            value: tx.value.to_string(),
            block_timestamp: block_timestamp as i64,
            input_data: format!("0x{}", hex::encode(&tx.input)),
            base_fee_per_gas: base_fee_per_gas.unwrap_or(U256::ZERO).to_string(),
        })
    }

    /// Value converted to ETH, when it fits in a `Decimal`.
    pub fn value_eth(&self) -> Option<Decimal> {
        let wei: Decimal = self.value.parse().ok()?;
        Some(wei / Decimal::from(10u64.pow(18)))
    }

    pub fn event_time(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.block_timestamp, 0)
    }
}

/// Inputs sent to the classifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeatureVector {
    pub value: String, // decimal wei, too wide for a JSON number
    pub gas_limit: u64,
    pub input_data_size: usize,
}

/// Response from the classifier. `-1` flags an anomaly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct ClassificationResult {
    pub is_anomaly: i64,
}

pub const ANOMALY_SENTINEL: i64 = -1;

impl ClassificationResult {
    pub fn is_anomalous(&self) -> bool {
        self.is_anomaly == ANOMALY_SENTINEL
    }
}

/// Raised once per anomalous classification. Consumed by an external actuator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AlertEvent {
    pub triggering_hash: String,
    pub block_number: u64,
    pub timestamp: DateTime<Utc>,
}

/// A row read back from the store, as served by the query API.
#[derive(Debug, Clone, Serialize)]
pub struct StoredTransaction {
    #[serde(flatten)]
    pub record: TransactionRecord,
    #[serde(rename = "storedAt")]
    pub stored_at: String,
}
