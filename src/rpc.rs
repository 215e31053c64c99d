// src/rpc.rs
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

use crate::error::PipelineError;
use crate::models::Block;
use crate::parser;

#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct RpcTransaction {
    pub hash: String,
    pub from: String,
    pub to: Option<String>,
    pub nonce: String,
    #[serde(default)]
    pub gas_price: Option<String>,
    #[serde(default)]
    pub max_fee_per_gas: Option<String>,
    pub gas: String,
    pub value: String,
    pub input: String,

    #[serde(default)]
    pub block_number: Option<String>, // null while pending
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcBlock {
    pub number: String,
    pub hash: String,
    pub timestamp: String,
    #[serde(default)]
    pub base_fee_per_gas: Option<String>,
    #[serde(default)]
    pub transactions: Vec<RpcTransaction>,
}

// `Error` goes first: a missing `result` would otherwise decode as `None`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RpcResponse<T> {
    Error { error: RpcError },
    Success { result: T },
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

/// Resolves a header number into the full block.
#[async_trait]
pub trait BlockFetcher: Send + Sync {
    async fn fetch_block(&self, number: u64) -> Result<Block, PipelineError>;
}

/// Looks up which block a transaction was mined in. `None` means pending or unknown.
#[async_trait]
pub trait TransactionLookup: Send + Sync {
    async fn mined_block(&self, hash: &str) -> Result<Option<u64>, PipelineError>;
}

/// Plain HTTP JSON-RPC client.
#[derive(Clone)]
pub struct RpcClient {
    client: Client,
    url: String,
}

impl RpcClient {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, PipelineError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PipelineError::Connection(e.to_string()))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, String> {
        let payload = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });

        debug!("Sending {} → {}", method, self.url);

        let resp = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| e.to_string())?;

        if resp.status() != StatusCode::OK {
            return Err(format!("HTTP {}", resp.status()));
        }

        match resp.json::<RpcResponse<T>>().await.map_err(|e| e.to_string())? {
            RpcResponse::Success { result } => Ok(result),
            RpcResponse::Error { error } => Err(format!("RPC error {}: {}", error.code, error.message)),
        }
    }

    pub async fn get_block_by_number(&self, number: u64) -> Result<Option<RpcBlock>, String> {
        self.call("eth_getBlockByNumber", json!([format!("0x{:x}", number), true]))
            .await
    }

    pub async fn get_transaction_by_hash(&self, hash: &str) -> Result<Option<RpcTransaction>, String> {
        self.call("eth_getTransactionByHash", json!([hash])).await
    }
}

#[async_trait]
impl BlockFetcher for RpcClient {
    async fn fetch_block(&self, number: u64) -> Result<Block, PipelineError> {
        let fetch_err = |reason: String| PipelineError::Fetch {
            target: format!("block {number}"),
            reason,
        };

        let raw = self
            .get_block_by_number(number)
            .await
            .map_err(fetch_err)?
            .ok_or_else(|| fetch_err("block not available".to_string()))?;

        parser::decode_block(&raw).map_err(|e| fetch_err(e.to_string()))
    }
}

#[async_trait]
impl TransactionLookup for RpcClient {
    async fn mined_block(&self, hash: &str) -> Result<Option<u64>, PipelineError> {
        let tx = self
            .get_transaction_by_hash(hash)
            .await
            .map_err(|reason| PipelineError::Fetch {
                target: format!("transaction {hash}"),
                reason,
            })?;

        match tx.and_then(|t| t.block_number) {
            Some(number) => parser::parse_quantity("blockNumber", &number).map(Some),
            None => Ok(None),
        }
    }
}
