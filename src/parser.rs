// src/parser.rs
use alloy::primitives::{Address, Bytes, B256, U256};
use tracing::warn;

use crate::error::PipelineError;
use crate::models::{Block, ChainHeader, ChainTransaction};
use crate::rpc::{RpcBlock, RpcTransaction};

fn bad(field: &str, raw: &str, e: impl std::fmt::Display) -> PipelineError {
    PipelineError::Decode(format!("{field} = {raw:?}: {e}"))
}

pub fn parse_quantity(field: &str, raw: &str) -> Result<u64, PipelineError> {
    u64::from_str_radix(raw.trim_start_matches("0x"), 16).map_err(|e| bad(field, raw, e))
}

pub fn parse_u256(field: &str, raw: &str) -> Result<U256, PipelineError> {
    // ruint parses the 0x prefix as hex
    raw.parse::<U256>().map_err(|e| bad(field, raw, e))
}

fn parse_address(field: &str, raw: &str) -> Result<Address, PipelineError> {
    raw.parse::<Address>().map_err(|e| bad(field, raw, e))
}

fn parse_hash(field: &str, raw: &str) -> Result<B256, PipelineError> {
    raw.parse::<B256>().map_err(|e| bad(field, raw, e))
}

fn parse_bytes(field: &str, raw: &str) -> Result<Bytes, PipelineError> {
    hex::decode(raw.trim_start_matches("0x"))
        .map(Bytes::from)
        .map_err(|e| bad(field, raw, e))
}

/// Decode one transaction object from `eth_getBlockByNumber(_, true)` or
/// `eth_getTransactionByHash`.
pub fn decode_transaction(raw: &RpcTransaction) -> Result<ChainTransaction, PipelineError> {
    // 1559 transactions report the effective price once mined; fall back to the fee cap.
    let gas_price = match raw.gas_price.as_deref().or(raw.max_fee_per_gas.as_deref()) {
        Some(p) => parse_u256("gasPrice", p)?,
        None => U256::ZERO,
    };

    Ok(ChainTransaction {
        hash: parse_hash("hash", &raw.hash)?,
        from: parse_address("from", &raw.from)?,
        to: raw.to.as_deref().map(|t| parse_address("to", t)).transpose()?,
        nonce: parse_quantity("nonce", &raw.nonce)?,
        gas_price,
        gas_limit: parse_quantity("gas", &raw.gas)?,
        value: parse_u256("value", &raw.value)?,
        input: parse_bytes("input", &raw.input)?,
    })
}

/// Decode a full block. Transactions that fail to decode are skipped with a
/// warning so one odd entry does not cost the rest of the block.
pub fn decode_block(raw: &RpcBlock) -> Result<Block, PipelineError> {
    let header = ChainHeader {
        number: parse_quantity("number", &raw.number)?,
        hash: parse_hash("hash", &raw.hash)?,
        timestamp: parse_quantity("timestamp", &raw.timestamp)?,
    };

    let base_fee_per_gas = raw
        .base_fee_per_gas
        .as_deref()
        .map(|b| parse_u256("baseFeePerGas", b))
        .transpose()?;

    let transactions = raw
        .transactions
        .iter()
        .filter_map(|tx| match decode_transaction(tx) {
            Ok(tx) => Some(tx),
            Err(e) => {
                warn!(block = header.number, tx = %tx.hash, "Skipping undecodable transaction: {}", e);
                None
            }
        })
        .collect();

    Ok(Block {
        header,
        transactions,
        base_fee_per_gas,
    })
}
