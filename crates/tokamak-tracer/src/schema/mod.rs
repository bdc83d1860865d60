//! Node schema adapters.
//!
//! Every logical operation maps to a wire request plus a decoder for the node's
//! answer. The two supported node families agree on the `eth_*` surface and differ
//! on execution traces, which are normalized here into [`ExecutionTrace`] before
//! anything downstream sees them.

mod geth;
mod parity;

use bytes::Bytes;
use ethereum_types::{Address, H256, U256};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::RpcError;
use crate::serde_utils::{hex_bytes, quantity};
use crate::types::{Block, BlockHeader, BlockTag, Transaction, TransactionReceipt};

/// Probe answered only by schema B nodes.
pub const VERSION_PROBE: &str = "parity_versionInfo";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeSchema {
    /// Flat structured logs (`debug_traceTransaction`).
    Geth,
    /// Nested vmTrace tree (`trace_replayTransaction`).
    Parity,
}

/// One normalized execution step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TraceStep {
    pub pc: u64,
    pub op: String,
    pub depth: u64,
    pub gas: u64,
    pub gas_cost: u64,
    /// Operand stack, bottom first, each word 64 hex chars without prefix.
    /// `None` when the node did not report it.
    pub stack: Option<Vec<String>>,
    pub error: Option<String>,
    /// Last step of a nested call frame (or of the whole trace).
    pub terminating: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionTrace {
    pub gas: u64,
    pub failed: bool,
    pub return_value: String,
    pub steps: Vec<TraceStep>,
}

/// A wire request and the decoder for its result.
pub struct SchemaRequest<T> {
    pub method: &'static str,
    pub params: Value,
    decode: fn(&'static str, Value) -> Result<T, RpcError>,
}

impl<T> SchemaRequest<T> {
    fn new(
        method: &'static str,
        params: Value,
        decode: fn(&'static str, Value) -> Result<T, RpcError>,
    ) -> Self {
        Self {
            method,
            params,
            decode,
        }
    }

    pub fn decode(&self, result: Value) -> Result<T, RpcError> {
        (self.decode)(self.method, result)
    }
}

impl NodeSchema {
    pub fn block_number(self) -> SchemaRequest<u64> {
        SchemaRequest::new("eth_blockNumber", json!([]), decode_quantity)
    }

    /// Block with full transaction objects.
    pub fn block_by_number(self, number: u64) -> SchemaRequest<Option<Block>> {
        SchemaRequest::new(
            "eth_getBlockByNumber",
            json!([BlockTag::Number(number).to_param(), true]),
            decode_json,
        )
    }

    /// Header only, for block hash lookups.
    pub fn header_by_number(self, number: u64) -> SchemaRequest<Option<BlockHeader>> {
        SchemaRequest::new(
            "eth_getBlockByNumber",
            json!([BlockTag::Number(number).to_param(), false]),
            decode_json,
        )
    }

    pub fn block_by_hash(self, hash: H256) -> SchemaRequest<Option<BlockHeader>> {
        SchemaRequest::new(
            "eth_getBlockByHash",
            json!([format!("{hash:#x}"), false]),
            decode_json,
        )
    }

    pub fn transaction(self, hash: H256) -> SchemaRequest<Option<Transaction>> {
        SchemaRequest::new(
            "eth_getTransactionByHash",
            json!([format!("{hash:#x}")]),
            decode_json,
        )
    }

    pub fn transaction_receipt(self, hash: H256) -> SchemaRequest<Option<TransactionReceipt>> {
        SchemaRequest::new(
            "eth_getTransactionReceipt",
            json!([format!("{hash:#x}")]),
            decode_json,
        )
    }

    pub fn chain_id(self) -> SchemaRequest<u64> {
        SchemaRequest::new("eth_chainId", json!([]), decode_quantity)
    }

    pub fn net_version(self) -> SchemaRequest<String> {
        SchemaRequest::new("net_version", json!([]), decode_json)
    }

    pub fn balance(self, address: Address, block: BlockTag) -> SchemaRequest<U256> {
        SchemaRequest::new(
            "eth_getBalance",
            json!([format!("{address:#x}"), block.to_param()]),
            decode_json,
        )
    }

    pub fn code(self, address: Address, block: BlockTag) -> SchemaRequest<Bytes> {
        SchemaRequest::new(
            "eth_getCode",
            json!([format!("{address:#x}"), block.to_param()]),
            decode_bytes,
        )
    }

    pub fn nonce(self, address: Address, block: BlockTag) -> SchemaRequest<u64> {
        SchemaRequest::new(
            "eth_getTransactionCount",
            json!([format!("{address:#x}"), block.to_param()]),
            decode_quantity,
        )
    }

    pub fn storage_at(self, address: Address, slot: H256, block: BlockTag) -> SchemaRequest<H256> {
        SchemaRequest::new(
            "eth_getStorageAt",
            json!([format!("{address:#x}"), storage_slot_param(slot), block.to_param()]),
            decode_word,
        )
    }

    pub fn subscribe_new_heads(self) -> SchemaRequest<String> {
        SchemaRequest::new("eth_subscribe", json!(["newHeads"]), decode_json)
    }

    pub fn unsubscribe(self, subscription: &str) -> SchemaRequest<bool> {
        SchemaRequest::new("eth_unsubscribe", json!([subscription]), decode_json)
    }

    /// Execution trace of an already mined transaction.
    pub fn transaction_trace(self, hash: H256) -> SchemaRequest<ExecutionTrace> {
        match self {
            NodeSchema::Geth => SchemaRequest::new(
                "debug_traceTransaction",
                json!([
                    format!("{hash:#x}"),
                    {"disableStorage": true, "disableMemory": true}
                ]),
                geth::decode_trace,
            ),
            NodeSchema::Parity => SchemaRequest::new(
                "trace_replayTransaction",
                json!([format!("{hash:#x}"), ["vmTrace"]]),
                parity::decode_trace,
            ),
        }
    }
}

/// Storage slots are sent as minimal quantities: `0x000...05` becomes `0x5`.
fn storage_slot_param(slot: H256) -> String {
    let hex = hex::encode(slot.as_bytes());
    let trimmed = hex.trim_start_matches('0');
    if trimmed.is_empty() {
        "0x0".to_string()
    } else {
        format!("0x{trimmed}")
    }
}

/// Left-pad a hex word (with or without `0x`) to 64 chars.
pub(crate) fn pad_word(word: &str) -> String {
    let digits = word.trim_start_matches("0x");
    format!("{digits:0>64}")
}

fn decode_json<T: DeserializeOwned>(method: &'static str, result: Value) -> Result<T, RpcError> {
    serde_json::from_value(result).map_err(|e| RpcError::parse(method, "result", e))
}

fn decode_quantity(method: &'static str, result: Value) -> Result<u64, RpcError> {
    let raw = result
        .as_str()
        .ok_or_else(|| RpcError::parse(method, "result", "expected hex string"))?;
    quantity::parse_hex(raw).map_err(|e| RpcError::parse(method, "result", e))
}

fn decode_bytes(method: &'static str, result: Value) -> Result<Bytes, RpcError> {
    let raw = result
        .as_str()
        .ok_or_else(|| RpcError::parse(method, "result", "expected hex string"))?;
    hex_bytes::decode_hex(raw)
        .map(Bytes::from)
        .map_err(|e| RpcError::parse(method, "result", e))
}

fn decode_word(method: &'static str, result: Value) -> Result<H256, RpcError> {
    let raw = result
        .as_str()
        .ok_or_else(|| RpcError::parse(method, "result", "expected hex string"))?;
    let bytes = hex::decode(pad_word(raw)).map_err(|e| RpcError::parse(method, "result", e))?;
    if bytes.len() != 32 {
        return Err(RpcError::parse(method, "result", "word longer than 32 bytes"));
    }
    Ok(H256::from_slice(&bytes))
}
