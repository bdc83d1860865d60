//! JSON-RPC wire types and the chain data the tracer reads from a node.

use bytes::Bytes;
use ethereum_types::{Address, Bloom, H64, H256, U256};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::serde_utils::{hex_bytes, quantity};

pub const JSONRPC_VERSION: &str = "2.0";

/// Outbound request. Ids are assigned by the client and are never zero.
#[derive(Debug, Clone, Serialize)]
pub struct RpcRequest {
    pub id: u64,
    pub jsonrpc: &'static str,
    pub method: String,
    pub params: Value,
}

impl RpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Value) -> Self {
        Self {
            id,
            jsonrpc: JSONRPC_VERSION,
            method: method.into(),
            params,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Any JSON-RPC message: request, response or notification.
///
/// Requests arriving at the proxy keep their caller-chosen id here, which may be a
/// number or a string. Notifications carry no id (or id 0).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RpcMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(default)]
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcErrorObject>,
}

impl RpcMessage {
    /// Numeric id used for correlation. Zero and missing ids both mean "notification".
    pub fn numeric_id(&self) -> u64 {
        self.id.as_ref().and_then(Value::as_u64).unwrap_or(0)
    }

    pub fn method(&self) -> &str {
        self.method.as_deref().unwrap_or_default()
    }
}

/// Block parameter for state queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockTag {
    Latest,
    Number(u64),
}

impl BlockTag {
    pub fn to_param(self) -> String {
        match self {
            BlockTag::Latest => "latest".to_string(),
            BlockTag::Number(number) => format!("0x{number:x}"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockHeader {
    #[serde(with = "quantity::hex_str")]
    pub number: u64,
    pub hash: H256,
    pub parent_hash: H256,
    #[serde(default)]
    pub sha3_uncles: H256,
    pub miner: Address,
    pub state_root: H256,
    pub transactions_root: H256,
    pub receipts_root: H256,
    #[serde(default)]
    pub logs_bloom: Bloom,
    #[serde(default)]
    pub difficulty: U256,
    #[serde(with = "quantity::hex_str")]
    pub gas_limit: u64,
    #[serde(with = "quantity::hex_str")]
    pub gas_used: u64,
    #[serde(with = "quantity::hex_str")]
    pub timestamp: u64,
    #[serde(default, with = "hex_bytes")]
    pub extra_data: Bytes,
    #[serde(default)]
    pub mix_hash: H256,
    #[serde(default)]
    pub nonce: H64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_fee_per_gas: Option<U256>,
    #[serde(
        default,
        with = "quantity::hex_str_opt",
        skip_serializing_if = "Option::is_none"
    )]
    pub excess_blob_gas: Option<u64>,
}

/// Block with full transaction objects.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Block {
    #[serde(flatten)]
    pub header: BlockHeader,
    #[serde(default)]
    pub transactions: Vec<Transaction>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessListItem {
    pub address: Address,
    #[serde(default)]
    pub storage_keys: Vec<H256>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub hash: H256,
    pub from: Address,
    #[serde(default)]
    pub to: Option<Address>,
    #[serde(default, with = "hex_bytes")]
    pub input: Bytes,
    #[serde(default)]
    pub value: U256,
    #[serde(with = "quantity::hex_str")]
    pub gas: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas_price: Option<U256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_fee_per_gas: Option<U256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_priority_fee_per_gas: Option<U256>,
    #[serde(with = "quantity::hex_str")]
    pub nonce: u64,
    #[serde(default, with = "quantity::hex_str_opt")]
    pub block_number: Option<u64>,
    #[serde(default)]
    pub block_hash: Option<H256>,
    #[serde(default, with = "quantity::hex_str_opt")]
    pub transaction_index: Option<u64>,
    #[serde(default, with = "quantity::hex_str_opt")]
    pub chain_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_list: Option<Vec<AccessListItem>>,
}

impl Transaction {
    /// Fee cap and tip cap, falling back to the legacy gas price.
    pub fn fee_caps(&self) -> (U256, Option<U256>) {
        match (self.max_fee_per_gas, self.max_priority_fee_per_gas) {
            (Some(fee_cap), tip_cap) => (fee_cap, tip_cap),
            (None, _) => (self.gas_price.unwrap_or_default(), None),
        }
    }
}

/// Receipt as returned by the node. Unknown fields are kept so the proxy can hand
/// the receipt back unchanged apart from its status.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionReceipt {
    pub transaction_hash: H256,
    #[serde(with = "quantity::hex_str")]
    pub transaction_index: u64,
    pub block_hash: H256,
    #[serde(with = "quantity::hex_str")]
    pub block_number: u64,
    #[serde(default)]
    pub from: Address,
    #[serde(default)]
    pub to: Option<Address>,
    #[serde(with = "quantity::hex_str")]
    pub gas_used: u64,
    #[serde(with = "quantity::hex_str")]
    pub cumulative_gas_used: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effective_gas_price: Option<U256>,
    #[serde(default)]
    pub contract_address: Option<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<H256>,
    #[serde(default)]
    pub logs: Vec<Value>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl TransactionReceipt {
    pub fn status(&self) -> &str {
        self.status.as_deref().unwrap_or_default()
    }

    /// Failed receipts report status `0x0`; a rewritten status keeps that prefix.
    pub fn is_failed(&self) -> bool {
        self.status().starts_with("0x0")
    }

    pub fn set_status(&mut self, trace: &str) {
        self.status = Some(format!("0x0 {trace}"));
    }
}
