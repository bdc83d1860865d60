//! Shared test helpers: a scripted node, an in-memory pre-state and fixtures.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use ethereum_types::{Address, H256, U256};
use rustc_hash::{FxHashMap, FxHashSet};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::client::{EthClient, RpcClient, RpcConfig};
use crate::error::RpcError;
use crate::schema::NodeSchema;
use crate::state::StateSource;
use crate::transport::Transport;
use crate::types::{BlockHeader, RpcRequest};

/// Node answer to one request: a result or a JSON-RPC error object.
pub type Reply = Result<Value, Value>;

pub fn rpc_error(code: i64, message: &str) -> Value {
    json!({"code": code, "message": message})
}

type Handler = dyn Fn(&str, &Value) -> Reply + Send + Sync;

/// In-process node. Every written request is answered by `handler` on a
/// separate task, after the delay configured for its method.
pub struct MockTransport {
    handler: Arc<Handler>,
    delays: FxHashMap<String, Duration>,
    inbound_tx: mpsc::UnboundedSender<String>,
    inbound_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<String>>,
    closed: CancellationToken,
    requests: Arc<Mutex<Vec<String>>>,
}

impl MockTransport {
    pub fn new(handler: impl Fn(&str, &Value) -> Reply + Send + Sync + 'static) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        Self {
            handler: Arc::new(handler),
            delays: FxHashMap::default(),
            inbound_tx,
            inbound_rx: tokio::sync::Mutex::new(inbound_rx),
            closed: CancellationToken::new(),
            requests: Arc::default(),
        }
    }

    pub fn with_delay(mut self, method: &str, delay: Duration) -> Self {
        self.delays.insert(method.to_string(), delay);
        self
    }

    /// Push unsolicited frames (notifications) to the client.
    pub fn notifier(&self) -> mpsc::UnboundedSender<String> {
        self.inbound_tx.clone()
    }

    /// Cancelling the token makes the next read report end of stream.
    pub fn hang_up(&self) -> CancellationToken {
        self.closed.clone()
    }

    /// Methods written so far, in order.
    pub fn request_log(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.requests)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn write(&self, request: &RpcRequest) -> Result<(), RpcError> {
        if self.closed.is_cancelled() {
            return Err(RpcError::Closed);
        }
        self.requests.lock().unwrap().push(request.method.clone());

        let reply = (self.handler)(&request.method, &request.params);
        let frame = match reply {
            Ok(result) => json!({"jsonrpc": "2.0", "id": request.id, "result": result}),
            Err(error) => json!({"jsonrpc": "2.0", "id": request.id, "error": error}),
        };
        let delay = self.delays.get(&request.method).copied();
        let inbound = self.inbound_tx.clone();
        tokio::spawn(async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            let _ = inbound.send(frame.to_string());
        });
        Ok(())
    }

    async fn read(&self) -> Result<Option<String>, RpcError> {
        let mut inbound = self.inbound_rx.lock().await;
        tokio::select! {
            _ = self.closed.cancelled() => Ok(None),
            frame = inbound.recv() => Ok(frame),
        }
    }

    async fn close(&self) {
        self.closed.cancel();
    }
}

pub fn test_rpc_config() -> RpcConfig {
    RpcConfig {
        call_timeout: Duration::from_secs(5),
        poll_interval: Duration::from_millis(10),
        poll_error_backoff: Duration::from_millis(10),
        ..RpcConfig::default()
    }
}

/// A geth-schema client talking to `transport`.
pub fn mock_client(transport: MockTransport) -> EthClient {
    EthClient::new(
        RpcClient::new(Arc::new(transport), test_rpc_config()),
        NodeSchema::Geth,
    )
}

/// Pre-state served from memory. Unknown accounts are empty; accounts in
/// `unavailable` fail every fetch.
#[derive(Default)]
pub struct MemoryState {
    pub unavailable: FxHashSet<Address>,
    pub balances: FxHashMap<Address, U256>,
    pub nonces: FxHashMap<Address, u64>,
    pub code: FxHashMap<Address, Bytes>,
    pub storage: FxHashMap<(Address, H256), H256>,
    pub headers: FxHashMap<u64, BlockHeader>,
}

impl StateSource for MemoryState {
    fn balance(&self, address: Address) -> Result<U256, RpcError> {
        if self.unavailable.contains(&address) {
            return Err(RpcError::Closed);
        }
        Ok(self.balances.get(&address).copied().unwrap_or_default())
    }

    fn nonce(&self, address: Address) -> Result<u64, RpcError> {
        Ok(self.nonces.get(&address).copied().unwrap_or_default())
    }

    fn code(&self, address: Address) -> Result<Bytes, RpcError> {
        Ok(self.code.get(&address).cloned().unwrap_or_default())
    }

    fn storage(&self, address: Address, slot: H256) -> Result<H256, RpcError> {
        Ok(self.storage.get(&(address, slot)).copied().unwrap_or_default())
    }

    fn header(&self, number: u64) -> Result<Option<BlockHeader>, RpcError> {
        Ok(self.headers.get(&number).cloned())
    }
}

pub const SENDER: u64 = 0x100;
pub const RECIPIENT: u64 = 0x200;
pub const COINBASE: u64 = 0xc0;
pub const TRANSFER_GAS: u64 = 21_000;

pub fn address(n: u64) -> Address {
    Address::from_low_u64_be(n)
}

pub fn hex_address(n: u64) -> String {
    format!("{:#x}", address(n))
}

pub fn tx_hash(n: u64) -> H256 {
    H256::from_low_u64_be(n)
}

/// Cancun header of block `number` with a zero base fee.
pub fn header(number: u64) -> BlockHeader {
    BlockHeader {
        number,
        hash: H256::from_low_u64_be(0xb000 + number),
        parent_hash: H256::from_low_u64_be(0xb000 + number - 1),
        miner: address(COINBASE),
        gas_limit: 30_000_000,
        timestamp: 1_700_000_000,
        base_fee_per_gas: Some(U256::zero()),
        excess_blob_gas: Some(0),
        ..Default::default()
    }
}

/// JSON of a zero-fee value transfer, as `eth_getTransactionByHash` returns it.
pub fn transfer_json(hash: H256, nonce: u64, block: u64, index: u64) -> Value {
    json!({
        "hash": format!("{hash:#x}"),
        "from": hex_address(SENDER),
        "to": hex_address(RECIPIENT),
        "input": "0x",
        "value": "0x1",
        "gas": "0x5208",
        "gasPrice": "0x0",
        "nonce": format!("{nonce:#x}"),
        "blockNumber": format!("{block:#x}"),
        "blockHash": format!("{:#x}", header(block).hash),
        "transactionIndex": format!("{index:#x}"),
    })
}

pub fn receipt_json(hash: H256, block: u64, index: u64, gas_used: u64, status: &str) -> Value {
    json!({
        "transactionHash": format!("{hash:#x}"),
        "transactionIndex": format!("{index:#x}"),
        "blockHash": format!("{:#x}", header(block).hash),
        "blockNumber": format!("{block:#x}"),
        "from": hex_address(SENDER),
        "to": hex_address(RECIPIENT),
        "gasUsed": format!("{gas_used:#x}"),
        "cumulativeGasUsed": format!("{gas_used:#x}"),
        "contractAddress": null,
        "status": status,
        "logs": [],
        "logsBloom": format!("0x{}", "00".repeat(256)),
    })
}

/// `eth_getBlockBy*` answer for `header`, with `transactions` attached.
pub fn block_json(header: &BlockHeader, transactions: Vec<Value>) -> Value {
    let mut block = serde_json::to_value(header).unwrap();
    block["transactions"] = Value::Array(transactions);
    block
}

/// First positional parameter as a string.
pub fn first_param(params: &Value) -> &str {
    params.get(0).and_then(Value::as_str).unwrap_or_default()
}
