//! Typed Ethereum operations over an [`RpcClient`], shaped by the node schema.

use bytes::Bytes;
use ethereum_types::{Address, H256, U256};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::{RpcClient, RpcConfig};
use crate::error::RpcError;
use crate::schema::{ExecutionTrace, NodeSchema, SchemaRequest, VERSION_PROBE};
use crate::types::{Block, BlockHeader, BlockTag, RpcMessage, Transaction, TransactionReceipt};

/// Stream of new block numbers, strictly increasing.
pub type HeadSubscription = mpsc::Receiver<u64>;

#[derive(Clone)]
pub struct EthClient {
    rpc: RpcClient,
    schema: NodeSchema,
}

impl EthClient {
    pub fn new(rpc: RpcClient, schema: NodeSchema) -> Self {
        Self { rpc, schema }
    }

    /// Connect and detect the node family.
    pub async fn dial(url: &str, config: RpcConfig) -> Result<Self, RpcError> {
        let rpc = RpcClient::connect(url, config).await?;
        let schema = detect_schema(&rpc).await;
        info!(%url, ?schema, "connected to node");
        Ok(Self::new(rpc, schema))
    }

    pub fn schema(&self) -> NodeSchema {
        self.schema
    }

    pub fn rpc(&self) -> &RpcClient {
        &self.rpc
    }

    async fn execute<T>(&self, request: SchemaRequest<T>) -> Result<T, RpcError> {
        let result = self.rpc.call(request.method, request.params.clone()).await?;
        request.decode(result)
    }

    /// Pass a caller's message through unchanged. The response keeps the id the
    /// client assigned; callers restore their own.
    pub async fn forward(&self, message: &RpcMessage) -> Result<RpcMessage, RpcError> {
        let params = message.params.clone().unwrap_or_else(|| json!([]));
        self.rpc.request(message.method(), params).await
    }

    pub async fn block_number(&self) -> Result<u64, RpcError> {
        self.execute(self.schema.block_number()).await
    }

    pub async fn block_by_number(&self, number: u64) -> Result<Option<Block>, RpcError> {
        self.execute(self.schema.block_by_number(number)).await
    }

    pub async fn header_by_number(&self, number: u64) -> Result<Option<BlockHeader>, RpcError> {
        self.execute(self.schema.header_by_number(number)).await
    }

    pub async fn header_by_hash(&self, hash: H256) -> Result<Option<BlockHeader>, RpcError> {
        self.execute(self.schema.block_by_hash(hash)).await
    }

    pub async fn transaction(&self, hash: H256) -> Result<Option<Transaction>, RpcError> {
        self.execute(self.schema.transaction(hash)).await
    }

    pub async fn transaction_receipt(
        &self,
        hash: H256,
    ) -> Result<Option<TransactionReceipt>, RpcError> {
        self.execute(self.schema.transaction_receipt(hash)).await
    }

    pub async fn chain_id(&self) -> Result<u64, RpcError> {
        self.execute(self.schema.chain_id()).await
    }

    pub async fn network_id(&self) -> Result<String, RpcError> {
        self.execute(self.schema.net_version()).await
    }

    pub async fn balance(&self, address: Address, block: BlockTag) -> Result<U256, RpcError> {
        self.execute(self.schema.balance(address, block)).await
    }

    pub async fn code(&self, address: Address, block: BlockTag) -> Result<Bytes, RpcError> {
        self.execute(self.schema.code(address, block)).await
    }

    pub async fn nonce(&self, address: Address, block: BlockTag) -> Result<u64, RpcError> {
        self.execute(self.schema.nonce(address, block)).await
    }

    pub async fn storage_at(
        &self,
        address: Address,
        slot: H256,
        block: BlockTag,
    ) -> Result<H256, RpcError> {
        self.execute(self.schema.storage_at(address, slot, block)).await
    }

    pub async fn transaction_trace(&self, hash: H256) -> Result<ExecutionTrace, RpcError> {
        self.execute(self.schema.transaction_trace(hash)).await
    }

    /// Subscribe to new block numbers.
    ///
    /// Uses `eth_subscribe("newHeads")` when the node supports it, otherwise (or when
    /// `force_poll` is set) polls `eth_blockNumber`.
    pub async fn subscribe_new_heads(&self, force_poll: bool) -> Result<HeadSubscription, RpcError> {
        if force_poll {
            info!("forcing polling subscription");
            return Ok(self.poll_new_heads());
        }

        let subscription = match self.execute(self.schema.subscribe_new_heads()).await {
            Ok(subscription) => subscription,
            Err(e) => {
                info!(error = %e, "subscription not supported, falling back to polling");
                return Ok(self.poll_new_heads());
            }
        };

        let mut notifications = self.rpc.subscribe(&subscription)?;
        let (tx, rx) = mpsc::channel(self.rpc.config().queue_capacity);
        let client = self.clone();
        tokio::spawn(async move {
            loop {
                let message = tokio::select! {
                    message = notifications.recv() => message,
                    () = tx.closed() => None,
                };
                let Some(message) = message else { break };
                match head_number(&message, &subscription) {
                    Some(number) => {
                        if tx.send(number).await.is_err() {
                            break;
                        }
                    }
                    None => debug!(method = message.method(), "ignoring notification"),
                }
            }
            if client.rpc.is_closed() {
                return;
            }
            if let Err(e) = client.unsubscribe_new_heads(&subscription).await {
                debug!(%subscription, error = %e, "unsubscribing from new heads failed");
            }
        });
        Ok(rx)
    }

    /// Cancel a `newHeads` subscription on the node and drop its local queue.
    pub async fn unsubscribe_new_heads(&self, subscription: &str) -> Result<(), RpcError> {
        let removed = self.rpc.unsubscribe(subscription);
        if !self.execute(self.schema.unsubscribe(subscription)).await? {
            debug!(%subscription, "node did not know the subscription");
        }
        removed
    }

    /// Polling fallback: the first successful poll seeds the last seen block, then
    /// every number after it up to the current head is emitted in order.
    fn poll_new_heads(&self) -> HeadSubscription {
        let config = self.rpc.config();
        let (tx, rx) = mpsc::channel(config.queue_capacity);
        let interval = config.poll_interval;
        let error_backoff = config.poll_error_backoff;
        let client = self.clone();

        tokio::spawn(async move {
            let mut last: Option<u64> = None;
            loop {
                if tx.is_closed() || client.rpc.is_closed() {
                    break;
                }

                let current = match client.block_number().await {
                    Ok(current) => current,
                    Err(e) => {
                        warn!(error = %e, "failed polling for last block number");
                        tokio::time::sleep(error_backoff).await;
                        continue;
                    }
                };

                let Some(mut seen) = last else {
                    last = Some(current);
                    continue;
                };
                while seen < current {
                    seen += 1;
                    if tx.send(seen).await.is_err() {
                        return;
                    }
                }
                last = Some(seen);

                tokio::time::sleep(interval).await;
            }
        });
        rx
    }
}

async fn detect_schema(rpc: &RpcClient) -> NodeSchema {
    match rpc.call(VERSION_PROBE, json!([])).await {
        Ok(_) => NodeSchema::Parity,
        Err(e) => {
            debug!(error = %e, "version probe failed, assuming geth schema");
            NodeSchema::Geth
        }
    }
}

/// Block number of a `newHeads` notification for `subscription`.
fn head_number(message: &RpcMessage, subscription: &str) -> Option<u64> {
    let params = message.params.as_ref()?;
    if params.get("subscription").and_then(Value::as_str) != Some(subscription) {
        return None;
    }
    let number = params.get("result")?.get("number")?.as_str()?;
    crate::serde_utils::quantity::parse_hex(number).ok()
}
