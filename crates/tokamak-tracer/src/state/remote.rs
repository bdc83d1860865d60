//! Where the replica loads state it has not seen yet.

use bytes::Bytes;
use ethereum_types::{Address, H256, U256};
use tokio::runtime::Handle;

use crate::client::EthClient;
use crate::error::RpcError;
use crate::types::{BlockHeader, BlockTag};

/// Pre-state lookups. Calls are blocking; the replica runs on a blocking thread.
pub trait StateSource {
    fn balance(&self, address: Address) -> Result<U256, RpcError>;
    fn nonce(&self, address: Address) -> Result<u64, RpcError>;
    fn code(&self, address: Address) -> Result<Bytes, RpcError>;
    fn storage(&self, address: Address, slot: H256) -> Result<H256, RpcError>;
    fn header(&self, number: u64) -> Result<Option<BlockHeader>, RpcError>;
}

/// State of a node as of the parent of the replayed block.
pub struct RemoteState {
    client: EthClient,
    runtime: Handle,
    block: BlockTag,
}

impl RemoteState {
    /// `block_number` is the block being replayed; reads target its parent.
    pub fn new(client: EthClient, runtime: Handle, block_number: u64) -> Self {
        Self {
            client,
            runtime,
            block: BlockTag::Number(block_number.saturating_sub(1)),
        }
    }
}

impl StateSource for RemoteState {
    fn balance(&self, address: Address) -> Result<U256, RpcError> {
        self.runtime.block_on(self.client.balance(address, self.block))
    }

    fn nonce(&self, address: Address) -> Result<u64, RpcError> {
        self.runtime.block_on(self.client.nonce(address, self.block))
    }

    fn code(&self, address: Address) -> Result<Bytes, RpcError> {
        self.runtime.block_on(self.client.code(address, self.block))
    }

    fn storage(&self, address: Address, slot: H256) -> Result<H256, RpcError> {
        self.runtime
            .block_on(self.client.storage_at(address, slot, self.block))
    }

    fn header(&self, number: u64) -> Result<Option<BlockHeader>, RpcError> {
        self.runtime.block_on(self.client.header_by_number(number))
    }
}
