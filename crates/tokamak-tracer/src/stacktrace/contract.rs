//! Contract metadata and where it comes from.

use std::sync::Arc;

use async_trait::async_trait;
use rustc_hash::FxHashMap;
use serde_json::Value;

use super::source_map::{self, SourceMap};
use crate::error::StackTraceError;
use crate::serde_utils::hex_bytes::decode_hex;

/// A deployed contract with everything needed to map its execution to source.
#[derive(Debug, Clone, Default)]
pub struct ContractDetails {
    pub id: String,
    pub name: String,
    /// Deployment address, lowercase with `0x` prefix.
    pub address: String,
    pub bytecode: Vec<u8>,
    pub deployed_bytecode: Vec<u8>,
    pub abi: Value,
    pub source: String,
    pub source_map: SourceMap,
    pub project_id: Option<String>,
}

impl ContractDetails {
    /// Decode `deployed_bytecode` (hex) and index `deployed_source_map` against it.
    pub fn from_sources(
        name: &str,
        address: &str,
        deployed_bytecode: &str,
        deployed_source_map: &str,
        source: &str,
    ) -> Result<Self, StackTraceError> {
        let deployed = decode_hex(deployed_bytecode)
            .map_err(|e| StackTraceError::InvalidBytecode(format!("{name}: {e}")))?;
        let source_map = source_map::parse(deployed_source_map, source, &deployed)?;
        Ok(Self {
            id: name.to_string(),
            name: name.to_string(),
            address: address.to_lowercase(),
            deployed_bytecode: deployed,
            source: source.to_string(),
            source_map,
            ..Default::default()
        })
    }

    /// Opcode at `pc`; past the end of the code reads as STOP.
    pub fn opcode_at(&self, pc: u64) -> u8 {
        usize::try_from(pc)
            .ok()
            .and_then(|pc| self.deployed_bytecode.get(pc).copied())
            .unwrap_or(crate::opcodes::STOP)
    }
}

/// Lookup of contracts by address (`0x`-prefixed, lowercase).
#[async_trait]
pub trait ContractSource: Send + Sync {
    async fn get(&self, address: &str) -> Option<Arc<ContractDetails>>;
}

/// Fixed set of contracts keyed by address.
#[derive(Debug, Default, Clone)]
pub struct MemoryContracts {
    contracts: FxHashMap<String, Arc<ContractDetails>>,
}

impl MemoryContracts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, contract: ContractDetails) {
        self.contracts
            .insert(contract.address.to_lowercase(), Arc::new(contract));
    }

    pub fn len(&self) -> usize {
        self.contracts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contracts.is_empty()
    }

    pub fn lookup(&self, address: &str) -> Option<Arc<ContractDetails>> {
        self.contracts.get(&address.to_lowercase()).cloned()
    }

    pub fn find_by_code(&self, code: &[u8]) -> Option<Arc<ContractDetails>> {
        self.contracts
            .values()
            .find(|contract| contract.deployed_bytecode == code)
            .cloned()
    }
}

#[async_trait]
impl ContractSource for MemoryContracts {
    async fn get(&self, address: &str) -> Option<Arc<ContractDetails>> {
        self.lookup(address)
    }
}

/// Contracts of the active call frames. Never empty.
#[derive(Debug, Clone)]
pub struct ContractStack {
    contracts: Vec<Arc<ContractDetails>>,
}

impl ContractStack {
    pub fn new(root: Arc<ContractDetails>) -> Self {
        Self {
            contracts: vec![root],
        }
    }

    pub fn push(&mut self, contract: Arc<ContractDetails>) {
        self.contracts.push(contract);
    }

    /// Leave the current frame. The root frame is never popped.
    pub fn pop(&mut self) {
        if self.contracts.len() > 1 {
            self.contracts.pop();
        }
    }

    pub fn current(&self) -> &Arc<ContractDetails> {
        // Never empty: `pop` keeps the root.
        &self.contracts[self.contracts.len() - 1]
    }

    /// Number of active frames, at least one.
    pub fn depth(&self) -> usize {
        self.contracts.len()
    }
}
