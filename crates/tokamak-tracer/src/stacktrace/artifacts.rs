//! Contracts read from a directory of compiler build artifacts.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use ethereum_types::Address;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::contract::{ContractDetails, ContractSource, MemoryContracts};
use crate::client::EthClient;
use crate::error::StackTraceError;
use crate::types::BlockTag;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Artifact {
    contract_name: String,
    #[serde(default)]
    abi: Value,
    #[serde(default)]
    bytecode: String,
    #[serde(default)]
    deployed_bytecode: String,
    #[serde(default)]
    deployed_source_map: String,
    #[serde(default)]
    source: String,
    #[serde(default)]
    networks: HashMap<String, Deployment>,
}

#[derive(Debug, Deserialize)]
struct Deployment {
    address: String,
}

impl Artifact {
    fn into_details(self, address: &str) -> Result<ContractDetails, StackTraceError> {
        let mut details = ContractDetails::from_sources(
            &self.contract_name,
            address,
            &self.deployed_bytecode,
            &self.deployed_source_map,
            &self.source,
        )?;
        details.bytecode = crate::serde_utils::hex_bytes::decode_hex(&self.bytecode)
            .map_err(|e| StackTraceError::InvalidBytecode(format!("{}: {e}", self.contract_name)))?;
        details.abi = self.abi;
        Ok(details)
    }
}

/// Read every `*.json` artifact in `build_dir` deployed on `network_id`.
/// Artifacts without a deployment on that network, or with unusable bytecode or
/// source maps, are skipped.
pub fn load_artifacts(build_dir: &Path, network_id: &str) -> Result<MemoryContracts, StackTraceError> {
    let entries = std::fs::read_dir(build_dir).map_err(|e| {
        StackTraceError::Artifacts(format!("listing {}: {e}", build_dir.display()))
    })?;

    let mut contracts = MemoryContracts::new();
    for entry in entries {
        let path = entry
            .map_err(|e| StackTraceError::Artifacts(e.to_string()))?
            .path();
        if path.is_dir() || path.extension().is_none_or(|ext| ext != "json") {
            continue;
        }

        let data = std::fs::read_to_string(&path)
            .map_err(|e| StackTraceError::Artifacts(format!("reading {}: {e}", path.display())))?;
        let artifact: Artifact = serde_json::from_str(&data)
            .map_err(|e| StackTraceError::Artifacts(format!("parsing {}: {e}", path.display())))?;

        let Some(address) = artifact
            .networks
            .get(network_id)
            .map(|deployment| deployment.address.clone())
        else {
            debug!(contract = %artifact.contract_name, network_id, "contract not deployed on network");
            continue;
        };

        let name = artifact.contract_name.clone();
        match artifact.into_details(&address) {
            Ok(details) => contracts.insert(details),
            Err(e) => warn!(contract = %name, error = %e, "skipping contract"),
        }
    }

    info!(count = contracts.len(), network_id, "loaded contract artifacts");
    Ok(contracts)
}

/// Build artifacts backed by the node: unknown addresses are matched by their
/// deployed code.
pub struct ArtifactContracts {
    contracts: MemoryContracts,
    client: EthClient,
}

impl ArtifactContracts {
    pub fn new(contracts: MemoryContracts, client: EthClient) -> Self {
        Self { contracts, client }
    }

    /// Load `build_dir` for the network the client is connected to.
    pub async fn load(build_dir: &Path, client: EthClient) -> Result<Self, StackTraceError> {
        let network_id = client
            .network_id()
            .await
            .map_err(|e| StackTraceError::Artifacts(format!("fetching network id: {e}")))?;
        let contracts = load_artifacts(build_dir, &network_id)?;
        Ok(Self::new(contracts, client))
    }
}

#[async_trait]
impl ContractSource for ArtifactContracts {
    async fn get(&self, address: &str) -> Option<Arc<ContractDetails>> {
        if let Some(contract) = self.contracts.lookup(address) {
            return Some(contract);
        }

        let parsed: Address = match address.parse() {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(address, error = %e, "invalid contract address");
                return None;
            }
        };
        let code = match self.client.code(parsed, BlockTag::Latest).await {
            Ok(code) => code,
            Err(e) => {
                warn!(address, error = %e, "failed fetching code");
                return None;
            }
        };
        if !code.is_empty() {
            if let Some(contract) = self.contracts.find_by_code(&code) {
                return Some(contract);
            }
        }

        // Accounts without artifacts: opcodes resolve, nothing maps to source.
        // An account without code reads as STOP, which leaves its frame.
        Some(Arc::new(ContractDetails {
            address: address.to_lowercase(),
            deployed_bytecode: code.to_vec(),
            ..Default::default()
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn write_artifact(dir: &Path, file: &str, artifact: Value) {
        std::fs::write(dir.join(file), artifact.to_string()).unwrap();
    }

    #[test]
    fn loads_contracts_deployed_on_network() {
        let dir = tempfile::tempdir().unwrap();
        write_artifact(
            dir.path(),
            "Token.json",
            json!({
                "contractName": "Token",
                "abi": [],
                "bytecode": "0x6001",
                "deployedBytecode": "0x6001fd",
                "deployedSourceMap": "0:2:0:-;2:1:0",
                "source": "abc",
                "networks": {"5777": {"address": "0xAbCd000000000000000000000000000000000001"}}
            }),
        );
        write_artifact(
            dir.path(),
            "Other.json",
            json!({
                "contractName": "Other",
                "deployedBytecode": "0x00",
                "networks": {"1": {"address": "0x0000000000000000000000000000000000000002"}}
            }),
        );
        write_artifact(
            dir.path(),
            "Broken.json",
            json!({
                "contractName": "Broken",
                "deployedBytecode": "0xzz",
                "networks": {"5777": {"address": "0x0000000000000000000000000000000000000003"}}
            }),
        );
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let contracts = load_artifacts(dir.path(), "5777").unwrap();
        assert_eq!(contracts.len(), 1);

        let token = contracts
            .lookup("0xabcd000000000000000000000000000000000001")
            .unwrap();
        assert_eq!(token.name, "Token");
        assert_eq!(token.bytecode, vec![0x60, 0x01]);
        assert_eq!(token.source_map.get(2).map(|m| m.start), Some(2));
    }

    #[test]
    fn missing_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("build");
        assert!(matches!(
            load_artifacts(&missing, "1"),
            Err(StackTraceError::Artifacts(_))
        ));
    }
}
