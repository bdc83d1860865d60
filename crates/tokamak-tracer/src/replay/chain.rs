//! Fork schedule and block authorship.

use ethereum_types::{Address, H256};
use revm::primitives::SpecId;
use rlp::RlpStream;
use secp256k1::{Message, SECP256K1, ecdsa::RecoverableSignature, ecdsa::RecoveryId};
use serde::{Deserialize, Serialize};

use crate::error::ReplayError;
use crate::state::keccak;
use crate::types::BlockHeader;

/// Clique seal: 65-byte signature at the end of `extraData`.
const SEAL_LENGTH: usize = 65;

/// Fork activation of the replayed chain. Forks before London are assumed active.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainRules {
    /// Chain id for unprotected transactions; protected ones carry their own.
    /// Unset means `eth_chainId`, then the network id.
    pub chain_id: Option<u64>,
    pub london_block: Option<u64>,
    pub shanghai_time: Option<u64>,
    pub cancun_time: Option<u64>,
    pub prague_time: Option<u64>,
    /// Proof-of-authority chain: authors are recovered from the seal.
    pub clique: bool,
}

impl Default for ChainRules {
    fn default() -> Self {
        Self {
            chain_id: None,
            london_block: Some(0),
            shanghai_time: Some(0),
            cancun_time: Some(0),
            prague_time: None,
            clique: false,
        }
    }
}

fn active(activation: Option<u64>, at: u64) -> bool {
    activation.is_some_and(|activation| activation <= at)
}

impl ChainRules {
    pub fn is_london(&self, number: u64) -> bool {
        active(self.london_block, number)
    }

    pub fn spec_id(&self, number: u64, timestamp: u64) -> SpecId {
        if active(self.prague_time, timestamp) {
            SpecId::PRAGUE
        } else if active(self.cancun_time, timestamp) {
            SpecId::CANCUN
        } else if active(self.shanghai_time, timestamp) {
            SpecId::SHANGHAI
        } else if self.is_london(number) {
            SpecId::LONDON
        } else {
            SpecId::BERLIN
        }
    }
}

/// Beneficiary of a block: the coinbase, or the recovered clique signer when the
/// chain is clique and the coinbase is zero.
pub fn author(header: &BlockHeader, rules: &ChainRules) -> Result<Address, ReplayError> {
    if !rules.clique || !header.miner.is_zero() {
        return Ok(header.miner);
    }
    clique_signer(header)
}

/// Hash signed by a clique sealer: the header RLP with the seal cut from `extraData`.
pub fn seal_hash(header: &BlockHeader) -> Result<H256, ReplayError> {
    let extra = header.extra_data.as_ref();
    let Some(unsealed) = extra.len().checked_sub(SEAL_LENGTH) else {
        return Err(ReplayError::Author(format!(
            "extra data of block {} is too short for a seal",
            header.number
        )));
    };

    let fields = if header.base_fee_per_gas.is_some() { 16 } else { 15 };
    let mut stream = RlpStream::new_list(fields);
    stream.append(&header.parent_hash);
    stream.append(&header.sha3_uncles);
    stream.append(&header.miner);
    stream.append(&header.state_root);
    stream.append(&header.transactions_root);
    stream.append(&header.receipts_root);
    stream.append(&header.logs_bloom);
    stream.append(&header.difficulty);
    stream.append(&header.number);
    stream.append(&header.gas_limit);
    stream.append(&header.gas_used);
    stream.append(&header.timestamp);
    stream.append(&extra[..unsealed].to_vec());
    stream.append(&header.mix_hash);
    stream.append(&header.nonce);
    if let Some(base_fee) = &header.base_fee_per_gas {
        stream.append(base_fee);
    }

    Ok(keccak(&stream.out()))
}

fn clique_signer(header: &BlockHeader) -> Result<Address, ReplayError> {
    let hash = seal_hash(header)?;
    let extra = header.extra_data.as_ref();
    let seal = &extra[extra.len() - SEAL_LENGTH..];

    let recovery_id = RecoveryId::try_from(i32::from(seal[64]))
        .map_err(|e| ReplayError::Author(e.to_string()))?;
    let signature = RecoverableSignature::from_compact(&seal[..64], recovery_id)
        .map_err(|e| ReplayError::Author(e.to_string()))?;
    let public = SECP256K1
        .recover_ecdsa(&Message::from_digest(hash.0), &signature)
        .map_err(|e| ReplayError::Author(e.to_string()))?;

    let hash = keccak(&public.serialize_uncompressed()[1..]);
    Ok(Address::from_slice(&hash.as_bytes()[12..]))
}
