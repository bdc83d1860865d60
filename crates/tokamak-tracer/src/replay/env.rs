//! Engine environments built from node data.

use ethereum_types::Address;
use revm::primitives::{
    AccessListItem as RevmAccessListItem, B256, BlobExcessGasAndPrice, BlockEnv,
    Bytes as RevmBytes, SpecId, TxEnv, TxKind as RevmTxKind, U256 as RevmU256,
};

use crate::state::{to_revm_address, to_revm_u256};
use crate::types::{BlockHeader, Transaction};

/// Block environment with `author` as the beneficiary. A header without a base
/// fee (pre-London) executes with a zero base fee.
pub fn block_env(header: &BlockHeader, author: Address, spec_id: SpecId) -> BlockEnv {
    BlockEnv {
        number: RevmU256::from(header.number),
        coinbase: to_revm_address(author),
        timestamp: RevmU256::from(header.timestamp),
        gas_limit: RevmU256::from(header.gas_limit),
        basefee: header
            .base_fee_per_gas
            .map(to_revm_u256)
            .unwrap_or_default(),
        difficulty: to_revm_u256(header.difficulty),
        prevrandao: Some(B256::from(header.mix_hash.0)),
        blob_excess_gas_and_price: Some(BlobExcessGasAndPrice::new(
            header.excess_blob_gas.unwrap_or_default(),
            spec_id >= SpecId::PRAGUE,
        )),
    }
}

pub fn tx_env(tx: &Transaction) -> TxEnv {
    let (fee_cap, tip_cap) = tx.fee_caps();
    TxEnv {
        caller: to_revm_address(tx.from),
        gas_limit: tx.gas,
        gas_price: to_revm_u256(fee_cap),
        transact_to: match tx.to {
            Some(to) => RevmTxKind::Call(to_revm_address(to)),
            None => RevmTxKind::Create,
        },
        value: to_revm_u256(tx.value),
        data: RevmBytes::from(tx.input.clone()),
        nonce: Some(tx.nonce),
        chain_id: tx.chain_id,
        access_list: tx
            .access_list
            .iter()
            .flatten()
            .map(|item| RevmAccessListItem {
                address: to_revm_address(item.address),
                storage_keys: item
                    .storage_keys
                    .iter()
                    .map(|key| B256::from(key.0))
                    .collect(),
            })
            .collect(),
        gas_priority_fee: tip_cap.map(to_revm_u256),
        ..Default::default()
    }
}
