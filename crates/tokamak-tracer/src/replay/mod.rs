//! Re-execution of a mined transaction against a lazily loaded copy of its
//! parent state.
//!
//! The block's transactions up to and including the target are applied in order.
//! A preceding transaction whose state could not be loaded is reverted and retried
//! once, then skipped; the target gets the same retry but a second failure is
//! returned. Unless forced, every applied transaction must use exactly the gas its
//! receipt reports.

mod chain;
mod env;

pub use chain::{ChainRules, author, seal_hash};
pub use env::{block_env, tx_env};

use std::collections::BTreeMap;

use bytes::Bytes;
use ethereum_types::{Address, H256, U256};
use revm::Evm;
use revm::primitives::{BlockEnv, ResultAndState, SpecId};
use serde::Serialize;
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use crate::client::EthClient;
use crate::error::{ReplayError, StateError};
use crate::serde_utils::{hex_bytes, quantity};
use crate::state::{Account, RemoteState, StateReplica, StateSource};
use crate::types::{BlockHeader, Transaction};

/// Pre-state of one account the target transaction used.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TouchedAccount {
    pub address: Address,
    #[serde(with = "quantity::hex_str")]
    pub nonce: u64,
    pub balance: U256,
    pub code_hash: H256,
    #[serde(with = "hex_bytes")]
    pub code: Bytes,
    pub storage: BTreeMap<H256, H256>,
}

impl From<&Account> for TouchedAccount {
    fn from(account: &Account) -> Self {
        Self {
            address: account.address,
            nonce: account.original_nonce,
            balance: account.original_balance,
            code_hash: account.original_code_hash,
            code: account.original_code(),
            storage: account
                .origin_storage
                .iter()
                .map(|(slot, value)| (*slot, *value))
                .collect(),
        }
    }
}

/// Outcome of a replay: what the target did and which state it depended on.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionState {
    #[serde(with = "quantity::hex_str")]
    pub gas_used: u64,
    pub success: bool,
    pub touched_accounts: Vec<TouchedAccount>,
    pub touched_headers: Vec<BlockHeader>,
}

/// Block-wide execution parameters.
#[derive(Debug, Clone)]
pub struct BlockContext {
    pub header: BlockHeader,
    pub author: Address,
    pub spec_id: SpecId,
    pub chain_id: u64,
}

impl BlockContext {
    fn env(&self) -> BlockEnv {
        block_env(&self.header, self.author, self.spec_id)
    }
}

/// A transaction to apply with the gas its receipt reports.
#[derive(Debug, Clone)]
pub struct ReplayTx {
    pub tx: Transaction,
    pub receipt_gas: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Outcome {
    gas_used: u64,
    success: bool,
}

#[derive(Clone)]
pub struct Replayer {
    client: EthClient,
    rules: ChainRules,
}

impl Replayer {
    pub fn new(client: EthClient, rules: ChainRules) -> Self {
        Self { client, rules }
    }

    pub fn client(&self) -> &EthClient {
        &self.client
    }

    /// Replay the transaction `hash` on top of its block's parent state.
    pub async fn process_transaction(
        &self,
        hash: H256,
        force: bool,
    ) -> Result<TransactionState, ReplayError> {
        let tx = self
            .client
            .transaction(hash)
            .await?
            .ok_or(ReplayError::TransactionNotFound(hash))?;
        let receipt = self
            .client
            .transaction_receipt(hash)
            .await?
            .ok_or(ReplayError::ReceiptNotFound(hash))?;
        let number = receipt.block_number;
        let block = self
            .client
            .block_by_number(number)
            .await?
            .ok_or(ReplayError::BlockNotFound(number))?;
        let header = self
            .client
            .header_by_hash(block.header.hash)
            .await?
            .ok_or(ReplayError::BlockNotFound(number))?;

        let index = block
            .transactions
            .iter()
            .position(|candidate| candidate.hash == hash)
            .ok_or(ReplayError::NotInBlock {
                hash,
                block_number: number,
            })?;

        if self.rules.is_london(number) && header.base_fee_per_gas.is_none() {
            return Err(ReplayError::MissingBaseFee(number));
        }
        let author = author(&header, &self.rules)?;
        let spec_id = self.rules.spec_id(number, header.timestamp);
        let chain_id = self.chain_id(&tx).await;

        info!(tx = ?hash, block = number, index, ?spec_id, "replaying transaction");

        let mut txs = Vec::with_capacity(index + 1);
        for (i, preceding) in block.transactions.into_iter().take(index + 1).enumerate() {
            let receipt_gas = if i == index {
                receipt.gas_used
            } else {
                self.client
                    .transaction_receipt(preceding.hash)
                    .await?
                    .ok_or(ReplayError::ReceiptNotFound(preceding.hash))?
                    .gas_used
            };
            txs.push(ReplayTx {
                tx: preceding,
                receipt_gas,
            });
        }

        let context = BlockContext {
            header,
            author,
            spec_id,
            chain_id,
        };
        let client = self.client.clone();
        let runtime = Handle::current();
        tokio::task::spawn_blocking(move || {
            let mut state = StateReplica::new(RemoteState::new(client, runtime, number));
            apply_transactions(&mut state, &context, &txs, force)
        })
        .await
        .map_err(|e| ReplayError::Join(e.to_string()))?
    }

    /// Chain id the engine validates `tx` against: the transaction's own id,
    /// then the configured one, then `eth_chainId`. Only unprotected
    /// transactions reach the network id fallback, where the value is unchecked.
    async fn chain_id(&self, tx: &Transaction) -> u64 {
        if let Some(chain_id) = tx.chain_id.or(self.rules.chain_id) {
            return chain_id;
        }
        match self.client.chain_id().await {
            Ok(chain_id) => return chain_id,
            Err(e) => debug!(error = %e, "eth_chainId unavailable, trying network id"),
        }
        match self.client.network_id().await {
            Ok(id) => match id.parse() {
                Ok(chain_id) => return chain_id,
                Err(_) => debug!(network_id = %id, "network id is not numeric"),
            },
            Err(e) => warn!(error = %e, "failed fetching network id"),
        }
        1
    }
}

/// Apply `txs` in order; the last one is the target whose state is returned.
pub(crate) fn apply_transactions<S: StateSource>(
    state: &mut StateReplica<S>,
    block: &BlockContext,
    txs: &[ReplayTx],
    force: bool,
) -> Result<TransactionState, ReplayError> {
    let Some((target, preceding)) = txs.split_last() else {
        return Err(ReplayError::TransactionNotFound(H256::zero()));
    };

    let mut current = block.header.clone();
    current.miner = block.author;
    state.insert_header(current);
    let env = block.env();

    for (index, replay) in preceding.iter().enumerate() {
        match apply_with_retry(state, block, &env, replay, index)? {
            Ok(outcome) => {
                check_gas(replay, outcome, force)?;
                state.finalise();
            }
            Err(err) => {
                let context = state.context();
                warn!(tx = ?context.tx_hash, index = context.tx_index, %err, "skipping transaction, state unavailable");
            }
        }
    }

    let outcome = apply_with_retry(state, block, &env, target, preceding.len())??;
    check_gas(target, outcome, force)?;

    let result = TransactionState {
        gas_used: outcome.gas_used,
        success: outcome.success,
        touched_accounts: state
            .used_accounts()
            .into_iter()
            .map(TouchedAccount::from)
            .collect(),
        touched_headers: state.touched_headers().into_iter().cloned().collect(),
    };
    state.finalise();
    Ok(result)
}

/// Execute one transaction. A state fetch failure reverts it and retries once;
/// after the second failure the state error is handed back to the caller.
fn apply_with_retry<S: StateSource>(
    state: &mut StateReplica<S>,
    block: &BlockContext,
    env: &BlockEnv,
    replay: &ReplayTx,
    index: usize,
) -> Result<Result<Outcome, StateError>, ReplayError> {
    let hash = replay.tx.hash;
    let mut retried = false;
    loop {
        state.prepare(hash, block.header.hash, index);
        let snapshot = state.snapshot();
        let executed = execute(state, block, env, &replay.tx);

        match state.take_error() {
            Some(err) => {
                state.revert_to_snapshot(snapshot);
                if retried {
                    return Ok(Err(err));
                }
                debug!(tx = ?hash, %err, "state fetch failed, retrying transaction");
                retried = true;
            }
            None => {
                return executed
                    .map(Ok)
                    .map_err(|cause| ReplayError::Execution { hash, cause });
            }
        }
    }
}

fn execute<S: StateSource>(
    state: &mut StateReplica<S>,
    block: &BlockContext,
    env: &BlockEnv,
    tx: &Transaction,
) -> Result<Outcome, String> {
    let transacted = {
        let mut evm = Evm::builder()
            .with_block_env(env.clone())
            .with_tx_env(tx_env(tx))
            .modify_cfg_env(|cfg| {
                cfg.chain_id = block.chain_id;
            })
            .with_spec_id(block.spec_id)
            .with_db(&mut *state)
            .build();
        evm.transact()
    };
    let ResultAndState { result, state: diff } = transacted.map_err(|e| e.to_string())?;
    state.apply_diff(diff);

    debug!(tx = ?tx.hash, gas_used = result.gas_used(), success = result.is_success(), "applied transaction");
    Ok(Outcome {
        gas_used: result.gas_used(),
        success: result.is_success(),
    })
}

fn check_gas(replay: &ReplayTx, outcome: Outcome, force: bool) -> Result<(), ReplayError> {
    if outcome.gas_used == replay.receipt_gas {
        return Ok(());
    }
    if force {
        warn!(
            tx = ?replay.tx.hash,
            expected = replay.receipt_gas,
            actual = outcome.gas_used,
            "gas mismatch ignored"
        );
        return Ok(());
    }
    Err(ReplayError::GasMismatch {
        hash: replay.tx.hash,
        expected: replay.receipt_gas,
        actual: outcome.gas_used,
    })
}
